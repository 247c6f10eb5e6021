//! Transaction signing.
//!
//! Accounts backed by a local key get an EIP-155 legacy transaction signed in
//! process. Node-managed accounts are forwarded unsigned.

use alloy_core::{
    primitives::{B256, U256, keccak256},
    rlp::{Encodable, Header},
};
use anyhow::{Context, Result};
use k256::ecdsa::{RecoveryId, Signature};

use crate::{
    network::Account,
    probe::{DeploymentTx, RawTransaction},
};

/// Produces broadcastable transactions for an account.
pub trait Signer: Send + Sync {
    fn sign(&self, tx: &DeploymentTx, account: &Account) -> Result<RawTransaction>;
}

/// Signs with the account key when present, otherwise defers to the node.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountSigner;

impl Signer for AccountSigner {
    fn sign(&self, tx: &DeploymentTx, account: &Account) -> Result<RawTransaction> {
        if tx.from != account.address {
            anyhow::bail!(
                "Transaction sender {} does not match account {}",
                tx.from,
                account.address
            );
        }

        let Some(key) = &account.key else {
            tracing::debug!(account = %account.address, "No local key, deferring signing to node");
            return Ok(RawTransaction::Unsigned(tx.clone()));
        };

        let hash = signing_hash(tx);
        let (signature, recovery_id): (Signature, RecoveryId) = key
            .credential()
            .sign_prehash_recoverable(hash.as_slice())
            .context("Failed to sign deployment transaction")?;

        let sig_bytes = signature.to_bytes();
        let r = U256::from_be_slice(&sig_bytes[..32]);
        let s = U256::from_be_slice(&sig_bytes[32..]);
        let v = tx.chain_id * 2 + 35 + u64::from(recovery_id.to_byte());

        Ok(RawTransaction::Signed(encode_signed(tx, v, r, s).into()))
    }
}

fn encode_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

fn encode_common(tx: &DeploymentTx) -> Vec<u8> {
    let mut payload = Vec::new();
    tx.nonce.encode(&mut payload);
    tx.gas_price.encode(&mut payload);
    tx.gas_limit.encode(&mut payload);
    tx.to.encode(&mut payload);
    tx.value.encode(&mut payload);
    tx.data.encode(&mut payload);
    payload
}

/// EIP-155 signing hash: `keccak256(rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0]))`.
pub fn signing_hash(tx: &DeploymentTx) -> B256 {
    let mut payload = encode_common(tx);
    tx.chain_id.encode(&mut payload);
    0u8.encode(&mut payload);
    0u8.encode(&mut payload);
    keccak256(encode_list(payload))
}

fn encode_signed(tx: &DeploymentTx, v: u64, r: U256, s: U256) -> Vec<u8> {
    let mut payload = encode_common(tx);
    v.encode(&mut payload);
    r.encode(&mut payload);
    s.encode(&mut payload);
    encode_list(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{Address, Bytes, address};
    use alloy_signer_local::PrivateKeySigner;

    fn eip155_example() -> (DeploymentTx, Account) {
        let key: PrivateKeySigner =
            "0x4646464646464646464646464646464646464646464646464646464646464646"
                .parse()
                .unwrap();
        let account = Account::local(key);
        let tx = DeploymentTx {
            from: account.address,
            to: address!("3535353535353535353535353535353535353535"),
            value: 1_000_000_000_000_000_000,
            data: Bytes::new(),
            gas_limit: 21_000,
            nonce: 9,
            gas_price: 20_000_000_000,
            chain_id: 1,
        };
        (tx, account)
    }

    #[test]
    fn test_eip155_signing_hash() {
        let (tx, _) = eip155_example();
        assert_eq!(
            hex::encode(signing_hash(&tx)),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_eip155_signed_transaction() {
        let (tx, account) = eip155_example();
        let RawTransaction::Signed(raw) = AccountSigner.sign(&tx, &account).unwrap() else {
            panic!("Expected a signed transaction");
        };

        assert_eq!(
            hex::encode(&raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a7640000\
             8025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f\
             761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_raw_hash_matches_signed_bytes() {
        let (tx, account) = eip155_example();
        let raw = AccountSigner.sign(&tx, &account).unwrap();
        let RawTransaction::Signed(bytes) = &raw else {
            panic!("Expected a signed transaction");
        };
        assert_eq!(raw.tx_hash(), Some(keccak256(bytes)));
    }

    #[test]
    fn test_remote_account_is_forwarded_unsigned() {
        let (mut tx, _) = eip155_example();
        let account = Account::remote(Address::repeat_byte(0x22));
        tx.from = account.address;

        assert_eq!(
            AccountSigner.sign(&tx, &account).unwrap(),
            RawTransaction::Unsigned(tx)
        );
    }

    #[test]
    fn test_sender_mismatch() {
        let (mut tx, account) = eip155_example();
        tx.from = Address::ZERO;
        assert!(AccountSigner.sign(&tx, &account).is_err());
    }
}
