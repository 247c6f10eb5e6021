//! Chain access used by the executor: code lookups and transaction submission.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, keccak256};
use anyhow::Result;
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::network::NetworkProfile;

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub success: bool,
    /// Set for contract-creation transactions. Calls into a CREATE2 factory
    /// leave it empty.
    pub deployed_address: Option<Address>,
}

/// Chain-derived parameters needed to build a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxParams {
    pub nonce: u64,
    pub gas_price: u128,
    pub chain_id: u64,
}

/// An unsigned deployment transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTx {
    pub from: Address,
    /// The CREATE2 factory.
    pub to: Address,
    pub value: u128,
    pub data: Bytes,
    pub gas_limit: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub chain_id: u64,
}

/// A transaction ready to be broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTransaction {
    /// RLP-encoded, signed transaction (`eth_sendRawTransaction`).
    Signed(Bytes),
    /// Transaction to be signed by the node (`eth_sendTransaction`).
    Unsigned(DeploymentTx),
}

impl RawTransaction {
    /// Hash of a signed transaction, known before broadcasting it.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            RawTransaction::Signed(raw) => Some(keccak256(raw)),
            RawTransaction::Unsigned(_) => None,
        }
    }
}

/// Read and write access to chain state.
///
/// Implementations report transport problems as errors; the executor applies
/// timeouts and turns errors into failed records.
pub trait ChainProbe: Send + Sync {
    /// Runtime code at `address`. Empty when no contract exists.
    fn code_at(
        &self,
        address: Address,
        network: &NetworkProfile,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Nonce, gas price and chain id for a transaction sent by `from`.
    fn tx_params(
        &self,
        from: Address,
        network: &NetworkProfile,
    ) -> impl Future<Output = Result<TxParams>> + Send;

    /// Broadcast a transaction and return its hash without waiting for inclusion.
    fn send(
        &self,
        tx: &RawTransaction,
        network: &NetworkProfile,
    ) -> impl Future<Output = Result<B256>> + Send;

    /// Receipt of a transaction, or `None` while it is not mined.
    fn receipt(
        &self,
        tx_hash: B256,
        network: &NetworkProfile,
    ) -> impl Future<Output = Result<Option<Receipt>>> + Send;

    /// Poll [`ChainProbe::receipt`] until the transaction is mined.
    ///
    /// Never gives up on its own; callers bound it with a timeout.
    fn wait_receipt(
        &self,
        tx_hash: B256,
        network: &NetworkProfile,
        poll_interval: Duration,
    ) -> impl Future<Output = Result<Receipt>> + Send {
        async move {
            let poll = || async {
                self.receipt(tx_hash, network)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Transaction {tx_hash} not mined yet"))
            };

            poll.retry(
                ConstantBuilder::default()
                    .with_delay(poll_interval)
                    .without_max_times(),
            )
            .notify(|err, _| tracing::trace!(error = %err, "Waiting for receipt..."))
            .await
        }
    }

    /// Broadcast a transaction and wait for its receipt.
    fn submit(
        &self,
        tx: &RawTransaction,
        network: &NetworkProfile,
        poll_interval: Duration,
    ) -> impl Future<Output = Result<Receipt>> + Send {
        async move {
            let tx_hash = self.send(tx, network).await?;
            self.wait_receipt(tx_hash, network, poll_interval).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::network::{Account, ResourceLimits};
    use url::Url;

    /// Mines the transaction after a fixed number of receipt polls.
    #[derive(Default)]
    struct SlowChain {
        polls_until_mined: u32,
        polls: Mutex<u32>,
        sent: Mutex<Vec<RawTransaction>>,
    }

    impl ChainProbe for SlowChain {
        async fn code_at(&self, _address: Address, _network: &NetworkProfile) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        async fn tx_params(&self, _from: Address, _network: &NetworkProfile) -> Result<TxParams> {
            Ok(TxParams {
                nonce: 0,
                gas_price: 1,
                chain_id: 1,
            })
        }

        async fn send(&self, tx: &RawTransaction, _network: &NetworkProfile) -> Result<B256> {
            self.sent.lock().unwrap().push(tx.clone());
            Ok(B256::repeat_byte(0xaa))
        }

        async fn receipt(&self, tx_hash: B256, _network: &NetworkProfile) -> Result<Option<Receipt>> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            Ok((*polls > self.polls_until_mined).then_some(Receipt {
                tx_hash,
                success: true,
                deployed_address: None,
            }))
        }
    }

    fn network() -> NetworkProfile {
        NetworkProfile {
            name: "local".to_string(),
            endpoint: Url::parse("http://127.0.0.1:8545").unwrap(),
            resource_limits: ResourceLimits::default(),
            accounts: vec![Account::remote(Address::repeat_byte(1))],
            create2_factory: crate::network::DEFAULT_CREATE2_FACTORY,
        }
    }

    #[tokio::test]
    async fn test_submit_polls_until_mined() {
        let chain = SlowChain {
            polls_until_mined: 3,
            ..Default::default()
        };
        let tx = RawTransaction::Signed(Bytes::from_static(&[0xf8, 0x00]));

        let receipt = chain
            .submit(&tx, &network(), Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(receipt.tx_hash, B256::repeat_byte(0xaa));
        assert!(receipt.success);
        assert_eq!(*chain.polls.lock().unwrap(), 4);
        assert_eq!(chain.sent.lock().unwrap().as_slice(), &[tx]);
    }

    #[tokio::test]
    async fn test_wait_receipt_is_bounded_by_caller() {
        let chain = SlowChain {
            polls_until_mined: u32::MAX,
            ..Default::default()
        };

        let network = network();
        let wait = chain.wait_receipt(B256::ZERO, &network, Duration::from_millis(1));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), wait)
                .await
                .is_err()
        );
        assert!(*chain.polls.lock().unwrap() > 1);
    }
}
