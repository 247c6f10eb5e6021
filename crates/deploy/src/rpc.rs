//! Ethereum JSON-RPC access and the [`ChainProbe`] built on it.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64, U128};
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    network::NetworkProfile,
    probe::{ChainProbe, Receipt, RawTransaction, TxParams},
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    /// Absent on pre-Byzantium chains.
    status: Option<U64>,
    contract_address: Option<Address>,
}

impl From<RpcReceipt> for Receipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            success: receipt.status.is_none_or(|s| s == U64::from(1)),
            deployed_address: receipt.contract_address,
        }
    }
}

/// [`ChainProbe`] speaking JSON-RPC over HTTP to each network's endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcProbe {
    client: reqwest::Client,
}

impl JsonRpcProbe {
    pub fn new() -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        network: &NetworkProfile,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, anyhow::Error> {
        json_rpc_call(&self.client, network.endpoint.as_str(), method, params)
            .await
            .with_context(|| format!("{} on network {}", method, network.name))
    }
}

impl ChainProbe for JsonRpcProbe {
    async fn code_at(
        &self,
        address: Address,
        network: &NetworkProfile,
    ) -> Result<Bytes, anyhow::Error> {
        self.call(
            network,
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn tx_params(
        &self,
        from: Address,
        network: &NetworkProfile,
    ) -> Result<TxParams, anyhow::Error> {
        let nonce: U64 = self
            .call(
                network,
                "eth_getTransactionCount",
                vec![serde_json::json!(from), serde_json::json!("pending")],
            )
            .await?;
        let gas_price: U128 = self.call(network, "eth_gasPrice", vec![]).await?;
        let chain_id: U64 = self.call(network, "eth_chainId", vec![]).await?;

        Ok(TxParams {
            nonce: nonce.to(),
            gas_price: gas_price.to(),
            chain_id: chain_id.to(),
        })
    }

    async fn send(
        &self,
        tx: &RawTransaction,
        network: &NetworkProfile,
    ) -> Result<B256, anyhow::Error> {
        let tx_hash: B256 = match tx {
            RawTransaction::Signed(raw) => {
                self.call(
                    network,
                    "eth_sendRawTransaction",
                    vec![serde_json::json!(raw)],
                )
                .await?
            }
            RawTransaction::Unsigned(tx) => {
                let request = serde_json::json!({
                    "from": tx.from,
                    "to": tx.to,
                    "data": tx.data,
                    "value": format!("0x{:x}", tx.value),
                    "gas": format!("0x{:x}", tx.gas_limit),
                    "gasPrice": format!("0x{:x}", tx.gas_price),
                    "nonce": format!("0x{:x}", tx.nonce),
                });
                self.call(network, "eth_sendTransaction", vec![request])
                    .await?
            }
        };

        tracing::info!(tx_hash = %tx_hash, network = %network.name, "Deployment transaction sent");
        Ok(tx_hash)
    }

    async fn receipt(
        &self,
        tx_hash: B256,
        network: &NetworkProfile,
    ) -> Result<Option<Receipt>, anyhow::Error> {
        let receipt: Option<RpcReceipt> = self
            .call(
                network,
                "eth_getTransactionReceipt",
                vec![serde_json::json!(tx_hash)],
            )
            .await?;
        Ok(receipt.map(Receipt::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_creation_receipt() {
        let receipt: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": format!("0x{}", "11".repeat(32)),
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "blockNumber": "0x1"
        }))
        .unwrap();

        let receipt = Receipt::from(receipt);
        assert!(receipt.success);
        assert_eq!(receipt.tx_hash, B256::repeat_byte(0x11));
        assert!(receipt.deployed_address.is_some());
    }

    #[test]
    fn test_parse_reverted_factory_receipt() {
        let receipt: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": format!("0x{}", "22".repeat(32)),
            "status": "0x0",
            "contractAddress": null
        }))
        .unwrap();

        let receipt = Receipt::from(receipt);
        assert!(!receipt.success);
        assert_eq!(receipt.deployed_address, None);
    }

    #[test]
    fn test_parse_quantities() {
        let nonce: U64 = serde_json::from_value(serde_json::json!("0x1a")).unwrap();
        let code: Bytes = serde_json::from_value(serde_json::json!("0x")).unwrap();
        assert_eq!(nonce.to::<u64>(), 26);
        assert!(code.is_empty());
    }
}
