//! Network client collaborator: transaction lookup, confirmation waits and
//! broadcast over Ethereum JSON-RPC.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default timeout for a single RPC request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between polling attempts while waiting for confirmation.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Receipt of a mined transaction, as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    /// Post-Byzantium status field: `0x1` for success, `0x0` for revert.
    pub status: Option<String>,
    /// Address of the created contract, for deployment transactions.
    pub contract_address: Option<Address>,
    pub block_number: Option<String>,
    pub gas_used: Option<String>,
}

impl TxReceipt {
    /// Whether the transaction executed successfully.
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1"))
    }

    /// Block number the transaction was included in, if present.
    pub fn block_number(&self) -> Option<u64> {
        parse_hex_u64(self.block_number.as_deref()?)
    }
}

/// Error body returned by a JSON-RPC endpoint.
///
/// `data` carries the raw revert payload when the node includes one, so
/// callers can attempt to decode a structured revert reason.
#[derive(Debug, thiserror::Error)]
#[error("RPC error: {message}")]
pub struct RpcError {
    pub message: String,
    pub data: Option<Bytes>,
}

/// Read access to the network, as required by the deployment engine.
///
/// The engine only ever resolves hashes to transaction state and waits for
/// confirmations through this trait; broadcasting goes through the artifact
/// factory collaborator.
pub trait ChainClient {
    /// Stable identifier of the active network, used to scope durable state.
    fn chain_id(&self) -> u64;

    /// Whether the network knows the transaction at all (pending or mined).
    fn transaction_exists(
        &self,
        hash: B256,
    ) -> impl std::future::Future<Output = anyhow::Result<bool>>;

    /// Receipt for a mined transaction, or `None` while it is still pending.
    fn transaction_receipt(
        &self,
        hash: B256,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<TxReceipt>>>;

    /// Block until the transaction is mined and settled, then return its
    /// receipt.
    fn wait_for_receipt(
        &self,
        hash: B256,
    ) -> impl std::future::Future<Output = anyhow::Result<TxReceipt>>;
}

/// JSON-RPC implementation of [`ChainClient`] over HTTP.
pub struct HttpChain {
    client: reqwest::Client,
    url: String,
    chain_id: u64,
    confirmations: u64,
    poll_interval: Duration,
}

impl HttpChain {
    /// Connect to an RPC endpoint and resolve its chain id.
    pub async fn connect(url: &str, confirmations: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let id_hex: String = json_rpc_call(&client, url, "eth_chainId", vec![]).await?;
        let chain_id = parse_hex_u64(&id_hex)
            .with_context(|| format!("Failed to parse chain id `{}`", id_hex))?;

        tracing::debug!(url = %url, chain_id, "Connected to RPC endpoint");

        Ok(Self {
            client,
            url: url.to_string(),
            chain_id,
            confirmations,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Broadcast a transaction from a node-managed account.
    ///
    /// Returns the transaction hash without waiting for inclusion.
    pub async fn send_transaction(
        &self,
        from: Address,
        data: &str,
        gas_price: Option<u128>,
    ) -> anyhow::Result<B256> {
        let mut tx = serde_json::json!({
            "from": from,
            "data": data,
        });
        if let Some(price) = gas_price {
            tx["gasPrice"] = Value::String(format!("0x{:x}", price));
        }

        json_rpc_call(&self.client, &self.url, "eth_sendTransaction", vec![tx])
            .await
            .context("Failed to broadcast transaction")
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        let hex: String =
            json_rpc_call(&self.client, &self.url, "eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex).with_context(|| format!("Failed to parse block number `{}`", hex))
    }
}

impl ChainClient for HttpChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn transaction_exists(&self, hash: B256) -> anyhow::Result<bool> {
        let tx: Option<Value> = json_rpc_call(
            &self.client,
            &self.url,
            "eth_getTransactionByHash",
            vec![serde_json::json!(hash)],
        )
        .await?;
        Ok(tx.is_some())
    }

    async fn transaction_receipt(&self, hash: B256) -> anyhow::Result<Option<TxReceipt>> {
        json_rpc_call(
            &self.client,
            &self.url,
            "eth_getTransactionReceipt",
            vec![serde_json::json!(hash)],
        )
        .await
    }

    async fn wait_for_receipt(&self, hash: B256) -> anyhow::Result<TxReceipt> {
        let receipt = loop {
            if let Some(receipt) = self.transaction_receipt(hash).await? {
                break receipt;
            }
            tracing::trace!(tx = %hash, "Transaction not yet mined, polling...");
            tokio::time::sleep(self.poll_interval).await;
        };

        // Wait out the configured confirmation depth before treating the
        // transaction as settled.
        if self.confirmations > 1 {
            let mined_at = receipt
                .block_number()
                .context("Receipt is missing a block number")?;
            let settled_at = mined_at + self.confirmations - 1;
            loop {
                if self.block_number().await? >= settled_at {
                    break;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Ok(receipt)
    }
}

/// Make a JSON-RPC call and deserialize the result.
///
/// An error response body is surfaced as an [`RpcError`] carrying the
/// provider's message and any revert payload.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> anyhow::Result<T> {
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
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = error
            .get("data")
            .and_then(|d| d.as_str())
            .and_then(|d| d.parse::<Bytes>().ok());
        return Err(RpcError { message, data }.into());
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

fn parse_hex_u64(hex: &str) -> Option<u64> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}
