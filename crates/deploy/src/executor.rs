//! Exactly-once transaction execution keyed by operation id.

use alloy_core::primitives::{B256, Bytes};

use crate::chain::{ChainClient, RpcError, TxReceipt};
use crate::error::{Error, Result};
use crate::ledger::DeploymentLedger;

/// Decodes a raw revert payload into a human-readable message.
///
/// Registered decoders are tried in order against the `data` field of a
/// failed RPC call. Typical implementations understand `Error(string)` or a
/// project's custom error selectors.
pub trait RevertDecoder {
    fn decode(&self, data: &Bytes) -> Option<String>;
}

/// Decoder for the standard solidity `Error(string)` revert payload.
pub struct SolidityRevertDecoder;

/// `keccak256("Error(string)")[..4]`
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

impl RevertDecoder for SolidityRevertDecoder {
    fn decode(&self, data: &Bytes) -> Option<String> {
        // selector (4) + offset (32) + length (32) + payload
        if data.len() < 68 || data[..4] != ERROR_STRING_SELECTOR {
            return None;
        }
        let len = usize::try_from(u64::from_be_bytes(data[60..68].try_into().ok()?)).ok()?;
        let payload = data.get(68..68 + len)?;
        String::from_utf8(payload.to_vec()).ok()
    }
}

/// Executes mutating transactions with at-most-once broadcast semantics.
///
/// When an operation id is supplied, the broadcast hash is recorded in the
/// ledger before the confirmation wait begins. A rerun after a crash finds
/// the recorded hash and resumes waiting on it instead of broadcasting the
/// transaction a second time.
pub struct TxExecutor<'a, C> {
    chain: &'a C,
    decoders: Vec<Box<dyn RevertDecoder + Send + Sync>>,
}

impl<'a, C: ChainClient> TxExecutor<'a, C> {
    pub fn new(chain: &'a C) -> Self {
        Self {
            chain,
            decoders: vec![Box::new(SolidityRevertDecoder)],
        }
    }

    /// Register an additional revert decoder, tried after the built-in ones.
    pub fn with_decoder(mut self, decoder: Box<dyn RevertDecoder + Send + Sync>) -> Self {
        self.decoders.push(decoder);
        self
    }

    /// Execute a mutating transaction exactly once.
    ///
    /// `broadcast` is only invoked when no transaction hash is recorded for
    /// `operation_id` (or when no id is given at all). The returned receipt
    /// is guaranteed to describe a successful transaction; reverts surface as
    /// [`Error::TransactionFailed`].
    pub async fn execute<F, Fut>(
        &self,
        ledger: &mut DeploymentLedger,
        operation_id: Option<&str>,
        broadcast: F,
    ) -> Result<TxReceipt>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<B256>>,
    {
        if let Some(id) = operation_id
            && ledger.has_operation(id)
        {
            return self.resume(ledger, id).await;
        }

        let hash = broadcast().await.map_err(|err| self.describe_revert(err))?;

        if let Some(id) = operation_id {
            // Persist the hash before the wait: a crash during confirmation
            // must leave the id resumable rather than re-broadcastable.
            ledger.record_operation(id, hash)?;
            tracing::info!(operation = id, tx = %hash, "Operation broadcast");
        } else {
            tracing::info!(tx = %hash, "Transaction broadcast");
        }

        self.settle(hash).await
    }

    /// Resume waiting on a previously broadcast operation.
    async fn resume(&self, ledger: &DeploymentLedger, id: &str) -> Result<TxReceipt> {
        let hash = ledger.operation_hash(id)?;
        tracing::info!(operation = id, tx = %hash, "Operation already broadcast, resuming");

        if !self.chain.transaction_exists(hash).await? {
            return Err(Error::TransactionLost(hash));
        }

        self.settle(hash).await
    }

    async fn settle(&self, hash: B256) -> Result<TxReceipt> {
        let receipt = self.chain.wait_for_receipt(hash).await?;
        if !receipt.succeeded() {
            return Err(Error::TransactionFailed(Box::new(receipt)));
        }
        Ok(receipt)
    }

    /// Log a decoded revert reason when the node included a revert payload.
    /// The original error is always re-raised unchanged.
    fn describe_revert(&self, err: anyhow::Error) -> Error {
        let data = err
            .downcast_ref::<RpcError>()
            .and_then(|rpc| rpc.data.clone());
        if let Some(data) = data {
            for decoder in &self.decoders {
                if let Some(reason) = decoder.decode(&data) {
                    tracing::warn!(reason = %reason, "Broadcast reverted");
                    break;
                }
            }
        }
        Error::Other(err)
    }
}
