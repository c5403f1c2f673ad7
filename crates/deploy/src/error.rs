//! Error taxonomy for the deployment engine.

use alloy_core::primitives::B256;

use crate::chain::TxReceipt;

/// Errors surfaced by the deployment engine.
///
/// Deployment-path errors are fatal to the current run: the correct recovery is
/// to fix the cause and re-run the script, relying on ledger-driven resumption
/// to skip completed work.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A broadcast transaction was mined but reverted. Carries the receipt.
    ///
    /// If the transaction was executed under an operation id, the id stays
    /// recorded in the ledger: the operator must clear the stale record by
    /// hand before the operation can be re-attempted. Automatic clearing is
    /// deliberately not performed, so a genuinely broken operation cannot be
    /// masked by silent retries.
    #[error("transaction {hash} reverted", hash = .0.transaction_hash)]
    TransactionFailed(Box<TxReceipt>),

    /// A previously recorded transaction hash can no longer be found on the
    /// network (dropped from the mempool, or the ledger references a
    /// transaction from another chain). Requires operator intervention.
    #[error("transaction {0} not found on the network")]
    TransactionLost(B256),

    /// The same operation id was recorded twice in one run. Always a defect:
    /// the idempotent-skip path should have been taken instead.
    #[error("operation `{0}` is already recorded in the ledger")]
    AlreadyRecorded(String),

    /// An address or operation was queried before being recorded.
    #[error("{0} not found in the deployment ledger")]
    NotFound(String),

    /// A library name could not be resolved to a deployed address.
    #[error("no known address for library `{0}`")]
    UnknownLibrary(String),

    /// RPC, IO or serialization failure from a collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
