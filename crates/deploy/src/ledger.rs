//! Persisted deployment ledger: the durable record of artifact addresses and
//! in-flight transactions that makes deployment runs resumable.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use alloy_core::primitives::{Address, B256};
use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const LEDGER_FILENAME_PREFIX: &str = "deployment_state";

/// Per-artifact deployment record.
///
/// `address` is set only after the deployment transaction was observed to
/// succeed and is never cleared. Both fields set is a rare but valid state,
/// kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    /// Broadcast-but-unconfirmed deployment transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_transaction: Option<B256>,
    /// Confirmed on-chain address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// The full serialized ledger document. Written as formatted JSON so an
/// operator can hand-edit it for recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerState {
    chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    contracts: Vec<ArtifactRecord>,
    /// Operation id -> transaction hash, for idempotent mutating operations.
    transactions: BTreeMap<String, B256>,
}

/// Durable mapping of artifact name to deployment state, and operation id to
/// broadcast transaction hash.
///
/// Every mutating call serializes the full ledger to disk before returning,
/// so a crash can never observe a mutation that was not persisted. Ledgers
/// for ephemeral test networks live purely in memory.
pub struct DeploymentLedger {
    state: LedgerState,
    /// `None` for ephemeral (in-memory) ledgers.
    storage: Option<LedgerFile>,
}

struct LedgerFile {
    path: PathBuf,
    /// Advisory lock held for the lifetime of the ledger, so two concurrent
    /// runs against the same network fail fast instead of corrupting state.
    _lock: File,
}

impl DeploymentLedger {
    /// Open the ledger for the given network, rehydrating it from
    /// `deployment_state_<chain_id>.json` if the file exists.
    pub fn open(state_dir: &Path, chain_id: u64) -> anyhow::Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;

        let path = state_dir.join(format!("{}_{}.json", LEDGER_FILENAME_PREFIX, chain_id));
        let lock = File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open ledger file {}", path.display()))?;
        lock.try_lock_exclusive().with_context(|| {
            format!(
                "Ledger {} is locked - is another deployment run in progress?",
                path.display()
            )
        })?;

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read ledger from {}", path.display()))?;
        let state = if content.trim().is_empty() {
            LedgerState {
                chain_id,
                ..Default::default()
            }
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse ledger file {}", path.display()))?
        };

        tracing::info!(
            path = %path.display(),
            contracts = state.contracts.len(),
            operations = state.transactions.len(),
            "Deployment ledger loaded"
        );

        Ok(Self {
            state,
            storage: Some(LedgerFile { path, _lock: lock }),
        })
    }

    /// Create a purely in-memory ledger. Nothing is ever written to disk.
    pub fn in_memory(chain_id: u64) -> Self {
        Self {
            state: LedgerState {
                chain_id,
                ..Default::default()
            },
            storage: None,
        }
    }

    /// Confirmed address for an artifact, if recorded.
    pub fn address(&self, name: &str) -> Option<Address> {
        self.record(name).and_then(|r| r.address)
    }

    /// In-flight deployment transaction for an artifact, if recorded.
    pub fn pending_tx(&self, name: &str) -> Option<B256> {
        self.record(name).and_then(|r| r.deployment_transaction)
    }

    /// Record the broadcast of a deployment transaction, creating the
    /// artifact record if needed.
    pub fn set_pending_tx(&mut self, name: &str, hash: B256) -> Result<()> {
        match self.record_mut(name) {
            Some(record) => record.deployment_transaction = Some(hash),
            None => self.state.contracts.push(ArtifactRecord {
                name: name.to_string(),
                deployment_transaction: Some(hash),
                address: None,
            }),
        }
        self.persist()
    }

    /// Record the confirmed address of an artifact. The pending transaction
    /// must have been recorded first.
    pub fn set_address(&mut self, name: &str, address: Address) -> Result<()> {
        match self.record_mut(name) {
            Some(record) => record.address = Some(address),
            None => return Err(Error::NotFound(format!("artifact `{}`", name))),
        }
        self.persist()
    }

    /// Whether a mutating operation has already been broadcast.
    pub fn has_operation(&self, id: &str) -> bool {
        self.state.transactions.contains_key(id)
    }

    /// Record the broadcast hash of a mutating operation. Fails if the id is
    /// already present: a recorded operation must be resumed, not rerun.
    pub fn record_operation(&mut self, id: &str, hash: B256) -> Result<()> {
        if self.state.transactions.contains_key(id) {
            return Err(Error::AlreadyRecorded(id.to_string()));
        }
        self.state.transactions.insert(id.to_string(), hash);
        self.persist()
    }

    /// Broadcast hash recorded for an operation.
    pub fn operation_hash(&self, id: &str) -> Result<B256> {
        self.state
            .transactions
            .get(id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("operation `{}`", id)))
    }

    /// All artifact records, in insertion order.
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.state.contracts
    }

    /// All recorded operations.
    pub fn operations(&self) -> impl Iterator<Item = (&str, B256)> {
        self.state.transactions.iter().map(|(id, hash)| (id.as_str(), *hash))
    }

    pub fn chain_id(&self) -> u64 {
        self.state.chain_id
    }

    fn record(&self, name: &str) -> Option<&ArtifactRecord> {
        self.state.contracts.iter().find(|r| r.name == name)
    }

    fn record_mut(&mut self, name: &str) -> Option<&mut ArtifactRecord> {
        self.state.contracts.iter_mut().find(|r| r.name == name)
    }

    fn persist(&mut self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        self.state.updated_at = Some(chrono::Utc::now().to_rfc3339());
        let json = serde_json::to_string_pretty(&self.state)
            .context("Failed to serialize deployment ledger")?;
        std::fs::write(&storage.path, json).with_context(|| {
            format!("Failed to write ledger to {}", storage.path.display())
        })?;
        Ok(())
    }
}
