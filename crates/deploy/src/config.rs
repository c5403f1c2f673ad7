//! Run configuration for the deployment engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Chain ids of local development networks (Anvil, Hardhat, Ganache).
///
/// Ledger, queue and log persistence is suppressed entirely for these chains,
/// so repeated test runs never leave stale state files behind.
pub const TEST_CHAIN_IDS: &[u64] = &[31337, 1337];

/// Returns true if the chain id designates an ephemeral development network.
pub fn is_test_chain(chain_id: u64) -> bool {
    TEST_CHAIN_IDS.contains(&chain_id)
}

/// Process-wide switches consumed by the deployment engine.
///
/// Loaded by the CLI from `Chainsmith.toml` merged with `CHS_*` environment
/// variables; constructed directly in tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// When true, the step runner consults the ledger before acting and
    /// resumes or skips completed work. When false every step deploys fresh,
    /// which is the correct behavior for ephemeral test networks.
    pub resumable: bool,

    /// Fixed gas price override in wei. When absent the node's estimate is
    /// used unchanged.
    pub gas_price: Option<u128>,

    /// Disables the post-deployment verification follow-up entirely.
    /// Verification requests are still queued for a later run.
    pub skip_verification: bool,

    /// Marks the current network as ephemeral regardless of its chain id,
    /// suppressing all persistence.
    pub ephemeral: bool,

    /// Number of confirmations to wait for after a transaction is first
    /// mined, before treating it as settled.
    pub confirmations: u64,

    /// Directory holding the per-network state files (ledger, verification
    /// queue, verification log, library addresses).
    pub state_dir: PathBuf,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            resumable: false,
            gas_price: None,
            skip_verification: false,
            ephemeral: false,
            confirmations: 1,
            state_dir: PathBuf::from("deployments"),
        }
    }
}

impl DeployConfig {
    /// Whether state for the given chain should be persisted to disk.
    pub fn durable(&self, chain_id: u64) -> bool {
        !self.ephemeral && !is_test_chain(chain_id)
    }
}
