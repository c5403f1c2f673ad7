//! Append-only log of addresses already confirmed as verified.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use anyhow::Context;

use crate::error::Result;

const LOG_FILENAME_PREFIX: &str = "verification_log";

/// Durable set of verified addresses, scoped per network.
///
/// The verification runner consults this log before contacting the provider,
/// which is what makes re-draining the (non-destructive) queue idempotent.
#[derive(Debug)]
pub struct VerificationLog {
    addresses: BTreeSet<Address>,
    /// `None` for ephemeral logs.
    path: Option<PathBuf>,
}

impl VerificationLog {
    pub fn open(state_dir: &Path, chain_id: u64) -> anyhow::Result<Self> {
        let path = state_dir.join(format!("{}_{}.json", LOG_FILENAME_PREFIX, chain_id));
        let addresses = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse log file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read log file {}", path.display()));
            }
        };

        Ok(Self {
            addresses,
            path: Some(path),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            addresses: BTreeSet::new(),
            path: None,
        }
    }

    pub fn contains(&self, address: Address) -> bool {
        self.addresses.contains(&address)
    }

    /// Record an address as verified. Recording twice is harmless.
    pub fn record(&mut self, address: Address) -> Result<()> {
        if self.addresses.insert(address) {
            self.persist()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.addresses)
            .context("Failed to serialize verification log")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write log file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_record_and_contains() {
        let mut log = VerificationLog::in_memory();
        let addr = Address::repeat_byte(0xaa);
        assert!(!log.contains(addr));

        log.record(addr).unwrap();
        assert!(log.contains(addr));

        // Idempotent.
        log.record(addr).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_log_round_trip() {
        let dir = TempDir::new("chainsmith-log").expect("Failed to create temp dir");
        let addr = Address::repeat_byte(0xaa);

        {
            let mut log = VerificationLog::open(dir.path(), 1).unwrap();
            log.record(addr).unwrap();
        }

        let reloaded = VerificationLog::open(dir.path(), 1).unwrap();
        assert!(reloaded.contains(addr));
    }
}
