//! Durable worklist of artifacts awaiting source verification.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use anyhow::Context;
use serde_json::Value;

use crate::error::Result;

use super::VerificationRequest;

const QUEUE_FILENAME_PREFIX: &str = "verification_queue";

/// Append-only queue of verification requests, scoped per network.
///
/// At most one entry exists per artifact name: a later request for the same
/// name is dropped, on the assumption that an artifact's constructor
/// arguments do not change within a run. Draining is non-destructive;
/// idempotency across runs comes from the verification log instead.
#[derive(Debug)]
pub struct VerificationQueue {
    requests: Vec<VerificationRequest>,
    /// `None` for ephemeral queues.
    path: Option<PathBuf>,
}

impl VerificationQueue {
    /// Open the queue for the given network, rehydrating any entries a
    /// previous run left behind.
    pub fn open(state_dir: &Path, chain_id: u64) -> anyhow::Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;

        let path = state_dir.join(format!("{}_{}.json", QUEUE_FILENAME_PREFIX, chain_id));
        let requests = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse queue file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read queue file {}", path.display()));
            }
        };

        Ok(Self {
            requests,
            path: Some(path),
        })
    }

    /// Create a purely in-memory queue.
    pub fn in_memory() -> Self {
        Self {
            requests: Vec::new(),
            path: None,
        }
    }

    /// Queue an artifact for verification. No-op if a request for the same
    /// name is already queued.
    pub fn enqueue(
        &mut self,
        name: &str,
        address: Address,
        constructor_arguments: Vec<Value>,
        contract: Option<String>,
    ) -> Result<()> {
        if self.contains(name) {
            tracing::debug!(artifact = name, "Verification already queued, keeping first request");
            return Ok(());
        }

        self.requests.push(VerificationRequest {
            contract_name: name.to_string(),
            address,
            constructor_arguments,
            contract,
        });
        self.persist()
    }

    /// Whether a request for the named artifact is queued.
    pub fn contains(&self, name: &str) -> bool {
        self.requests.iter().any(|r| r.contract_name == name)
    }

    /// All queued requests, in enqueue order. Entries are never removed.
    pub fn drain_all(&self) -> impl Iterator<Item = &VerificationRequest> {
        self.requests.iter()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.requests)
            .context("Failed to serialize verification queue")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write queue file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_first_write_wins() {
        let mut queue = VerificationQueue::in_memory();
        let first = Address::repeat_byte(0xaa);
        let second = Address::repeat_byte(0xbb);

        queue.enqueue("Key32Lib", first, vec![], None).unwrap();
        queue.enqueue("Key32Lib", second, vec![], None).unwrap();

        let requests: Vec<_> = queue.drain_all().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].address, first);
    }

    #[test]
    fn test_drain_is_non_destructive() {
        let mut queue = VerificationQueue::in_memory();
        queue
            .enqueue("Key32Lib", Address::repeat_byte(0xaa), vec![], None)
            .unwrap();

        assert_eq!(queue.drain_all().count(), 1);
        assert_eq!(queue.drain_all().count(), 1);
    }

    #[test]
    fn test_queue_round_trip() {
        let dir = TempDir::new("chainsmith-queue").expect("Failed to create temp dir");

        {
            let mut queue = VerificationQueue::open(dir.path(), 1).unwrap();
            queue
                .enqueue(
                    "Registry",
                    Address::repeat_byte(0xaa),
                    vec![serde_json::json!(42)],
                    Some("contracts/Registry.sol:Registry".to_string()),
                )
                .unwrap();
        }

        let reloaded = VerificationQueue::open(dir.path(), 1).unwrap();
        assert_eq!(reloaded.len(), 1);
        let request = reloaded.drain_all().next().unwrap();
        assert_eq!(request.contract_name, "Registry");
        assert_eq!(request.constructor_arguments, vec![serde_json::json!(42)]);
        assert_eq!(
            request.contract.as_deref(),
            Some("contracts/Registry.sol:Registry")
        );
    }

    #[test]
    fn test_in_memory_queue_writes_no_files() {
        let dir = TempDir::new("chainsmith-queue").expect("Failed to create temp dir");

        let mut queue = VerificationQueue::in_memory();
        queue
            .enqueue("Key32Lib", Address::repeat_byte(0xaa), vec![], None)
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(entries.is_empty());
    }
}
