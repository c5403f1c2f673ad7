//! Per-run registry of deployed library addresses.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use anyhow::Context;

use crate::error::{Error, Result};

const LIBRARIES_FILENAME_PREFIX: &str = "libraries";

/// Maps library names to their deployed addresses for bytecode linking.
///
/// The registry is owned by the deployment run and passed explicitly to
/// whatever needs linking. Entries persist to `libraries_<chain_id>.json` so
/// a resumed run and the verification pipeline can re-link bytecode without
/// redeploying anything.
#[derive(Debug)]
pub struct LibraryRegistry {
    addresses: BTreeMap<String, Address>,
    /// `None` for ephemeral registries.
    path: Option<PathBuf>,
}

impl LibraryRegistry {
    /// Open the registry for the given network, rehydrating it from disk if a
    /// previous run saved entries.
    pub fn open(state_dir: &Path, chain_id: u64) -> anyhow::Result<Self> {
        let path = state_dir.join(format!("{}_{}.json", LIBRARIES_FILENAME_PREFIX, chain_id));
        let addresses = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse library file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read library file {}", path.display()));
            }
        };

        Ok(Self {
            addresses,
            path: Some(path),
        })
    }

    /// Create a purely in-memory registry.
    pub fn in_memory() -> Self {
        Self {
            addresses: BTreeMap::new(),
            path: None,
        }
    }

    /// Record the address of a deployed library. Re-registering a name
    /// overwrites the previous address.
    pub fn register(&mut self, name: &str, address: Address) -> Result<()> {
        tracing::debug!(library = name, %address, "Library registered");
        self.addresses.insert(name.to_string(), address);
        self.persist()
    }

    /// Resolve a library name to its deployed address.
    pub fn resolve(&self, name: &str) -> Result<Address> {
        self.addresses
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownLibrary(name.to_string()))
    }

    /// All registered libraries, sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Address)> {
        self.addresses.iter().map(|(name, addr)| (name.as_str(), *addr))
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.addresses)
            .context("Failed to serialize library registry")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write library file {}", path.display()))?;
        Ok(())
    }
}
