//! Compiled artifact store and the factory that turns artifacts into
//! deployment transactions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::chain::HttpChain;
use crate::error::Result;
use crate::libraries::LibraryRegistry;

/// A compiled artifact in the standard solc/hardhat JSON layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolcArtifact {
    pub contract_name: String,
    /// Path of the source file the artifact was compiled from, used to
    /// disambiguate colliding contract names during verification.
    #[serde(default)]
    pub source_name: Option<String>,
    pub abi: Value,
    /// Creation bytecode as a `0x`-prefixed hex string, with 20-byte
    /// placeholder gaps at every unresolved library reference.
    pub bytecode: String,
    /// source file -> library name -> placeholder offsets into the bytecode.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkOffset>>>,
}

/// Byte offset span of one library placeholder in creation bytecode.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LinkOffset {
    pub start: usize,
    pub length: usize,
}

impl SolcArtifact {
    /// Whether the bytecode still contains unresolved library references.
    pub fn needs_linking(&self) -> bool {
        self.link_references.values().any(|libs| !libs.is_empty())
    }

    /// Resolve every library placeholder against the registry and return the
    /// fully linked creation bytecode.
    pub fn link(&self, libraries: &LibraryRegistry) -> Result<String> {
        let mut bytecode = self.bytecode.clone();
        for libs in self.link_references.values() {
            for (name, offsets) in libs {
                let address = libraries.resolve(name)?;
                let encoded = hex::encode(address.as_slice());
                for offset in offsets {
                    splice(&mut bytecode, *offset, &encoded).with_context(|| {
                        format!(
                            "Link reference for `{}` is out of bounds in `{}`",
                            name, self.contract_name
                        )
                    })?;
                }
            }
        }
        if bytecode.contains("__$") {
            return Err(anyhow::anyhow!(
                "bytecode of `{}` still contains unresolved library placeholders",
                self.contract_name
            )
            .into());
        }
        Ok(bytecode)
    }
}

/// Replace one placeholder span in `0x`-prefixed hex bytecode.
fn splice(bytecode: &mut String, offset: LinkOffset, encoded: &str) -> anyhow::Result<()> {
    // Offsets are byte positions in the binary; the hex string carries two
    // characters per byte plus the `0x` prefix.
    let start = 2 + offset.start * 2;
    let end = start + offset.length * 2;
    if end > bytecode.len() || encoded.len() != offset.length * 2 {
        bail!("offset {}..{} exceeds bytecode length", start, end);
    }
    bytecode.replace_range(start..end, encoded);
    Ok(())
}

/// ABI-encode a sequence of static constructor arguments.
///
/// Each value occupies one 32-byte word: addresses and `bytes32` are given as
/// hex strings, unsigned integers as JSON numbers or hex strings, booleans as
/// JSON booleans. Dynamic types are rejected; callers with dynamic arguments
/// pre-encode them and pass the calldata suffix as a single hex string.
pub fn encode_constructor_args(args: &[Value]) -> anyhow::Result<String> {
    let mut encoded = String::new();
    for arg in args {
        match arg {
            Value::String(s) if s.starts_with("0x") => {
                let raw = hex::decode(s.trim_start_matches("0x"))
                    .with_context(|| format!("Invalid hex argument `{}`", s))?;
                if raw.len() > 32 {
                    // Pre-encoded dynamic suffix, appended verbatim.
                    encoded.push_str(&hex::encode(&raw));
                } else {
                    // Left-pad to a word, as for addresses and fixed integers.
                    encoded.push_str(&"00".repeat(32 - raw.len()));
                    encoded.push_str(&hex::encode(&raw));
                }
            }
            Value::Number(n) => {
                let value = n
                    .as_u64()
                    .with_context(|| format!("Argument `{}` is not an unsigned integer", n))?;
                encoded.push_str(&format!("{:064x}", value));
            }
            Value::Bool(b) => {
                encoded.push_str(&format!("{:064x}", u64::from(*b)));
            }
            other => bail!("unsupported constructor argument `{}`", other),
        }
    }
    Ok(encoded)
}

/// Loads compiled artifacts by name from a directory of hardhat-style JSON
/// files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load `<dir>/<name>.json`.
    pub fn load(&self, name: &str) -> anyhow::Result<SolcArtifact> {
        let path = self.dir.join(format!("{}.json", name));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Turns an artifact name and constructor arguments into a broadcast
/// deployment transaction.
///
/// The deployment engine depends only on this shape; how bytecode is produced
/// and signed is the factory's concern.
pub trait ArtifactFactory {
    /// Broadcast a deployment transaction for the named artifact and return
    /// its hash without waiting for inclusion.
    fn deploy(
        &self,
        name: &str,
        args: &[Value],
        libraries: &LibraryRegistry,
    ) -> impl Future<Output = anyhow::Result<B256>>;

    /// Source-file disambiguator for the named artifact, if known.
    fn source_locator(&self, name: &str) -> Option<String>;
}

/// Factory deploying from a node-managed account over JSON-RPC.
pub struct RpcArtifactFactory<'a> {
    chain: &'a HttpChain,
    store: ArtifactStore,
    from: Address,
    gas_price: Option<u128>,
}

impl<'a> RpcArtifactFactory<'a> {
    pub fn new(
        chain: &'a HttpChain,
        store: ArtifactStore,
        from: Address,
        gas_price: Option<u128>,
    ) -> Self {
        Self {
            chain,
            store,
            from,
            gas_price,
        }
    }
}

impl ArtifactFactory for RpcArtifactFactory<'_> {
    async fn deploy(
        &self,
        name: &str,
        args: &[Value],
        libraries: &LibraryRegistry,
    ) -> anyhow::Result<B256> {
        let artifact = self.store.load(name)?;
        let bytecode = artifact.link(libraries)?;
        let suffix = encode_constructor_args(args)
            .with_context(|| format!("Failed to encode constructor arguments for `{}`", name))?;
        let data = format!("{}{}", bytecode, suffix);

        self.chain
            .send_transaction(self.from, &data, self.gas_price)
            .await
            .with_context(|| format!("Failed to broadcast deployment of `{}`", name))
    }

    fn source_locator(&self, name: &str) -> Option<String> {
        let artifact = self.store.load(name).ok()?;
        let source = artifact.source_name?;
        Some(format!("{}:{}", source, artifact.contract_name))
    }
}
