//! Per-artifact deployment step runner.

use alloy_core::primitives::Address;
use anyhow::Context;
use serde_json::Value;

use crate::artifact::ArtifactFactory;
use crate::chain::{ChainClient, TxReceipt};
use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::executor::TxExecutor;
use crate::ledger::DeploymentLedger;
use crate::libraries::LibraryRegistry;
use crate::verify::VerificationQueue;

/// Result of one deployment step.
#[derive(Debug)]
pub struct Deployed {
    pub address: Address,
    /// Absent when the artifact was reused from the ledger without touching
    /// the network.
    pub receipt: Option<TxReceipt>,
}

/// Drives one deployment run, step by step in the caller's dependency order.
///
/// Each step consults the ledger and either deploys fresh, resumes an
/// in-flight deployment transaction, or reuses an already confirmed address.
/// Confirmed artifacts are queued for source verification as a side effect.
/// The runner owns the run's durable stores; failures while broadcasting or
/// confirming propagate to the caller unchanged, who recovers by re-running
/// the script and letting resumption skip completed work.
pub struct StepRunner<'a, C, F> {
    chain: &'a C,
    factory: &'a F,
    config: &'a DeployConfig,
    ledger: DeploymentLedger,
    queue: VerificationQueue,
    libraries: LibraryRegistry,
}

impl<'a, C, F> StepRunner<'a, C, F>
where
    C: ChainClient,
    F: ArtifactFactory,
{
    /// Open the run's stores for the active network. Test chains and
    /// explicitly ephemeral runs get in-memory stores.
    pub fn open(chain: &'a C, factory: &'a F, config: &'a DeployConfig) -> anyhow::Result<Self> {
        let chain_id = chain.chain_id();
        let (ledger, queue, libraries) = if config.durable(chain_id) {
            (
                DeploymentLedger::open(&config.state_dir, chain_id)?,
                VerificationQueue::open(&config.state_dir, chain_id)?,
                LibraryRegistry::open(&config.state_dir, chain_id)?,
            )
        } else {
            tracing::info!(chain_id, "Ephemeral network, state will not be persisted");
            (
                DeploymentLedger::in_memory(chain_id),
                VerificationQueue::in_memory(),
                LibraryRegistry::in_memory(),
            )
        };

        Ok(Self::new(chain, factory, config, ledger, queue, libraries))
    }

    pub fn new(
        chain: &'a C,
        factory: &'a F,
        config: &'a DeployConfig,
        ledger: DeploymentLedger,
        queue: VerificationQueue,
        libraries: LibraryRegistry,
    ) -> Self {
        Self {
            chain,
            factory,
            config,
            ledger,
            queue,
            libraries,
        }
    }

    /// Deploy one artifact, resuming or reusing prior work when resumable
    /// mode is on.
    pub async fn deploy(&mut self, name: &str, args: &[Value]) -> Result<Deployed> {
        if self.config.resumable {
            if let Some(address) = self.ledger.address(name) {
                // A prior run may have crashed between confirming the
                // deployment and queuing its verification.
                tracing::info!(artifact = name, %address, "Already deployed, reusing");
                self.enqueue_verification(name, address, args)?;
                return Ok(Deployed {
                    address,
                    receipt: None,
                });
            }

            if let Some(hash) = self.ledger.pending_tx(name) {
                tracing::info!(artifact = name, tx = %hash, "Resuming in-flight deployment");
                if !self.chain.transaction_exists(hash).await? {
                    return Err(Error::TransactionLost(hash));
                }
                let receipt = self.chain.wait_for_receipt(hash).await?;
                return self.confirm(name, args, receipt);
            }
        }

        tracing::info!(artifact = name, "Deploying");
        let hash = self.factory.deploy(name, args, &self.libraries).await?;
        self.ledger.set_pending_tx(name, hash)?;
        let receipt = self.chain.wait_for_receipt(hash).await?;
        self.confirm(name, args, receipt)
    }

    /// Deploy a library artifact and register its address for linking and
    /// verification retries.
    pub async fn deploy_library(&mut self, name: &str, args: &[Value]) -> Result<Deployed> {
        let deployed = self.deploy(name, args).await?;
        self.libraries.register(name, deployed.address)?;
        Ok(deployed)
    }

    /// Run a mutating post-deployment operation exactly once under the given
    /// operation id.
    pub async fn execute<B, Fut>(&mut self, operation_id: &str, broadcast: B) -> Result<TxReceipt>
    where
        B: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<alloy_core::primitives::B256>>,
    {
        let executor = TxExecutor::new(self.chain);
        let operation_id = self.config.resumable.then_some(operation_id);
        executor.execute(&mut self.ledger, operation_id, broadcast).await
    }

    /// Confirmed address of a previously deployed artifact.
    pub fn address(&self, name: &str) -> Result<Address> {
        self.ledger
            .address(name)
            .ok_or_else(|| Error::NotFound(format!("artifact `{}`", name)))
    }

    pub fn ledger(&self) -> &DeploymentLedger {
        &self.ledger
    }

    pub fn libraries(&self) -> &LibraryRegistry {
        &self.libraries
    }

    /// Hand the run's stores to the verification phase.
    pub fn into_parts(self) -> (DeploymentLedger, VerificationQueue, LibraryRegistry) {
        (self.ledger, self.queue, self.libraries)
    }

    fn confirm(&mut self, name: &str, args: &[Value], receipt: TxReceipt) -> Result<Deployed> {
        if !receipt.succeeded() {
            return Err(Error::TransactionFailed(Box::new(receipt)));
        }
        let address = receipt
            .contract_address
            .context("Deployment receipt carries no contract address")?;

        self.ledger.set_address(name, address)?;
        self.enqueue_verification(name, address, args)?;

        tracing::info!(artifact = name, %address, "Deployment confirmed");
        Ok(Deployed {
            address,
            receipt: Some(receipt),
        })
    }

    /// Requests are queued even when the verification follow-up is disabled,
    /// so a later verify-only invocation can drain them.
    fn enqueue_verification(&mut self, name: &str, address: Address, args: &[Value]) -> Result<()> {
        self.queue
            .enqueue(name, address, args.to_vec(), self.factory.source_locator(name))
    }
}
