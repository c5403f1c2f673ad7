//! chainsmith is a CLI for resumable deployment of interdependent on-chain
//! artifacts, with ledger-driven crash recovery and asynchronous source
//! verification.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use url::Url;

use chainsmith_deploy::{
    ArtifactStore, ChainClient, DeploymentLedger, DeploymentPlan, EtherscanVerifier, HttpChain,
    LibraryRegistry, RpcArtifactFactory, StepRunner, VerificationLog, VerificationQueue,
    VerificationReport, VerificationRunner,
};

use cli::{AppConfig, Cli, Command, EtherscanConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(rpc) = &cli.rpc {
        config.rpc_url = Some(rpc.to_url());
    }

    match cli.command {
        Command::Deploy { redeploy } => deploy(&config, redeploy).await,
        Command::Verify => verify(&config).await,
        Command::Status => status(&config).await,
    }
}

async fn connect(config: &AppConfig) -> Result<HttpChain> {
    let rpc_url = config
        .rpc_url
        .as_deref()
        .context("No RPC endpoint configured, set `rpc_url` or pass --rpc")?;
    HttpChain::connect(rpc_url, config.deploy.confirmations).await
}

async fn deploy(config: &AppConfig, redeploy: bool) -> Result<()> {
    let chain = connect(config).await?;
    let from = config
        .from
        .context("No deployment account configured, set `from`")?;

    let mut deploy_config = config.deploy.clone();
    if redeploy {
        deploy_config.resumable = false;
    }

    let plan = DeploymentPlan::load(&config.plan)?;
    tracing::info!(
        plan = %config.plan.display(),
        steps = plan.steps.len(),
        chain_id = chain.chain_id(),
        resumable = deploy_config.resumable,
        "Starting deployment run"
    );

    let store = ArtifactStore::new(config.artifacts_dir.clone());
    let factory = RpcArtifactFactory::new(&chain, store, from, deploy_config.gas_price);
    let mut runner = StepRunner::open(&chain, &factory, &deploy_config)?;

    plan.run(&mut runner).await?;
    let (_ledger, queue, libraries) = runner.into_parts();

    if deploy_config.skip_verification {
        tracing::info!("Verification disabled, {} request(s) left queued", queue.len());
        return Ok(());
    }
    let Some(etherscan) = &config.etherscan else {
        tracing::info!("No verification provider configured, skipping follow-up");
        return Ok(());
    };

    let mut log = open_log(&deploy_config, chain.chain_id())?;
    let report = drain_queue(etherscan, &queue, &libraries, &mut log).await?;
    report_failures(&report);
    Ok(())
}

fn open_log(
    deploy_config: &chainsmith_deploy::DeployConfig,
    chain_id: u64,
) -> Result<VerificationLog> {
    if !deploy_config.durable(chain_id) {
        return Ok(VerificationLog::in_memory());
    }
    Ok(VerificationLog::open(&deploy_config.state_dir, chain_id)?)
}

async fn verify(config: &AppConfig) -> Result<()> {
    let chain = connect(config).await?;
    let chain_id = chain.chain_id();
    let etherscan = config
        .etherscan
        .as_ref()
        .context("No verification provider configured, set `[etherscan]`")?;

    if !config.deploy.durable(chain_id) {
        tracing::info!(chain_id, "Ephemeral network, nothing queued");
        return Ok(());
    }

    let queue = VerificationQueue::open(&config.deploy.state_dir, chain_id)?;
    let libraries = LibraryRegistry::open(&config.deploy.state_dir, chain_id)?;
    let mut log = VerificationLog::open(&config.deploy.state_dir, chain_id)?;

    let report = drain_queue(etherscan, &queue, &libraries, &mut log).await?;
    report_failures(&report);
    Ok(())
}

async fn drain_queue(
    etherscan: &EtherscanConfig,
    queue: &VerificationQueue,
    libraries: &LibraryRegistry,
    log: &mut VerificationLog,
) -> Result<VerificationReport> {
    let api_url = Url::parse(&etherscan.api_url)
        .with_context(|| format!("Invalid verification API URL `{}`", etherscan.api_url))?;
    let verifier = EtherscanVerifier::new(
        api_url,
        etherscan.api_key.clone(),
        etherscan.input_dir.clone(),
        etherscan.compiler_version.clone(),
    );

    let runner = VerificationRunner::new(&verifier, libraries);
    runner.run(queue.drain_all(), log).await
}

fn report_failures(report: &VerificationReport) {
    for (artifact, reason) in &report.failed {
        tracing::warn!(artifact = %artifact, reason = %reason, "Verification failed");
    }
}

async fn status(config: &AppConfig) -> Result<()> {
    let chain = connect(config).await?;
    let chain_id = chain.chain_id();

    if !config.deploy.durable(chain_id) {
        println!("Ephemeral network {chain_id}: no durable state");
        return Ok(());
    }

    let ledger = DeploymentLedger::open(&config.deploy.state_dir, chain_id)?;
    let queue = VerificationQueue::open(&config.deploy.state_dir, chain_id)?;
    let log = VerificationLog::open(&config.deploy.state_dir, chain_id)?;

    let mut artifacts = Table::new();
    artifacts.set_header(["Artifact", "Address", "Pending tx", "Verified"]);
    for record in ledger.artifacts() {
        let address = record
            .address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        let pending = record
            .deployment_transaction
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".to_string());
        let verified = match record.address {
            Some(address) if log.contains(address) => "yes",
            Some(_) if queue.contains(&record.name) => "queued",
            Some(_) => "no",
            None => "-",
        };
        artifacts.add_row([record.name.as_str(), address.as_str(), pending.as_str(), verified]);
    }
    println!("Chain {chain_id}");
    println!("{artifacts}");

    let mut operations = Table::new();
    operations.set_header(["Operation", "Transaction"]);
    for (id, hash) in ledger.operations() {
        let hash = hash.to_string();
        operations.add_row([id, hash.as_str()]);
    }
    println!("{operations}");

    Ok(())
}
