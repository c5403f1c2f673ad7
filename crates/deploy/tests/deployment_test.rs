//! End-to-end tests for ledger-driven resumption.
//!
//! Each test simulates interrupted deployment runs by dropping the step
//! runner and reopening the durable stores from disk, the way a re-invoked
//! process would. The network is a scripted stub; no RPC endpoint is needed.
//! Run with: cargo test --test deployment_test

use std::collections::BTreeMap;
use std::sync::Mutex;

use alloy_core::primitives::{Address, B256};
use anyhow::anyhow;
use serde_json::Value;
use tempdir::TempDir;

use chainsmith_deploy::{
    ArtifactFactory, ChainClient, DeployConfig, LibraryRegistry, StepRunner, TxReceipt,
    VerificationLog, VerificationRunner, Verifier, VerifyOutcome,
};

const CHAIN_ID: u64 = 11155111;

/// In-memory network that mines every broadcast transaction instantly.
#[derive(Default)]
struct FakeNetwork {
    mined: Mutex<BTreeMap<B256, Address>>,
}

impl FakeNetwork {
    /// Pretend a transaction was mined, deploying to the given address.
    fn mine(&self, hash: B256, address: Address) {
        self.mined.lock().unwrap().insert(hash, address);
    }
}

impl ChainClient for FakeNetwork {
    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    async fn transaction_exists(&self, hash: B256) -> anyhow::Result<bool> {
        Ok(self.mined.lock().unwrap().contains_key(&hash))
    }

    async fn transaction_receipt(&self, hash: B256) -> anyhow::Result<Option<TxReceipt>> {
        let mined = self.mined.lock().unwrap();
        Ok(mined.get(&hash).map(|address| TxReceipt {
            transaction_hash: hash,
            status: Some("0x1".to_string()),
            contract_address: Some(*address),
            block_number: Some("0x1".to_string()),
            gas_used: None,
        }))
    }

    async fn wait_for_receipt(&self, hash: B256) -> anyhow::Result<TxReceipt> {
        self.transaction_receipt(hash)
            .await?
            .ok_or_else(|| anyhow!("transaction {hash} never mined"))
    }
}

/// Factory that mints a deterministic hash and address per broadcast, and
/// counts broadcasts per artifact across the whole test.
struct CountingFactory<'n> {
    network: &'n FakeNetwork,
    broadcasts: Mutex<BTreeMap<String, usize>>,
    sequence: Mutex<u8>,
}

impl<'n> CountingFactory<'n> {
    fn new(network: &'n FakeNetwork) -> Self {
        Self {
            network,
            broadcasts: Mutex::new(BTreeMap::new()),
            sequence: Mutex::new(1),
        }
    }

    fn broadcasts(&self, name: &str) -> usize {
        self.broadcasts.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl ArtifactFactory for CountingFactory<'_> {
    async fn deploy(
        &self,
        name: &str,
        _args: &[Value],
        _libraries: &LibraryRegistry,
    ) -> anyhow::Result<B256> {
        *self
            .broadcasts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(0) += 1;

        let mut sequence = self.sequence.lock().unwrap();
        let hash = B256::repeat_byte(*sequence);
        let address = Address::repeat_byte(*sequence);
        *sequence += 1;

        self.network.mine(hash, address);
        Ok(hash)
    }

    fn source_locator(&self, _name: &str) -> Option<String> {
        None
    }
}

fn resumable_config(state_dir: &std::path::Path) -> DeployConfig {
    DeployConfig {
        resumable: true,
        state_dir: state_dir.to_path_buf(),
        ..Default::default()
    }
}

const ARTIFACTS: [&str; 4] = ["Key32Lib", "ObjectTypeLib", "Registry", "RegistryAdmin"];

#[tokio::test]
async fn test_interrupted_run_converges_without_rebroadcast() {
    let dir = TempDir::new("chainsmith").expect("Failed to create temp dir");
    let network = FakeNetwork::default();
    let factory = CountingFactory::new(&network);
    let config = resumable_config(dir.path());

    // First run: deploy the first two artifacts, then "crash" by dropping
    // the runner.
    let mut addresses = BTreeMap::new();
    {
        let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
        for name in &ARTIFACTS[..2] {
            let deployed = runner.deploy(name, &[]).await.unwrap();
            addresses.insert(name.to_string(), deployed.address);
        }
    }

    // Second run: replay the full plan from the start.
    {
        let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
        for name in &ARTIFACTS {
            let deployed = runner.deploy(name, &[]).await.unwrap();
            let prior = addresses.insert(name.to_string(), deployed.address);
            if let Some(prior) = prior {
                assert_eq!(prior, deployed.address, "{name} address changed on resume");
            }
        }
    }

    // Completed artifacts were broadcast exactly once in total.
    for name in &ARTIFACTS {
        assert_eq!(factory.broadcasts(name), 1, "{name} was re-broadcast");
    }

    // A third run is a pure no-op.
    let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
    for name in &ARTIFACTS {
        let deployed = runner.deploy(name, &[]).await.unwrap();
        assert!(deployed.receipt.is_none());
        assert_eq!(deployed.address, addresses[*name]);
    }
}

#[tokio::test]
async fn test_crash_between_broadcast_and_confirmation_is_resumed() {
    let dir = TempDir::new("chainsmith").expect("Failed to create temp dir");
    let network = FakeNetwork::default();
    let factory = CountingFactory::new(&network);
    let config = resumable_config(dir.path());

    // Simulate a run that broadcast the deployment and crashed before the
    // receipt arrived: the ledger has a pending transaction and no address.
    let hash = B256::repeat_byte(0x77);
    let expected = Address::repeat_byte(0x77);
    network.mine(hash, expected);
    {
        let mut ledger =
            chainsmith_deploy::DeploymentLedger::open(dir.path(), CHAIN_ID).unwrap();
        ledger.set_pending_tx("Registry", hash).unwrap();
    }

    let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
    let deployed = runner.deploy("Registry", &[]).await.unwrap();

    assert_eq!(deployed.address, expected);
    assert_eq!(factory.broadcasts("Registry"), 0);
}

#[tokio::test]
async fn test_operation_resumes_across_runs() {
    let dir = TempDir::new("chainsmith").expect("Failed to create temp dir");
    let network = FakeNetwork::default();
    let factory = CountingFactory::new(&network);
    let config = resumable_config(dir.path());

    let hash = B256::repeat_byte(0x55);
    network.mine(hash, Address::repeat_byte(0x55));

    {
        let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
        runner
            .execute("registry.initialize", || async { Ok(hash) })
            .await
            .unwrap();
    }

    // The rerun must settle on the recorded hash without invoking the
    // broadcast closure.
    let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
    let receipt = runner
        .execute("registry.initialize", || async {
            Err(anyhow!("second broadcast attempted"))
        })
        .await
        .unwrap();
    assert_eq!(receipt.transaction_hash, hash);
}

#[tokio::test]
async fn test_verification_queue_survives_into_a_later_run() {
    let dir = TempDir::new("chainsmith").expect("Failed to create temp dir");
    let network = FakeNetwork::default();
    let factory = CountingFactory::new(&network);
    let config = resumable_config(dir.path());

    {
        let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
        runner.deploy_library("Key32Lib", &[]).await.unwrap();
        runner.deploy("Registry", &[]).await.unwrap();
    }

    // A separate invocation drains the queue against a verifier stub.
    struct AlwaysVerified;
    impl Verifier for AlwaysVerified {
        async fn verify(
            &self,
            _request: &chainsmith_deploy::VerificationRequest,
            _libraries: Option<&BTreeMap<String, Address>>,
        ) -> anyhow::Result<VerifyOutcome> {
            Ok(VerifyOutcome::Verified)
        }
    }

    let queue = chainsmith_deploy::VerificationQueue::open(dir.path(), CHAIN_ID).unwrap();
    assert_eq!(queue.len(), 2);
    let libraries = LibraryRegistry::open(dir.path(), CHAIN_ID).unwrap();
    assert!(libraries.resolve("Key32Lib").is_ok());

    let mut log = VerificationLog::open(dir.path(), CHAIN_ID).unwrap();
    let verifier = AlwaysVerified;
    let runner = VerificationRunner::new(&verifier, &libraries);
    let report = runner.run(queue.drain_all(), &mut log).await.unwrap();
    assert_eq!(report.verified, 2);

    // Draining again touches nothing.
    let report = runner.run(queue.drain_all(), &mut log).await.unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.verified, 0);
}

#[tokio::test]
async fn test_skipped_verification_is_still_queued_for_a_later_run() {
    let dir = TempDir::new("chainsmith").expect("Failed to create temp dir");
    let network = FakeNetwork::default();
    let factory = CountingFactory::new(&network);
    let config = DeployConfig {
        resumable: true,
        skip_verification: true,
        state_dir: dir.path().to_path_buf(),
        ..Default::default()
    };

    {
        let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
        runner.deploy("Registry", &[]).await.unwrap();
    }

    // A later verify-only invocation must still find the request.
    let queue = chainsmith_deploy::VerificationQueue::open(dir.path(), CHAIN_ID).unwrap();
    assert_eq!(queue.len(), 1);
    assert!(queue.contains("Registry"));
}

/// Factory that refuses to broadcast one named artifact.
struct FailingFactory<'n> {
    inner: CountingFactory<'n>,
    fail_on: &'static str,
}

impl ArtifactFactory for FailingFactory<'_> {
    async fn deploy(
        &self,
        name: &str,
        args: &[Value],
        libraries: &LibraryRegistry,
    ) -> anyhow::Result<B256> {
        if name == self.fail_on {
            return Err(anyhow!("no bytecode for {name}"));
        }
        self.inner.deploy(name, args, libraries).await
    }

    fn source_locator(&self, _name: &str) -> Option<String> {
        None
    }
}

#[tokio::test]
async fn test_plan_stops_at_the_first_failed_step() {
    let dir = TempDir::new("chainsmith").expect("Failed to create temp dir");
    let network = FakeNetwork::default();
    let factory = FailingFactory {
        inner: CountingFactory::new(&network),
        fail_on: "Registry",
    };
    let config = resumable_config(dir.path());

    let plan: chainsmith_deploy::DeploymentPlan = toml::from_str(
        r#"
        [[step]]
        name = "Key32Lib"
        library = true

        [[step]]
        name = "Registry"

        [[step]]
        name = "RegistryAdmin"
        "#,
    )
    .unwrap();

    let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
    let result = plan.run(&mut runner).await;

    assert!(result.is_err());
    assert_eq!(factory.inner.broadcasts("Key32Lib"), 1);
    // The failed step aborts the run before later steps are attempted.
    assert_eq!(factory.inner.broadcasts("RegistryAdmin"), 0);
}

#[tokio::test]
async fn test_ephemeral_network_writes_nothing() {
    let dir = TempDir::new("chainsmith").expect("Failed to create temp dir");
    let network = FakeNetwork::default();
    let factory = CountingFactory::new(&network);
    let config = DeployConfig {
        resumable: true,
        ephemeral: true,
        state_dir: dir.path().to_path_buf(),
        ..Default::default()
    };

    let mut runner = StepRunner::open(&network, &factory, &config).unwrap();
    runner.deploy_library("Key32Lib", &[]).await.unwrap();
    runner.deploy("Registry", &[]).await.unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(entries.is_empty(), "Ephemeral run must not write state files");
}
