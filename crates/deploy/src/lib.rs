//! chainsmith-deploy - Resumable contract deployment engine.
//!
//! This crate drives deployment runs of interdependent on-chain artifacts
//! against a single network: a durable ledger records what is deployed and
//! which transactions are in flight, so an interrupted run can be restarted
//! and converge without re-broadcasting completed work. Confirmed artifacts
//! are queued for asynchronous source verification with reason-specific
//! retries.

pub mod artifact;
pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod libraries;
pub mod plan;
pub mod runner;
pub mod verify;

pub use artifact::{ArtifactFactory, ArtifactStore, RpcArtifactFactory, SolcArtifact};
pub use chain::{ChainClient, HttpChain, TxReceipt};
pub use config::{DeployConfig, is_test_chain};
pub use error::{Error, Result};
pub use executor::{RevertDecoder, TxExecutor};
pub use ledger::{ArtifactRecord, DeploymentLedger};
pub use libraries::LibraryRegistry;
pub use plan::DeploymentPlan;
pub use runner::{Deployed, StepRunner};
pub use verify::{
    EtherscanVerifier, VerificationLog, VerificationQueue, VerificationReport,
    VerificationRequest, VerificationRunner, Verifier, VerifyOutcome,
};
