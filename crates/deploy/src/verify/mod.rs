//! Post-deployment source verification: durable queue, verified-address log,
//! and the retry-aware runner that drains the queue against an external
//! verification service.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod etherscan;
mod log;
mod queue;
mod runner;

pub use etherscan::EtherscanVerifier;
pub use log::VerificationLog;
pub use queue::VerificationQueue;
pub use runner::{VerificationReport, VerificationRunner};

/// One queued request to verify a deployed artifact's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub contract_name: String,
    pub address: Address,
    /// Encoded constructor argument values, in declaration order.
    pub constructor_arguments: Vec<Value>,
    /// `path/To/Source.sol:Name` disambiguator, when one source file defines
    /// multiple artifacts with colliding names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
}

/// Classified result of one verification attempt.
///
/// The verification service adapter owns the mapping from provider responses
/// to these variants; the runner's control flow never inspects provider
/// message strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    /// The provider already has verified source for this address.
    AlreadyVerified,
    /// The deployed bytecode has not propagated to the provider yet.
    BytecodeNotAvailable,
    /// Linked library addresses could not be inferred from the bytecode.
    /// Carries the library names the provider reported as missing.
    MissingLibraries(Vec<String>),
    /// Any other provider-side rejection. Not retried.
    Failed(String),
}

/// External verification service collaborator.
pub trait Verifier {
    /// Submit one verification request, optionally with explicit library
    /// address bindings, and classify the provider's response.
    fn verify(
        &self,
        request: &VerificationRequest,
        libraries: Option<&BTreeMap<String, Address>>,
    ) -> impl Future<Output = anyhow::Result<VerifyOutcome>>;
}
