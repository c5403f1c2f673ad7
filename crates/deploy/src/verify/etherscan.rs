//! Etherscan-compatible verification service adapter.
//!
//! This is the only place that inspects provider message strings: everything
//! above it works with the typed [`VerifyOutcome`] classification.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::artifact::encode_constructor_args;

use super::{VerificationRequest, Verifier, VerifyOutcome};

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Status polls before a submission guid is treated as stuck.
const MAX_STATUS_POLLS: usize = 20;

/// Verifier submitting solc standard-json input to an Etherscan-style
/// `verifysourcecode` API.
pub struct EtherscanVerifier {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    /// Directory of solc standard-json input files, one `<name>.input.json`
    /// per artifact, produced by the build.
    input_dir: PathBuf,
    compiler_version: String,
    poll_interval: Duration,
}

/// Envelope shared by every Etherscan API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[allow(dead_code)]
    message: String,
    result: String,
}

impl EtherscanVerifier {
    pub fn new(
        api_url: Url,
        api_key: String,
        input_dir: impl Into<PathBuf>,
        compiler_version: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            input_dir: input_dir.into(),
            compiler_version,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Load the standard-json compiler input for an artifact, injecting
    /// explicit library bindings into its settings when given.
    fn compiler_input(
        &self,
        name: &str,
        libraries: Option<&BTreeMap<String, Address>>,
    ) -> anyhow::Result<String> {
        let path = self.input_dir.join(format!("{}.input.json", name));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read compiler input {}", path.display()))?;

        let Some(libraries) = libraries else {
            return Ok(content);
        };

        let mut input: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse compiler input {}", path.display()))?;
        // Etherscan accepts bindings with an empty source-file key when the
        // defining file is not known.
        let bound: serde_json::Map<String, serde_json::Value> = libraries
            .iter()
            .map(|(name, addr)| (name.clone(), serde_json::json!(addr)))
            .collect();
        input["settings"]["libraries"][""] = serde_json::Value::Object(bound);
        Ok(input.to_string())
    }

    /// Submit the verification request and return the provider's receipt
    /// guid, or a classified rejection.
    async fn submit(
        &self,
        request: &VerificationRequest,
        libraries: Option<&BTreeMap<String, Address>>,
    ) -> anyhow::Result<Result<String, VerifyOutcome>> {
        let source = self.compiler_input(&request.contract_name, libraries)?;
        let args = encode_constructor_args(&request.constructor_arguments)
            .context("Failed to encode constructor arguments for verification")?;
        let contract_name = request
            .contract
            .clone()
            .unwrap_or_else(|| request.contract_name.clone());
        let address = request.address.to_string();

        let form = [
            ("apikey", self.api_key.as_str()),
            ("module", "contract"),
            ("action", "verifysourcecode"),
            ("contractaddress", address.as_str()),
            ("sourceCode", source.as_str()),
            ("codeformat", "solidity-standard-json-input"),
            ("contractname", contract_name.as_str()),
            ("compilerversion", self.compiler_version.as_str()),
            ("constructorArguements", args.as_str()),
        ];

        let response: ApiResponse = self
            .client
            .post(self.api_url.clone())
            .form(&form)
            .send()
            .await
            .context("Failed to submit verification request")?
            .json()
            .await
            .context("Failed to parse verification response")?;

        if response.status == "1" {
            Ok(Ok(response.result))
        } else {
            Ok(Err(classify(&response.result)))
        }
    }

    /// Poll the provider until the submission leaves the pending state, up
    /// to a bounded number of attempts.
    async fn await_result(&self, guid: &str) -> anyhow::Result<VerifyOutcome> {
        for _ in 0..MAX_STATUS_POLLS {
            let response: ApiResponse = self
                .client
                .get(self.api_url.clone())
                .query(&[
                    ("apikey", self.api_key.as_str()),
                    ("module", "contract"),
                    ("action", "checkverifystatus"),
                    ("guid", guid),
                ])
                .send()
                .await
                .context("Failed to poll verification status")?
                .json()
                .await
                .context("Failed to parse verification status")?;

            if is_pending(&response.result) {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }
            return Ok(classify(&response.result));
        }
        anyhow::bail!(
            "verification guid `{}` still pending after {} status polls",
            guid,
            MAX_STATUS_POLLS
        )
    }
}

impl Verifier for EtherscanVerifier {
    async fn verify(
        &self,
        request: &VerificationRequest,
        libraries: Option<&BTreeMap<String, Address>>,
    ) -> anyhow::Result<VerifyOutcome> {
        match self.submit(request, libraries).await? {
            Ok(guid) => self.await_result(&guid).await,
            Err(outcome) => Ok(outcome),
        }
    }
}

/// Whether a status-poll response still reports the submission as queued.
fn is_pending(result: &str) -> bool {
    result.contains("Pending in queue")
}

/// Map a provider message onto the typed outcome.
fn classify(message: &str) -> VerifyOutcome {
    let lower = message.to_lowercase();
    if lower.contains("pass - verified") {
        VerifyOutcome::Verified
    } else if lower.contains("already verified") {
        VerifyOutcome::AlreadyVerified
    } else if lower.contains("unable to locate contractcode")
        || lower.contains("does not have bytecode")
        || lower.contains("has no bytecode")
    {
        VerifyOutcome::BytecodeNotAvailable
    } else if lower.contains("missing libraries") {
        VerifyOutcome::MissingLibraries(parse_library_names(message))
    } else {
        VerifyOutcome::Failed(message.to_string())
    }
}

/// Pull the library names out of a "missing libraries: A, B" message.
fn parse_library_names(message: &str) -> Vec<String> {
    message
        .split_once(':')
        .map(|(_, names)| names)
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}
