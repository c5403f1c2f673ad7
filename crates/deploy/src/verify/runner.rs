//! Drains the verification queue with reason-specific retries.

use std::collections::BTreeMap;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};

use crate::libraries::LibraryRegistry;

use super::{VerificationLog, VerificationRequest, Verifier, VerifyOutcome};

/// Interval between attempts while the provider has not seen the bytecode yet.
const NOT_AVAILABLE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Total attempts while the provider has not seen the bytecode yet.
const NOT_AVAILABLE_MAX_ATTEMPTS: usize = 3;

/// Summary of one queue drain.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub verified: usize,
    pub skipped: usize,
    /// Artifact name and failure description for every abandoned request.
    pub failed: Vec<(String, String)>,
}

/// Processes verification requests in queue order.
///
/// Failures never abort the batch: an abandoned request is reported in the
/// summary and the runner moves on to the next one. The verified-address log
/// makes repeated drains of the same queue idempotent.
pub struct VerificationRunner<'a, V> {
    verifier: &'a V,
    libraries: &'a LibraryRegistry,
    retry_delay: Duration,
}

impl<'a, V: Verifier> VerificationRunner<'a, V> {
    pub fn new(verifier: &'a V, libraries: &'a LibraryRegistry) -> Self {
        Self {
            verifier,
            libraries,
            retry_delay: NOT_AVAILABLE_RETRY_DELAY,
        }
    }

    #[cfg(test)]
    fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Drain the given requests, recording successes in `log`.
    pub async fn run(
        &self,
        requests: impl Iterator<Item = &VerificationRequest>,
        log: &mut VerificationLog,
    ) -> anyhow::Result<VerificationReport> {
        let mut report = VerificationReport::default();

        for request in requests {
            if log.contains(request.address) {
                tracing::info!(
                    artifact = %request.contract_name,
                    address = %request.address,
                    "Already verified, skipping"
                );
                report.skipped += 1;
                continue;
            }

            match self.process(request).await {
                Ok(()) => {
                    log.record(request.address)?;
                    report.verified += 1;
                }
                Err(reason) => {
                    tracing::warn!(
                        artifact = %request.contract_name,
                        address = %request.address,
                        reason = %reason,
                        "Verification abandoned"
                    );
                    report.failed.push((request.contract_name.clone(), reason));
                }
            }
        }

        tracing::info!(
            verified = report.verified,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Verification queue drained"
        );
        Ok(report)
    }

    /// Verify one request, applying the reason-specific retry policies.
    /// Returns a failure description when the request is abandoned.
    async fn process(&self, request: &VerificationRequest) -> Result<(), String> {
        tracing::info!(
            artifact = %request.contract_name,
            address = %request.address,
            "Verifying"
        );

        let outcome = self.verify_waiting_for_bytecode(request).await;
        match outcome {
            Ok(VerifyOutcome::Verified) | Ok(VerifyOutcome::AlreadyVerified) => Ok(()),
            Ok(VerifyOutcome::BytecodeNotAvailable) => {
                Err("bytecode never became available to the provider".to_string())
            }
            Ok(VerifyOutcome::MissingLibraries(names)) => {
                self.retry_with_libraries(request, names).await
            }
            Ok(VerifyOutcome::Failed(message)) => Err(message),
            Err(err) => Err(format!("{:#}", err)),
        }
    }

    /// Submit the request, retrying on a fixed interval while the provider
    /// reports the deployed bytecode as not yet available.
    async fn verify_waiting_for_bytecode(
        &self,
        request: &VerificationRequest,
    ) -> anyhow::Result<VerifyOutcome> {
        let attempt = || async {
            match self.verifier.verify(request, None).await {
                Ok(VerifyOutcome::BytecodeNotAvailable) => Err(AttemptError::NotAvailable),
                Ok(outcome) => Ok(outcome),
                Err(err) => Err(AttemptError::Other(err)),
            }
        };

        let result = attempt
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.retry_delay)
                    .with_max_times(NOT_AVAILABLE_MAX_ATTEMPTS - 1),
            )
            .when(|err| matches!(err, AttemptError::NotAvailable))
            .notify(|_, delay| {
                tracing::info!(
                    artifact = %request.contract_name,
                    "Bytecode not yet available, retrying in {:?}",
                    delay
                );
            })
            .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(AttemptError::NotAvailable) => Ok(VerifyOutcome::BytecodeNotAvailable),
            Err(AttemptError::Other(err)) => Err(err),
        }
    }

    /// Resolve the reported library names against the registry and retry
    /// exactly once with explicit bindings.
    async fn retry_with_libraries(
        &self,
        request: &VerificationRequest,
        names: Vec<String>,
    ) -> Result<(), String> {
        let mut bindings = BTreeMap::new();
        for name in names {
            let address = self
                .libraries
                .resolve(&name)
                .map_err(|err| format!("{:#}", err))?;
            bindings.insert(name, address);
        }

        tracing::info!(
            artifact = %request.contract_name,
            libraries = bindings.len(),
            "Retrying verification with explicit library bindings"
        );

        match self.verifier.verify(request, Some(&bindings)).await {
            Ok(VerifyOutcome::Verified) | Ok(VerifyOutcome::AlreadyVerified) => Ok(()),
            Ok(VerifyOutcome::MissingLibraries(names)) => Err(format!(
                "libraries still reported missing after binding: {}",
                names.join(", ")
            )),
            Ok(VerifyOutcome::BytecodeNotAvailable) => {
                Err("bytecode not available on the library-binding retry".to_string())
            }
            Ok(VerifyOutcome::Failed(message)) => Err(message),
            Err(err) => Err(format!("{:#}", err)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("bytecode not yet available")]
    NotAvailable,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
