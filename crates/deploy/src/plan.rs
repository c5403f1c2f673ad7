//! Declarative deployment plans.
//!
//! A plan is a TOML file listing artifacts in dependency order. Constructor
//! arguments may reference earlier artifacts by name with an `@` prefix,
//! which resolves to their deployed address at run time.

use std::path::Path;

use alloy_core::primitives::Address;
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use crate::artifact::ArtifactFactory;
use crate::chain::ChainClient;
use crate::error::Result;
use crate::runner::StepRunner;

/// One deployment run, as declared by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentPlan {
    #[serde(rename = "step")]
    pub steps: Vec<Step>,
}

/// One artifact to deploy.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub name: String,
    /// Register the deployed address for bytecode linking.
    #[serde(default)]
    pub library: bool,
    /// Constructor arguments. Strings of the form `@Name` resolve to the
    /// address of the earlier artifact `Name`.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl DeploymentPlan {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        let plan: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse plan {}", path.display()))?;
        if plan.steps.is_empty() {
            anyhow::bail!("Plan {} contains no steps", path.display());
        }
        Ok(plan)
    }

    /// Execute every step in order through the runner.
    pub async fn run<C, F>(&self, runner: &mut StepRunner<'_, C, F>) -> Result<()>
    where
        C: ChainClient,
        F: ArtifactFactory,
    {
        for step in &self.steps {
            let args = resolve_args(&step.args, |name| runner.address(name))?;
            if step.library {
                runner.deploy_library(&step.name, &args).await?;
            } else {
                runner.deploy(&step.name, &args).await?;
            }
        }
        Ok(())
    }
}

/// Replace `@Name` argument references with the referenced addresses.
fn resolve_args(
    args: &[Value],
    lookup: impl Fn(&str) -> Result<Address>,
) -> Result<Vec<Value>> {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) if s.starts_with('@') => {
                let address = lookup(&s[1..])?;
                Ok(Value::String(address.to_string()))
            }
            other => Ok(other.clone()),
        })
        .collect()
}
