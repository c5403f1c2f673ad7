use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use chainsmith_deploy::DeployConfig;

/// RPC endpoint selection: a known public provider or a custom URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum RpcProvider {
    Sepolia,
    Mainnet,
    #[strum(default)]
    Custom(String),
}

impl RpcProvider {
    pub fn to_url(&self) -> String {
        match self {
            RpcProvider::Sepolia => "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
            RpcProvider::Mainnet => "https://ethereum-rpc.publicnode.com".to_string(),
            RpcProvider::Custom(url) => url.clone(),
        }
    }
}

#[derive(Parser)]
#[command(name = "chainsmith")]
#[command(
    author,
    version,
    about = "Resumable deployment of interdependent on-chain artifacts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "CHS_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// Values from the file are overridden by `CHS_*` environment variables
    /// and by command-line arguments.
    #[arg(long, alias = "conf", env = "CHS_CONFIG", default_value = "Chainsmith.toml")]
    pub config: PathBuf,

    /// RPC endpoint: a provider name (`sepolia`, `mainnet`) or a URL.
    #[arg(long, alias = "rpc", env = "CHS_RPC_URL")]
    pub rpc: Option<RpcProvider>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the deployment plan against the target network.
    Deploy {
        /// Ignore the ledger and deploy every artifact fresh.
        #[arg(long, env = "CHS_REDEPLOY", default_value_t = false)]
        redeploy: bool,
    },
    /// Drain the verification queue for the target network.
    Verify,
    /// Show ledger and verification state for the target network.
    Status,
}

/// Full application configuration, merged from `Chainsmith.toml` and `CHS_*`
/// environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// RPC endpoint URL. Required for every command.
    pub rpc_url: Option<String>,
    /// Node-managed account deployment transactions are sent from.
    pub from: Option<Address>,
    /// Directory of compiled artifact JSON files.
    pub artifacts_dir: PathBuf,
    /// Path to the deployment plan.
    pub plan: PathBuf,
    pub deploy: DeployConfig,
    pub etherscan: Option<EtherscanConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            from: None,
            artifacts_dir: PathBuf::from("artifacts"),
            plan: PathBuf::from("plan.toml"),
            deploy: DeployConfig::default(),
            etherscan: None,
        }
    }
}

/// Verification provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtherscanConfig {
    pub api_url: String,
    pub api_key: String,
    /// Directory of solc standard-json input files, one per artifact.
    pub input_dir: PathBuf,
    pub compiler_version: String,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CHS_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_provider_urls() {
        assert_eq!(
            "sepolia".parse::<RpcProvider>().unwrap().to_url(),
            "https://ethereum-sepolia-rpc.publicnode.com"
        );
        assert_eq!(
            "http://localhost:8545".parse::<RpcProvider>().unwrap(),
            RpcProvider::Custom("http://localhost:8545".to_string())
        );
    }

    #[test]
    fn test_config_parses_from_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            rpc_url = "http://localhost:8545"
            from = "0x1111111111111111111111111111111111111111"
            plan = "plans/sepolia.toml"

            [deploy]
            resumable = true
            confirmations = 3

            [etherscan]
            api_url = "https://api-sepolia.etherscan.io/api"
            api_key = "key"
            input_dir = "inputs"
            compiler_version = "v0.8.24+commit.e11b9ed9"
            "#,
        )
        .unwrap();

        assert!(config.deploy.resumable);
        assert_eq!(config.deploy.confirmations, 3);
        assert_eq!(config.plan, PathBuf::from("plans/sepolia.toml"));
        assert!(config.etherscan.is_some());
        // Unset fields keep their defaults.
        assert_eq!(config.artifacts_dir, PathBuf::from("artifacts"));
        assert!(!config.deploy.skip_verification);
    }
}
