use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::guard::{DEFAULT_INITIALIZER, InitStrategy};

/// The default name for the stagehand configuration file.
pub const CONFIG_FILENAME: &str = "Stagehand.toml";

pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";
pub const DEFAULT_NETWORK: &str = "local";
pub const DEFAULT_ARTIFACTS_DIR: &str = "build/contracts";
pub const DEFAULT_OUTDATA_DIR: &str = "deployments";

pub const DEFAULT_LIBRARY: &str = "IterableOrderedOrderSet";
pub const DEFAULT_LOGIC: &str = "NFTAuction";
pub const DEFAULT_PROXY: &str = "Proxy";

/// Artifact names of the three contracts of a standard deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractNames {
    /// Library linked into the logic contract.
    pub library: String,
    /// Implementation behind the proxy.
    pub logic: String,
    pub proxy: String,
}

impl Default for ContractNames {
    fn default() -> Self {
        Self {
            library: DEFAULT_LIBRARY.to_string(),
            logic: DEFAULT_LOGIC.to_string(),
            proxy: DEFAULT_PROXY.to_string(),
        }
    }
}

/// Everything a deployment run needs to know about its network and inputs.
///
/// Serializable to/from TOML. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Label of the target network, also the manifest file name.
    pub network: String,
    /// JSON-RPC endpoint of the node.
    pub rpc_url: Url,
    /// Account the node signs with. Required for real deployments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Expected chain id, checked against the node before deploying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Blocks required on top of the inclusion block, counting it.
    pub confirmations: u64,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Directory holding the compiled artifacts.
    pub artifacts: PathBuf,
    /// Directory the manifest is written to.
    pub outdata: PathBuf,
    pub strategy: InitStrategy,
    /// Name of the initializer function on the logic contract.
    pub initializer: String,
    pub contracts: ContractNames,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            rpc_url: Url::parse(DEFAULT_RPC_URL).expect("default RPC URL is valid"),
            from: None,
            chain_id: None,
            confirmations: 1,
            confirmation_timeout_secs: 120,
            poll_interval_ms: 1000,
            artifacts: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            outdata: PathBuf::from(DEFAULT_OUTDATA_DIR),
            strategy: InitStrategy::default(),
            initializer: DEFAULT_INITIALIZER.to_string(),
            contracts: ContractNames::default(),
        }
    }
}

impl DeployConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Where the manifest of a complete deployment to this network lives.
    pub fn manifest_path(&self) -> PathBuf {
        self.outdata.join(format!("{}.json", self.network))
    }

    /// Where the manifest of the last failed or cancelled run lives. It never
    /// replaces the one at [`Self::manifest_path`].
    pub fn partial_manifest_path(&self) -> PathBuf {
        self.outdata.join(format!("{}.partial.json", self.network))
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deploy config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from the
    /// [`CONFIG_FILENAME`] inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Configuration file or directory not found: {}",
                path.display()
            );
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration next to the manifests, creating the directory.
    pub fn save_config(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.outdata)
            .context(format!("Failed to create {}", self.outdata.display()))?;
        let config_path = self.outdata.join(CONFIG_FILENAME);
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }
}
