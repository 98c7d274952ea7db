use std::path::PathBuf;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use stagehand_deploy::{CONFIG_FILENAME, DeployConfig, InitStrategy};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Prefix of the environment variables read into the configuration.
const ENV_PREFIX: &str = "STAGEHAND_";

#[derive(Debug, Parser)]
#[command(name = "stagehand")]
#[command(
    author,
    version,
    about = "Deploy a library, a linked logic contract and its proxy, initialized exactly once"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "STAGEHAND_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Stagehand.toml file, or a directory containing one.
    ///
    /// Values from the file are overridden by `STAGEHAND_*` environment
    /// variables, which are in turn overridden by command line flags.
    #[arg(long, alias = "conf", env = "STAGEHAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// The JSON-RPC endpoint of the node.
    #[arg(long, alias = "rpc")]
    pub rpc_url: Option<Url>,

    /// The account the node sends transactions from.
    #[arg(long)]
    pub from: Option<Address>,

    /// A name for the target network. The manifest is written to
    /// <outdata>/<network>.json.
    #[arg(short, long, visible_alias = "name")]
    pub network: Option<String>,

    /// The chain id the node is expected to report.
    #[arg(long)]
    pub chain_id: Option<u64>,

    /// The directory holding the compiled contract artifacts.
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// The directory the manifest is written to.
    #[arg(long)]
    pub outdata: Option<PathBuf>,

    /// How the logic contract is initialized: none, direct or relayed.
    #[arg(long)]
    pub strategy: Option<InitStrategy>,

    /// The number of blocks a transaction needs, counting its own.
    #[arg(long)]
    pub confirmations: Option<u64>,

    /// Seconds to wait for each transaction to confirm.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Artifact name of the library.
    #[arg(long)]
    pub library: Option<String>,

    /// Artifact name of the logic contract.
    #[arg(long)]
    pub logic: Option<String>,

    /// Artifact name of the proxy.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Name of the initializer function on the logic contract.
    #[arg(long)]
    pub initializer: Option<String>,

    /// Run against a simulated chain. Nothing is sent and no manifest is
    /// written.
    #[arg(long, env = "STAGEHAND_DRY_RUN")]
    pub dry_run: bool,

    /// Save the resolved configuration to <outdata>/Stagehand.toml.
    #[arg(long)]
    pub save_config: bool,
}

impl Cli {
    /// Resolve the configuration: defaults, then the config file, then the
    /// environment, then the flags given on the command line.
    pub fn load_config(&self) -> Result<DeployConfig> {
        let mut figment = Figment::from(Serialized::defaults(DeployConfig::default()));

        if let Some(path) = &self.config {
            if !path.exists() {
                anyhow::bail!("Configuration file or directory not found: {}", path.display());
            }
            let file = if path.is_dir() {
                path.join(CONFIG_FILENAME)
            } else {
                path.clone()
            };
            tracing::debug!(path = %file.display(), "Reading configuration file");
            figment = figment.merge(Toml::file(file));
        }

        let config: DeployConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to resolve configuration")?;

        Ok(self.apply(config))
    }

    /// Override `config` with the flags present on the command line.
    pub fn apply(&self, mut config: DeployConfig) -> DeployConfig {
        if let Some(rpc_url) = &self.rpc_url {
            config.rpc_url = rpc_url.clone();
        }
        if let Some(from) = self.from {
            config.from = Some(from);
        }
        if let Some(network) = &self.network {
            config.network = network.clone();
        }
        if let Some(chain_id) = self.chain_id {
            config.chain_id = Some(chain_id);
        }
        if let Some(artifacts) = &self.artifacts {
            config.artifacts = artifacts.clone();
        }
        if let Some(outdata) = &self.outdata {
            config.outdata = outdata.clone();
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(confirmations) = self.confirmations {
            config.confirmations = confirmations;
        }
        if let Some(timeout) = self.timeout {
            config.confirmation_timeout_secs = timeout;
        }
        if let Some(library) = &self.library {
            config.contracts.library = library.clone();
        }
        if let Some(logic) = &self.logic {
            config.contracts.logic = logic.clone();
        }
        if let Some(proxy) = &self.proxy {
            config.contracts.proxy = proxy.clone();
        }
        if let Some(initializer) = &self.initializer {
            config.initializer = initializer.clone();
        }
        config
    }
}
