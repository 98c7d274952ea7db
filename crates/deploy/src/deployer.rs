use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::{
    ArtifactSet, DeployConfig, DeployError, DeploymentManifest, DeploymentPlan, InitStrategy,
    Ledger, Orchestrator, RpcLedger, RunFailure,
};

/// A deployment that did not complete.
///
/// `manifest` is the partial manifest, absent when the run failed before a
/// plan could be built.
#[derive(Debug, thiserror::Error)]
#[error("deployment to `{network}` failed: {error}")]
pub struct DeploymentFailure {
    pub network: String,
    pub error: DeployError,
    pub manifest: Option<DeploymentManifest>,
}

/// Deploys the library, logic contract and proxy described by a
/// [`DeployConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployer {
    pub config: DeployConfig,
}

impl Deployer {
    pub fn new(config: DeployConfig) -> Self {
        Self { config }
    }

    /// Load the artifacts from the configured directory.
    pub fn load_artifacts(&self) -> Result<ArtifactSet> {
        ArtifactSet::load_dir(&self.config.artifacts).context(format!(
            "Failed to load artifacts from {}",
            self.config.artifacts.display()
        ))
    }

    /// Connect to the configured node, checking its chain id if one is
    /// configured.
    pub async fn connect(&self) -> Result<RpcLedger> {
        let from = self
            .config
            .from
            .context("A sender address (`from`) is required to deploy to a node")?;

        let ledger = RpcLedger::new(self.config.rpc_url.clone(), from)
            .context("Failed to create RPC client")?
            .confirmations(self.config.confirmations)
            .confirmation_timeout(self.config.confirmation_timeout())
            .poll_interval(self.config.poll_interval());

        let chain_id = ledger
            .chain_id()
            .await
            .context(format!("Failed to reach node at {}", self.config.rpc_url))?;

        if let Some(expected) = self.config.chain_id {
            if expected != chain_id {
                anyhow::bail!(
                    "Node at {} reports chain id {chain_id}, expected {expected}",
                    self.config.rpc_url
                );
            }
        }

        tracing::info!(url = %self.config.rpc_url, chain_id, from = %from, "Connected to node");
        Ok(ledger)
    }

    /// Build the standard plan and run it. Nothing is written to disk.
    pub async fn run<L: Ledger>(
        &self,
        ledger: &L,
        artifacts: &ArtifactSet,
        abort: Option<watch::Receiver<bool>>,
    ) -> std::result::Result<DeploymentManifest, DeploymentFailure> {
        let config = &self.config;
        let failure = |error: DeployError| DeploymentFailure {
            network: config.network.clone(),
            error,
            manifest: None,
        };

        let plan = DeploymentPlan::standard(
            artifacts,
            &config.contracts,
            config.strategy,
            &config.initializer,
        )
        .map_err(failure)?;

        let chain_id = ledger
            .chain_id()
            .await
            .map_err(|err| failure(err.into()))?;
        if let Some(expected) = config.chain_id {
            if expected != chain_id {
                return Err(failure(DeployError::ChainIdMismatch {
                    expected,
                    actual: chain_id,
                }));
            }
        }

        tracing::info!(
            network = %config.network,
            chain_id,
            strategy = %config.strategy,
            sender = %ledger.sender(),
            steps = plan.len(),
            "Starting deployment"
        );

        let mut orchestrator = Orchestrator::new(ledger, artifacts);
        if let Some(abort) = abort {
            orchestrator = orchestrator.with_abort(abort);
        }

        let (record, error) = match orchestrator.run(&plan).await {
            Ok(record) => (record, None),
            Err(RunFailure { error, record }) => (record, Some(error)),
        };

        let manifest = DeploymentManifest::from_record(
            &config.network,
            chain_id,
            config.strategy,
            plan.hash(),
            &record,
            error.as_ref().map(ToString::to_string),
        );

        match error {
            None => Ok(manifest),
            Some(error) => Err(DeploymentFailure {
                network: config.network.clone(),
                error,
                manifest: Some(manifest),
            }),
        }
    }

    /// Run the deployment and write its manifest.
    ///
    /// A complete run goes to [`DeployConfig::manifest_path`] and clears any
    /// partial manifest left by an earlier attempt. A failed or cancelled run
    /// goes to [`DeployConfig::partial_manifest_path`], leaving the manifest of
    /// a previous complete deployment untouched.
    pub async fn deploy<L: Ledger>(
        &self,
        ledger: &L,
        artifacts: &ArtifactSet,
        abort: Option<watch::Receiver<bool>>,
    ) -> Result<DeploymentManifest> {
        match self.run(ledger, artifacts, abort).await {
            Ok(manifest) => {
                let path = self.config.manifest_path();
                manifest.save_to_file(&path)?;

                let partial = self.config.partial_manifest_path();
                if partial.exists() {
                    std::fs::remove_file(&partial).context(format!(
                        "Failed to remove stale partial manifest {}",
                        partial.display()
                    ))?;
                }

                tracing::info!(path = %path.display(), "Deployment complete");
                Ok(manifest)
            }
            Err(failure) => {
                if let Some(manifest) = &failure.manifest {
                    let path = self.config.partial_manifest_path();
                    manifest.save_to_file(&path)?;
                    tracing::warn!(path = %path.display(), "Partial manifest saved");
                }
                Err(failure.into())
            }
        }
    }
}

/// Deploy to the node of `config` with `strategy`, loading the artifacts from
/// disk.
pub async fn deploy(
    config: DeployConfig,
    artifacts: &ArtifactSet,
    strategy: InitStrategy,
) -> Result<DeploymentManifest> {
    let deployer = Deployer::new(DeployConfig { strategy, ..config });
    let ledger = deployer.connect().await?;
    deployer.deploy(&ledger, artifacts, None).await
}
