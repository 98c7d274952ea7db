//! The deployment manifest: a JSON summary of a run written next to the
//! deployments of a network.

use std::path::Path;

use alloy_core::primitives::{Address, TxHash};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    guard::InitStrategy,
    orchestrator::{DeploymentRecord, StepStatus},
    plan::StepKind,
};

/// One plan step as written to the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub role: String,
    pub kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    pub status: StepStatus,
    pub initialized: bool,
}

/// The step that stopped an incomplete run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    pub index: usize,
    pub role: String,
    pub error: String,
}

/// Result of a deployment run, complete or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub network: String,
    pub chain_id: u64,
    pub strategy: InitStrategy,
    /// Hash of the plan that produced this manifest.
    pub plan_hash: String,
    pub created_at: DateTime<Utc>,
    /// Version of stagehand that wrote the manifest.
    pub version: String,
    pub complete: bool,
    pub entries: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
}

impl DeploymentManifest {
    /// Summarize `record`. `error` is the reason the run stopped, if it did.
    pub fn from_record(
        network: &str,
        chain_id: u64,
        strategy: InitStrategy,
        plan_hash: String,
        record: &DeploymentRecord,
        error: Option<String>,
    ) -> Self {
        let entries = record
            .steps
            .iter()
            .map(|step| ManifestEntry {
                role: step.role.clone(),
                kind: step.kind,
                artifact: step.artifact.clone(),
                address: step.address,
                tx_hash: step.tx_hash,
                status: step.status,
                initialized: step.status == StepStatus::Confirmed
                    && step.kind != StepKind::InvokeInitializer
                    && record.is_initialized(&step.role),
            })
            .collect();

        // A cancelled run has no failed step but stops at the first
        // step that was not attempted.
        let failed_step = error.map(|error| {
            let stopped = record.failed_step().or_else(|| {
                record
                    .steps
                    .iter()
                    .find(|s| s.status == StepStatus::NotAttempted)
            });
            FailedStep {
                index: stopped.map(|s| s.index).unwrap_or_default(),
                role: stopped.map(|s| s.role.clone()).unwrap_or_default(),
                error,
            }
        });

        Self {
            network: network.to_string(),
            chain_id,
            strategy,
            plan_hash,
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            complete: failed_step.is_none() && record.is_complete(),
            entries,
            failed_step,
        }
    }

    /// Address deployed for `role`, if its step confirmed.
    pub fn address_of(&self, role: &str) -> Option<Address> {
        self.entries
            .iter()
            .find(|e| e.role == role && e.status == StepStatus::Confirmed)
            .and_then(|e| e.address)
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == StepStatus::Confirmed)
    }

    /// Save the manifest as formatted JSON, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create {}", parent.display()))?;
        }

        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment manifest")?;
        std::fs::write(path, json).context(format!(
            "Failed to write deployment manifest to {}",
            path.display()
        ))?;

        tracing::info!(path = %path.display(), complete = self.complete, "Manifest saved");
        Ok(())
    }

    /// Load a manifest written by [`DeploymentManifest::save_to_file`].
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Deployment manifest does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path).context(format!(
            "Failed to read deployment manifest from {}",
            path.display()
        ))?;

        serde_json::from_str(&content).context("Failed to parse deployment manifest JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifact::ArtifactSet,
        config::ContractNames,
        error::LedgerError,
        guard::DEFAULT_INITIALIZER,
        orchestrator::Orchestrator,
        plan::DeploymentPlan,
        test_utils::{AUCTION, ORDER_SET, PROXY, artifacts, ledger},
    };
    use tempdir::TempDir;

    fn plan(set: &ArtifactSet) -> DeploymentPlan {
        DeploymentPlan::standard(set, &ContractNames::default(), InitStrategy::Relayed, DEFAULT_INITIALIZER)
            .unwrap()
    }

    #[tokio::test]
    async fn test_manifest_from_complete_run() {
        let ledger = ledger();
        let set = artifacts();
        let plan = plan(&set);
        let record = Orchestrator::new(&ledger, &set).run(&plan).await.unwrap();

        let manifest = DeploymentManifest::from_record(
            "local",
            1337,
            InitStrategy::Relayed,
            plan.hash(),
            &record,
            None,
        );

        assert!(manifest.complete);
        assert!(manifest.failed_step.is_none());
        assert_eq!(manifest.confirmed().count(), 3);
        assert_eq!(manifest.address_of(PROXY), record.address(PROXY));

        let initialized: Vec<_> = manifest
            .entries
            .iter()
            .map(|e| (e.role.as_str(), e.initialized))
            .collect();
        assert_eq!(
            initialized,
            vec![(ORDER_SET, false), (AUCTION, false), (PROXY, true)]
        );
    }

    #[tokio::test]
    async fn test_manifest_from_failed_run() {
        let ledger = ledger().fail_publish(1, LedgerError::Rejected("out of gas".into()));
        let set = artifacts();
        let plan = plan(&set);
        let failure = Orchestrator::new(&ledger, &set).run(&plan).await.unwrap_err();

        let manifest = DeploymentManifest::from_record(
            "local",
            1337,
            InitStrategy::Relayed,
            plan.hash(),
            &failure.record,
            Some(failure.error.to_string()),
        );

        assert!(!manifest.complete);
        assert_eq!(manifest.confirmed().count(), 1);
        assert!(manifest.address_of(AUCTION).is_none());

        let failed = manifest.failed_step.unwrap();
        assert_eq!(failed.index, 1);
        assert_eq!(failed.role, AUCTION);
        assert!(failed.error.contains("out of gas"));
    }

    #[tokio::test]
    async fn test_manifest_roundtrip() {
        let temp_dir = TempDir::new("stagehand-manifest").unwrap();
        let path = temp_dir.path().join("deployments").join("local.json");

        let ledger = ledger();
        let set = artifacts();
        let plan = plan(&set);
        let record = Orchestrator::new(&ledger, &set).run(&plan).await.unwrap();
        let manifest = DeploymentManifest::from_record(
            "local",
            1337,
            InitStrategy::Relayed,
            plan.hash(),
            &record,
            None,
        );

        manifest.save_to_file(&path).unwrap();
        let loaded = DeploymentManifest::load_from_file(&path).unwrap();
        assert_eq!(manifest, loaded);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["strategy"], "relayed");
        assert_eq!(json["entries"][0]["status"], "confirmed");
        assert_eq!(json["entries"][2]["kind"], "deploy-proxy");
    }

    #[test]
    fn test_load_missing_manifest() {
        let temp_dir = TempDir::new("stagehand-manifest").unwrap();
        let result = DeploymentManifest::load_from_file(&temp_dir.path().join("missing.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_corrupted_manifest() {
        let temp_dir = TempDir::new("stagehand-manifest").unwrap();
        let path = temp_dir.path().join("local.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = DeploymentManifest::load_from_file(&path);
        assert!(result.is_err());
    }
}
