//! Integration tests for stagehand-deploy.
//!
//! These tests drive the full `Deployer` against the in-memory ledger, with
//! artifacts written to a temporary directory in both Truffle and Hardhat
//! layouts. No node is required.
//! Run with: cargo test --test integration_test

use std::path::Path;
use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use rand::Rng;
use serde_json::json;
use stagehand_deploy::{
    ArtifactSet, DeployConfig, DeployError, Deployer, DeploymentFailure, DeploymentManifest,
    InMemoryLedger, InitStrategy, LedgerError, StepStatus,
};
use tempdir::TempDir;
use tokio::time::timeout;

const DEPLOYMENT_TIMEOUT_SECS: u64 = 10;

const LIBRARY: &str = "IterableOrderedOrderSet";
const LOGIC: &str = "NFTAuction";
const PROXY: &str = "Proxy";

/// Test setup context: a temp directory holding artifacts and manifests.
struct TestContext {
    network_name: String,
    temp_dir: TempDir,
}

impl TestContext {
    fn new(test_prefix: &str) -> Result<Self> {
        let suffix: u32 = rand::rng().random_range(100000..=999999);
        let network_name = format!("{test_prefix}-{suffix}");
        let temp_dir = TempDir::new(&network_name).context("Failed to create temp dir")?;

        Ok(Self {
            network_name,
            temp_dir,
        })
    }

    fn artifacts_dir(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("artifacts")
    }

    fn config(&self, strategy: InitStrategy) -> DeployConfig {
        DeployConfig {
            network: self.network_name.clone(),
            artifacts: self.artifacts_dir(),
            outdata: self.temp_dir.path().join("deployments"),
            strategy,
            ..Default::default()
        }
    }

    /// Write Truffle-style artifacts side by side, placeholders inline.
    fn write_truffle_artifacts(&self) -> Result<()> {
        let placeholder = format!("{:_<40}", format!("__{LIBRARY}"));
        self.write_artifacts(&format!("0x6080{placeholder}6000f3"), None)
    }

    /// Write a Hardhat artifact tree: one folder per source file with a
    /// `.dbg.json` sidecar next to each artifact, placeholders located by
    /// offset.
    fn write_hardhat_artifacts(&self) -> Result<()> {
        let placeholder = format!("__${}$__", "0".repeat(34));
        let link_references = json!({
            "contracts/IterableOrderedOrderSet.sol": {
                LIBRARY: [{ "start": 2, "length": 20 }]
            }
        });
        self.write_artifacts(&format!("0x6080{placeholder}6000f3"), Some(link_references))
    }

    fn write_artifacts(
        &self,
        logic_bytecode: &str,
        link_references: Option<serde_json::Value>,
    ) -> Result<()> {
        let nested = link_references.is_some();
        let dir = self.artifacts_dir();
        let artifact_path = |name: &str| -> Result<std::path::PathBuf> {
            let folder = if nested {
                dir.join("contracts").join(format!("{name}.sol"))
            } else {
                dir.clone()
            };
            std::fs::create_dir_all(&folder)?;
            if nested {
                write_json(
                    &folder.join(format!("{name}.dbg.json")),
                    &json!({ "_format": "hh-sol-dbg-1", "buildInfo": "../../build-info/0a1b.json" }),
                )?;
            }
            Ok(folder.join(format!("{name}.json")))
        };

        write_json(
            &artifact_path(LIBRARY)?,
            &json!({
                "contractName": LIBRARY,
                "abi": [],
                "bytecode": "0x6080604052348015600f57600080fd5b50"
            }),
        )?;

        let mut logic = json!({
            "contractName": LOGIC,
            "abi": [
                { "type": "function", "name": "initialize", "inputs": [], "outputs": [], "stateMutability": "nonpayable" }
            ],
            "bytecode": logic_bytecode
        });
        if let Some(link_references) = link_references {
            logic["linkReferences"] = link_references;
        }
        write_json(&artifact_path(LOGIC)?, &logic)?;

        write_json(
            &artifact_path(PROXY)?,
            &json!({
                "contractName": PROXY,
                "abi": [
                    {
                        "type": "constructor",
                        "inputs": [
                            { "name": "_logic", "type": "address" },
                            { "name": "_data", "type": "bytes" }
                        ],
                        "stateMutability": "payable"
                    }
                ],
                "bytecode": "0x608060405260405161"
            }),
        )?;

        Ok(())
    }

    /// Run a deployment with a timeout.
    async fn deploy(
        &self,
        deployer: &Deployer,
        ledger: &InMemoryLedger,
    ) -> Result<DeploymentManifest> {
        let artifacts = deployer.load_artifacts()?;
        timeout(
            Duration::from_secs(DEPLOYMENT_TIMEOUT_SECS),
            deployer.deploy(ledger, &artifacts, None),
        )
        .await
        .context("Deployment timed out")?
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .context(format!("Failed to write {}", path.display()))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn ledger() -> InMemoryLedger {
    InMemoryLedger::new(Address::repeat_byte(0x11))
}

#[tokio::test]
async fn test_relayed_deployment_from_truffle_artifacts() -> Result<()> {
    init_tracing();
    let ctx = TestContext::new("relayed")?;
    ctx.write_truffle_artifacts()?;

    let deployer = Deployer::new(ctx.config(InitStrategy::Relayed));
    let ledger = ledger();
    let manifest = ctx.deploy(&deployer, &ledger).await?;

    assert!(manifest.complete);
    assert_eq!(manifest.confirmed().count(), 3);

    let proxy = manifest.entries.iter().find(|e| e.role == PROXY).unwrap();
    assert!(proxy.initialized);

    // The library address made it into the logic contract's code.
    let library = manifest.address_of(LIBRARY).unwrap();
    let logic = ledger.contract(manifest.address_of(LOGIC).unwrap()).unwrap();
    assert_eq!(&logic.code[2..22], library.as_slice());

    let saved = DeploymentManifest::load_from_file(&deployer.config.manifest_path())?;
    assert_eq!(saved, manifest);
    Ok(())
}

#[tokio::test]
async fn test_direct_deployment_from_hardhat_tree() -> Result<()> {
    init_tracing();
    let ctx = TestContext::new("direct")?;
    ctx.write_hardhat_artifacts()?;

    let deployer = Deployer::new(ctx.config(InitStrategy::Direct));
    let ledger = ledger();
    let manifest = ctx.deploy(&deployer, &ledger).await?;

    assert!(manifest.complete);
    assert_eq!(manifest.entries.len(), 4);

    let logic = manifest.entries.iter().find(|e| e.role == LOGIC).unwrap();
    assert!(logic.initialized);
    let proxy = manifest.entries.iter().find(|e| e.role == PROXY).unwrap();
    assert!(!proxy.initialized);

    let library = manifest.address_of(LIBRARY).unwrap();
    let code = ledger.contract(manifest.address_of(LOGIC).unwrap()).unwrap().code;
    assert_eq!(&code[2..22], library.as_slice());
    Ok(())
}

#[tokio::test]
async fn test_rejected_library_leaves_partial_manifest() -> Result<()> {
    init_tracing();
    let ctx = TestContext::new("rejected")?;
    ctx.write_truffle_artifacts()?;

    let deployer = Deployer::new(ctx.config(InitStrategy::Relayed));
    let ledger = ledger().fail_publish(0, LedgerError::Rejected("nonce too low".into()));

    let err = ctx.deploy(&deployer, &ledger).await.unwrap_err();
    let failure = err
        .downcast_ref::<DeploymentFailure>()
        .context("Expected a deployment failure")?;
    assert!(matches!(failure.error, DeployError::TransactionRejected(_)));
    assert!(ledger.submissions().is_empty());
    assert!(!deployer.config.manifest_path().exists());

    let saved = DeploymentManifest::load_from_file(&deployer.config.partial_manifest_path())?;
    assert!(!saved.complete);
    assert_eq!(saved.confirmed().count(), 0);
    let statuses: Vec<_> = saved.entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Failed, StepStatus::NotAttempted, StepStatus::NotAttempted]
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_artifact_submits_nothing() -> Result<()> {
    init_tracing();
    let ctx = TestContext::new("missing")?;
    ctx.write_truffle_artifacts()?;
    std::fs::remove_file(ctx.artifacts_dir().join(format!("{LIBRARY}.json")))?;

    let deployer = Deployer::new(ctx.config(InitStrategy::None));
    let ledger = ledger();
    let artifacts = deployer.load_artifacts()?;

    let failure = deployer.run(&ledger, &artifacts, None).await.unwrap_err();
    assert!(matches!(failure.error, DeployError::ArtifactNotFound(ref name) if name == LIBRARY));
    assert!(ledger.submissions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_corrupted_artifact_is_rejected_at_load() -> Result<()> {
    let ctx = TestContext::new("corrupted")?;
    ctx.write_truffle_artifacts()?;
    std::fs::write(ctx.artifacts_dir().join("Broken.json"), "{ \"abi\": ")?;

    let result = ArtifactSet::load_dir(&ctx.artifacts_dir());
    assert!(matches!(result, Err(DeployError::InvalidArtifact { ref artifact, .. }) if artifact == "Broken"));
    Ok(())
}
