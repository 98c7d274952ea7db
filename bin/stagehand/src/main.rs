//! stagehand is a CLI tool to deploy a library-linked logic contract behind a
//! proxy and initialize it exactly once.

mod cli;

use alloy_core::primitives::Address;
use anyhow::Result;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use tokio::sync::watch;

use cli::Cli;
use stagehand_deploy::{
    ArtifactSet, DeployConfig, Deployer, DeploymentFailure, DeploymentManifest, InMemoryLedger,
    ledger::DEV_CHAIN_ID, select_initializer,
};

/// Sender used by dry runs when none is configured.
const DRY_RUN_SENDER: Address = Address::ZERO;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = cli.load_config()?;

    if cli.save_config {
        let path = config.save_config()?;
        tracing::info!(path = %path.display(), "Configuration written");
    }

    tracing::info!(
        network = %config.network,
        rpc_url = %config.rpc_url,
        strategy = %config.strategy,
        artifacts = %config.artifacts.display(),
        dry_run = cli.dry_run,
        "Loaded configuration"
    );

    let deployer = Deployer::new(config);
    let artifacts = deployer.load_artifacts()?;

    // Ctrl+C stops the run before the next transaction is submitted.
    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current step...");
            abort_tx.send_replace(true);
        }
    });

    let result = if cli.dry_run {
        let ledger = dry_run_ledger(&deployer.config, &artifacts);
        deployer
            .run(&ledger, &artifacts, Some(abort_rx))
            .await
            .map_err(anyhow::Error::from)
    } else {
        let ledger = deployer.connect().await?;
        deployer.deploy(&ledger, &artifacts, Some(abort_rx)).await
    };

    match result {
        Ok(manifest) => {
            println!("{}", summary(&manifest));
            if !cli.dry_run {
                println!("Manifest: {}", deployer.config.manifest_path().display());
            }
            Ok(())
        }
        Err(err) => {
            if let Some(manifest) = err
                .downcast_ref::<DeploymentFailure>()
                .and_then(|f| f.manifest.as_ref())
            {
                println!("{}", summary(manifest));
                if !cli.dry_run {
                    println!(
                        "Partial manifest: {}",
                        deployer.config.partial_manifest_path().display()
                    );
                }
            }
            Err(err)
        }
    }
}

/// A simulated chain that knows the configured initializer.
fn dry_run_ledger(config: &DeployConfig, artifacts: &ArtifactSet) -> InMemoryLedger {
    let ledger = InMemoryLedger::new(config.from.unwrap_or(DRY_RUN_SENDER))
        .with_chain_id(config.chain_id.unwrap_or(DEV_CHAIN_ID));

    // Unknown contracts or initializers are reported by the run itself.
    match artifacts
        .resolve(&config.contracts.logic)
        .and_then(|logic| select_initializer(logic, &config.initializer, &[]))
    {
        Ok(payload) => ledger.with_initializer(payload.selector),
        Err(_) => ledger,
    }
}

fn summary(manifest: &DeploymentManifest) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Step",
        "Role",
        "Artifact",
        "Address",
        "Status",
        "Initialized",
    ]);

    for (index, entry) in manifest.entries.iter().enumerate() {
        table.add_row(vec![
            format!("{index} {}", entry.kind),
            entry.role.clone(),
            entry.artifact.clone().unwrap_or_default(),
            entry.address.map(|a| a.to_string()).unwrap_or_default(),
            entry.status.to_string(),
            if entry.initialized { "yes" } else { "" }.to_string(),
        ]);
    }

    table
}
