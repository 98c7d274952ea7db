//! stagehand-deploy - Library-linked, proxy-fronted contract deployments.
//!
//! This crate deploys a library, a logic contract linked against it and a
//! proxy in front of the logic contract, initializing the logic contract
//! exactly once on the way.

mod artifact;
pub use artifact::{ADDRESS_LEN, Artifact, ArtifactSet, LinkReference};

mod config;
pub use config::{CONFIG_FILENAME, ContractNames, DeployConfig};

mod deployer;
pub use deployer::{Deployer, DeploymentFailure, deploy};

mod error;
pub use error::{DeployError, LedgerError, Result};

mod guard;
pub use guard::{
    DEFAULT_INITIALIZER, InitGuard, InitPayload, InitStrategy, classify, is_already_initialized,
    select_initializer,
};

pub mod ledger;
pub use ledger::{InMemoryLedger, Ledger, Receipt, RpcLedger};

mod linker;
pub use linker::{LibraryAddresses, link};

mod manifest;
pub use manifest::{DeploymentManifest, FailedStep, ManifestEntry};

mod orchestrator;
pub use orchestrator::{
    AddressTable, DeploymentRecord, Orchestrator, RunFailure, StepRecord, StepStatus,
};

mod plan;
pub use plan::{DeploymentPlan, PlanBuilder, Step, StepKind, proxy_constructor_args};

#[cfg(test)]
mod test_utils;
