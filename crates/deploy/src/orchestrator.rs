//! Sequential execution of a [`DeploymentPlan`].

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, Bytes, TxHash};
use derive_more::Deref;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    artifact::ArtifactSet,
    error::{DeployError, Result},
    guard::InitGuard,
    ledger::{Ledger, Receipt},
    linker::{LibraryAddresses, link},
    plan::{DeploymentPlan, Step, StepKind, proxy_constructor_args},
};

/// Where a step ended up.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepStatus {
    Confirmed,
    Failed,
    NotAttempted,
}

/// The outcome of one plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub kind: StepKind,
    pub role: String,
    /// Artifact published, or the target's artifact for initializer calls.
    pub artifact: Option<String>,
    /// Role an initializer call was made on.
    pub target: Option<String>,
    pub status: StepStatus,
    /// Created contract, or the called one for initializer calls.
    pub address: Option<Address>,
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
    pub constructor_args: Bytes,
    /// Whether this step left its own contract initialized.
    pub initialized: bool,
}

impl StepRecord {
    fn pending(index: usize, step: &Step, plan: &DeploymentPlan) -> Self {
        let (artifact, target) = match step {
            Step::InvokeInitializer { target, .. } => {
                let artifact = plan
                    .steps()
                    .iter()
                    .find(|s| s.role() == target)
                    .and_then(Step::artifact)
                    .map(str::to_string);
                (artifact, Some(target.clone()))
            }
            other => (other.artifact().map(str::to_string), None),
        };

        Self {
            index,
            kind: step.kind(),
            role: step.role().to_string(),
            artifact,
            target,
            status: StepStatus::NotAttempted,
            address: None,
            tx_hash: None,
            block_number: None,
            constructor_args: Bytes::new(),
            initialized: false,
        }
    }
}

/// Role to address of every contract created by a run. Write-once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref)]
pub struct AddressTable(BTreeMap<String, Address>);

impl AddressTable {
    /// Record the address of `role`. A role can only be recorded once.
    pub fn insert(&mut self, role: &str, address: Address) -> Result<()> {
        if self.0.contains_key(role) {
            return Err(DeployError::DuplicateRole(role.to_string()));
        }
        self.0.insert(role.to_string(), address);
        Ok(())
    }
}

/// Everything a run did, step by step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub steps: Vec<StepRecord>,
    pub addresses: AddressTable,
}

impl DeploymentRecord {
    /// A record with every step of `plan` not attempted yet.
    pub fn pending(plan: &DeploymentPlan) -> Self {
        Self {
            steps: plan
                .steps()
                .iter()
                .enumerate()
                .map(|(index, step)| StepRecord::pending(index, step, plan))
                .collect(),
            addresses: AddressTable::default(),
        }
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Confirmed)
    }

    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    /// Whether every step confirmed.
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Confirmed)
    }

    pub fn address(&self, role: &str) -> Option<Address> {
        self.addresses.get(role).copied()
    }

    /// Whether the contract of `role` was initialized, either by its own
    /// creation or by a confirmed initializer call on it.
    pub fn is_initialized(&self, role: &str) -> bool {
        self.confirmed().any(|s| {
            (s.role == role && s.initialized)
                || (s.kind == StepKind::InvokeInitializer && s.target.as_deref() == Some(role))
        })
    }
}

/// A run that stopped early, with what it got done.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: DeployError,
    pub record: DeploymentRecord,
}

/// What executing a single step produced.
struct StepOutcome {
    address: Address,
    receipt: Receipt,
    constructor_args: Bytes,
    initialized: bool,
}

/// Runs plans one step at a time against a [`Ledger`].
///
/// Each step waits for its transaction to confirm before the next one is
/// submitted. The first failure stops the run.
pub struct Orchestrator<'a, L> {
    ledger: &'a L,
    artifacts: &'a ArtifactSet,
    abort: Option<watch::Receiver<bool>>,
}

impl<'a, L: Ledger> Orchestrator<'a, L> {
    pub fn new(ledger: &'a L, artifacts: &'a ArtifactSet) -> Self {
        Self {
            ledger,
            artifacts,
            abort: None,
        }
    }

    /// Stop before the next submission once `abort` turns true.
    pub fn with_abort(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Execute `plan`. The plan is validated first, so a malformed plan
    /// submits nothing.
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<DeploymentRecord, RunFailure> {
        let mut record = DeploymentRecord::pending(plan);

        if let Err(error) = plan.validate(self.artifacts) {
            tracing::error!(error = %error, "Deployment plan is invalid");
            return Err(RunFailure { error, record });
        }

        tracing::info!(steps = plan.len(), hash = %plan.hash(), "Executing deployment plan");

        let mut guard = InitGuard::default();

        for (index, step) in plan.steps().iter().enumerate() {
            if self.aborted() {
                tracing::warn!(step = index, role = %step.role(), "Deployment aborted");
                return Err(RunFailure {
                    error: DeployError::Cancelled(index),
                    record,
                });
            }

            tracing::info!(step = index, kind = %step.kind(), role = %step.role(), "Executing step");

            let outcome = match self
                .execute(index, step, &record.addresses, &mut guard)
                .await
            {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(step = index, role = %step.role(), error = %error, "Step failed");
                    record.steps[index].status = StepStatus::Failed;
                    return Err(RunFailure { error, record });
                }
            };

            if step.publishes() {
                if let Err(error) = record.addresses.insert(step.role(), outcome.address) {
                    record.steps[index].status = StepStatus::Failed;
                    return Err(RunFailure { error, record });
                }
            }

            let entry = &mut record.steps[index];
            entry.status = StepStatus::Confirmed;
            entry.address = Some(outcome.address);
            entry.tx_hash = Some(outcome.receipt.tx_hash);
            entry.block_number = Some(outcome.receipt.block_number);
            entry.constructor_args = outcome.constructor_args;
            entry.initialized = outcome.initialized;

            tracing::info!(
                step = index,
                role = %step.role(),
                address = %outcome.address,
                tx_hash = %outcome.receipt.tx_hash,
                block = outcome.receipt.block_number,
                "Step confirmed"
            );
        }

        tracing::info!(contracts = record.addresses.len(), "Deployment plan complete");
        Ok(record)
    }

    async fn execute(
        &self,
        index: usize,
        step: &Step,
        addresses: &AddressTable,
        guard: &mut InitGuard,
    ) -> Result<StepOutcome> {
        let resolve = |dependency: &str| {
            addresses
                .get(dependency)
                .copied()
                .ok_or_else(|| DeployError::DependencyUnsatisfied {
                    step: index,
                    role: step.role().to_string(),
                    missing: dependency.to_string(),
                })
        };

        match step {
            Step::DeployLibrary {
                role,
                artifact,
                constructor_args,
            } => {
                let artifact = self.artifacts.resolve(artifact)?;
                let code = link(artifact, &LibraryAddresses::new())?;
                self.publish(role, code, constructor_args.clone(), false)
                    .await
            }
            Step::LinkAndDeployContract {
                role,
                artifact,
                libraries,
                constructor_args,
            } => {
                let mut linked = LibraryAddresses::new();
                for (library, provider) in libraries {
                    linked.insert(library.clone(), resolve(provider)?);
                }

                let artifact = self.artifacts.resolve(artifact)?;
                let code = link(artifact, &linked)?;
                self.publish(role, code, constructor_args.clone(), false)
                    .await
            }
            Step::DeployProxy {
                role,
                artifact,
                logic,
                init,
            } => {
                let logic = resolve(logic)?;
                let artifact = self.artifacts.resolve(artifact)?;
                let code = link(artifact, &LibraryAddresses::new())?;
                let args = proxy_constructor_args(artifact, logic, init.as_ref())?;

                let outcome = self.publish(role, code, args, init.is_some()).await?;
                if init.is_some() {
                    guard.record_relayed(outcome.address)?;
                }
                Ok(outcome)
            }
            Step::InvokeInitializer {
                target, payload, ..
            } => {
                let address = resolve(target)?;
                let receipt = guard.guarded_invoke(self.ledger, address, payload).await?;
                Ok(StepOutcome {
                    address,
                    receipt,
                    constructor_args: Bytes::new(),
                    initialized: false,
                })
            }
        }
    }

    async fn publish(
        &self,
        role: &str,
        code: Bytes,
        constructor_args: Bytes,
        initialized: bool,
    ) -> Result<StepOutcome> {
        tracing::debug!(
            role = %role,
            code_len = code.len(),
            args_len = constructor_args.len(),
            "Publishing contract"
        );

        let receipt = self.ledger.publish(&code, &constructor_args).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            DeployError::TransactionRejected(format!(
                "creation of `{role}` in {} returned no contract address",
                receipt.tx_hash
            ))
        })?;

        Ok(StepOutcome {
            address,
            receipt,
            constructor_args,
            initialized,
        })
    }
}
