//! Deployment plans.
//!
//! A [`DeploymentPlan`] is the explicit, ordered list of steps a run executes.
//! Steps refer to each other by role name; a step may only depend on roles
//! produced by steps before it. The orchestrator never reorders.

use std::collections::{BTreeMap, HashSet};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    artifact::{Artifact, ArtifactSet},
    config::ContractNames,
    error::{DeployError, Result},
    guard::{InitPayload, InitStrategy, select_initializer},
};

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Step {
    /// Publish an artifact that needs no linking.
    DeployLibrary {
        role: String,
        artifact: String,
        #[serde(default)]
        constructor_args: Bytes,
    },
    /// Link an artifact against earlier library deployments, then publish it.
    LinkAndDeployContract {
        role: String,
        artifact: String,
        /// Library name, as referenced by the artifact, to the role that
        /// deployed it.
        libraries: BTreeMap<String, String>,
        #[serde(default)]
        constructor_args: Bytes,
    },
    /// Publish a proxy in front of the `logic` role, optionally relaying an
    /// initializer through its constructor.
    DeployProxy {
        role: String,
        artifact: String,
        logic: String,
        init: Option<InitPayload>,
    },
    /// Call the initializer on an already deployed `target` role.
    InvokeInitializer {
        role: String,
        target: String,
        payload: InitPayload,
    },
}

/// Kind of a [`Step`], for logs and manifests.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    DeployLibrary,
    LinkAndDeployContract,
    DeployProxy,
    InvokeInitializer,
}

impl Step {
    pub fn role(&self) -> &str {
        match self {
            Self::DeployLibrary { role, .. }
            | Self::LinkAndDeployContract { role, .. }
            | Self::DeployProxy { role, .. }
            | Self::InvokeInitializer { role, .. } => role,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Self::DeployLibrary { .. } => StepKind::DeployLibrary,
            Self::LinkAndDeployContract { .. } => StepKind::LinkAndDeployContract,
            Self::DeployProxy { .. } => StepKind::DeployProxy,
            Self::InvokeInitializer { .. } => StepKind::InvokeInitializer,
        }
    }

    /// Artifact published by this step, if it publishes one.
    pub fn artifact(&self) -> Option<&str> {
        match self {
            Self::DeployLibrary { artifact, .. }
            | Self::LinkAndDeployContract { artifact, .. }
            | Self::DeployProxy { artifact, .. } => Some(artifact),
            Self::InvokeInitializer { .. } => None,
        }
    }

    /// Whether the step creates a contract and thus adds its role to the
    /// address table.
    pub fn publishes(&self) -> bool {
        self.artifact().is_some()
    }

    /// Roles whose addresses must exist before this step runs.
    pub fn dependencies(&self) -> Vec<&str> {
        match self {
            Self::DeployLibrary { .. } => Vec::new(),
            Self::LinkAndDeployContract { libraries, .. } => {
                libraries.values().map(String::as_str).collect()
            }
            Self::DeployProxy { logic, .. } => vec![logic.as_str()],
            Self::InvokeInitializer { target, .. } => vec![target.as_str()],
        }
    }

    fn set_role(&mut self, new_role: String) {
        match self {
            Self::DeployLibrary { role, .. }
            | Self::LinkAndDeployContract { role, .. }
            | Self::DeployProxy { role, .. }
            | Self::InvokeInitializer { role, .. } => *role = new_role,
        }
    }
}

/// An ordered sequence of [`Step`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    steps: Vec<Step>,
}

impl DeploymentPlan {
    /// Wrap `steps` as they are. Use [`DeploymentPlan::validate`] or the
    /// builder to check them.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn builder(artifacts: &ArtifactSet) -> PlanBuilder<'_> {
        PlanBuilder {
            artifacts,
            steps: Vec::new(),
        }
    }

    /// The library, logic contract and proxy deployment for `strategy`.
    ///
    /// - [`InitStrategy::None`]: library, logic, proxy.
    /// - [`InitStrategy::Direct`]: library, logic, initializer call, proxy.
    /// - [`InitStrategy::Relayed`]: library, logic, proxy carrying the
    ///   initializer calldata.
    pub fn standard(
        artifacts: &ArtifactSet,
        names: &ContractNames,
        strategy: InitStrategy,
        initializer: &str,
    ) -> Result<Self> {
        let builder = Self::builder(artifacts)
            .library(&names.library)
            .contract(&names.logic);

        let builder = match strategy {
            InitStrategy::None => builder.proxy(&names.proxy, &names.logic, None),
            InitStrategy::Direct => {
                let payload = select_initializer(artifacts.resolve(&names.logic)?, initializer, &[])?;
                builder
                    .initializer(&names.logic, payload)
                    .proxy(&names.proxy, &names.logic, None)
            }
            InitStrategy::Relayed => {
                let payload = select_initializer(artifacts.resolve(&names.logic)?, initializer, &[])?;
                builder.proxy(&names.proxy, &names.logic, Some(payload))
            }
        };

        builder.build()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the plan against `artifacts` without touching any chain.
    ///
    /// Fails on the first of: a reused role, a dependency on a role not
    /// published by an earlier step, an unknown artifact, a library reference
    /// with no provider, or a proxy whose constructor cannot take the
    /// requested arguments.
    pub fn validate(&self, artifacts: &ArtifactSet) -> Result<()> {
        let mut roles = HashSet::new();
        let mut published = HashSet::new();

        for (index, step) in self.steps.iter().enumerate() {
            let role = step.role();
            if !roles.insert(role) {
                return Err(DeployError::DuplicateRole(role.to_string()));
            }

            for dependency in step.dependencies() {
                if !published.contains(dependency) {
                    return Err(DeployError::DependencyUnsatisfied {
                        step: index,
                        role: role.to_string(),
                        missing: dependency.to_string(),
                    });
                }
            }

            match step {
                Step::DeployLibrary { artifact, .. } => {
                    let artifact = artifacts.resolve(artifact)?;
                    require_libraries(artifact, &BTreeMap::new())?;
                }
                Step::LinkAndDeployContract {
                    artifact,
                    libraries,
                    ..
                } => {
                    let artifact = artifacts.resolve(artifact)?;
                    require_libraries(artifact, libraries)?;
                }
                Step::DeployProxy { artifact, init, .. } => {
                    let artifact = artifacts.resolve(artifact)?;
                    require_libraries(artifact, &BTreeMap::new())?;
                    proxy_constructor_args(artifact, Address::ZERO, init.as_ref())?;
                }
                Step::InvokeInitializer { .. } => {}
            }

            if step.publishes() {
                published.insert(role);
            }
        }

        Ok(())
    }

    /// SHA-256 over the serialized steps, hex encoded.
    ///
    /// Two plans hash equal exactly when they would submit the same sequence
    /// of operations against the same artifact names.
    pub fn hash(&self) -> String {
        let json =
            serde_json::to_string(&self.steps).expect("plan serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn require_libraries(artifact: &Artifact, libraries: &BTreeMap<String, String>) -> Result<()> {
    match artifact
        .required_libraries()
        .find(|library| !libraries.contains_key(*library))
    {
        Some(library) => Err(DeployError::UnresolvedLibraryReference {
            artifact: artifact.name.clone(),
            library: library.to_string(),
        }),
        None => Ok(()),
    }
}

/// ABI-encode the constructor arguments of a proxy in front of `logic`.
///
/// Proxies take either `(address logic)` or `(address logic, bytes data)`.
/// With the second form `data` is the initializer calldata, or empty when
/// `init` is `None`. An artifact without a constructor in its ABI gets the
/// form matching `init`.
pub fn proxy_constructor_args(
    artifact: &Artifact,
    logic: Address,
    init: Option<&InitPayload>,
) -> Result<Bytes> {
    let invalid = |reason: String| DeployError::InvalidArtifact {
        artifact: artifact.name.clone(),
        reason,
    };

    let params: Option<Vec<&str>> = artifact
        .abi
        .constructor
        .as_ref()
        .map(|c| c.inputs.iter().map(|p| p.ty.as_str()).collect());

    let relays = match params.as_deref() {
        Some(["address"]) => false,
        Some(["address", "bytes"]) => true,
        None => init.is_some(),
        Some(other) => {
            return Err(invalid(format!(
                "unsupported proxy constructor ({})",
                other.join(",")
            )));
        }
    };

    if init.is_some() && !relays {
        return Err(invalid(
            "proxy constructor cannot relay an initializer".to_string(),
        ));
    }

    let mut values = vec![DynSolValue::Address(logic)];
    if relays {
        let data = init.map(|p| p.calldata().to_vec()).unwrap_or_default();
        values.push(DynSolValue::Bytes(data));
    }

    Ok(Bytes::from(DynSolValue::Tuple(values).abi_encode_params()))
}

/// Incremental construction of a [`DeploymentPlan`].
///
/// Roles default to the artifact name. Library providers of a contract are
/// looked up by library name among the roles added so far.
#[derive(Debug)]
pub struct PlanBuilder<'a> {
    artifacts: &'a ArtifactSet,
    steps: Vec<Step>,
}

impl PlanBuilder<'_> {
    /// Deploy `artifact` as a library.
    pub fn library(mut self, artifact: &str) -> Self {
        self.steps.push(Step::DeployLibrary {
            role: artifact.to_string(),
            artifact: artifact.to_string(),
            constructor_args: Bytes::new(),
        });
        self
    }

    /// Link and deploy `artifact`. Each library it references is provided by
    /// the role of the same name.
    pub fn contract(self, artifact: &str) -> Self {
        self.contract_with_args(artifact, Bytes::new())
    }

    pub fn contract_with_args(mut self, artifact: &str, constructor_args: Bytes) -> Self {
        // Unknown artifacts are reported by `build`.
        let libraries = self
            .artifacts
            .resolve(artifact)
            .map(|a| {
                a.required_libraries()
                    .map(|l| (l.to_string(), l.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        self.steps.push(Step::LinkAndDeployContract {
            role: artifact.to_string(),
            artifact: artifact.to_string(),
            libraries,
            constructor_args,
        });
        self
    }

    /// Deploy `artifact` as a proxy for the `logic` role.
    pub fn proxy(mut self, artifact: &str, logic: &str, init: Option<InitPayload>) -> Self {
        self.steps.push(Step::DeployProxy {
            role: artifact.to_string(),
            artifact: artifact.to_string(),
            logic: logic.to_string(),
            init,
        });
        self
    }

    /// Call `payload` on the `target` role. The step's role is
    /// `<target>::<signature>`.
    pub fn initializer(mut self, target: &str, payload: InitPayload) -> Self {
        self.steps.push(Step::InvokeInitializer {
            role: format!("{target}::{}", payload.signature),
            target: target.to_string(),
            payload,
        });
        self
    }

    /// Rename the role of the last added step.
    pub fn role(mut self, role: &str) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.set_role(role.to_string());
        }
        self
    }

    /// Finish the plan and validate it.
    pub fn build(self) -> Result<DeploymentPlan> {
        let plan = DeploymentPlan::from_steps(self.steps);
        plan.validate(self.artifacts)?;
        Ok(plan)
    }
}
