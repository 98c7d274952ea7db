//! Exactly-once initialization of logic contracts fronted by a proxy.
//!
//! Upgradeable contracts replace their constructor with an initializer that
//! must run once. The chain enforces that by reverting repeated calls; the
//! guard makes sure a run never issues a redundant call in the first place and
//! reports the contract-level revert as [`DeployError::AlreadyInitialized`].

use std::collections::HashMap;

use alloy_core::{
    dyn_abi::{DynSolValue, Specifier},
    json_abi::Function,
    primitives::{Address, Bytes, Selector},
    sol_types::decode_revert_reason,
};
use serde::{Deserialize, Serialize};

use crate::{
    artifact::Artifact,
    error::{DeployError, LedgerError, Result},
    ledger::{InitState, Ledger, Receipt, calldata},
};

/// Name of the initializer entry point when none is configured.
pub const DEFAULT_INITIALIZER: &str = "initialize";

/// Selector of OpenZeppelin's `InvalidInitialization()` custom error.
const INVALID_INITIALIZATION: [u8; 4] = [0xf9, 0x2e, 0xe8, 0xa9];

/// How the logic contract gets initialized.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InitStrategy {
    /// No initializer call.
    None,
    /// Call the initializer on the logic contract before deploying the proxy.
    Direct,
    /// Hand the initializer calldata to the proxy constructor, which forwards
    /// it in its own creation transaction.
    #[default]
    Relayed,
}

/// Calldata for a one-time setup call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Canonical signature, e.g. `initialize()`.
    pub signature: String,
    pub selector: Selector,
    /// ABI-encoded arguments, without the selector.
    pub args: Bytes,
}

impl InitPayload {
    /// Selector followed by the encoded arguments.
    pub fn calldata(&self) -> Bytes {
        calldata(self.selector, &self.args)
    }
}

/// Find the initializer `name` in the artifact's ABI and encode a call to it.
///
/// The function must take exactly `args.len()` parameters of matching types.
pub fn select_initializer(
    artifact: &Artifact,
    name: &str,
    args: &[DynSolValue],
) -> Result<InitPayload> {
    let not_found = || DeployError::InitializerNotFound {
        artifact: artifact.name.clone(),
        signature: format!(
            "{name}({})",
            args.iter()
                .filter_map(|a| a.sol_type_name())
                .collect::<Vec<_>>()
                .join(",")
        ),
    };

    let function = artifact
        .functions(name)
        .find(|function| accepts(function, args))
        .ok_or_else(not_found)?;

    let encoded = if args.is_empty() {
        Bytes::new()
    } else {
        Bytes::from(DynSolValue::Tuple(args.to_vec()).abi_encode_params())
    };

    Ok(InitPayload {
        signature: function.signature(),
        selector: function.selector(),
        args: encoded,
    })
}

/// Whether `function` takes exactly `args`, type for type.
fn accepts(function: &Function, args: &[DynSolValue]) -> bool {
    function.inputs.len() == args.len()
        && function
            .inputs
            .iter()
            .zip(args)
            .all(|(param, value)| param.resolve().is_ok_and(|ty| ty.matches(value)))
}

/// Whether a revert says the target was initialized already.
pub fn is_already_initialized(err: &LedgerError) -> bool {
    let LedgerError::Reverted { data, message, .. } = err else {
        return false;
    };

    let mentions = |text: &str| text.to_lowercase().contains("already initialized");

    if let Some(data) = data {
        if data.starts_with(&INVALID_INITIALIZATION) {
            return true;
        }
        if decode_revert_reason(data).is_some_and(|reason| mentions(&reason)) {
            return true;
        }
    }

    message.as_deref().is_some_and(mentions)
}

/// Turn a ledger failure on an initialization path into a [`DeployError`].
pub fn classify(target: Address, err: LedgerError) -> DeployError {
    if is_already_initialized(&err) {
        DeployError::AlreadyInitialized(target)
    } else {
        err.into()
    }
}

/// Tracks which contracts a run has initialized.
#[derive(Debug, Default)]
pub struct InitGuard {
    states: HashMap<Address, InitState>,
}

impl InitGuard {
    pub fn state(&self, target: Address) -> InitState {
        self.states.get(&target).copied().unwrap_or_default()
    }

    pub fn is_initialized(&self, target: Address) -> bool {
        self.state(target) == InitState::Initialized
    }

    /// Call the initializer on `target` unless this run already did.
    pub async fn guarded_invoke<L: Ledger>(
        &mut self,
        ledger: &L,
        target: Address,
        payload: &InitPayload,
    ) -> Result<Receipt> {
        if self.state(target) != InitState::Uninitialized {
            tracing::warn!(
                target = %target,
                signature = %payload.signature,
                "Refusing to initialize a contract twice"
            );
            return Err(DeployError::AlreadyInitialized(target));
        }

        self.states.insert(target, InitState::Initializing);
        tracing::info!(target = %target, signature = %payload.signature, "Calling initializer");

        match ledger.call(target, payload.selector, &payload.args).await {
            Ok(receipt) => {
                self.states.insert(target, InitState::Initialized);
                Ok(receipt)
            }
            Err(err) => {
                let err = classify(target, err);
                if matches!(err, DeployError::AlreadyInitialized(_)) {
                    self.states.insert(target, InitState::Initialized);
                } else {
                    self.states.remove(&target);
                }
                Err(err)
            }
        }
    }

    /// Record that `proxy` was initialized by its own constructor.
    pub fn record_relayed(&mut self, proxy: Address) -> Result<()> {
        if self.state(proxy) != InitState::Uninitialized {
            return Err(DeployError::AlreadyInitialized(proxy));
        }
        self.states.insert(proxy, InitState::Initialized);
        Ok(())
    }
}
