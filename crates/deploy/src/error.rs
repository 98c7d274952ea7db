//! Error types for deployment runs.

use std::time::Duration;

use alloy_core::primitives::{Address, Bytes, TxHash};

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Every way a deployment run can stop.
///
/// None of these are recovered from inside the crate: the run aborts and the
/// caller receives the error together with the partial record.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("invalid artifact `{artifact}`: {reason}")]
    InvalidArtifact { artifact: String, reason: String },

    #[error("artifact `{artifact}` links library `{library}` but no address was provided for it")]
    UnresolvedLibraryReference { artifact: String, library: String },

    #[error("step {step} (`{role}`) depends on `{missing}` which has not been deployed")]
    DependencyUnsatisfied {
        step: usize,
        role: String,
        missing: String,
    },

    #[error("role `{0}` appears more than once in the plan")]
    DuplicateRole(String),

    #[error("artifact `{artifact}` has no initializer matching `{signature}`")]
    InitializerNotFound { artifact: String, signature: String },

    #[error("contract at {0} is already initialized")]
    AlreadyInitialized(Address),

    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("transaction {tx_hash} not confirmed within {timeout:?}")]
    ConfirmationTimeout { tx_hash: TxHash, timeout: Duration },

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("node serves chain id {actual}, expected {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("deployment cancelled before step {0}")]
    Cancelled(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Whether retrying the same operation later might succeed.
    ///
    /// Only transport-level conditions qualify. The decision to retry stays
    /// with the caller since completed steps are already on-chain.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable(_) | Self::ConfirmationTimeout { .. }
        )
    }
}

/// Failure reported by a [`Ledger`](crate::ledger::Ledger) implementation.
///
/// Reverts are kept apart from other failures so the initialization guard
/// can inspect the revert data before it becomes a [`DeployError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("submission rejected by node: {0}")]
    Rejected(String),

    #[error("execution reverted{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Reverted {
        tx_hash: Option<TxHash>,
        data: Option<Bytes>,
        message: Option<String>,
    },

    #[error("transaction {tx_hash} not confirmed within {timeout:?}")]
    Timeout { tx_hash: TxHash, timeout: Duration },

    #[error("{0}")]
    Unavailable(String),
}

impl From<LedgerError> for DeployError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(msg) => Self::TransactionRejected(msg),
            err @ LedgerError::Reverted { .. } => Self::TransactionRejected(err.to_string()),
            LedgerError::Timeout { tx_hash, timeout } => {
                Self::ConfirmationTimeout { tx_hash, timeout }
            }
            LedgerError::Unavailable(msg) => Self::NetworkUnavailable(msg),
        }
    }
}
