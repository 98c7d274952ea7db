//! The network collaborator a deployment run publishes through.
//!
//! [`Ledger`] is the only seam between the orchestrator and a chain. Two
//! implementations ship with the crate:
//! - [`RpcLedger`] talks JSON-RPC to a node that manages the sender account.
//! - [`InMemoryLedger`] simulates a chain for dry runs and tests.

mod memory;
pub mod rpc;

use std::future::Future;

use alloy_core::primitives::{Address, Bytes, Selector, TxHash};
use serde::{Deserialize, Serialize};

pub use memory::{ContractState, DEV_CHAIN_ID, InMemoryLedger, InitState, Submission};
pub use rpc::RpcLedger;

use crate::error::LedgerError;

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Set for contract creations.
    pub contract_address: Option<Address>,
}

/// A chain that accepts contract creations and calls.
///
/// Both operations resolve only once the transaction is confirmed according
/// to the implementation's finality settings. A revert is reported as
/// [`LedgerError::Reverted`].
pub trait Ledger: Send + Sync {
    /// The account transactions are sent from.
    fn sender(&self) -> Address;

    /// The chain id the ledger serves.
    fn chain_id(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Create a contract from `bytecode` followed by the ABI-encoded
    /// `constructor_args`.
    fn publish(
        &self,
        bytecode: &Bytes,
        constructor_args: &Bytes,
    ) -> impl Future<Output = Result<Receipt, LedgerError>> + Send;

    /// Send a transaction calling `selector` on `to` with ABI-encoded `args`.
    fn call(
        &self,
        to: Address,
        selector: Selector,
        args: &Bytes,
    ) -> impl Future<Output = Result<Receipt, LedgerError>> + Send;
}

/// Concatenate creation code and constructor arguments.
pub(crate) fn creation_code(bytecode: &Bytes, constructor_args: &Bytes) -> Bytes {
    let mut code = Vec::with_capacity(bytecode.len() + constructor_args.len());
    code.extend_from_slice(bytecode);
    code.extend_from_slice(constructor_args);
    Bytes::from(code)
}

/// Concatenate a selector and its encoded arguments.
pub(crate) fn calldata(selector: Selector, args: &Bytes) -> Bytes {
    let mut data = Vec::with_capacity(4 + args.len());
    data.extend_from_slice(selector.as_slice());
    data.extend_from_slice(args);
    Bytes::from(data)
}
