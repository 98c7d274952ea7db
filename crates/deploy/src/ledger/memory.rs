//! A simulated chain for dry runs and tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, B256, Bytes, Selector, TxHash, keccak256},
    sol_types::{Revert, SolError},
};

use super::{Ledger, Receipt, calldata, creation_code};
use crate::error::LedgerError;

/// Revert reason used when an initializer runs twice.
pub const ALREADY_INITIALIZED_REASON: &str = "Initializable: contract is already initialized";

/// Chain id reported unless [`InMemoryLedger::with_chain_id`] says otherwise.
pub const DEV_CHAIN_ID: u64 = 1337;

/// Initialization state of a simulated contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitState {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
}

/// A contract living on the simulated chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractState {
    pub code: Bytes,
    /// Logic contract a proxy delegates to.
    pub implementation: Option<Address>,
    pub init: InitState,
    /// Transaction that moved the contract to [`InitState::Initialized`].
    pub initialized_by: Option<TxHash>,
    pub created_by: TxHash,
    pub created_at: u64,
}

/// A transaction that made it into a simulated block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Publish {
        tx_hash: TxHash,
        block: u64,
        address: Address,
        code: Bytes,
    },
    Call {
        tx_hash: TxHash,
        block: u64,
        to: Address,
        calldata: Bytes,
        reverted: bool,
    },
}

impl Submission {
    pub fn block(&self) -> u64 {
        match self {
            Self::Publish { block, .. } | Self::Call { block, .. } => *block,
        }
    }
}

#[derive(Debug, Default)]
struct ChainState {
    nonce: u64,
    block: u64,
    contracts: HashMap<Address, ContractState>,
    submissions: Vec<Submission>,
    publish_attempts: usize,
    call_attempts: usize,
    publish_failures: HashMap<usize, LedgerError>,
    call_failures: HashMap<usize, LedgerError>,
}

impl ChainState {
    /// Allocate the next nonce and block for a transaction from `sender`.
    fn next_tx(&mut self, sender: Address) -> (u64, TxHash, u64) {
        let nonce = self.nonce;
        self.nonce += 1;
        self.block += 1;

        let mut preimage = sender.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(b"tx");

        (nonce, keccak256(preimage), self.block)
    }
}

/// Deterministic in-process chain.
///
/// Every transaction is mined in its own block and confirmed immediately.
/// Contracts follow the usual initializable pattern: calling one of the
/// registered initializer selectors succeeds once and reverts afterwards. A
/// creation whose constructor arguments are `(address logic)` or
/// `(address logic, bytes data)` with `logic` an existing contract is treated
/// as a proxy; non-empty `data` is executed against the proxy's own state in
/// the creating transaction.
#[derive(Debug)]
pub struct InMemoryLedger {
    sender: Address,
    chain_id: u64,
    initializers: HashSet<Selector>,
    state: Mutex<ChainState>,
}

impl InMemoryLedger {
    pub fn new(sender: Address) -> Self {
        let initialize = Selector::from_slice(&keccak256("initialize()")[..4]);
        Self {
            sender,
            chain_id: DEV_CHAIN_ID,
            initializers: HashSet::from([initialize]),
            state: Mutex::default(),
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Treat `selector` as an initializer as well.
    pub fn with_initializer(mut self, selector: Selector) -> Self {
        self.initializers.insert(selector);
        self
    }

    /// Make the `index`-th publish attempt (0-based) fail with `err`.
    pub fn fail_publish(self, index: usize, err: LedgerError) -> Self {
        self.lock().publish_failures.insert(index, err);
        self
    }

    /// Make the `index`-th call attempt (0-based) fail with `err`.
    pub fn fail_call(self, index: usize, err: LedgerError) -> Self {
        self.lock().call_failures.insert(index, err);
        self
    }

    /// Transactions mined so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    pub fn contract(&self, address: Address) -> Option<ContractState> {
        self.lock().contracts.get(&address).cloned()
    }

    pub fn init_state(&self, address: Address) -> Option<InitState> {
        self.lock().contracts.get(&address).map(|c| c.init)
    }

    /// Force the initialization state of a contract, e.g. to simulate a
    /// concurrent initializer in flight.
    pub fn set_init_state(&self, address: Address, init: InitState) {
        if let Some(contract) = self.lock().contracts.get_mut(&address) {
            contract.init = init;
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn already_initialized(tx_hash: Option<TxHash>) -> LedgerError {
        LedgerError::Reverted {
            tx_hash,
            data: Some(Bytes::from(
                Revert {
                    reason: ALREADY_INITIALIZED_REASON.to_string(),
                }
                .abi_encode(),
            )),
            message: Some(format!("execution reverted: {ALREADY_INITIALIZED_REASON}")),
        }
    }

    fn is_initializer(&self, data: &[u8]) -> bool {
        data.len() >= 4 && self.initializers.contains(&Selector::from_slice(&data[..4]))
    }
}

/// Decode `(address)` or `(address, bytes)` proxy constructor arguments.
fn decode_proxy_args(args: &[u8]) -> Option<(Address, Bytes)> {
    if args.len() == 32 {
        if args[..12].iter().any(|b| *b != 0) {
            return None;
        }
        return Some((Address::from_word(B256::from_slice(args)), Bytes::new()));
    }

    let ty = DynSolType::Tuple(vec![DynSolType::Address, DynSolType::Bytes]);
    match ty.abi_decode_params(args).ok()? {
        DynSolValue::Tuple(values) => {
            let logic = values.first()?.as_address()?;
            let data = values.get(1)?.as_bytes()?.to_vec();
            Some((logic, Bytes::from(data)))
        }
        _ => None,
    }
}

impl Ledger for InMemoryLedger {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.chain_id)
    }

    async fn publish(
        &self,
        bytecode: &Bytes,
        constructor_args: &Bytes,
    ) -> Result<Receipt, LedgerError> {
        let mut state = self.lock();

        let attempt = state.publish_attempts;
        state.publish_attempts += 1;
        if let Some(err) = state.publish_failures.remove(&attempt) {
            return Err(err);
        }

        let (nonce, tx_hash, block) = state.next_tx(self.sender);

        let mut preimage = self.sender.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let address = Address::from_word(keccak256(preimage));

        let mut contract = ContractState {
            code: bytecode.clone(),
            implementation: None,
            init: InitState::Uninitialized,
            initialized_by: None,
            created_by: tx_hash,
            created_at: block,
        };

        if let Some((logic, data)) = decode_proxy_args(constructor_args) {
            if state.contracts.contains_key(&logic) {
                contract.implementation = Some(logic);
                if self.is_initializer(&data) {
                    contract.init = InitState::Initialized;
                    contract.initialized_by = Some(tx_hash);
                }
            }
        }

        state.contracts.insert(address, contract);
        state.submissions.push(Submission::Publish {
            tx_hash,
            block,
            address,
            code: creation_code(bytecode, constructor_args),
        });

        Ok(Receipt {
            tx_hash,
            block_number: block,
            contract_address: Some(address),
        })
    }

    async fn call(
        &self,
        to: Address,
        selector: Selector,
        args: &Bytes,
    ) -> Result<Receipt, LedgerError> {
        let mut state = self.lock();

        let attempt = state.call_attempts;
        state.call_attempts += 1;
        if let Some(err) = state.call_failures.remove(&attempt) {
            return Err(err);
        }

        if !state.contracts.contains_key(&to) {
            return Err(LedgerError::Rejected(format!("no contract at {to}")));
        }

        let data = calldata(selector, args);
        let (_, tx_hash, block) = state.next_tx(self.sender);

        let mut outcome = Ok(());
        let initializing = self.is_initializer(&data);
        if let Some(contract) = state.contracts.get_mut(&to).filter(|_| initializing) {
            match contract.init {
                InitState::Uninitialized => {
                    contract.init = InitState::Initialized;
                    contract.initialized_by = Some(tx_hash);
                }
                InitState::Initializing | InitState::Initialized => {
                    outcome = Err(Self::already_initialized(Some(tx_hash)));
                }
            }
        }

        state.submissions.push(Submission::Call {
            tx_hash,
            block,
            to,
            calldata: data,
            reverted: outcome.is_err(),
        });

        outcome.map(|()| Receipt {
            tx_hash,
            block_number: block,
            contract_address: None,
        })
    }
}
