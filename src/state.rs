//! Execution-state view consumed by the state transition.
//!
//! The transition never talks to a database directly. It goes through
//! [`ExecutionState`], which exposes exactly what it needs: nonces, the logs
//! and refund counter of the running transaction, finalization and the module
//! parameters. [`MemoryState`] implements it over revm's [`CacheDB`].

use alloy_primitives::{keccak256, Address, Bytes, Log, B256, U256};
use revm::{
    bytecode::Bytecode,
    database::{CacheDB, EmptyDB},
    primitives::KECCAK_EMPTY,
    state::AccountInfo,
    DatabaseRef,
};
use std::collections::{HashMap, HashSet};

/// Error raised by an execution-state backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Logs of the transaction could not be loaded.
    #[error("logs of transaction {0} are unavailable")]
    LogsUnavailable(B256),
    /// The backend failed.
    #[error("state backend error: {0}")]
    Backend(String),
}

/// Module parameters governing EVM execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmParams {
    /// Whether contract creation is allowed.
    pub enable_create: bool,
    /// Whether message calls are allowed.
    pub enable_call: bool,
    /// Additional EIPs activated on top of the chain rules.
    pub extra_eips: Vec<u64>,
    /// Denomination gas is priced in.
    pub evm_denom: String,
}

impl Default for EvmParams {
    fn default() -> Self {
        Self {
            enable_create: true,
            enable_call: true,
            extra_eips: Vec::new(),
            evm_denom: "okt".to_string(),
        }
    }
}

/// State view a single transaction executes against.
///
/// Within one transition the view must read its own writes. Isolation between
/// concurrently executing transactions is the implementor's concern; workers
/// typically run on a [`snapshot`](ExecutionState::snapshot) each.
pub trait ExecutionState {
    /// Current nonce of `address`.
    fn nonce(&self, address: Address) -> u64;

    /// Overwrites the nonce of `address`.
    fn set_nonce(&mut self, address: Address, nonce: u64);

    /// Starts a new transaction: logs emitted from now on belong to `tx_hash`
    /// and the refund counter restarts at zero.
    fn prepare(&mut self, tx_hash: B256);

    /// Records a log emitted by the running transaction.
    fn add_log(&mut self, log: Log);

    /// Logs recorded for `tx_hash`, in emission order.
    fn logs(&self, tx_hash: B256) -> Result<Vec<Log>, StateError>;

    /// Adds refund credit earned during execution.
    fn add_refund(&mut self, gas: u64);

    /// Refund credit accumulated by the running transaction.
    fn refund(&self) -> u64;

    /// Finalizes pending mutations of the running transaction.
    fn finalize(&mut self, delete_empty_accounts: bool) -> Result<(), StateError>;

    /// Module parameters.
    fn params(&self) -> &EvmParams;

    /// Copy of the state for read-only simulation.
    fn snapshot(&self) -> Self
    where
        Self: Sized;
}

/// In-memory execution state backed by revm's [`CacheDB`].
#[derive(Debug, Clone)]
pub struct MemoryState {
    db: CacheDB<EmptyDB>,
    params: EvmParams,
    tx_hash: Option<B256>,
    logs: HashMap<B256, Vec<Log>>,
    refund: u64,
    touched: HashSet<Address>,
}

impl MemoryState {
    /// Creates an empty state with the given parameters.
    pub fn new(params: EvmParams) -> Self {
        Self {
            db: CacheDB::new(EmptyDB::default()),
            params,
            tx_hash: None,
            logs: HashMap::new(),
            refund: 0,
            touched: HashSet::new(),
        }
    }

    /// Inserts an externally owned account.
    pub fn insert_account(&mut self, address: Address, balance: U256, nonce: u64) {
        let info = AccountInfo { balance, nonce, code_hash: KECCAK_EMPTY, code: None };
        self.db.insert_account_info(address, info);
    }

    /// Inserts a contract with the given runtime code.
    pub fn insert_contract(&mut self, address: Address, code: Bytes) {
        let info = AccountInfo {
            balance: U256::ZERO,
            nonce: 1,
            code_hash: keccak256(&code),
            code: Some(Bytecode::new_raw(code)),
        };
        self.db.insert_account_info(address, info);
    }

    /// Account info of `address`, if the account exists.
    pub fn account(&self, address: Address) -> Option<AccountInfo> {
        self.db.basic_ref(address).ok().flatten()
    }

    /// Balance of `address`.
    pub fn balance(&self, address: Address) -> U256 {
        self.account(address).map(|info| info.balance).unwrap_or_default()
    }

    /// Replaces the module parameters.
    pub fn set_params(&mut self, params: EvmParams) {
        self.params = params;
    }

    /// Marks `address` as touched by the running transaction.
    pub(crate) fn touch(&mut self, address: Address) {
        self.touched.insert(address);
    }

    /// Mutable access to the backing database for the engine.
    pub(crate) fn db_mut(&mut self) -> &mut CacheDB<EmptyDB> {
        &mut self.db
    }
}

impl Default for MemoryState {
    fn default() -> Self {
        Self::new(EvmParams::default())
    }
}

impl ExecutionState for MemoryState {
    fn nonce(&self, address: Address) -> u64 {
        self.account(address).map(|info| info.nonce).unwrap_or_default()
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        let mut info = self.account(address).unwrap_or_default();
        info.nonce = nonce;
        self.db.insert_account_info(address, info);
        self.touch(address);
    }

    fn prepare(&mut self, tx_hash: B256) {
        self.tx_hash = Some(tx_hash);
        self.refund = 0;
    }

    fn add_log(&mut self, log: Log) {
        self.logs.entry(self.tx_hash.unwrap_or_default()).or_default().push(log);
    }

    fn logs(&self, tx_hash: B256) -> Result<Vec<Log>, StateError> {
        Ok(self.logs.get(&tx_hash).cloned().unwrap_or_default())
    }

    fn add_refund(&mut self, gas: u64) {
        self.refund = self.refund.saturating_add(gas);
    }

    fn refund(&self) -> u64 {
        self.refund
    }

    fn finalize(&mut self, delete_empty_accounts: bool) -> Result<(), StateError> {
        for address in std::mem::take(&mut self.touched) {
            let empty = self.account(address).is_some_and(|info| info.is_empty());
            if delete_empty_accounts && empty {
                self.db.cache.accounts.remove(&address);
            }
        }
        self.refund = 0;
        Ok(())
    }

    fn params(&self) -> &EvmParams {
        &self.params
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_roundtrip() {
        let mut state = MemoryState::default();
        let alice = Address::repeat_byte(1);
        state.insert_account(alice, U256::from(1000), 3);

        assert_eq!(state.nonce(alice), 3);
        state.set_nonce(alice, 9);
        assert_eq!(state.nonce(alice), 9);
        assert_eq!(state.balance(alice), U256::from(1000));
    }

    #[test]
    fn test_logs_follow_prepared_transaction() {
        let mut state = MemoryState::default();
        let (tx_a, tx_b) = (B256::repeat_byte(0xa), B256::repeat_byte(0xb));
        let log = Log::new_unchecked(Address::repeat_byte(2), vec![], Bytes::new());

        state.prepare(tx_a);
        state.add_log(log.clone());
        state.add_refund(4800);
        state.prepare(tx_b);
        state.add_log(log.clone());
        state.add_log(log);

        assert_eq!(state.logs(tx_a).unwrap().len(), 1);
        assert_eq!(state.logs(tx_b).unwrap().len(), 2);
        assert_eq!(state.refund(), 0);
        assert!(state.logs(B256::ZERO).unwrap().is_empty());
    }

    #[test]
    fn test_finalize_deletes_touched_empty_accounts() {
        let mut state = MemoryState::default();
        let empty = Address::repeat_byte(3);
        let funded = Address::repeat_byte(4);
        state.insert_account(funded, U256::from(1), 0);

        state.set_nonce(empty, 0);
        state.set_nonce(funded, 0);
        state.add_refund(100);
        state.finalize(true).unwrap();

        assert!(state.account(empty).is_none());
        assert!(state.account(funded).is_some());
        assert_eq!(state.refund(), 0);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let mut state = MemoryState::default();
        let alice = Address::repeat_byte(5);
        state.insert_account(alice, U256::from(10), 1);

        let mut copy = state.snapshot();
        copy.set_nonce(alice, 2);

        assert_eq!(state.nonce(alice), 1);
        assert_eq!(copy.nonce(alice), 2);
    }
}
