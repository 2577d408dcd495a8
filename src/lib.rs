//! Parallel EVM block execution with deterministic log reconciliation.
//!
//! Transactions of a block are executed concurrently, each against its own
//! snapshot of the block's base state, and their results are reconciled in
//! block order afterwards so that log indices, transaction indices, the block
//! bloom and the encoded receipts come out identical on every node.
//!
//! # Architecture
//!
//! - **StateTransition**: Validates and runs one EVM message through an
//!   [`Engine`], with two-meter gas accounting and refund computation
//! - **Executor**: Runs a block (ante checks, execution, reconciliation)
//!   sequentially or on a worker pool
//! - **Workload**: A pre-generated block of signed transactions over a genesis
//!   state
//!
//! Result storage and reconciliation live in the `block-reconciler` crate.
//!
//! # Quick Start
//!
//! ```
//! use parallel_evm::{BlockExecutorConfig, Executor, ParallelBlockExecutor, Workload, WorkloadConfig};
//!
//! // Generate a block (signs all transactions upfront)
//! let workload = Workload::generate(WorkloadConfig {
//!     num_accounts: 20,
//!     num_transactions: 50,
//!     ..Default::default()
//! });
//! let state = workload.create_state();
//!
//! let executor = ParallelBlockExecutor::new(BlockExecutorConfig::default());
//! let outcome = executor.execute(&state, &workload.transactions).unwrap();
//!
//! println!("Included: {}, Logs: {}", outcome.block.included, outcome.block.logs);
//! ```

pub mod ante;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gas;
pub mod refund;
pub mod state;
pub mod trace;
pub mod transition;
pub mod tx;

#[cfg(test)]
pub(crate) mod test_utils;

pub use ante::{AnteError, AnteHandler};
pub use engine::{Engine, EngineCall, EngineError, EngineOutcome, RevmEngine};
pub use error::{RevertError, TransitionError};
pub use executor::{
    BlockError, BlockExecutorConfig, BlockOutcome, Executor, ParallelBlockExecutor,
    SequentialExecutor,
};
pub use gas::{intrinsic_gas, GasMeter, OutOfGasError};
pub use refund::{FeeCollector, MemoryFeeCollector, RefundError};
pub use state::{EvmParams, ExecutionState, MemoryState, StateError};
pub use trace::{TraceResult, TraceWriter};
pub use transition::{Context, ExecutionResult, GasInfo, StateTransition};
pub use tx::{Account, EthereumTx, EthereumTxRequest, StandardTx, Transaction, TxFee};

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{Revert, SolError};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Gas limit of plain transfers in generated workloads.
pub const TRANSFER_GAS_LIMIT: u64 = 30_000;
/// Gas limit of contract calls and creations in generated workloads.
pub const CONTRACT_GAS_LIMIT: u64 = 150_000;

/// Runtime code emitting `LOG2(0, 0, 1, caller)`.
pub const LOG_EMITTER_CODE: &[u8] = &[0x33, 0x60, 0x01, 0x60, 0x00, 0x60, 0x00, 0xa2, 0x00];

/// Init code emitting `LOG1(0, 0, caller)` and deploying empty code.
pub const LOGGING_INIT_CODE: &[u8] = &[0x33, 0x60, 0x00, 0x60, 0x00, 0xa1, 0x00];

/// Runtime code reverting with an ABI encoded `Error(reason)`.
///
/// The payload is appended to the code and copied to memory before `REVERT`.
///
/// # Panics
///
/// Panics if the encoded payload does not fit a one-byte push, i.e. for
/// reasons longer than 160 bytes.
pub fn revert_with_reason_code(reason: &str) -> Bytes {
    const PREFIX_LEN: u8 = 12;
    let payload = Revert { reason: reason.to_string() }.abi_encode();
    let len = u8::try_from(payload.len()).expect("revert reason fits in one push");

    let mut code = vec![
        0x60, len, // size
        0x60, PREFIX_LEN, // code offset
        0x60, 0x00, // memory offset
        0x39, // CODECOPY
        0x60, len, 0x60, 0x00, 0xfd, // REVERT(0, len)
    ];
    code.extend_from_slice(&payload);
    code.into()
}

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

/// Configuration for workload generation.
///
/// Ratios are probabilities per transaction. Standard, creation and contract
/// call ratios are mutually exclusive shares; the rest are transfers.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of accounts in the system.
    pub num_accounts: usize,
    /// Number of transactions to generate.
    pub num_transactions: usize,
    /// Share of standard (non-EVM) transactions.
    pub standard_ratio: f64,
    /// Share of contract creations.
    pub create_ratio: f64,
    /// Share of calls into the genesis contracts.
    pub contract_call_ratio: f64,
    /// Share of contract calls that hit the reverting contract.
    pub revert_ratio: f64,
    /// Probability that an EVM transaction is signed with the wrong key.
    pub invalid_signature_ratio: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Chain ID for transaction signing.
    pub chain_id: u64,
}

impl WorkloadConfig {
    /// A configuration generating only valid value transfers.
    pub fn transfers_only() -> Self {
        Self {
            standard_ratio: 0.0,
            create_ratio: 0.0,
            contract_call_ratio: 0.0,
            revert_ratio: 0.0,
            invalid_signature_ratio: 0.0,
            ..Default::default()
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            num_transactions: 100,
            standard_ratio: 0.1,
            create_ratio: 0.1,
            contract_call_ratio: 0.4,
            revert_ratio: 0.25,
            invalid_signature_ratio: 0.05,
            seed: 42,
            chain_id: 1,
        }
    }
}

/// Contracts deployed at genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenesisContracts {
    /// Emits a log on every call.
    pub log_emitter: Address,
    /// Reverts every call with a reason.
    pub reverter: Address,
}

impl Default for GenesisContracts {
    fn default() -> Self {
        Self { log_emitter: Address::repeat_byte(0xe1), reverter: Address::repeat_byte(0xe2) }
    }
}

/// A generated block with pre-generated accounts and signed transactions.
#[derive(Debug, Clone)]
pub struct Workload {
    /// The accounts (with signing keys) participating in this workload.
    pub accounts: Vec<Account>,
    /// Contracts present at genesis.
    pub contracts: GenesisContracts,
    /// The block, in order.
    pub transactions: Vec<Transaction>,
    /// The configuration used to generate this workload.
    pub config: WorkloadConfig,
}

impl Workload {
    /// Generates a new workload from the given configuration.
    /// All transactions are pre-signed during generation.
    pub fn generate(config: WorkloadConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let contracts = GenesisContracts::default();

        // Generate accounts with deterministic keys.
        let accounts: Vec<Account> = (0..config.num_accounts.max(2))
            .map(|i| Account::from_seed(config.seed.wrapping_add(i as u64)))
            .collect();
        let forger = Account::from_seed(!config.seed);

        // Track nonces per account for proper transaction sequencing.
        let mut nonces = vec![0u64; accounts.len()];

        let transactions = (0..config.num_transactions)
            .map(|i| {
                let from_idx = rng.gen_range(0..accounts.len());
                let from = &accounts[from_idx];
                let kind = rng.gen::<f64>();

                if kind < config.standard_ratio {
                    let fee = U256::from(rng.gen_range(1..100u64));
                    return StandardTx::new(from.address, fee, format!("memo-{i}")).into();
                }

                let request = if kind < config.standard_ratio + config.create_ratio {
                    EthereumTxRequest {
                        to: None,
                        gas_limit: CONTRACT_GAS_LIMIT,
                        data: LOGGING_INIT_CODE.into(),
                        ..Default::default()
                    }
                } else if kind < config.standard_ratio + config.create_ratio + config.contract_call_ratio {
                    let to = if rng.gen::<f64>() < config.revert_ratio {
                        contracts.reverter
                    } else {
                        contracts.log_emitter
                    };
                    EthereumTxRequest { to: Some(to), gas_limit: CONTRACT_GAS_LIMIT, ..Default::default() }
                } else {
                    let mut to_idx = rng.gen_range(0..accounts.len());
                    while to_idx == from_idx {
                        to_idx = rng.gen_range(0..accounts.len());
                    }
                    EthereumTxRequest {
                        to: Some(accounts[to_idx].address),
                        value: U256::from(1_000_000_000_000_000u64), // 0.001 ETH
                        gas_limit: TRANSFER_GAS_LIMIT,
                        ..Default::default()
                    }
                };
                let request = EthereumTxRequest {
                    nonce: nonces[from_idx],
                    gas_price: U256::from(rng.gen_range(1..=3u64)),
                    ..request
                };
                nonces[from_idx] += 1;

                let signer = if rng.gen::<f64>() < config.invalid_signature_ratio {
                    &forger.signing_key
                } else {
                    &from.signing_key
                };
                EthereumTx::signed_by(from.address, signer, request, config.chain_id).into()
            })
            .collect();

        Self { accounts, contracts, transactions, config }
    }

    /// Creates the genesis state with default parameters.
    pub fn create_state(&self) -> MemoryState {
        self.create_state_with(EvmParams::default())
    }

    /// Creates the genesis state: funded accounts and the genesis contracts.
    pub fn create_state_with(&self, params: EvmParams) -> MemoryState {
        let mut state = MemoryState::new(params);
        let initial_balance = U256::from(1_000_000_000_000_000_000_000u128); // 1000 ETH

        for account in &self.accounts {
            state.insert_account(account.address, initial_balance, 0);
        }
        state.insert_contract(self.contracts.log_emitter, LOG_EMITTER_CODE.into());
        state.insert_contract(self.contracts.reverter, revert_with_reason_code("workload revert"));
        state
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineCall, EngineError, RevmEngine};

    #[test]
    fn test_workload_generation() {
        let config = WorkloadConfig { num_accounts: 10, num_transactions: 40, seed: 123, ..Default::default() };
        let workload = Workload::generate(config.clone());

        assert_eq!(workload.accounts.len(), 10);
        assert_eq!(workload.transactions.len(), 40);

        // Same seed, same block.
        assert_eq!(Workload::generate(config).transactions, workload.transactions);
    }

    #[test]
    fn test_transfers_only_are_valid() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 10,
            num_transactions: 20,
            ..WorkloadConfig::transfers_only()
        });

        for tx in &workload.transactions {
            let Transaction::Ethereum(tx) = tx else { panic!("expected an EVM transaction") };
            assert!(tx.verify(), "Transaction signature should be valid");
            assert_eq!(tx.request.gas_limit, TRANSFER_GAS_LIMIT);
        }
    }

    #[test]
    fn test_genesis_reverter_returns_reason() {
        let workload = Workload::generate(WorkloadConfig { num_transactions: 0, ..Default::default() });
        let mut state = workload.create_state();
        let caller = workload.accounts[0].address;
        let call = EngineCall { caller, input: Bytes::new(), gas: 100_000, value: U256::ZERO };

        let outcome = RevmEngine::new(1).call(&mut state, &mut GasMeter::infinite(), workload.contracts.reverter, &call);

        assert_eq!(outcome.error, Some(EngineError::ExecutionReverted));
        let err = RevertError::new(&EngineError::ExecutionReverted, outcome.output);
        assert_eq!(err.decoded.as_deref(), Some("workload revert"));
    }

    #[test]
    fn test_genesis_emitter_logs_caller() {
        let workload = Workload::generate(WorkloadConfig { num_transactions: 0, ..Default::default() });
        let mut state = workload.create_state();
        let caller = workload.accounts[1].address;
        let call = EngineCall { caller, input: Bytes::new(), gas: 100_000, value: U256::ZERO };
        state.prepare(alloy_primitives::B256::repeat_byte(1));

        let outcome = RevmEngine::new(1).call(&mut state, &mut GasMeter::infinite(), workload.contracts.log_emitter, &call);

        assert!(outcome.is_success());
        let logs = state.logs(alloy_primitives::B256::repeat_byte(1)).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].topics()[1], caller.into_word());
    }
}
