//! EVM engine interface and its revm-backed implementation.
//!
//! The state transition drives the interpreter only through [`Engine`]: a
//! contract creation or a message call with an explicit gas budget. Gas spent,
//! emitted logs and refund credit are reported back through the outcome and
//! the [`ExecutionState`]. The budget covers execution only; the intrinsic
//! cost is metered by the caller.

use crate::gas::GasMeter;
use crate::state::{ExecutionState, MemoryState};
use alloy_primitives::{Address, Bytes, U256};
use revm::{
    context::{
        result::{ExecutionResult, Output},
        TxEnv,
    },
    interpreter::gas::calculate_initial_tx_gas,
    primitives::{hardfork::SpecId, TxKind},
    Context, ExecuteCommitEvm, MainBuilder, MainContext,
};
use tracing::trace;

/// Failure reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The code executed `REVERT`.
    #[error("execution reverted")]
    ExecutionReverted,
    /// The gas budget was exhausted.
    #[error("out of gas")]
    OutOfGas,
    /// Execution halted abnormally (invalid opcode, stack error, ...).
    #[error("execution halted: {0}")]
    Halted(String),
    /// The engine refused to run the message at all.
    #[error("invalid message: {0}")]
    Invalid(String),
}

/// A message handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    /// Sender of the message.
    pub caller: Address,
    /// Init code for creations, calldata for calls.
    pub input: Bytes,
    /// Gas budget of the execution.
    pub gas: u64,
    /// Value transferred.
    pub value: U256,
}

/// What the engine returns for one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineOutcome {
    /// Return data, or the revert payload on failure.
    pub output: Bytes,
    /// Address of the created contract.
    pub contract_address: Option<Address>,
    /// Gas left from the budget.
    pub gas_left: u64,
    /// Set when execution failed.
    pub error: Option<EngineError>,
}

impl EngineOutcome {
    /// Returns true if the engine reported no failure.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Executes EVM messages against an execution state.
///
/// `meter` is the unbounded meter the state transition swaps in for the
/// duration of the call. Storage-access charges the engine incurs go there
/// instead of the transaction's outer meter. [`RevmEngine`] leaves it
/// untouched, since revm has no storage-access gas outside its own budget.
pub trait Engine<S: ExecutionState> {
    /// Deploys a contract from `call.input`.
    fn create(&mut self, state: &mut S, meter: &mut GasMeter, call: &EngineCall) -> EngineOutcome;

    /// Calls `to` with `call.input`.
    fn call(
        &mut self,
        state: &mut S,
        meter: &mut GasMeter,
        to: Address,
        call: &EngineCall,
    ) -> EngineOutcome;
}

/// Engine running messages on revm's mainnet EVM over a [`MemoryState`].
///
/// The message is executed as a zero-priced transaction whose nonce is the
/// sender's current nonce, so fee handling stays with the state transition.
/// revm's own intrinsic charge is added on top of the budget and taken back
/// out of the gas it reports, so the outcome carries execution gas only. The
/// refund revm computes is handed to the state's refund counter.
#[derive(Debug, Clone)]
pub struct RevmEngine {
    chain_id: u64,
}

/// Hardfork the engine executes under.
pub const ENGINE_SPEC: SpecId = SpecId::PRAGUE;

impl RevmEngine {
    /// Creates an engine for `chain_id`.
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    fn execute(&self, state: &mut MemoryState, kind: TxKind, call: &EngineCall) -> EngineOutcome {
        if !state.params().extra_eips.is_empty() {
            trace!(target: "parallel_evm::engine", eips = ?state.params().extra_eips, "extra EIPs follow the configured hardfork");
        }

        let initial = calculate_initial_tx_gas(ENGINE_SPEC, &call.input, kind.is_create(), 0, 0, 0);
        let overhead = initial.initial_gas;
        // the floor only applies when it exceeds intrinsic plus execution
        let gas_limit = call.gas.saturating_add(overhead.max(initial.floor_gas));

        let tx = TxEnv {
            caller: call.caller,
            kind,
            value: call.value,
            data: call.input.clone(),
            gas_limit,
            gas_price: 0,
            nonce: state.nonce(call.caller),
            chain_id: Some(self.chain_id),
            ..Default::default()
        };

        let result = {
            let mut evm = Context::mainnet()
                .modify_cfg_chained(|cfg| {
                    cfg.spec = ENGINE_SPEC;
                    cfg.chain_id = self.chain_id;
                })
                .with_db(state.db_mut())
                .build_mainnet();
            evm.transact_commit(tx)
        };

        state.touch(call.caller);
        if let TxKind::Call(to) = kind {
            state.touch(to);
        }

        let gas_left = |gas_used: u64| call.gas.saturating_sub(gas_used.saturating_sub(overhead));
        match result {
            Ok(ExecutionResult::Success { gas_used, gas_refunded, logs, output, .. }) => {
                for log in logs {
                    state.add_log(log);
                }
                state.add_refund(gas_refunded);
                let spent = gas_used.saturating_add(gas_refunded);
                trace!(target: "parallel_evm::engine", spent, overhead, "message executed");
                let (output, contract_address) = match output {
                    Output::Call(bytes) => (bytes, None),
                    Output::Create(bytes, address) => (bytes, address),
                };
                EngineOutcome {
                    output,
                    contract_address,
                    gas_left: gas_left(spent),
                    error: None,
                }
            }
            Ok(ExecutionResult::Revert { gas_used, output }) => EngineOutcome {
                output,
                contract_address: None,
                gas_left: gas_left(gas_used),
                error: Some(EngineError::ExecutionReverted),
            },
            Ok(ExecutionResult::Halt { reason, gas_used }) => EngineOutcome {
                output: Bytes::new(),
                contract_address: None,
                gas_left: gas_left(gas_used),
                error: Some(EngineError::Halted(format!("{reason:?}"))),
            },
            Err(err) => EngineOutcome {
                output: Bytes::new(),
                contract_address: None,
                gas_left: call.gas,
                error: Some(EngineError::Invalid(err.to_string())),
            },
        }
    }
}

impl Engine<MemoryState> for RevmEngine {
    fn create(
        &mut self,
        state: &mut MemoryState,
        _meter: &mut GasMeter,
        call: &EngineCall,
    ) -> EngineOutcome {
        self.execute(state, TxKind::Create, call)
    }

    fn call(
        &mut self,
        state: &mut MemoryState,
        _meter: &mut GasMeter,
        to: Address,
        call: &EngineCall,
    ) -> EngineOutcome {
        self.execute(state, TxKind::Call(to), call)
    }
}
