//! Fixtures shared by the unit tests.

use crate::engine::{Engine, EngineCall, EngineError, EngineOutcome};
use crate::gas::GasMeter;
use crate::state::{EvmParams, ExecutionState, MemoryState, StateError};
use alloy_primitives::{Address, Bytes, Log, B256};

/// `LOG1(0, 0, topic = 1)` followed by `STOP`.
///
/// Deployed as init code it emits the log and leaves empty runtime code.
pub const EMIT_LOG_CODE: &[u8] = &[0x60, 0x01, 0x60, 0x00, 0x60, 0x00, 0xa1, 0x00];

/// `REVERT(0, 0)`.
pub const REVERT_CODE: &[u8] = &[0x60, 0x00, 0x60, 0x00, 0xfd];

/// Engine returning a canned outcome.
///
/// Every invocation charges `storage_gas` to the meter it is handed, records
/// `logs` and `refund` on the state and remembers the sender nonce it saw.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    pub gas_used: u64,
    pub output: Bytes,
    pub contract_address: Option<Address>,
    pub error: Option<EngineError>,
    pub logs: Vec<Log>,
    pub refund: u64,
    pub storage_gas: u64,
    pub creates: usize,
    pub calls: usize,
    pub seen_nonce: Option<u64>,
    pub seen_budget: Option<u64>,
}

impl ScriptedEngine {
    pub fn succeeding(gas_used: u64) -> Self {
        Self { gas_used, ..Default::default() }
    }

    pub fn failing(gas_used: u64, error: EngineError, output: Bytes) -> Self {
        Self { gas_used, error: Some(error), output, ..Default::default() }
    }

    fn run<S: ExecutionState>(
        &mut self,
        state: &mut S,
        meter: &mut GasMeter,
        call: &EngineCall,
    ) -> EngineOutcome {
        meter.consume(self.storage_gas, "scripted storage").unwrap();
        for log in &self.logs {
            state.add_log(log.clone());
        }
        state.add_refund(self.refund);
        self.seen_nonce = Some(state.nonce(call.caller));
        self.seen_budget = Some(call.gas);

        EngineOutcome {
            output: self.output.clone(),
            contract_address: self.contract_address,
            gas_left: call.gas.saturating_sub(self.gas_used),
            error: self.error.clone(),
        }
    }
}

impl<S: ExecutionState> Engine<S> for ScriptedEngine {
    fn create(&mut self, state: &mut S, meter: &mut GasMeter, call: &EngineCall) -> EngineOutcome {
        self.creates += 1;
        self.run(state, meter, call)
    }

    fn call(
        &mut self,
        state: &mut S,
        meter: &mut GasMeter,
        _to: Address,
        call: &EngineCall,
    ) -> EngineOutcome {
        self.calls += 1;
        self.run(state, meter, call)
    }
}

/// [`MemoryState`] whose log retrieval or finalization can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct FailingState {
    pub inner: MemoryState,
    pub fail_logs: bool,
    pub fail_finalize: bool,
}

impl ExecutionState for FailingState {
    fn nonce(&self, address: Address) -> u64 {
        self.inner.nonce(address)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.inner.set_nonce(address, nonce)
    }

    fn prepare(&mut self, tx_hash: B256) {
        self.inner.prepare(tx_hash)
    }

    fn add_log(&mut self, log: Log) {
        self.inner.add_log(log)
    }

    fn logs(&self, tx_hash: B256) -> Result<Vec<Log>, StateError> {
        if self.fail_logs {
            return Err(StateError::LogsUnavailable(tx_hash));
        }
        self.inner.logs(tx_hash)
    }

    fn add_refund(&mut self, gas: u64) {
        self.inner.add_refund(gas)
    }

    fn refund(&self) -> u64 {
        self.inner.refund()
    }

    fn finalize(&mut self, delete_empty_accounts: bool) -> Result<(), StateError> {
        if self.fail_finalize {
            return Err(StateError::Backend("commit failed".to_string()));
        }
        self.inner.finalize(delete_empty_accounts)
    }

    fn params(&self) -> &EvmParams {
        self.inner.params()
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}
