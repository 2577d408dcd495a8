//! The per-transaction state transition.
//!
//! [`StateTransition::transition_db`] validates a message, runs it through an
//! [`Engine`] and assembles the artifact the block reconciler consumes. Gas
//! accounting spans two meters. The transaction's outer meter carries the
//! intrinsic cost and is charged once with the execution's consumption. An
//! unbounded inner meter is swapped in while the engine runs so storage-access
//! charges are not counted twice.

use crate::engine::{Engine, EngineCall, EngineError};
use crate::error::{RevertError, TransitionError};
use crate::gas::{intrinsic_gas, GasMeter};
use crate::state::ExecutionState;
use crate::trace::{TraceResult, TraceWriter};
use alloy_primitives::{logs_bloom, Address, Bloom, Bytes, Log, B256, U256};
use block_reconciler::{LogEntry, ResultData};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Per-transaction execution context.
#[derive(Debug, Clone)]
pub struct Context {
    /// The transaction's outer gas meter.
    pub gas_meter: GasMeter,
    /// Minimum gas price per denomination.
    pub min_gas_prices: BTreeMap<String, U256>,
    /// Where trace artifacts go.
    pub tracer: TraceWriter,
}

impl Context {
    /// Creates a context around `gas_meter` with no gas prices and tracing off.
    pub fn new(gas_meter: GasMeter) -> Self {
        Self { gas_meter, min_gas_prices: BTreeMap::new(), tracer: TraceWriter::disabled() }
    }

    /// Sets the minimum gas price of `denom`.
    pub fn with_min_gas_price(mut self, denom: impl Into<String>, price: U256) -> Self {
        self.min_gas_prices.insert(denom.into(), price);
        self
    }

    /// Sets the trace writer.
    pub fn with_tracer(mut self, tracer: TraceWriter) -> Self {
        self.tracer = tracer;
        self
    }

    /// Minimum gas price of `denom`, if configured.
    pub fn min_gas_price(&self, denom: &str) -> Option<U256> {
        self.min_gas_prices.get(denom).copied()
    }
}

/// Gas figures of an executed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GasInfo {
    /// Budget handed to the engine.
    pub gas_limit: u64,
    /// Gas consumed by execution.
    pub gas_consumed: u64,
    /// Refund credit granted back to the sender.
    pub gas_refunded: u64,
}

/// Outcome of a successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Logs emitted by the transaction.
    pub logs: Vec<Log>,
    /// Bloom over `logs`.
    pub bloom: Bloom,
    /// Artifact recorded for reconciliation.
    pub result_data: ResultData,
    /// Canonical encoding of `result_data`.
    pub encoded: Bytes,
    /// Human readable summary.
    pub log: String,
    /// Gas figures.
    pub gas_info: GasInfo,
}

/// A single EVM message and the bookkeeping of its execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateTransition {
    /// Nonce carried by the transaction.
    pub account_nonce: u64,
    /// Gas price.
    pub price: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient, `None` for contract creation.
    pub recipient: Option<Address>,
    /// Value transferred.
    pub amount: U256,
    /// Calldata or init code.
    pub payload: Bytes,
    /// Chain the transaction targets.
    pub chain_id: u64,
    /// Transaction hash, required to collect logs.
    pub tx_hash: Option<B256>,
    /// Sender.
    pub sender: Address,
    /// Run against a snapshot and leave the state untouched.
    pub simulate: bool,
    /// Refund credit of the last successful transition, used by
    /// [`StateTransition::refund_gas`].
    pub gas_return: u64,
}

impl StateTransition {
    /// Returns true if the message deploys a contract.
    pub fn is_contract_creation(&self) -> bool {
        self.recipient.is_none()
    }

    /// Charges the intrinsic cost of the message to the outer meter of `ctx`.
    ///
    /// This is the pre-execution metering a committed transaction goes through
    /// before [`transition_db`](Self::transition_db). Returns the gas charged.
    pub fn charge_intrinsic_gas(&self, ctx: &mut Context) -> Result<u64, TransitionError> {
        let intrinsic = intrinsic_gas(&self.payload, self.is_contract_creation())
            .ok_or(TransitionError::GasOverflow)?;
        if self.gas_limit < intrinsic {
            return Err(TransitionError::InsufficientIntrinsicGas {
                gas_limit: self.gas_limit,
                intrinsic,
            });
        }
        ctx.gas_meter.consume(intrinsic, "intrinsic gas")?;
        Ok(intrinsic)
    }

    /// Executes the message against `state` using `engine`.
    ///
    /// On success the outer meter of `ctx` is charged with the gas consumed
    /// and [`gas_return`](Self::gas_return) holds the refund credit.
    pub fn transition_db<S, E>(
        &mut self,
        ctx: &mut Context,
        state: &mut S,
        engine: &mut E,
    ) -> Result<ExecutionResult, TransitionError>
    where
        S: ExecutionState,
        E: Engine<S>,
    {
        let contract_creation = self.is_contract_creation();
        let intrinsic =
            intrinsic_gas(&self.payload, contract_creation).ok_or(TransitionError::GasOverflow)?;
        if self.gas_limit < intrinsic {
            return Err(TransitionError::InsufficientIntrinsicGas {
                gas_limit: self.gas_limit,
                intrinsic,
            });
        }

        let params = state.params();
        let gas_price =
            ctx.min_gas_price(&params.evm_denom).ok_or(TransitionError::NilGasPrice)?;
        if contract_creation && !params.enable_create {
            return Err(TransitionError::CreateDisabled);
        }
        if !contract_creation && !params.enable_call {
            return Err(TransitionError::CallDisabled);
        }

        let mut gas_limit = self.gas_limit.saturating_sub(ctx.gas_meter.consumed());
        let mut simulated = None;
        if self.simulate {
            gas_limit = self.gas_limit - intrinsic;
            let consumed = ctx.gas_meter.consumed();
            if consumed < intrinsic {
                ctx.gas_meter.consume(intrinsic - consumed, "intrinsic gas match")?;
            }
            simulated = Some(state.snapshot());
        }
        let state = match simulated.as_mut() {
            Some(snapshot) => snapshot,
            None => state,
        };

        if let Some(tx_hash) = self.tx_hash {
            state.prepare(tx_hash);
        }

        let outer = std::mem::replace(&mut ctx.gas_meter, GasMeter::infinite());
        let current_nonce = state.nonce(self.sender);
        state.set_nonce(self.sender, self.account_nonce);

        let call = EngineCall {
            caller: self.sender,
            input: self.payload.clone(),
            gas: gas_limit,
            value: self.amount,
        };
        let outcome = match self.recipient {
            None => engine.create(state, &mut ctx.gas_meter, &call),
            Some(to) => {
                state.set_nonce(self.sender, self.account_nonce.saturating_add(1));
                engine.call(state, &mut ctx.gas_meter, to, &call)
            }
        };

        let inner = std::mem::replace(&mut ctx.gas_meter, outer);
        state.set_nonce(self.sender, current_nonce);
        trace!(target: "parallel_evm::transition", inner = ?inner, "engine returned");

        let gas_consumed = gas_limit.saturating_sub(outcome.gas_left);
        self.gas_return = (gas_consumed / 2).min(state.refund());

        if let Some(error) = outcome.error {
            ctx.gas_meter.consume(gas_consumed, "EVM execution consumption")?;
            if !self.simulate {
                self.save_trace(ctx, TraceResult::new(gas_consumed, Some(&error), &outcome.output));
            }
            let err = match error {
                EngineError::Invalid(_) => TransitionError::EngineRejected(error),
                _ => RevertError::new(&error, outcome.output).into(),
            };
            debug!(
                target: "parallel_evm::transition",
                sender = %self.sender,
                tx_hash = ?self.tx_hash,
                gas_consumed,
                %err,
                "state transition failed"
            );
            return Err(err);
        }

        let mut logs = Vec::new();
        let mut bloom = Bloom::ZERO;
        if let (Some(tx_hash), false) = (self.tx_hash, self.simulate) {
            logs = state.logs(tx_hash).map_err(TransitionError::LogRetrievalFailed)?;
            bloom = logs_bloom(logs.iter());
        }

        if !self.simulate {
            state.finalize(true).map_err(TransitionError::FinalizeFailed)?;
            self.save_trace(ctx, TraceResult::new(gas_consumed, None, &outcome.output));
        }

        let tx_hash = self.tx_hash.unwrap_or_default();
        let (contract_address, target) = match self.recipient {
            None => {
                let address = outcome.contract_address.unwrap_or_default();
                (Some(address), format!("contract address {address}"))
            }
            Some(to) => (None, format!("recipient address {to}")),
        };
        let result_data = ResultData {
            bloom,
            logs: logs.iter().cloned().map(|log| LogEntry::new(log, tx_hash)).collect(),
            ret: outcome.output,
            contract_address,
            tx_hash,
        };
        let encoded = result_data.encode_to_bytes().map_err(TransitionError::EncodeFailed)?;

        ctx.gas_meter.consume(gas_consumed, "EVM execution consumption")?;

        debug!(
            target: "parallel_evm::transition",
            sender = %self.sender,
            tx_hash = ?self.tx_hash,
            %gas_price,
            gas_limit,
            gas_consumed,
            gas_return = self.gas_return,
            logs = logs.len(),
            simulate = self.simulate,
            "state transition executed"
        );

        Ok(ExecutionResult {
            logs,
            bloom,
            result_data,
            encoded,
            log: format!("executed EVM state transition; sender address {}; {target}", self.sender),
            gas_info: GasInfo { gas_limit, gas_consumed, gas_refunded: self.gas_return },
        })
    }

    fn save_trace(&self, ctx: &Context, trace: TraceResult) {
        if let Some(tx_hash) = self.tx_hash {
            ctx.tracer.persist(tx_hash, &trace);
        }
    }
}
