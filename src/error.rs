//! Error types of the state transition.

use crate::engine::EngineError;
use crate::gas::OutOfGasError;
use crate::state::StateError;
use alloy_primitives::{hex, Bytes};
use alloy_sol_types::{Revert, SolError};
use block_reconciler::EncodeError;
use std::fmt;

/// Marker separating the human readable part of a revert from its raw payload.
pub const ERROR_HEX_DATA: &str = "HexData";

/// Error returned by [`StateTransition::transition_db`](crate::StateTransition::transition_db).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The gas limit does not cover the intrinsic cost.
    #[error("invalid intrinsic gas for transaction: gas limit {gas_limit} < intrinsic gas {intrinsic}")]
    InsufficientIntrinsicGas {
        /// Gas limit of the transaction.
        gas_limit: u64,
        /// Intrinsic cost of the transaction.
        intrinsic: u64,
    },
    /// Computing the intrinsic cost overflowed.
    #[error("intrinsic gas overflow")]
    GasOverflow,
    /// Contract creation is disabled by the module parameters.
    #[error("EVM Create operation is disabled")]
    CreateDisabled,
    /// Message calls are disabled by the module parameters.
    #[error("EVM Call operation is disabled")]
    CallDisabled,
    /// No minimum gas price is configured for the EVM denomination.
    #[error("gas price cannot be nil")]
    NilGasPrice,
    /// The engine ran the transaction and it failed.
    #[error(transparent)]
    EngineRevert(#[from] RevertError),
    /// The engine refused to run the transaction.
    #[error("failed to run transaction: {0}")]
    EngineRejected(#[source] EngineError),
    /// The logs of the transaction could not be retrieved.
    #[error("failed to retrieve logs: {0}")]
    LogRetrievalFailed(#[source] StateError),
    /// Pending state mutations could not be finalized.
    #[error("failed to finalize state: {0}")]
    FinalizeFailed(#[source] StateError),
    /// The result payload could not be encoded.
    #[error("failed to encode result data: {0}")]
    EncodeFailed(#[source] EncodeError),
    /// The outer gas meter ran out.
    #[error(transparent)]
    OutOfGas(#[from] OutOfGasError),
}

impl TransitionError {
    /// Returns true if the transaction ran and the engine rolled it back.
    pub fn is_revert(&self) -> bool {
        matches!(self, Self::EngineRevert(_))
    }
}

/// A transaction that ran and was rolled back by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertError {
    /// The engine's failure message.
    pub reason: String,
    /// Human-readable reason decoded from an ABI `Error(string)` payload.
    pub decoded: Option<String>,
    /// Raw revert payload.
    pub raw_data: Bytes,
    reverted: bool,
}

impl RevertError {
    /// Classifies an engine failure.
    ///
    /// Only an explicit `REVERT` carrying data is decoded. A payload that is not
    /// a well-formed `Error(string)` keeps only its raw hex form.
    pub fn new(error: &EngineError, raw_data: Bytes) -> Self {
        let reverted = *error == EngineError::ExecutionReverted && !raw_data.is_empty();
        let decoded = if reverted { decode_revert_reason(&raw_data) } else { None };
        Self { reason: error.to_string(), decoded, raw_data, reverted }
    }

    /// Returns true if this is an explicit revert with a payload.
    pub fn has_revert_data(&self) -> bool {
        self.reverted
    }

    /// Renders the error for RPC clients.
    ///
    /// A revert with payload becomes a JSON array of the failure message, the
    /// decoded reason (or the hex payload), the [`ERROR_HEX_DATA`] marker and the
    /// hex payload. Anything else is just the failure message.
    pub fn to_rpc_message(&self) -> String {
        if !self.reverted {
            return self.reason.clone();
        }

        let hex_data = hex::encode_prefixed(&self.raw_data);
        let detail = match &self.decoded {
            Some(reason) => format!("{}:{reason}", self.reason),
            None => hex_data.clone(),
        };
        let parts = [self.reason.clone(), detail, ERROR_HEX_DATA.to_string(), hex_data.clone()];
        serde_json::to_string(&parts).unwrap_or_else(|_| format!("{}[{hex_data}]", self.reason))
    }
}

impl fmt::Display for RevertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.decoded, self.reverted) {
            (Some(reason), _) => write!(f, "{}: {reason}", self.reason),
            (None, true) => write!(f, "{} [{}]", self.reason, hex::encode_prefixed(&self.raw_data)),
            (None, false) => f.write_str(&self.reason),
        }
    }
}

impl std::error::Error for RevertError {}

/// Decodes the reason of an ABI encoded `Error(string)` revert payload.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    Revert::abi_decode(data).ok().map(|revert| revert.reason)
}
