//! Gas metering and intrinsic gas.

use std::fmt;

/// Base cost of every transaction.
pub const TX_GAS: u64 = 21_000;
/// Base cost of a contract-creation transaction.
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
/// Cost per zero byte of payload.
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Cost per non-zero byte of payload (EIP-2028).
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Error returned when a bounded meter runs out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("out of gas in location: {descriptor}; gas wanted: {wanted}, limit: {limit}")]
pub struct OutOfGasError {
    /// What the gas was being charged for.
    pub descriptor: &'static str,
    /// Total consumption the charge would have reached.
    pub wanted: u64,
    /// Limit of the meter.
    pub limit: u64,
}

/// Tracks gas consumed by a transaction.
///
/// A meter is either bounded by a limit or infinite. Infinite meters still
/// count consumption, they just never fail.
#[derive(Clone, PartialEq, Eq)]
pub struct GasMeter {
    limit: Option<u64>,
    consumed: u64,
}

impl GasMeter {
    /// Creates a meter bounded by `limit`.
    pub const fn new(limit: u64) -> Self {
        Self { limit: Some(limit), consumed: 0 }
    }

    /// Creates a meter without a limit.
    pub const fn infinite() -> Self {
        Self { limit: None, consumed: 0 }
    }

    /// Gas consumed so far.
    pub const fn consumed(&self) -> u64 {
        self.consumed
    }

    /// The limit, or `None` for an infinite meter.
    pub const fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Gas left before the limit is hit.
    pub fn remaining(&self) -> u64 {
        self.limit.map_or(u64::MAX, |limit| limit.saturating_sub(self.consumed))
    }

    /// Returns true if the meter has no limit.
    pub const fn is_infinite(&self) -> bool {
        self.limit.is_none()
    }

    /// Charges `amount`.
    ///
    /// On failure the meter is left exhausted at its limit.
    pub fn consume(&mut self, amount: u64, descriptor: &'static str) -> Result<(), OutOfGasError> {
        let wanted = self.consumed.saturating_add(amount);
        match self.limit {
            Some(limit) if wanted > limit => {
                self.consumed = limit;
                Err(OutOfGasError { descriptor, wanted, limit })
            }
            _ => {
                self.consumed = wanted;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for GasMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            Some(limit) => write!(f, "GasMeter({}/{})", self.consumed, limit),
            None => write!(f, "GasMeter({}/inf)", self.consumed),
        }
    }
}

/// Computes the intrinsic gas of a transaction from its payload and shape.
///
/// Returns `None` on overflow.
pub fn intrinsic_gas(payload: &[u8], contract_creation: bool) -> Option<u64> {
    let base = if contract_creation { TX_GAS_CONTRACT_CREATION } else { TX_GAS };
    if payload.is_empty() {
        return Some(base);
    }

    let zero = payload.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zero = payload.len() as u64 - zero;

    base.checked_add(non_zero.checked_mul(TX_DATA_NON_ZERO_GAS)?)?
        .checked_add(zero.checked_mul(TX_DATA_ZERO_GAS)?)
}
