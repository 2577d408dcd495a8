//! Fee collection and the post-execution gas refund.

use crate::gas::{GasMeter, OutOfGasError};
use crate::transition::{Context, StateTransition};
use alloy_primitives::{Address, U256};
use std::collections::HashMap;
use tracing::debug;

/// Flat gas charged for one balance write by [`MemoryFeeCollector`].
pub const BALANCE_WRITE_GAS: u64 = 2_000;

/// Error raised while moving fees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefundError {
    /// `limit - consumed + refund` does not fit.
    #[error("gas accounting overflow: limit {gas_limit}, consumed {consumed}, refund {gas_return}")]
    GasOverflow {
        /// Gas limit of the transaction.
        gas_limit: u64,
        /// Gas consumed on the outer meter.
        consumed: u64,
        /// Refund credit.
        gas_return: u64,
    },
    /// `price * gas` does not fit.
    #[error("refund amount overflows")]
    FeeOverflow,
    /// The fee pool cannot cover the transfer.
    #[error("insufficient fee pool: have {available}, need {required}")]
    InsufficientPool {
        /// Balance of the pool.
        available: U256,
        /// Amount requested.
        required: U256,
    },
    /// The meter handed to the collector ran out.
    #[error(transparent)]
    OutOfGas(#[from] OutOfGasError),
}

/// Fee collector hook.
///
/// The pool balance is read or replaced through
/// [`get_or_set_balance`](FeeCollector::get_or_set_balance); accounts are
/// credited through [`credit_account`](FeeCollector::credit_account).
pub trait FeeCollector {
    /// Returns the pool balance, replacing it with `balance` first when `update` is set.
    fn get_or_set_balance(&mut self, update: bool, balance: U256) -> U256;

    /// Credits `amount` to `account`, charging storage costs to `meter`.
    fn credit_account(
        &mut self,
        meter: &mut GasMeter,
        account: Address,
        amount: U256,
    ) -> Result<(), RefundError>;

    /// Adds `amount` to the pool.
    fn deposit(&mut self, amount: U256) -> U256 {
        let balance = self.get_or_set_balance(false, U256::ZERO).saturating_add(amount);
        self.get_or_set_balance(true, balance)
    }

    /// Moves `amount` from the pool to `account`.
    fn send_to_account(
        &mut self,
        meter: &mut GasMeter,
        account: Address,
        amount: U256,
    ) -> Result<(), RefundError> {
        let available = self.get_or_set_balance(false, U256::ZERO);
        let remaining = available
            .checked_sub(amount)
            .ok_or(RefundError::InsufficientPool { available, required: amount })?;
        self.credit_account(meter, account, amount)?;
        self.get_or_set_balance(true, remaining);
        Ok(())
    }
}

/// In-memory fee pool and the credits paid out of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFeeCollector {
    pool: U256,
    credits: HashMap<Address, U256>,
}

impl MemoryFeeCollector {
    /// Creates a collector holding `pool`.
    pub fn new(pool: U256) -> Self {
        Self { pool, credits: HashMap::new() }
    }

    /// Current pool balance.
    pub fn pool(&self) -> U256 {
        self.pool
    }

    /// Total credited to `account`.
    pub fn credited(&self, account: Address) -> U256 {
        self.credits.get(&account).copied().unwrap_or_default()
    }
}

impl FeeCollector for MemoryFeeCollector {
    fn get_or_set_balance(&mut self, update: bool, balance: U256) -> U256 {
        if update {
            self.pool = balance;
        }
        self.pool
    }

    fn credit_account(
        &mut self,
        meter: &mut GasMeter,
        account: Address,
        amount: U256,
    ) -> Result<(), RefundError> {
        meter.consume(BALANCE_WRITE_GAS, "credit account")?;
        let credit = self.credits.entry(account).or_default();
        *credit = credit.saturating_add(amount);
        Ok(())
    }
}

impl StateTransition {
    /// Pays the sender back for unused gas and the refund credit.
    ///
    /// The amount is `price * (gas_limit - consumed + gas_return)`, taken from
    /// the fee pool. The transfer runs under an unbounded meter so it never
    /// touches the transaction's outer meter. Returns the amount refunded.
    pub fn refund_gas<F: FeeCollector + ?Sized>(
        &self,
        ctx: &Context,
        fees: &mut F,
    ) -> Result<U256, RefundError> {
        let consumed = ctx.gas_meter.consumed();
        let gas_remaining = self
            .gas_limit
            .checked_sub(consumed)
            .and_then(|gas| gas.checked_add(self.gas_return))
            .ok_or(RefundError::GasOverflow {
                gas_limit: self.gas_limit,
                consumed,
                gas_return: self.gas_return,
            })?;

        let amount =
            self.price.checked_mul(U256::from(gas_remaining)).ok_or(RefundError::FeeOverflow)?;
        if amount.is_zero() {
            return Ok(U256::ZERO);
        }

        let mut meter = GasMeter::infinite();
        fees.send_to_account(&mut meter, self.sender, amount)?;
        debug!(target: "parallel_evm::refund", sender = %self.sender, gas_remaining, %amount, "refunded gas");
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: Address = Address::repeat_byte(0x0f);

    fn transition(gas_limit: u64, price: u64, gas_return: u64) -> StateTransition {
        StateTransition {
            gas_limit,
            price: U256::from(price),
            gas_return,
            sender: SENDER,
            ..Default::default()
        }
    }

    #[test]
    fn test_refund_unused_gas_and_credit() {
        let mut ctx = Context::new(GasMeter::new(200_000));
        ctx.gas_meter.consume(100_000, "execution").unwrap();
        let mut fees = MemoryFeeCollector::new(U256::from(1_000_000u64));

        let amount = transition(200_000, 2, 50_000).refund_gas(&ctx, &mut fees).unwrap();

        assert_eq!(amount, U256::from(300_000u64));
        assert_eq!(fees.credited(SENDER), amount);
        assert_eq!(fees.pool(), U256::from(700_000u64));
        assert_eq!(ctx.gas_meter.consumed(), 100_000);
    }

    #[test]
    fn test_zero_refund_is_noop() {
        let mut ctx = Context::new(GasMeter::new(21_000));
        ctx.gas_meter.consume(21_000, "execution").unwrap();
        let mut fees = MemoryFeeCollector::new(U256::ZERO);

        let amount = transition(21_000, 5, 0).refund_gas(&ctx, &mut fees).unwrap();

        assert!(amount.is_zero());
        assert_eq!(fees, MemoryFeeCollector::new(U256::ZERO));
    }

    #[test]
    fn test_insufficient_pool() {
        let ctx = Context::new(GasMeter::new(100));
        let mut fees = MemoryFeeCollector::new(U256::from(10));

        let err = transition(100, 1, 0).refund_gas(&ctx, &mut fees).unwrap_err();

        assert_eq!(
            err,
            RefundError::InsufficientPool { available: U256::from(10), required: U256::from(100) }
        );
        assert_eq!(fees.pool(), U256::from(10));
        assert!(fees.credited(SENDER).is_zero());
    }

    #[test]
    fn test_overflows_are_reported() {
        let mut ctx = Context::new(GasMeter::infinite());
        ctx.gas_meter.consume(500, "execution").unwrap();
        let mut fees = MemoryFeeCollector::default();
        assert!(matches!(
            transition(100, 1, 0).refund_gas(&ctx, &mut fees),
            Err(RefundError::GasOverflow { .. })
        ));

        let ctx = Context::new(GasMeter::new(100));
        let mut huge = transition(100, 0, 0);
        huge.price = U256::MAX;
        assert_eq!(huge.refund_gas(&ctx, &mut fees), Err(RefundError::FeeOverflow));
    }

    #[test]
    fn test_collect_adds_to_pool() {
        let mut fees = MemoryFeeCollector::default();
        fees.deposit(U256::from(7));
        assert_eq!(fees.deposit(U256::from(5)), U256::from(12));
    }
}
