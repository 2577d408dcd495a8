//! Sequential pre-execution checks of a block.
//!
//! Every transaction is checked in block order before any of them executes.
//! A rejected transaction keeps its position but carries an ante-failure
//! marker, which makes the reconciler skip it. Fees of accepted transactions
//! are collected into the fee pool.

use crate::refund::FeeCollector;
use crate::state::ExecutionState;
use crate::tx::Transaction;
use alloy_primitives::{Address, U256};
use block_reconciler::BlockTxStatus;
use std::collections::HashMap;
use tracing::debug;

/// Reason a transaction was rejected before execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnteError {
    /// The signature does not recover to the claimed sender.
    #[error("invalid signature for sender {0}")]
    InvalidSignature(Address),
    /// The nonce is not the next one of the sender.
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce {
        /// Next nonce of the sender.
        expected: u64,
        /// Nonce carried by the transaction.
        got: u64,
    },
    /// The gas price is below the minimum.
    #[error("insufficient gas price: minimum {min}, got {got}")]
    InsufficientGasPrice {
        /// Minimum accepted gas price.
        min: U256,
        /// Gas price of the transaction.
        got: U256,
    },
}

/// Pre-execution checks applied to each transaction of a block.
#[derive(Debug, Clone)]
pub struct AnteHandler {
    /// Minimum accepted gas price. A zero price is always rejected.
    pub min_gas_price: U256,
    /// Whether to recover and compare signers.
    pub verify_signatures: bool,
}

impl Default for AnteHandler {
    fn default() -> Self {
        Self { min_gas_price: U256::from(1), verify_signatures: true }
    }
}

impl AnteHandler {
    /// Creates a handler with the given minimum gas price.
    pub fn new(min_gas_price: U256) -> Self {
        Self { min_gas_price, ..Default::default() }
    }

    /// Checks the block in order and collects fees of accepted transactions.
    ///
    /// Nonces are sequenced per sender starting from `state`, so a sender may
    /// submit several transactions in one block.
    pub fn check_block<S, F>(
        &self,
        state: &S,
        transactions: &[Transaction],
        fees: &mut F,
    ) -> Vec<BlockTxStatus>
    where
        S: ExecutionState,
        F: FeeCollector + ?Sized,
    {
        let mut nonces: HashMap<Address, u64> = HashMap::new();
        let mut rejected = 0usize;

        let statuses = transactions
            .iter()
            .map(|tx| {
                let key = tx.key();
                match self.check(state, tx, &mut nonces) {
                    Ok(()) => {
                        fees.deposit(tx.fee().amount);
                        BlockTxStatus::passed(key)
                    }
                    Err(err) => {
                        rejected += 1;
                        debug!(target: "parallel_evm::ante", tx = %key, %err, "transaction rejected");
                        BlockTxStatus::ante_failed(key, err.to_string())
                    }
                }
            })
            .collect();

        debug!(target: "parallel_evm::ante", total = transactions.len(), rejected, "ante checks done");
        statuses
    }

    fn check<S: ExecutionState>(
        &self,
        state: &S,
        tx: &Transaction,
        nonces: &mut HashMap<Address, u64>,
    ) -> Result<(), AnteError> {
        let Transaction::Ethereum(tx) = tx else {
            return Ok(());
        };

        if self.verify_signatures && !tx.verify() {
            return Err(AnteError::InvalidSignature(tx.from));
        }

        let price = tx.request.gas_price;
        if price.is_zero() || price < self.min_gas_price {
            return Err(AnteError::InsufficientGasPrice { min: self.min_gas_price, got: price });
        }

        let expected = nonces.entry(tx.from).or_insert_with(|| state.nonce(tx.from));
        if tx.request.nonce != *expected {
            return Err(AnteError::InvalidNonce { expected: *expected, got: tx.request.nonce });
        }
        *expected += 1;
        Ok(())
    }
}
