//! Block execution strategies.
//!
//! Both executors run the same pipeline:
//!
//! 1. Ante checks in block order, collecting fees into the fee pool
//! 2. Execution of every accepted transaction against its own snapshot of the
//!    block's base state, recording results in a [`ResultStore`]
//! 3. Reconciliation of the recorded results in block order
//!
//! They differ only in step 2: [`SequentialExecutor`] walks the block on the
//! calling thread, [`ParallelBlockExecutor`] hands it to a worker pool. Given
//! the same base state and block, both produce identical reconciled output.

mod parallel;
mod sequential;

pub use parallel::ParallelBlockExecutor;
pub use sequential::SequentialExecutor;

use crate::ante::AnteHandler;
use crate::engine::RevmEngine;
use crate::gas::GasMeter;
use crate::refund::{FeeCollector, MemoryFeeCollector};
use crate::state::{ExecutionState, MemoryState};
use crate::trace::TraceWriter;
use crate::transition::Context;
use crate::tx::Transaction;
use alloy_primitives::U256;
use block_reconciler::{
    fix_logs, BlockTxStatus, ExecutorError, ReconcileError, ReconciledBlock, ResultStore, TxResult,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration shared by the block executors.
#[derive(Debug, Clone)]
pub struct BlockExecutorConfig {
    /// Worker threads of the parallel executor.
    pub num_threads: usize,
    /// Chain the block belongs to.
    pub chain_id: u64,
    /// Minimum gas price in the EVM denomination.
    pub min_gas_price: U256,
    /// Directory trace artifacts are written to.
    pub trace_dir: Option<PathBuf>,
    /// Whether the ante stage verifies signatures.
    pub verify_signatures: bool,
}

impl Default for BlockExecutorConfig {
    fn default() -> Self {
        Self {
            num_threads: 4,
            chain_id: 1,
            min_gas_price: U256::from(1),
            trace_dir: None,
            verify_signatures: true,
        }
    }
}

/// Error aborting a block.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// The worker pool failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    /// Reconciliation failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Outcome of executing a block.
#[derive(Debug, Clone)]
pub struct BlockOutcome {
    /// The reconciled results.
    pub block: ReconciledBlock,
    /// Ante status of every transaction, in block order.
    pub statuses: Vec<BlockTxStatus>,
    /// Transactions that executed without error.
    pub successful: usize,
    /// Transactions that executed with an error.
    pub failed: usize,
    /// Transactions rejected by the ante stage.
    pub rejected: usize,
    /// Fees collected by the ante stage.
    pub fees_collected: U256,
    /// Gas refunds paid back out of the pool.
    pub refunded: U256,
    /// Wall-clock time of the block.
    pub duration: Duration,
}

/// Trait for different block execution strategies.
pub trait Executor {
    /// Executes `transactions` on top of `state`.
    ///
    /// `state` is only read; every transaction runs on its own snapshot.
    fn execute(
        &self,
        state: &MemoryState,
        transactions: &[Transaction],
    ) -> Result<BlockOutcome, BlockError>;

    /// Returns a human-readable name for this executor.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// State of one block run shared by the executing threads.
pub(crate) struct BlockRun<'a> {
    config: &'a BlockExecutorConfig,
    base: &'a MemoryState,
    statuses: Vec<BlockTxStatus>,
    fees: Mutex<MemoryFeeCollector>,
    fees_collected: U256,
    tracer: TraceWriter,
    started: Instant,
}

impl<'a> BlockRun<'a> {
    /// Runs the ante stage over `transactions`.
    pub(crate) fn begin(
        config: &'a BlockExecutorConfig,
        base: &'a MemoryState,
        transactions: &[Transaction],
    ) -> Self {
        let started = Instant::now();
        let ante = AnteHandler {
            min_gas_price: config.min_gas_price,
            verify_signatures: config.verify_signatures,
        };
        let mut fees = MemoryFeeCollector::default();
        let statuses = ante.check_block(base, transactions, &mut fees);
        let tracer = config.trace_dir.clone().map(TraceWriter::new).unwrap_or_default();

        Self {
            config,
            base,
            statuses,
            fees_collected: fees.pool(),
            fees: Mutex::new(fees),
            tracer,
            started,
        }
    }

    /// Returns true if the transaction at `index` passed the ante stage.
    pub(crate) fn accepted(&self, index: usize) -> bool {
        self.statuses.get(index).is_some_and(|status| !status.is_ante_failed())
    }

    /// Executes one accepted transaction against a snapshot of the base state.
    pub(crate) fn execute_transaction(&self, tx: &Transaction) -> TxResult {
        let Transaction::Ethereum(eth) = tx else {
            return TxResult::empty();
        };

        let mut state = self.base.snapshot();
        let mut ctx = Context::new(GasMeter::new(eth.request.gas_limit))
            .with_min_gas_price(state.params().evm_denom.clone(), self.config.min_gas_price)
            .with_tracer(self.tracer.clone());
        let mut engine = RevmEngine::new(self.config.chain_id);
        let mut transition = eth.state_transition(false);
        if let Err(err) = transition.charge_intrinsic_gas(&mut ctx) {
            debug!(target: "parallel_evm::executor", tx = %eth.tx_hash, %err, "transaction failed");
            return TxResult::failure(err);
        }

        let result = match transition.transition_db(&mut ctx, &mut state, &mut engine) {
            Ok(result) => result,
            Err(err) => {
                debug!(target: "parallel_evm::executor", tx = %eth.tx_hash, %err, "transaction failed");
                return TxResult::failure(err);
            }
        };

        let mut fees = self.fees.lock();
        match transition.refund_gas(&ctx, &mut *fees) {
            Ok(_) => TxResult::success(result.result_data),
            Err(err) => {
                debug!(target: "parallel_evm::executor", tx = %eth.tx_hash, %err, "gas refund failed");
                TxResult::failure(err)
            }
        }
    }

    /// Reconciles `store` and summarizes the block.
    pub(crate) fn finish(self, store: &ResultStore, executor: &str) -> Result<BlockOutcome, BlockError> {
        let block = fix_logs(store, &self.statuses)?;

        let (mut successful, mut failed, mut rejected) = (0, 0, 0);
        for status in &self.statuses {
            if status.is_ante_failed() {
                rejected += 1;
                continue;
            }
            match store.get(&status.key) {
                Some(result) if result.error.is_some() => failed += 1,
                Some(_) => successful += 1,
                None => {}
            }
        }
        store.clear();

        let pool = self.fees.lock().get_or_set_balance(false, U256::ZERO);
        let outcome = BlockOutcome {
            block,
            statuses: self.statuses,
            successful,
            failed,
            rejected,
            fees_collected: self.fees_collected,
            refunded: self.fees_collected.saturating_sub(pool),
            duration: self.started.elapsed(),
        };
        info!(
            target: "parallel_evm::executor",
            executor,
            successful,
            failed,
            rejected,
            included = outcome.block.included,
            logs = outcome.block.logs,
            elapsed = ?outcome.duration,
            "block executed"
        );
        Ok(outcome)
    }
}
