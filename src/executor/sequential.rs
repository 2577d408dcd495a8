//! Sequential block executor.
//!
//! Baseline strategy: executes accepted transactions one at a time, in block
//! order, on the calling thread.

use super::{BlockError, BlockExecutorConfig, BlockOutcome, BlockRun, Executor};
use crate::state::MemoryState;
use crate::tx::Transaction;
use block_reconciler::ResultStore;

/// Sequential executor that processes transactions one at a time.
///
/// # Example
///
/// ```
/// use parallel_evm::{BlockExecutorConfig, Executor, SequentialExecutor, Workload, WorkloadConfig};
///
/// let workload = Workload::generate(WorkloadConfig { num_transactions: 20, ..Default::default() });
/// let state = workload.create_state();
///
/// let executor = SequentialExecutor::new(BlockExecutorConfig::default());
/// let outcome = executor.execute(&state, &workload.transactions).unwrap();
///
/// println!("Included: {}, Logs: {}", outcome.block.included, outcome.block.logs);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SequentialExecutor {
    config: BlockExecutorConfig,
}

impl SequentialExecutor {
    /// Creates a new sequential executor.
    pub fn new(config: BlockExecutorConfig) -> Self {
        Self { config }
    }
}

impl Executor for SequentialExecutor {
    fn execute(
        &self,
        state: &MemoryState,
        transactions: &[Transaction],
    ) -> Result<BlockOutcome, BlockError> {
        let run = BlockRun::begin(&self.config, state, transactions);
        let store = ResultStore::with_capacity(transactions.len());

        for (index, tx) in transactions.iter().enumerate() {
            if run.accepted(index) {
                store.set(tx.key(), run.execute_transaction(tx));
            }
        }

        run.finish(&store, self.name())
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}
