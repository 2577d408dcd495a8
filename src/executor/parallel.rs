//! Parallel block executor.

use super::{BlockError, BlockExecutorConfig, BlockOutcome, BlockRun, Executor};
use crate::state::MemoryState;
use crate::tx::Transaction;
use block_reconciler::{ExecutorConfig, ParallelExecutor, ResultStore};
use tracing::debug;

/// Executes accepted transactions on a pool of worker threads.
///
/// Workers record results in completion order. Reconciliation afterwards makes
/// the output independent of that order.
#[derive(Debug, Clone, Default)]
pub struct ParallelBlockExecutor {
    config: BlockExecutorConfig,
}

impl ParallelBlockExecutor {
    /// Creates a new parallel executor.
    pub fn new(config: BlockExecutorConfig) -> Self {
        Self { config }
    }
}

impl Executor for ParallelBlockExecutor {
    fn execute(
        &self,
        state: &MemoryState,
        transactions: &[Transaction],
    ) -> Result<BlockOutcome, BlockError> {
        let run = BlockRun::begin(&self.config, state, transactions);
        let store = ResultStore::with_capacity(transactions.len());
        let pool = ParallelExecutor::new(ExecutorConfig { num_threads: self.config.num_threads });

        let stats = pool.execute_block(transactions, &store, |index, tx| {
            run.accepted(index).then(|| (tx.key(), run.execute_transaction(tx)))
        })?;
        debug!(
            target: "parallel_evm::executor",
            recorded = stats.recorded,
            failed = stats.failed,
            elapsed = ?stats.duration,
            "parallel phase done"
        );

        run.finish(&store, self.name())
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SequentialExecutor;
    use crate::{Workload, WorkloadConfig};

    #[test]
    fn test_matches_sequential() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 20,
            num_transactions: 60,
            ..Default::default()
        });
        let state = workload.create_state();
        let config = BlockExecutorConfig { num_threads: 4, ..Default::default() };

        let sequential = SequentialExecutor::new(config.clone()).execute(&state, &workload.transactions).unwrap();
        let parallel = ParallelBlockExecutor::new(config).execute(&state, &workload.transactions).unwrap();

        assert_eq!(parallel.block, sequential.block);
        assert_eq!(parallel.statuses, sequential.statuses);
        assert_eq!(parallel.successful, sequential.successful);
        assert_eq!(parallel.failed, sequential.failed);
        assert_eq!(parallel.refunded, sequential.refunded);
    }

    #[test]
    fn test_empty_block() {
        let outcome = ParallelBlockExecutor::default().execute(&MemoryState::default(), &[]).unwrap();
        assert!(outcome.block.results.is_empty());
        assert_eq!(outcome.block.included, 0);
    }
}
