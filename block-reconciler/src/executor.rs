//! Worker pool executing the transactions of a block concurrently.

use crate::scheduler::{Scheduler, Task};
use crate::store::ResultStore;
use crate::types::{TxKey, TxResult, TxnIndex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Error raised by the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A worker panicked; the block attempt must be abandoned.
    #[error("block worker panicked")]
    WorkerPanicked,
}

/// Configuration for parallel execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads.
    pub num_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { num_threads: 4 }
    }
}

/// Counters of one parallel block run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    /// Transactions handed to the execution function.
    pub executed: usize,
    /// Results written to the store.
    pub recorded: usize,
    /// Recorded results that carry an error.
    pub failed: usize,
    /// Wall-clock time of the run.
    pub duration: Duration,
}

/// Runs a per-transaction function on a pool of scoped worker threads.
///
/// The function returns the key and result to record, or `None` when the
/// transaction should leave no trace in the store. Results land in the store
/// in completion order; callers reconcile them afterwards.
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutor {
    config: ExecutorConfig,
}

impl ParallelExecutor {
    /// Creates a new parallel executor.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Executes every transaction of the block and records results in `store`.
    ///
    /// Returns once all workers have joined.
    pub fn execute_block<T, F>(
        &self,
        transactions: &[T],
        store: &ResultStore,
        execute: F,
    ) -> Result<ExecutionStats, ExecutorError>
    where
        T: Sync,
        F: Fn(TxnIndex, &T) -> Option<(TxKey, TxResult)> + Sync,
    {
        let start = Instant::now();
        let scheduler = Scheduler::new(transactions.len());
        let executed = AtomicUsize::new(0);
        let recorded = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let num_threads = self.config.num_threads.max(1);
        crossbeam::thread::scope(|scope| {
            for worker_id in 0..num_threads {
                let worker = Worker {
                    id: worker_id,
                    scheduler: &scheduler,
                    store,
                    executed: &executed,
                    recorded: &recorded,
                    failed: &failed,
                };
                let execute = &execute;
                scope.spawn(move |_| worker.run(transactions, execute));
            }
        })
        .map_err(|_| ExecutorError::WorkerPanicked)?;

        let stats = ExecutionStats {
            executed: executed.load(Ordering::Acquire),
            recorded: recorded.load(Ordering::Acquire),
            failed: failed.load(Ordering::Acquire),
            duration: start.elapsed(),
        };
        debug!(
            target: "block_reconciler::executor",
            threads = num_threads,
            executed = stats.executed,
            recorded = stats.recorded,
            failed = stats.failed,
            elapsed = ?stats.duration,
            "block workers finished"
        );
        Ok(stats)
    }
}

/// Shared state borrowed by one worker thread.
struct Worker<'a> {
    id: usize,
    scheduler: &'a Scheduler,
    store: &'a ResultStore,
    executed: &'a AtomicUsize,
    recorded: &'a AtomicUsize,
    failed: &'a AtomicUsize,
}

impl Worker<'_> {
    fn run<T, F>(self, transactions: &[T], execute: &F)
    where
        F: Fn(TxnIndex, &T) -> Option<(TxKey, TxResult)>,
    {
        let mut local_executions = 0usize;

        while let Task::Execute(txn_idx) = self.scheduler.next_task() {
            local_executions += 1;
            self.executed.fetch_add(1, Ordering::Relaxed);

            if let Some((key, result)) = execute(txn_idx, &transactions[txn_idx]) {
                if result.error.is_some() {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
                self.store.set(key, result);
                self.recorded.fetch_add(1, Ordering::Relaxed);
            }

            self.scheduler.finish_execution(txn_idx);

            if local_executions % 1000 == 0 {
                let stats = self.scheduler.stats();
                debug!(
                    target: "block_reconciler::executor",
                    worker = self.id,
                    local_executions,
                    pending = stats.pending,
                    executing = stats.executing,
                    executed = stats.executed,
                    "worker progress"
                );
            }
        }

        trace!(target: "block_reconciler::executor", worker = self.id, local_executions, "worker done");
    }
}
