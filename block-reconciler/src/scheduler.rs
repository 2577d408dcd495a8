//! Scheduler handing out block positions to worker threads.

use crate::types::TxnIndex;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Task for a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Execute the transaction at this block position.
    Execute(TxnIndex),
    /// Every transaction has been handed out.
    Done,
}

/// Status of a transaction in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Not yet handed to a worker.
    Pending,
    /// A worker is executing it.
    Executing,
    /// A result has been recorded.
    Executed,
}

/// Hands out each block position exactly once.
///
/// Positions are dispensed in block order, but workers finish them in any order.
#[derive(Debug)]
pub struct Scheduler {
    /// Number of transactions in the block.
    num_txns: usize,

    /// Next position to hand out.
    next_idx: AtomicUsize,

    /// Execution status for each transaction.
    statuses: Vec<RwLock<ExecutionStatus>>,
}

impl Scheduler {
    /// Creates a scheduler for a block of `num_txns` transactions.
    pub fn new(num_txns: usize) -> Self {
        Self {
            num_txns,
            next_idx: AtomicUsize::new(0),
            statuses: (0..num_txns).map(|_| RwLock::new(ExecutionStatus::Pending)).collect(),
        }
    }

    /// Gets the next task for a worker thread.
    pub fn next_task(&self) -> Task {
        let idx = self.next_idx.fetch_add(1, Ordering::AcqRel);
        if idx >= self.num_txns {
            return Task::Done;
        }

        *self.statuses[idx].write() = ExecutionStatus::Executing;
        Task::Execute(idx)
    }

    /// Marks a transaction as executed.
    pub fn finish_execution(&self, txn_idx: TxnIndex) {
        *self.statuses[txn_idx].write() = ExecutionStatus::Executed;
    }

    /// Gets statistics about execution progress.
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        for status in &self.statuses {
            match *status.read() {
                ExecutionStatus::Pending => stats.pending += 1,
                ExecutionStatus::Executing => stats.executing += 1,
                ExecutionStatus::Executed => stats.executed += 1,
            }
        }
        stats
    }
}

/// Statistics about scheduler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub pending: usize,
    pub executing: usize,
    pub executed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_basic() {
        let scheduler = Scheduler::new(2);

        assert_eq!(scheduler.next_task(), Task::Execute(0));
        assert_eq!(scheduler.stats(), SchedulerStats { pending: 1, executing: 1, executed: 0 });
        assert_eq!(scheduler.next_task(), Task::Execute(1));
        assert_eq!(scheduler.next_task(), Task::Done);

        scheduler.finish_execution(1);
        scheduler.finish_execution(0);
        assert_eq!(scheduler.stats(), SchedulerStats { pending: 0, executing: 0, executed: 2 });
    }

    #[test]
    fn test_empty_block() {
        let scheduler = Scheduler::new(0);
        assert_eq!(scheduler.next_task(), Task::Done);
        assert_eq!(scheduler.stats(), SchedulerStats::default());
    }
}
