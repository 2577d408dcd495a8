//! Deterministic reconciliation of concurrently executed block transactions.
//!
//! Transactions of a block may be executed by independent workers in any
//! order, yet every validator has to derive byte-identical receipts from the
//! same block. This crate provides the pieces that make the two compatible.
//!
//! # Core Components
//!
//! - **ResultStore**: Sharded concurrent table workers record results into
//! - **ParallelExecutor**: Scoped worker pool feeding the store
//! - **Reconciler**: Single pass in block order that assigns log and transaction
//!   ordinals, folds the block bloom and encodes each included result
//!
//! # Algorithm Overview
//!
//! 1. Workers execute transactions concurrently and record results by key
//! 2. Once every worker has joined, the reconciler walks the block in order
//! 3. Ante-failed transactions and transactions without a result are skipped
//! 4. Included transactions receive consecutive `tx_index` values, their logs
//!    consecutive block-wide `index` values
//! 5. The encoded results are keyed by original block position
//!
//! # Example
//!
//! ```rust
//! use block_reconciler::{fix_logs, BlockTxStatus, ResultData, ResultStore, TxKey, TxResult};
//!
//! let store = ResultStore::new();
//! let key = TxKey::from_tx_bytes(b"raw transaction");
//! store.set(key, TxResult::success(ResultData { tx_hash: key.0, ..Default::default() }));
//!
//! let block = fix_logs(&store, &[BlockTxStatus::passed(key)]).unwrap();
//! assert_eq!(block.included, 1);
//! assert!(block.result(0).is_some());
//! ```

pub mod executor;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod types;

pub use executor::{ExecutionStats, ExecutorConfig, ExecutorError, ParallelExecutor};
pub use reconciler::{fix_logs, ReconcileError, ReconciledBlock, Reconciler, ResultEncoder, RlpResultEncoder};
pub use store::ResultStore;
pub use types::{BlockTxStatus, EncodeError, LogEntry, ResultData, TxKey, TxResult, TxnIndex};
