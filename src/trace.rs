//! Per-transaction trace artifacts.

use crate::engine::EngineError;
use alloy_primitives::{hex, B256};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Summary of one executed transaction, as written to the trace directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    /// Gas consumed by execution.
    pub gas: u64,
    /// Whether execution failed.
    pub failed: bool,
    /// Hex of the return data, or of the revert payload.
    pub return_value: String,
}

impl TraceResult {
    /// Builds the trace of an execution that ended with `error`.
    ///
    /// Return data is only kept for successful runs and explicit reverts.
    pub fn new(gas: u64, error: Option<&EngineError>, output: &[u8]) -> Self {
        let return_value = match error {
            None | Some(EngineError::ExecutionReverted) => hex::encode(output),
            Some(_) => String::new(),
        };
        Self { gas, failed: error.is_some(), return_value }
    }
}

/// Persists [`TraceResult`]s as JSON files named after the transaction hash.
///
/// A writer without a directory drops every trace. Write failures are logged
/// and never affect execution.
#[derive(Debug, Clone, Default)]
pub struct TraceWriter {
    dir: Option<Arc<PathBuf>>,
}

impl TraceWriter {
    /// A writer that persists into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(Arc::new(dir.into())) }
    }

    /// A writer that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// The trace directory, if enabled.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref().map(PathBuf::as_path)
    }

    /// Path the trace of `tx_hash` is written to.
    pub fn path_for(&self, tx_hash: B256) -> Option<PathBuf> {
        self.dir().map(|dir| dir.join(tx_hash.to_string()))
    }

    /// Writes the trace of `tx_hash`.
    pub fn persist(&self, tx_hash: B256, trace: &TraceResult) {
        let Some(path) = self.path_for(tx_hash) else {
            return;
        };
        if let Err(err) = write_trace(&path, trace) {
            warn!(target: "parallel_evm::trace", %tx_hash, path = %path.display(), %err, "failed to persist trace");
        }
    }
}

fn write_trace(path: &Path, trace: &TraceResult) -> io::Result<()> {
    let bytes = serde_json::to_vec(trace)?;
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()
}
