//! Block-level log reconciliation.
//!
//! Workers execute the transactions of a block concurrently, so none of them
//! knows where its transaction ends up among the transactions that actually
//! made it into the block. The reconciler walks the block in order once every
//! worker is done and assigns the final ordinals:
//!
//! - every included transaction gets the next `tx_index`,
//! - every log of an included transaction gets the next block-wide `index`,
//! - the block bloom is the OR of the included transactions' blooms.
//!
//! The output depends only on block order, the ante markers and the recorded
//! results. The order in which workers finished is irrelevant.

use crate::store::ResultStore;
use crate::types::{BlockTxStatus, EncodeError, ResultData, TxnIndex};
use alloy_primitives::{Bloom, Bytes};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Encodes a reconciled result into the bytes stored for its position.
pub trait ResultEncoder {
    /// Encodes `data`, whose logs have already been renumbered.
    fn encode(&self, data: &ResultData) -> Result<Bytes, EncodeError>;
}

/// Canonical RLP encoding of [`ResultData`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RlpResultEncoder;

impl ResultEncoder for RlpResultEncoder {
    fn encode(&self, data: &ResultData) -> Result<Bytes, EncodeError> {
        data.encode_to_bytes()
    }
}

/// Fatal reconciliation error.
///
/// Continuing with a missing or partial payload would make this node's block
/// result diverge from every other validator's, so the block must be aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Encoding the result at `position` failed.
    #[error("failed to encode result of transaction at position {position}: {source}")]
    Encode {
        /// Position of the transaction in the block.
        position: TxnIndex,
        /// Underlying encoding error.
        #[source]
        source: EncodeError,
    },
}

/// Deterministic artifact of a reconciled block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconciledBlock {
    /// Encoded result per original block position, for included transactions only.
    pub results: BTreeMap<TxnIndex, Bytes>,
    /// OR of the blooms of all included transactions.
    pub bloom: Bloom,
    /// Number of included transactions.
    pub included: u64,
    /// Number of logs across all included transactions.
    pub logs: u64,
}

impl ReconciledBlock {
    /// Returns the encoded result recorded at `position`.
    pub fn result(&self, position: TxnIndex) -> Option<&Bytes> {
        self.results.get(&position)
    }
}

/// Walks a block in order and assigns the final log and transaction ordinals.
#[derive(Debug, Clone, Default)]
pub struct Reconciler<E = RlpResultEncoder> {
    encoder: E,
}

impl Reconciler {
    /// Creates a reconciler using the canonical RLP encoding.
    pub fn new() -> Self {
        Self { encoder: RlpResultEncoder }
    }
}

impl<E: ResultEncoder> Reconciler<E> {
    /// Creates a reconciler with a custom result encoding.
    pub fn with_encoder(encoder: E) -> Self {
        Self { encoder }
    }

    /// Reconciles the block described by `statuses` against `store`.
    ///
    /// `statuses` must be in block order. The store is only read: logs are
    /// renumbered on a copy of each result, so running this twice over the same
    /// inputs yields identical output.
    pub fn reconcile(
        &self,
        store: &ResultStore,
        statuses: &[BlockTxStatus],
    ) -> Result<ReconciledBlock, ReconcileError> {
        let mut block = ReconciledBlock::default();

        for (position, status) in statuses.iter().enumerate() {
            if status.is_ante_failed() {
                continue;
            }
            let Some(result) = store.get(&status.key) else {
                warn!(
                    target: "block_reconciler::reconciler",
                    position,
                    key = %status.key,
                    "no result recorded for transaction that passed ante checks"
                );
                continue;
            };
            let Some(mut data) = result.result_data else {
                continue;
            };

            let tx_index = block.included;
            for log in &mut data.logs {
                log.index = block.logs;
                log.tx_index = tx_index;
                block.logs += 1;
            }
            block.included += 1;
            block.bloom.accrue_bloom(&data.bloom);

            let encoded = self
                .encoder
                .encode(&data)
                .map_err(|source| ReconcileError::Encode { position, source })?;
            block.results.insert(position, encoded);
        }

        debug!(
            target: "block_reconciler::reconciler",
            transactions = statuses.len(),
            included = block.included,
            logs = block.logs,
            "reconciled block"
        );

        Ok(block)
    }
}

/// Block-level log-fix entry point using the canonical encoding.
pub fn fix_logs(
    store: &ResultStore,
    statuses: &[BlockTxStatus],
) -> Result<ReconciledBlock, ReconcileError> {
    Reconciler::new().reconcile(store, statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogEntry, TxKey, TxResult};
    use alloy_primitives::{logs_bloom, Address, Log, B256};
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    fn key(i: u8) -> TxKey {
        TxKey(B256::repeat_byte(i))
    }

    fn result_with_logs(key: TxKey, num_logs: usize) -> ResultData {
        let raw: Vec<Log> = (0..num_logs)
            .map(|i| {
                Log::new_unchecked(
                    Address::repeat_byte(key.0[0]),
                    vec![B256::with_last_byte(i as u8)],
                    Default::default(),
                )
            })
            .collect();
        ResultData {
            bloom: logs_bloom(raw.iter()),
            logs: raw.into_iter().map(|log| LogEntry::new(log, key.0)).collect(),
            tx_hash: key.0,
            ..Default::default()
        }
    }

    fn decode(block: &ReconciledBlock, position: TxnIndex) -> ResultData {
        ResultData::decode_bytes(block.result(position).unwrap()).unwrap()
    }

    #[test]
    fn test_skips_ante_failed_transaction() {
        let store = ResultStore::new();
        store.set(key(1), TxResult::success(result_with_logs(key(1), 2)));
        store.set(key(2), TxResult::success(result_with_logs(key(2), 4)));
        store.set(key(3), TxResult::success(result_with_logs(key(3), 1)));

        let statuses = vec![
            BlockTxStatus::passed(key(1)),
            BlockTxStatus::ante_failed(key(2), "insufficient funds"),
            BlockTxStatus::passed(key(3)),
        ];

        let block = fix_logs(&store, &statuses).unwrap();
        assert_eq!(block.results.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(block.included, 2);
        assert_eq!(block.logs, 3);

        let first = decode(&block, 0);
        assert_eq!(first.logs.iter().map(|l| l.index).collect::<Vec<_>>(), vec![0, 1]);
        assert!(first.logs.iter().all(|l| l.tx_index == 0));

        let third = decode(&block, 2);
        assert_eq!(third.logs[0].index, 2);
        assert_eq!(third.logs[0].tx_index, 1);
    }

    #[test]
    fn test_missing_and_empty_results_are_skipped() {
        let store = ResultStore::new();
        store.set(key(1), TxResult::failure("execution reverted"));
        store.set(key(3), TxResult::success(result_with_logs(key(3), 2)));
        store.set(key(4), TxResult::empty());
        store.set(key(5), TxResult::success(result_with_logs(key(5), 0)));

        let statuses: Vec<_> = (1..=5).map(|i| BlockTxStatus::passed(key(i))).collect();
        let block = fix_logs(&store, &statuses).unwrap();

        assert_eq!(block.results.keys().copied().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(decode(&block, 2).logs[1].index, 1);
        assert_eq!(decode(&block, 4).logs.len(), 0);
        assert_eq!(block.included, 2);
    }

    #[test]
    fn test_bloom_is_or_of_included_blooms() {
        let store = ResultStore::new();
        let included = [result_with_logs(key(1), 2), result_with_logs(key(3), 3)];
        store.set(key(1), TxResult::success(included[0].clone()));
        store.set(key(2), TxResult::success(result_with_logs(key(2), 1)));
        store.set(key(3), TxResult::success(included[1].clone()));

        let statuses = vec![
            BlockTxStatus::passed(key(1)),
            BlockTxStatus::ante_failed(key(2), "bad nonce"),
            BlockTxStatus::passed(key(3)),
        ];
        let block = fix_logs(&store, &statuses).unwrap();

        let mut expected = Bloom::ZERO;
        expected.accrue_bloom(&included[0].bloom);
        expected.accrue_bloom(&included[1].bloom);
        assert_eq!(block.bloom, expected);
    }

    #[test]
    fn test_independent_of_population_order() {
        let statuses: Vec<_> = (0..32u8)
            .map(|i| {
                if i % 5 == 0 {
                    BlockTxStatus::ante_failed(key(i), "invalid signature")
                } else {
                    BlockTxStatus::passed(key(i))
                }
            })
            .collect();
        let mut results: Vec<_> = (0..32u8)
            .map(|i| (key(i), TxResult::success(result_with_logs(key(i), (i % 4) as usize))))
            .collect();

        let forward = ResultStore::new();
        for (k, r) in &results {
            forward.set(*k, r.clone());
        }

        results.shuffle(&mut StdRng::seed_from_u64(7));
        let shuffled = ResultStore::new();
        for (k, r) in results.into_iter().rev() {
            shuffled.set(k, r);
        }

        let a = fix_logs(&forward, &statuses).unwrap();
        let b = fix_logs(&shuffled, &statuses).unwrap();
        assert_eq!(a, b);

        // The store is left untouched, so a second pass is byte-identical.
        assert_eq!(fix_logs(&forward, &statuses).unwrap(), a);

        let mut next_log = 0;
        for (tx_index, position) in a.results.keys().enumerate() {
            for log in decode(&a, *position).logs {
                assert_eq!(log.index, next_log);
                assert_eq!(log.tx_index, tx_index as u64);
                next_log += 1;
            }
        }
        assert_eq!(next_log, a.logs);
    }

    #[test]
    fn test_encode_failure_aborts_block() {
        let store = ResultStore::new();
        store.set(key(1), TxResult::success(result_with_logs(key(1), 1)));
        let mut corrupted = result_with_logs(key(2), 2);
        corrupted.logs[1].tx_hash = key(9).0;
        store.set(key(2), TxResult::success(corrupted));

        let statuses = vec![BlockTxStatus::passed(key(1)), BlockTxStatus::passed(key(2))];
        let err = fix_logs(&store, &statuses).unwrap_err();
        assert!(matches!(err, ReconcileError::Encode { position: 1, .. }));
    }

    #[test]
    fn test_custom_encoder() {
        struct HashOnly;

        impl ResultEncoder for HashOnly {
            fn encode(&self, data: &ResultData) -> Result<Bytes, EncodeError> {
                Ok(Bytes::copy_from_slice(data.tx_hash.as_slice()))
            }
        }

        let store = ResultStore::new();
        store.set(key(1), TxResult::success(result_with_logs(key(1), 1)));

        let block = Reconciler::with_encoder(HashOnly)
            .reconcile(&store, &[BlockTxStatus::passed(key(1))])
            .unwrap();
        assert_eq!(block.result(0).unwrap().as_ref(), key(1).0.as_slice());
    }
}
