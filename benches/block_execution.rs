//! Benchmarks for block execution and reconciliation.

use alloy_primitives::{Address, Bloom, Bytes, Log, B256};
use block_reconciler::{fix_logs, BlockTxStatus, LogEntry, ResultData, ResultStore, TxKey, TxResult};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parallel_evm::{
    BlockExecutorConfig, Executor, ParallelBlockExecutor, SequentialExecutor, Workload,
    WorkloadConfig,
};

/// Builds a populated store and its block order with `logs_per_tx` logs each.
fn populated_store(num_transactions: usize, logs_per_tx: usize) -> (ResultStore, Vec<BlockTxStatus>) {
    let store = ResultStore::with_capacity(num_transactions);
    let statuses = (0..num_transactions)
        .map(|i| {
            let key = TxKey::from_tx_bytes(&(i as u64).to_be_bytes());
            let logs = (0..logs_per_tx)
                .map(|_| LogEntry::new(Log::new_unchecked(Address::repeat_byte(1), vec![B256::repeat_byte(2)], Bytes::new()), key.0))
                .collect();
            let result = ResultData { bloom: Bloom::ZERO, logs, tx_hash: key.0, ..Default::default() };
            store.set(key, TxResult::success(result));
            BlockTxStatus::passed(key)
        })
        .collect();
    (store, statuses)
}

/// Benchmarks the reconciliation pass alone.
fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_execution/reconcile");

    for &num_transactions in &[100, 1000, 5000] {
        let (store, statuses) = populated_store(num_transactions, 2);

        group.throughput(Throughput::Elements(num_transactions as u64));
        group.bench_with_input(BenchmarkId::new("fix_logs", num_transactions), &statuses, |b, statuses| {
            b.iter(|| fix_logs(&store, black_box(statuses)).unwrap().included);
        });
    }

    group.finish();
}

/// Benchmarks sequential against parallel execution of the same block.
fn bench_executors(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_execution/executors");

    let num_transactions = 1000;
    let workload = Workload::generate(WorkloadConfig {
        num_accounts: 1000,
        num_transactions,
        ..Default::default()
    });
    let state = workload.create_state();
    group.throughput(Throughput::Elements(num_transactions as u64));

    let sequential = SequentialExecutor::new(BlockExecutorConfig::default());
    group.bench_function(BenchmarkId::new("sequential", 1), |b| {
        b.iter(|| sequential.execute(&state, black_box(&workload.transactions)).unwrap().block.included);
    });

    for &num_threads in &[2, 4, 8] {
        let parallel = ParallelBlockExecutor::new(BlockExecutorConfig { num_threads, ..Default::default() });
        group.bench_function(BenchmarkId::new("parallel", num_threads), |b| {
            b.iter(|| parallel.execute(&state, black_box(&workload.transactions)).unwrap().block.included);
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_executors);
criterion_main!(benches);
