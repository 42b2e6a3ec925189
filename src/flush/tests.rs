use super::*;
use crate::ingest::Ingestor;
use crate::staging::MemoryStagingBuffer;
use crate::store::MemoryReadingStore;
use crate::test_support::{
    reading, FailingStagingBuffer, FlakyReadingStore, GatedReadingStore, StickyStagingBuffer,
};
use std::collections::HashSet;

fn cycle_over(
    buffer: Arc<dyn StagingBuffer>,
    store: Arc<dyn ReadingStore>,
) -> (Arc<FlushCycle>, Ingestor) {
    let stats = Arc::new(PipelineStats::new());
    let cycle = Arc::new(FlushCycle::new(buffer.clone(), store, stats.clone()));
    (cycle, Ingestor::new(buffer, stats))
}

#[tokio::test]
async fn flush_moves_every_staged_reading() {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, ingestor) = cycle_over(buffer.clone(), store.clone());

    for idx in 0..25 {
        ingestor
            .ingest(reading(&format!("dev-{}", idx % 3), 400 + idx, idx))
            .await
            .unwrap();
    }

    let outcome = cycle.run_once().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Committed {
            drained: 25,
            inserted: 25,
            deleted: 25
        }
    );
    assert_eq!(store.len(), 25);
    assert_eq!(buffer.len().await.unwrap(), 0);

    let stats = cycle.stats();
    assert_eq!(stats.committed_total.load(Ordering::Relaxed), 25);
    assert_eq!(stats.last_batch_len.load(Ordering::Relaxed), 25);
    assert!(stats.last_flush_unix_ms.load(Ordering::Relaxed) > 0);
    assert_eq!(stats.phase(), FlushPhase::Idle);
}

#[tokio::test]
async fn committed_rows_keep_staging_keys_and_values() {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, ingestor) = cycle_over(buffer, store.clone());

    let key = ingestor.ingest(reading("dev-9", 812, 64)).await.unwrap();
    cycle.run_once().await.unwrap();

    let rows = store.readings();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].staging_key.as_deref(), Some(key.as_str()));
    assert_eq!(rows[0].guid, "dev-9");
    assert_eq!((rows[0].co2, rows[0].tvoc, rows[0].battery_charge), (812, 64, 80));
}

#[tokio::test]
async fn empty_buffer_is_a_no_op() {
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, _) = cycle_over(Arc::new(MemoryStagingBuffer::new()), store.clone());

    assert_eq!(cycle.run_once().await.unwrap(), FlushOutcome::Empty);
    assert!(store.is_empty());
    assert_eq!(cycle.stats().last_flush_unix_ms.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn failed_commit_keeps_entries_for_next_cycle() {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(FlakyReadingStore::failing(1));
    let (cycle, ingestor) = cycle_over(buffer.clone(), store.clone());

    for idx in 0..3 {
        ingestor.ingest(reading("dev-1", 500 + idx, 7)).await.unwrap();
    }

    let err = cycle.run_once().await.unwrap_err();
    assert!(matches!(err, PipelineError::FlushCommitFailed { batch: 3, .. }));
    assert_eq!(buffer.len().await.unwrap(), 3);
    assert!(store.inner.is_empty());

    let stats = cycle.stats();
    assert_eq!(stats.failed_flushes.load(Ordering::Relaxed), 1);
    assert!(stats.last_error().is_some());
    assert_eq!(stats.phase(), FlushPhase::Idle);

    let outcome = cycle.run_once().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Committed {
            drained: 3,
            inserted: 3,
            deleted: 3
        }
    );
    assert_eq!(store.inner.len(), 3);
    assert_eq!(buffer.len().await.unwrap(), 0);
    assert!(stats.last_error().is_none());
}

#[tokio::test]
async fn failed_delete_is_absorbed_on_replay() {
    let buffer = Arc::new(StickyStagingBuffer::default());
    buffer.fail_deletes.store(true, Ordering::SeqCst);
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, ingestor) = cycle_over(buffer.clone(), store.clone());

    for idx in 0..4 {
        ingestor.ingest(reading("dev-2", 600, idx)).await.unwrap();
    }

    let outcome = cycle.run_once().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Committed {
            drained: 4,
            inserted: 4,
            deleted: 0
        }
    );
    assert_eq!(buffer.len().await.unwrap(), 4);
    assert_eq!(cycle.stats().delete_failures.load(Ordering::Relaxed), 4);

    buffer.fail_deletes.store(false, Ordering::SeqCst);
    let outcome = cycle.run_once().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Committed {
            drained: 4,
            inserted: 0,
            deleted: 4
        }
    );
    assert_eq!(store.len(), 4);
    assert_eq!(buffer.len().await.unwrap(), 0);
    assert_eq!(cycle.stats().duplicates_skipped.load(Ordering::Relaxed), 4);
}

#[tokio::test]
async fn large_backlog_drains_in_one_cycle() {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, ingestor) = cycle_over(buffer.clone(), store.clone());

    for idx in 0..2501 {
        ingestor.ingest(reading("dev-3", idx, idx % 50)).await.unwrap();
    }

    let outcome = cycle.run_once().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Committed {
            drained: 2501,
            inserted: 2501,
            deleted: 2501
        }
    );
    assert_eq!(buffer.len().await.unwrap(), 0);
    assert_eq!(store.len(), 2501);
    assert_eq!(cycle.run_once().await.unwrap(), FlushOutcome::Empty);

    // Oldest keys go first.
    let co2: Vec<i64> = store.readings().iter().map(|row| row.co2).collect();
    assert_eq!(co2, (0..2501i64).collect::<Vec<_>>());
}

#[tokio::test]
async fn scan_failure_is_reported() {
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, _) = cycle_over(Arc::new(FailingStagingBuffer), store.clone());

    let err = cycle.run_once().await.unwrap_err();
    assert!(matches!(err, PipelineError::BufferScanFailed(_)));
    assert!(store.is_empty());
    assert!(cycle.stats().last_error().is_some());
}

#[tokio::test]
async fn overlapping_cycle_is_skipped() {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(GatedReadingStore::default());
    let (cycle, ingestor) = cycle_over(buffer.clone(), store.clone());
    ingestor.ingest(reading("dev-4", 700, 70)).await.unwrap();

    let running = {
        let cycle = cycle.clone();
        tokio::spawn(async move { cycle.run_once().await })
    };
    store.entered.notified().await;
    assert_eq!(cycle.stats().phase(), FlushPhase::Committing);

    assert_eq!(cycle.run_once().await.unwrap(), FlushOutcome::Skipped);
    assert_eq!(cycle.stats().skipped_ticks.load(Ordering::Relaxed), 1);

    store.release.notify_one();
    let outcome = running.await.unwrap().unwrap();
    assert!(matches!(outcome, FlushOutcome::Committed { inserted: 1, .. }));
    assert_eq!(store.inner.len(), 1);
    assert_eq!(buffer.len().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingests_all_land_once() {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, ingestor) = cycle_over(buffer.clone(), store.clone());

    let mut tasks = Vec::new();
    for idx in 0..64 {
        let ingestor = ingestor.clone();
        tasks.push(tokio::spawn(async move {
            ingestor.ingest(reading("shared-dev", 400 + idx, 1)).await
        }));
    }
    let mut keys = HashSet::new();
    for task in tasks {
        keys.insert(task.await.unwrap().unwrap());
    }
    assert_eq!(keys.len(), 64);

    cycle.run_once().await.unwrap();
    assert_eq!(store.len(), 64);
    assert_eq!(buffer.len().await.unwrap(), 0);
}

#[tokio::test]
async fn service_flushes_remaining_entries_on_shutdown() {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, ingestor) = cycle_over(buffer.clone(), store.clone());

    let cancel = CancellationToken::new();
    let handle = FlushService::new(cycle, Duration::from_secs(3600)).start(cancel.clone());

    for idx in 0..5 {
        ingestor.ingest(reading("dev-5", idx, idx)).await.unwrap();
    }
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(store.len(), 5);
    assert_eq!(buffer.len().await.unwrap(), 0);
}

#[tokio::test]
async fn service_flushes_on_each_tick() {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(MemoryReadingStore::new());
    let (cycle, ingestor) = cycle_over(buffer.clone(), store.clone());

    let cancel = CancellationToken::new();
    let handle = FlushService::new(cycle, Duration::from_millis(20)).start(cancel.clone());

    ingestor.ingest(reading("dev-6", 450, 45)).await.unwrap();
    for _ in 0..100 {
        if store.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.len(), 1);

    cancel.cancel();
    handle.await.unwrap();
}
