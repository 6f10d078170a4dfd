//! Document queue behavior against the in-memory backend

mod common;

use common::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use twin_search_sync::search::{
    ActionKind, CallKind, DocumentQueue, HealthState, SearchError, DEFAULT_BATCH_SIZE,
};

fn queue(backend: &Arc<twin_search_sync::search::MemoryBackend>) -> Arc<DocumentQueue> {
    Arc::new(DocumentQueue::new(backend.clone(), INDEX, health()).with_retry_policy(fast_retry()))
}

#[tokio::test]
async fn test_batch_size_triggers_a_single_flush() {
    let backend = seeded_backend(vec![]).await;
    let queue = queue(&backend);
    let cancel = CancellationToken::new();

    for i in 0..DEFAULT_BATCH_SIZE - 1 {
        queue.upload(twin(&format!("T{}", i)), &cancel).await.unwrap();
    }
    assert_eq!(backend.count_calls(CallKind::IndexDocuments), 0);
    assert_eq!(queue.pending_len(), DEFAULT_BATCH_SIZE - 1);

    queue.upload(twin("last"), &cancel).await.unwrap();

    let batches = backend.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), DEFAULT_BATCH_SIZE);
    assert_eq!(queue.pending_len(), 0);
    assert_eq!(queue.stats().inserted, DEFAULT_BATCH_SIZE as u64);
    assert_eq!(backend.document_count(INDEX), DEFAULT_BATCH_SIZE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_lose_nothing() {
    let backend = seeded_backend(vec![]).await;
    let queue = Arc::new(
        DocumentQueue::new(backend.clone(), INDEX, health())
            .with_batch_size(25)
            .with_retry_policy(fast_retry()),
    );
    backend.set_latency(Duration::from_millis(2));
    let cancel = CancellationToken::new();

    let producers: Vec<_> = (0..8)
        .map(|p| {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for i in 0..40 {
                    queue
                        .upload(twin(&format!("P{}-{}", p, i)), &cancel)
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    let result = queue.flush(&cancel).await.unwrap();
    assert_eq!(result.pending, 0);
    assert_eq!(result.inserted, 320);
    assert_eq!(result.failed, 0);

    let mut seen = HashSet::new();
    for batch in backend.batches() {
        for (kind, key) in batch {
            assert_eq!(kind, ActionKind::MergeOrUpload);
            assert!(seen.insert(key), "key submitted twice");
        }
    }
    assert_eq!(seen.len(), 320);
    assert_eq!(backend.document_count(INDEX), 320);
}

#[tokio::test]
async fn test_concurrent_flushes_submit_each_action_once() {
    let backend = seeded_backend(vec![]).await;
    let queue = queue(&backend);
    backend.set_latency(Duration::from_millis(5));
    let cancel = CancellationToken::new();

    for i in 0..10 {
        queue.upload(twin(&format!("T{}", i)), &cancel).await.unwrap();
    }

    let (a, b) = tokio::join!(queue.flush(&cancel), queue.flush(&cancel));
    a.unwrap();
    b.unwrap();

    assert_eq!(backend.count_calls(CallKind::IndexDocuments), 1);
    assert_eq!(queue.stats().inserted, 10);
}

#[tokio::test]
async fn test_counters_only_grow() {
    let backend = seeded_backend(vec![twin("old")]).await;
    let queue = queue(&backend);
    let cancel = CancellationToken::new();

    queue.upload(twin("new"), &cancel).await.unwrap();
    queue.delete(twin("old"), &cancel).await.unwrap();
    let first = queue.flush(&cancel).await.unwrap();
    assert_eq!((first.inserted, first.deleted, first.failed), (1, 1, 0));

    backend.fail_next(
        CallKind::IndexDocuments,
        SearchError::from_status("index documents", 500, "boom"),
    );
    queue.upload(twin("lost"), &cancel).await.unwrap();
    let second = queue.flush(&cancel).await.unwrap();

    assert_eq!(second.inserted, first.inserted);
    assert_eq!(second.deleted, first.deleted);
    assert_eq!(second.failed, 1);
    assert!(backend.document("unified", &twin("lost").key).is_none());
}

#[tokio::test]
async fn test_rate_limit_recovers_to_healthy() {
    let backend = seeded_backend(vec![]).await;
    let health = health();
    let queue = DocumentQueue::new(backend.clone(), INDEX, health.clone())
        .with_retry_policy(fast_retry());
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        backend.fail_next(
            CallKind::IndexDocuments,
            SearchError::from_status("index documents", 429, "slow down"),
        );
    }
    queue.upload(twin("a"), &cancel).await.unwrap();
    let result = queue.flush(&cancel).await.unwrap();

    assert_eq!(result.inserted, 1);
    assert_eq!(backend.count_calls(CallKind::IndexDocuments), 3);
    assert_eq!(health.get(), HealthState::Healthy);
}

#[tokio::test]
async fn test_retries_exhausted_is_returned() {
    let backend = seeded_backend(vec![]).await;
    let health = health();
    let queue = DocumentQueue::new(backend.clone(), INDEX, health.clone())
        .with_retry_policy(fast_retry());
    let cancel = CancellationToken::new();

    for _ in 0..4 {
        backend.fail_next(
            CallKind::IndexDocuments,
            SearchError::from_status("index documents", 429, "slow down"),
        );
    }
    queue.upload(twin("a"), &cancel).await.unwrap();
    let err = queue.flush(&cancel).await.unwrap_err();

    assert!(matches!(err, SearchError::RetriesExhausted { .. }));
    assert!(matches!(health.get(), HealthState::Unhealthy(_)));
    assert_eq!(queue.stats().failed, 1);
}
