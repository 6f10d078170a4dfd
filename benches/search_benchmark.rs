// Filter rendering and queue flush benchmarks
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use twin_search_sync::search::{
    fields, DocumentQueue, HealthMonitor, MemoryBackend, QueryBuilder, SearchDocument,
    StaleDocumentSweeper,
};

fn filter_rendering(c: &mut Criterion) {
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    c.bench_function("stale_filter", |b| {
        b.iter(|| StaleDocumentSweeper::stale_filter(black_box("twin"), black_box(cutoff)))
    });

    let mut group = c.benchmark_group("search_in");
    for count in [1usize, 10, 100].iter() {
        let values: Vec<String> = (0..*count).map(|i| format!("site-{}", i)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &values, |b, values| {
            b.iter(|| {
                QueryBuilder::create()
                    .filter_equal(fields::TYPE, "twin")
                    .and_then(|q| q.and().search_in(fields::SITE_ID, values.iter()))
                    .map(|q| q.get_query())
            })
        });
    }
    group.finish();
}

fn queue_flush(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_flush");

    for batch in [10usize, 200].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            let backend = Arc::new(MemoryBackend::with_index("unified"));
            let queue = DocumentQueue::new(backend, "unified", Arc::new(HealthMonitor::new()))
                .with_batch_size(batch + 1);
            let cancel = CancellationToken::new();
            let (queue, cancel) = (&queue, &cancel);

            b.to_async(&rt).iter(|| async move {
                for i in 0..batch {
                    let doc = SearchDocument::new("twin", format!("T{}", i), 50);
                    queue.upload(doc, cancel).await.unwrap();
                }
                black_box(queue.flush(cancel).await.unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, filter_rendering, queue_flush);
criterion_main!(benches);
