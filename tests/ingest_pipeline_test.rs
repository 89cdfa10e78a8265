//! Integration tests for the ingestion path: sensor → router → store.

use async_trait::async_trait;
use sensor_buckets::data::{
    DocumentStore, FindQuery, GroupResult, JsonlStore, MemoryStore, Pipeline,
};
use sensor_buckets::error::StorageError;
use sensor_buckets::ingest::{IngestionRouter, StopReason};
use sensor_buckets::reading::{Reading, Record, RecordId};
use sensor_buckets::sensor::{ReadingStream, Sensor};
use sensor_buckets::{AppConfig, BucketClassifier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store that accepts `budget` inserts, then reports a write conflict.
struct FlakyStore {
    inner: MemoryStore,
    budget: usize,
    attempts: AtomicUsize,
}

impl FlakyStore {
    fn new(budget: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            budget,
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn insert_one(&self, partition: &str, reading: &Reading) -> Result<RecordId, StorageError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.budget {
            return Err(StorageError::Backend("write conflict".into()));
        }
        self.inner.insert_one(partition, reading).await
    }

    async fn find(&self, partition: &str, query: &FindQuery) -> Result<Vec<Record>, StorageError> {
        self.inner.find(partition, query).await
    }

    async fn aggregate(
        &self,
        partition: &str,
        pipeline: &Pipeline,
    ) -> Result<Vec<GroupResult>, StorageError> {
        self.inner.aggregate(partition, pipeline).await
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), StorageError> {
        self.inner.drop_partition(partition).await
    }

    async fn list_partitions(&self) -> Result<Vec<String>, StorageError> {
        self.inner.list_partitions().await
    }
}

async fn total_records(store: &dyn DocumentStore) -> usize {
    let mut total = 0;
    for partition in store.list_partitions().await.unwrap() {
        total += store.count(&partition).await.unwrap();
    }
    total
}

#[tokio::test]
async fn test_fifty_readings_are_inserted_and_producer_stops() {
    let store = Arc::new(MemoryStore::new());
    let router = IngestionRouter::from_config(store.clone(), &AppConfig::default()).unwrap();
    let mut stream = Sensor::new("laboratory").with_seed(42).readings();

    let report = router.ingest(&mut stream, 50).await.unwrap();

    assert_eq!(report.inserted, 50);
    assert_eq!(report.stop_reason, StopReason::LimitReached);
    assert_eq!(report.per_partition.values().sum::<usize>(), 50);
    assert_eq!(total_records(store.as_ref()).await, 50);

    let token = stream.cancellation_token().clone();
    let emitted = stream.shutdown().await;
    assert!(token.is_cancelled());
    assert!(emitted <= 51, "producer ran ahead: {emitted}");
}

#[tokio::test]
async fn test_partitions_only_hold_values_of_their_interval() {
    let store = Arc::new(MemoryStore::new());
    let router = IngestionRouter::new(store.clone(), BucketClassifier::ingestion_default(), "temp_");
    let mut stream = Sensor::new("laboratory").with_seed(3).readings();
    router.ingest(&mut stream, 200).await.unwrap();

    let ranges = [
        ("temp_lt_0", f64::NEG_INFINITY, 0.0),
        ("temp_lt_10", 0.0, 10.0),
        ("temp_lt_20", 10.0, 20.0),
        ("temp_gte_20", 20.0, f64::INFINITY),
    ];
    for (partition, lower, upper) in ranges {
        for record in store.find(partition, &FindQuery::new()).await.unwrap() {
            assert!(
                record.value >= lower && record.value < upper,
                "{} in {partition}",
                record.value
            );
        }
    }

    let partitions = store.list_partitions().await.unwrap();
    assert!(partitions.iter().all(|p| router.partitions().contains(p)));
}

#[tokio::test]
async fn test_storage_failure_reports_partial_progress() {
    let store = Arc::new(FlakyStore::new(7));
    let router = IngestionRouter::new(store.clone(), BucketClassifier::ingestion_default(), "temp_");
    let mut stream = Sensor::new("laboratory").readings();

    let err = router.ingest(&mut stream, 50).await.unwrap_err();

    assert_eq!(err.report.inserted, 7);
    assert_eq!(err.report.stop_reason, StopReason::StorageFailure);
    assert!(matches!(err.source, StorageError::Backend(_)));
    // No retry after the failure
    assert_eq!(store.attempts.load(Ordering::SeqCst), 8);
    assert_eq!(total_records(store.as_ref()).await, 7);
}

#[tokio::test]
async fn test_cancel_mid_stream_stops_writes() {
    let store = Arc::new(MemoryStore::new());
    let router = IngestionRouter::new(store.clone(), BucketClassifier::ingestion_default(), "temp_");
    let mut stream = Sensor::new("laboratory")
        .with_interval(Duration::from_millis(10))
        .readings();

    let token = router.cancellation_token().clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(35)).await;
        token.cancel();
    });

    let report = router.ingest(&mut stream, 1_000).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert!(report.inserted < 1_000);
    assert_eq!(total_records(store.as_ref()).await, report.inserted);
}

#[tokio::test]
async fn test_jsonl_store_persists_across_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();

    let inserted = {
        let store = Arc::new(JsonlStore::open(temp_dir.path()).await.unwrap());
        let router = IngestionRouter::new(store, BucketClassifier::ingestion_default(), "temp_");
        let mut stream = ReadingStream::from_values("laboratory", vec![-3.0, 4.0, 15.0, 22.0, 38.5]);
        router.ingest(&mut stream, 5).await.unwrap().inserted
    };
    assert_eq!(inserted, 5);

    let reopened = JsonlStore::open(temp_dir.path()).await.unwrap();
    assert_eq!(
        reopened.list_partitions().await.unwrap(),
        vec!["temp_gte_20", "temp_lt_0", "temp_lt_10", "temp_lt_20"]
    );
    let hot = reopened.find("temp_gte_20", &FindQuery::new()).await.unwrap();
    let values: Vec<f64> = hot.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![22.0, 38.5]);
}
