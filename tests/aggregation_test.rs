//! Retrieval scenarios over partitions filled by the ingestion router.

use sensor_buckets::data::{DocumentStore, GroupKey, MemoryStore};
use sensor_buckets::ingest::IngestionRouter;
use sensor_buckets::retrieval::{flatten, AggregateQuery, RetrievalAggregator};
use sensor_buckets::sensor::{ReadingStream, Sensor};
use sensor_buckets::{AppConfig, Boundaries, BucketClassifier};
use std::collections::BTreeMap;
use std::sync::Arc;

async fn ingest_values(store: Arc<MemoryStore>, values: Vec<f64>) {
    let router = IngestionRouter::new(store, BucketClassifier::ingestion_default(), "temp_");
    let count = values.len();
    let mut stream = ReadingStream::from_values("laboratory", values);
    let report = router.ingest(&mut stream, count).await.unwrap();
    assert_eq!(report.inserted, count);
}

#[tokio::test]
async fn test_hot_partition_scenario() {
    let store = Arc::new(MemoryStore::new());
    ingest_values(store.clone(), vec![21.0, 24.0, 26.0, 40.0, 5.0]).await;

    let config = AppConfig::default();
    let query = AggregateQuery::from_config(&config.retrieval).unwrap();
    let groups = RetrievalAggregator::new(store)
        .aggregate_with(&config.retrieval.partition, &query)
        .await
        .unwrap();

    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0].key, GroupKey::Range { lower: 20.0, upper: 25.0 });
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[1].key, GroupKey::Range { lower: 25.0, upper: 30.0 });
    assert_eq!(groups[1].count, 1);
    assert_eq!(groups[2].label, "other");
    assert_eq!(groups[2].documents[0].value, 40.0);
    assert!(groups.iter().all(|g| g.count == g.documents.len()));
}

#[tokio::test]
async fn test_aggregate_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let router = IngestionRouter::new(store.clone(), BucketClassifier::ingestion_default(), "temp_");
    let mut stream = Sensor::new("laboratory").with_seed(11).readings();
    router.ingest(&mut stream, 100).await.unwrap();
    stream.shutdown().await;

    let aggregator = RetrievalAggregator::new(store);
    let boundaries = Boundaries::new(vec![20.0, 25.0, 30.0, 35.0]).unwrap();
    let membership = |groups: &[sensor_buckets::AggregationGroup]| {
        groups
            .iter()
            .map(|g| {
                let mut ids: Vec<_> = g.documents.iter().map(|r| r.id).collect();
                ids.sort();
                (g.label.clone(), ids)
            })
            .collect::<BTreeMap<_, _>>()
    };

    let first = aggregator.aggregate("temp_gte_20", &boundaries, 4, 20.0).await.unwrap();
    let second = aggregator.aggregate("temp_gte_20", &boundaries, 4, 20.0).await.unwrap();
    assert_eq!(membership(&first), membership(&second));
}

#[tokio::test]
async fn test_empty_partition_yields_no_groups() {
    let store = Arc::new(MemoryStore::new());
    ingest_values(store.clone(), vec![1.0, 2.0]).await;

    let boundaries = Boundaries::new(vec![20.0, 25.0]).unwrap();
    let groups = RetrievalAggregator::new(store)
        .aggregate("temp_gte_20", &boundaries, 4, 20.0)
        .await
        .unwrap();
    assert!(groups.is_empty());
    assert!(flatten(&groups).is_empty());
}

#[tokio::test]
async fn test_latest_returns_newest_ten() {
    let store = Arc::new(MemoryStore::new());
    let values: Vec<f64> = (0..25).map(|i| 20.0 + i as f64 * 0.5).collect();
    ingest_values(store.clone(), values).await;

    let latest = RetrievalAggregator::new(store.clone())
        .latest("temp_gte_20", 10)
        .await
        .unwrap();

    assert_eq!(latest.len(), 10);
    assert!(latest
        .windows(2)
        .all(|w| w[0].observed_at >= w[1].observed_at));
    let newest = latest[0].observed_at;
    let all = store
        .find("temp_gte_20", &Default::default())
        .await
        .unwrap();
    assert!(all.iter().all(|r| r.observed_at <= newest));
}

#[tokio::test]
async fn test_latest_on_small_partition_returns_everything() {
    let store = Arc::new(MemoryStore::new());
    ingest_values(store.clone(), vec![-1.0, -2.0, -3.0]).await;

    let latest = RetrievalAggregator::new(store)
        .latest("temp_lt_0", 10)
        .await
        .unwrap();
    assert_eq!(latest.len(), 3);
}
