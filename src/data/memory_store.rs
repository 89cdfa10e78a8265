//! In-memory document store.
//!
//! Partitions live in a map behind a `parking_lot::RwLock`. Each partition keeps its
//! records in insertion order, which is the "storage order" every query falls back to.
//! No lock is held across an await point.

use crate::data::store::{DocumentStore, FindQuery, GroupResult, Pipeline};
use crate::error::StorageError;
use crate::reading::{Reading, Record, RecordId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Document store that keeps every partition in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, partition: &str) -> Vec<Record> {
        self.partitions
            .read()
            .get(partition)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert_one(
        &self,
        partition: &str,
        reading: &Reading,
    ) -> Result<RecordId, StorageError> {
        if partition.is_empty() {
            return Err(StorageError::InvalidPartitionName(partition.to_string()));
        }
        let id = RecordId::generate();
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default()
            .push(Record::from_reading(id, reading));
        Ok(id)
    }

    async fn find(&self, partition: &str, query: &FindQuery) -> Result<Vec<Record>, StorageError> {
        Ok(query.apply(self.snapshot(partition)))
    }

    async fn aggregate(
        &self,
        partition: &str,
        pipeline: &Pipeline,
    ) -> Result<Vec<GroupResult>, StorageError> {
        pipeline.evaluate(self.snapshot(partition))
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), StorageError> {
        self.partitions.write().remove(partition);
        Ok(())
    }

    async fn list_partitions(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .partitions
            .read()
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn count(&self, partition: &str) -> Result<usize, StorageError> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .map_or(0, Vec::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_partition_created_on_first_insert() {
        let store = MemoryStore::new();
        assert!(store.list_partitions().await.unwrap().is_empty());

        let reading = Reading::new(4.0, "lab", Utc::now());
        let id = store.insert_one("temp_lt_10", &reading).await.unwrap();

        let records = store.find("temp_lt_10", &FindQuery::new()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].value, 4.0);
        assert_eq!(store.list_partitions().await.unwrap(), vec!["temp_lt_10"]);
    }

    #[tokio::test]
    async fn test_missing_partition_is_empty() {
        let store = MemoryStore::new();
        assert!(store.find("nope", &FindQuery::new()).await.unwrap().is_empty());
        assert_eq!(store.count("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = MemoryStore::new();
        let reading = Reading::new(1.0, "lab", Utc::now());
        let a = store.insert_one("p", &reading).await.unwrap();
        let b = store.insert_one("p", &reading).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_drop_partition() {
        let store = MemoryStore::new();
        let reading = Reading::new(1.0, "lab", Utc::now());
        store.insert_one("p", &reading).await.unwrap();
        store.drop_partition("p").await.unwrap();
        store.drop_partition("p").await.unwrap();
        assert_eq!(store.count("p").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_partition_name_rejected() {
        let store = MemoryStore::new();
        let reading = Reading::new(1.0, "lab", Utc::now());
        assert!(matches!(
            store.insert_one("", &reading).await,
            Err(StorageError::InvalidPartitionName(_))
        ));
    }
}
