//! File-backed document store.
//!
//! Each partition is a newline-delimited JSON file `<data_dir>/<partition>.jsonl`
//! holding one `Record` per line, in insertion order. Appends go through a single
//! async mutex so concurrent sessions writing to the same partition never interleave
//! partial lines. Reads parse the whole file.
//!
//! A line only counts once its terminating newline is on disk. Readers ignore an
//! unterminated trailing fragment, and the next append truncates it before writing, so an
//! interrupted write never leaves a partition unreadable.

use crate::data::store::{DocumentStore, FindQuery, GroupResult, Pipeline};
use crate::error::StorageError;
use crate::reading::{Reading, Record, RecordId};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::io::SeekFrom;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

const EXTENSION: &str = "jsonl";

/// Document store persisting each partition as a JSON-lines file.
#[derive(Debug)]
pub struct JsonlStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "Opened JSONL document store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the partition files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_path(&self, partition: &str) -> Result<PathBuf, StorageError> {
        validate_partition_name(partition)?;
        Ok(self.root.join(format!("{partition}.{EXTENSION}")))
    }

    async fn load(&self, partition: &str) -> Result<Vec<Record>, StorageError> {
        let path = self.partition_path(partition)?;
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        committed_prefix(&contents)
            .split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(|line| serde_json::from_slice(line).map_err(StorageError::from))
            .collect()
    }
}

/// The newline-terminated part of a partition file.
fn committed_prefix(contents: &[u8]) -> &[u8] {
    match contents.iter().rposition(|b| *b == b'\n') {
        Some(last) => &contents[..=last],
        None => &[],
    }
}

/// Truncate an unterminated trailing fragment and return the committed length.
async fn discard_torn_tail(file: &mut File) -> Result<u64, StorageError> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }

    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut contents).await?;
    let committed = committed_prefix(&contents).len() as u64;
    file.set_len(committed).await?;
    tracing::warn!(discarded = len - committed, "Discarded torn trailing line");
    Ok(committed)
}

async fn write_line(file: &mut File, offset: u64, line: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(line).await?;
    file.flush().await
}

/// Partition names become file names, so only `[A-Za-z0-9_.-]` is accepted and a
/// leading dot is refused.
fn validate_partition_name(partition: &str) -> Result<(), StorageError> {
    let valid = !partition.is_empty()
        && !partition.starts_with('.')
        && partition
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPartitionName(partition.to_string()))
    }
}

#[async_trait]
impl DocumentStore for JsonlStore {
    fn backend(&self) -> &'static str {
        "jsonl"
    }

    async fn insert_one(
        &self,
        partition: &str,
        reading: &Reading,
    ) -> Result<RecordId, StorageError> {
        let path = self.partition_path(partition)?;
        let id = RecordId::generate();
        let mut line = serde_json::to_vec(&Record::from_reading(id, reading))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;
        let committed = discard_torn_tail(&mut file).await?;
        if let Err(e) = write_line(&mut file, committed, &line).await {
            // Roll back whatever part of the line reached the file
            if let Err(rollback) = file.set_len(committed).await {
                tracing::warn!(partition, error = %rollback, "Failed to roll back partial append");
            }
            return Err(e.into());
        }
        Ok(id)
    }

    async fn find(&self, partition: &str, query: &FindQuery) -> Result<Vec<Record>, StorageError> {
        Ok(query.apply(self.load(partition).await?))
    }

    async fn aggregate(
        &self,
        partition: &str,
        pipeline: &Pipeline,
    ) -> Result<Vec<GroupResult>, StorageError> {
        pipeline.evaluate(self.load(partition).await?)
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), StorageError> {
        let path = self.partition_path(partition)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_partitions(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if entry.metadata().await?.len() == 0 {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::{Sort, SortField};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        let id = {
            let store = JsonlStore::open(temp_dir.path()).await.unwrap();
            store
                .insert_one("temp_gte_20", &Reading::new(21.0, "lab", now))
                .await
                .unwrap()
        };

        let store = JsonlStore::open(temp_dir.path()).await.unwrap();
        let records = store.find("temp_gte_20", &FindQuery::new()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].observed_at, now);
    }

    #[tokio::test]
    async fn test_find_sorts_newest_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(temp_dir.path()).await.unwrap();
        let start = Utc::now();
        for i in 0..5 {
            let reading = Reading::new(i as f64, "lab", start + Duration::seconds(i));
            store.insert_one("p", &reading).await.unwrap();
        }

        let query = FindQuery::new()
            .with_sort(Sort::descending(SortField::ObservedAt))
            .with_limit(3);
        let values: Vec<f64> = store
            .find("p", &query)
            .await
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![4.0, 3.0, 2.0]);
    }

    #[tokio::test]
    async fn test_list_and_drop_partitions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(temp_dir.path()).await.unwrap();
        let reading = Reading::new(1.0, "lab", Utc::now());
        store.insert_one("temp_lt_10", &reading).await.unwrap();
        store.insert_one("temp_lt_0", &reading).await.unwrap();

        assert_eq!(
            store.list_partitions().await.unwrap(),
            vec!["temp_lt_0", "temp_lt_10"]
        );

        store.drop_partition("temp_lt_0").await.unwrap();
        store.drop_partition("temp_lt_0").await.unwrap();
        assert_eq!(store.list_partitions().await.unwrap(), vec!["temp_lt_10"]);
    }

    #[tokio::test]
    async fn test_path_like_partition_names_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(temp_dir.path()).await.unwrap();
        let reading = Reading::new(1.0, "lab", Utc::now());
        for name in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                store.insert_one(name, &reading).await,
                Err(StorageError::InvalidPartitionName(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_corrupt_line_surfaces_serialization_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(temp_dir.path()).await.unwrap();
        std::fs::write(temp_dir.path().join("p.jsonl"), "{not json}\n").unwrap();
        assert!(matches!(
            store.find("p", &FindQuery::new()).await,
            Err(StorageError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_ignored_and_repaired() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(temp_dir.path()).await.unwrap();
        let now = Utc::now();
        store
            .insert_one("temp_gte_20", &Reading::new(21.0, "lab", now))
            .await
            .unwrap();
        store
            .insert_one("temp_gte_20", &Reading::new(26.0, "lab", now))
            .await
            .unwrap();

        // Simulate an append cut off mid-record
        let path = temp_dir.path().join("temp_gte_20.jsonl");
        let mut contents = std::fs::read(&path).unwrap();
        contents.extend_from_slice(br#"{"_id":"5f0c"#);
        std::fs::write(&path, &contents).unwrap();

        let pipeline = Pipeline::new().bucket(
            crate::classifier::Boundaries::new(vec![20.0, 25.0, 30.0]).unwrap(),
            "other",
        );
        let groups = store.aggregate("temp_gte_20", &pipeline).await.unwrap();
        assert_eq!(groups.iter().map(|g| g.count).sum::<usize>(), 2);

        store
            .insert_one("temp_gte_20", &Reading::new(31.0, "lab", now))
            .await
            .unwrap();
        let query = FindQuery::new().with_sort(Sort::descending(SortField::Value));
        let values: Vec<f64> = store
            .find("temp_gte_20", &query)
            .await
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![31.0, 26.0, 21.0]);
        assert!(std::fs::read(&path).unwrap().ends_with(b"\n"));
    }
}
