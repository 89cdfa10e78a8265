//! # Sensor Buckets Core Library
//!
//! Sensor readings stored with the bucket pattern: each reading is classified by value
//! into one of a fixed set of half-open intervals and written to the partition named after
//! that interval. A retrieval side re-groups a partition into finer, caller-chosen ranges.
//!
//! ## Crate Structure
//!
//! - **`sensor`**: simulated sensors and the cancellable `ReadingStream` they produce.
//! - **`classifier`**: validated `Boundaries` and the `BucketClassifier` mapping a value to
//!   its label (`lt_0`, `lt_10`, `lt_20`, `gte_20` by default).
//! - **`ingest`**: the `IngestionRouter`, which pulls readings, classifies them and writes one
//!   record per reading, plus concurrent `IngestSession`s.
//! - **`retrieval`**: the `RetrievalAggregator` with range grouping and newest-first queries.
//! - **`data`**: the `DocumentStore` seam, its query and pipeline vocabulary, and the
//!   in-memory and JSON-lines backends.
//! - **`reading`**: the canonical `Reading` and `Record` types.
//! - **`config`**: layered configuration loaded with figment.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: `BucketError`, `StorageError` and `IngestError`.

pub mod classifier;
pub mod config;
pub mod data;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod reading;
pub mod retrieval;
pub mod sensor;

pub use classifier::{classify, Boundaries, BucketClassifier};
pub use config::AppConfig;
pub use data::{DocumentStore, JsonlStore, MemoryStore, StoreRegistry};
pub use error::{BucketError, BucketResult, IngestError, StorageError};
pub use ingest::{run_sessions, IngestReport, IngestSession, IngestionRouter, StopReason};
pub use reading::{Reading, Record, RecordId};
pub use retrieval::{AggregateQuery, AggregationGroup, RetrievalAggregator};
pub use sensor::{ReadingStream, Sensor};
