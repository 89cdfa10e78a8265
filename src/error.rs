//! Custom error types for the crate.
//!
//! This module defines the primary error type, `BucketError`, together with the two
//! errors that cross component seams: `StorageError` for everything the Document Store
//! reports, and `IngestError` for an ingestion loop that stopped part way through.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidValue`**: a reading that is NaN or infinite. Local to that reading; the
//!   ingestion router skips it and counts it.
//! - **`UnorderedBoundaries`**, **`NonFiniteBoundary`**, **`TooFewBoundaries`**: a boundary
//!   set that cannot define intervals. Raised while building a `Boundaries` value, before
//!   any classification happens.
//! - **`Storage`**: any Document Store failure, propagated verbatim and never retried here.
//! - **`Ingest`**: a storage failure during ingestion, carrying the partial progress.
//! - **`SessionFailed`**: an ingestion session task that panicked or was aborted.
//! - **`Configuration`** / **`Config`**: semantic and parse errors in the configuration.

use crate::ingest::IngestReport;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type BucketResult<T> = std::result::Result<T, BucketError>;

/// Errors raised by classification, configuration, ingestion and retrieval.
#[derive(Error, Debug)]
pub enum BucketError {
    /// The value is NaN or infinite and maps to no bucket.
    #[error("Invalid reading value: {value}")]
    InvalidValue {
        /// The rejected value.
        value: f64,
    },

    /// A boundary is not strictly greater than the one before it.
    #[error("Boundaries must be strictly increasing: boundary {index} ({current}) follows {previous}")]
    UnorderedBoundaries {
        /// Position of the offending boundary.
        index: usize,
        /// The boundary preceding it.
        previous: f64,
        /// The offending boundary.
        current: f64,
    },

    /// A boundary is NaN or infinite.
    #[error("Boundary {index} is not a finite number: {value}")]
    NonFiniteBoundary {
        /// Position of the offending boundary.
        index: usize,
        /// The offending boundary.
        value: f64,
    },

    /// Fewer boundaries than the consumer needs to form an interval.
    #[error("At least {required} boundaries are required, got {actual}")]
    TooFewBoundaries {
        /// Minimum accepted count.
        required: usize,
        /// Count supplied.
        actual: usize,
    },

    /// Document Store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ingestion stopped on a storage failure after partial progress.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// An ingestion session task panicked or was aborted.
    #[error("Ingestion session '{location}' failed: {reason}")]
    SessionFailed {
        /// Location tag of the session.
        location: String,
        /// Join error text.
        reason: String,
    },

    /// Semantically invalid configuration.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for BucketError {
    fn from(value: figment::Error) -> Self {
        BucketError::Config(Box::new(value))
    }
}

/// Errors reported by a `DocumentStore` backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem failure in a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The partition name cannot be used by this backend.
    #[error("Invalid partition name '{0}'")]
    InvalidPartitionName(String),

    /// The aggregation pipeline is malformed.
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// No factory is registered for the requested backend.
    #[error("Unknown storage backend '{0}'")]
    UnknownBackend(String),

    /// Any other backend failure (connectivity, timeout, write conflict).
    #[error("Backend error: {0}")]
    Backend(String),
}

/// An ingestion loop aborted by a storage failure.
///
/// `report` holds everything that was inserted before the failure so callers can resume
/// from a known point.
#[derive(Error, Debug)]
#[error("Ingestion aborted after {} inserted records: {source}", .report.inserted)]
pub struct IngestError {
    /// Progress made before the failure.
    pub report: IngestReport,
    /// The storage failure that stopped the loop.
    #[source]
    pub source: StorageError,
}
