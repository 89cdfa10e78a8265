//! Canonical reading and record types.
//!
//! A `Reading` is what the ingestion router builds from a sampled value; it is never
//! stored as-is. A `Record` is the persisted form with the identifier the store assigns
//! on insertion. Both share one serialized shape:
//!
//! ```json
//! { "_id": "…", "value": 21.4, "location": "laboratory", "observedAt": "2024-05-01T12:00:00Z" }
//! ```
//!
//! All fields are mandatory. A stored document missing one fails to decode rather than
//! picking up a default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Store-assigned unique identifier of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A sampled value stamped with where and when it was consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Measured value.
    pub value: f64,
    /// Location tag of the producing sensor.
    pub location: String,
    /// Consumption time.
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    /// Create a reading.
    pub fn new(value: f64, location: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            location: location.into(),
            observed_at,
        }
    }
}

/// A reading as persisted in a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Identifier assigned at insertion.
    #[serde(rename = "_id")]
    pub id: RecordId,
    /// Measured value.
    pub value: f64,
    /// Location tag of the producing sensor.
    pub location: String,
    /// Consumption time of the original reading.
    pub observed_at: DateTime<Utc>,
}

impl Record {
    /// Attach an identifier to a reading.
    pub fn from_reading(id: RecordId, reading: &Reading) -> Self {
        Self {
            id,
            value: reading.value,
            location: reading.location.clone(),
            observed_at: reading.observed_at,
        }
    }

    /// The reading this record was created from.
    pub fn reading(&self) -> Reading {
        Reading::new(self.value, self.location.clone(), self.observed_at)
    }
}
