//! Document Store seam.
//!
//! The store is an external collaborator: it owns partitions (named collections of
//! `Record`s), assigns record identifiers, and answers `find` and `aggregate` queries.
//! This module defines the trait every backend implements together with the query and
//! pipeline vocabulary. Pipeline evaluation over an in-memory record list lives here too
//! so every backend produces identical groups.

use crate::classifier::Boundaries;
use crate::error::StorageError;
use crate::reading::{Reading, Record, RecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asynchronous document store holding one collection per partition.
///
/// Partitions are created implicitly by the first `insert_one`. Querying a partition
/// that does not exist behaves like querying an empty one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend identifier (e.g. "memory", "jsonl").
    fn backend(&self) -> &'static str;

    /// Persist one reading and return the identifier assigned to it.
    async fn insert_one(&self, partition: &str, reading: &Reading)
        -> Result<RecordId, StorageError>;

    /// Records matching `query`, in storage order unless the query sorts.
    async fn find(&self, partition: &str, query: &FindQuery) -> Result<Vec<Record>, StorageError>;

    /// Run an aggregation pipeline over a partition.
    async fn aggregate(
        &self,
        partition: &str,
        pipeline: &Pipeline,
    ) -> Result<Vec<GroupResult>, StorageError>;

    /// Remove a partition and all its records. Dropping a missing partition succeeds.
    async fn drop_partition(&self, partition: &str) -> Result<(), StorageError>;

    /// Names of all partitions holding at least one record, sorted.
    async fn list_partitions(&self) -> Result<Vec<String>, StorageError>;

    /// Number of records in a partition.
    async fn count(&self, partition: &str) -> Result<usize, StorageError> {
        Ok(self.find(partition, &FindQuery::new()).await?.len())
    }
}

// =============================================================================
// Filters and sorting
// =============================================================================

/// A filter condition on record fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `value > x`
    ValueGt(f64),
    /// `value >= x`
    ValueGte(f64),
    /// `value < x`
    ValueLt(f64),
    /// `value <= x`
    ValueLte(f64),
    /// `location == x`
    LocationEq(String),
    /// `observedAt > x`
    ObservedAfter(DateTime<Utc>),
    /// All sub-filters match.
    And(Vec<Filter>),
}

impl Filter {
    /// Check whether a record satisfies this filter.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::ValueGt(x) => record.value > *x,
            Self::ValueGte(x) => record.value >= *x,
            Self::ValueLt(x) => record.value < *x,
            Self::ValueLte(x) => record.value <= *x,
            Self::LocationEq(location) => record.location == *location,
            Self::ObservedAfter(at) => record.observed_at > *at,
            Self::And(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

/// Sortable record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    /// Sort by `value`.
    Value,
    /// Sort by `observedAt`.
    ObservedAt,
}

/// Sort specification. Sorting is stable, so ties keep storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// Field to sort by.
    pub field: SortField,
    /// Largest first when true.
    pub descending: bool,
}

impl Sort {
    /// Ascending sort on `field`.
    pub fn ascending(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    /// Descending sort on `field`.
    pub fn descending(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    /// Sort `records` in place.
    pub fn apply(&self, records: &mut [Record]) {
        records.sort_by(|a, b| {
            let ordering = match self.field {
                SortField::Value => a.value.total_cmp(&b.value),
                SortField::ObservedAt => a.observed_at.cmp(&b.observed_at),
            };
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

/// A `find` query: filter, then sort, then limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindQuery {
    /// Optional filter.
    pub filter: Option<Filter>,
    /// Optional sort.
    pub sort: Option<Sort>,
    /// Maximum number of records returned.
    pub limit: Option<usize>,
}

impl FindQuery {
    /// Match everything in storage order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add sorting.
    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Add limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply this query to a partition's records.
    pub fn apply(&self, mut records: Vec<Record>) -> Vec<Record> {
        if let Some(filter) = &self.filter {
            records.retain(|r| filter.matches(r));
        }
        if let Some(sort) = &self.sort {
            sort.apply(&mut records);
        }
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}

// =============================================================================
// Aggregation pipeline
// =============================================================================

/// Identifies a group produced by a bucket stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupKey {
    /// Half-open range `[lower, upper)`.
    Range {
        /// Inclusive lower bound.
        lower: f64,
        /// Exclusive upper bound.
        upper: f64,
    },
    /// Overflow group for values outside every declared range.
    Default(String),
}

impl GroupKey {
    /// Whether this is the overflow group.
    pub fn is_default(&self) -> bool {
        matches!(self, GroupKey::Default(_))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Range { lower, upper } => write!(f, "[{lower}, {upper})"),
            GroupKey::Default(label) => f.write_str(label),
        }
    }
}

/// One group of a bucket stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    /// Which range (or overflow) this group covers.
    pub key: GroupKey,
    /// Number of records in the group.
    pub count: usize,
    /// The grouped records in storage order.
    pub documents: Vec<Record>,
}

/// Groups records by `value` into the ranges of `boundaries`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStage {
    /// Range edges; at least two.
    pub boundaries: Boundaries,
    /// Label of the overflow group.
    pub default_label: String,
}

impl BucketStage {
    /// Split `records` into groups.
    ///
    /// Only non-empty groups are emitted: ranges in ascending order, then the overflow
    /// group.
    pub fn group(&self, records: Vec<Record>) -> Vec<GroupResult> {
        let ranges = self.boundaries.len().saturating_sub(1);
        let mut buckets: Vec<Vec<Record>> = (0..ranges).map(|_| Vec::new()).collect();
        let mut overflow = Vec::new();

        for record in records {
            match self.boundaries.range_index(record.value) {
                Some(index) => buckets[index].push(record),
                None => overflow.push(record),
            }
        }

        let mut groups: Vec<GroupResult> = buckets
            .into_iter()
            .enumerate()
            .filter(|(_, documents)| !documents.is_empty())
            .filter_map(|(index, documents)| {
                let (lower, upper) = self.boundaries.range(index)?;
                Some(GroupResult {
                    key: GroupKey::Range { lower, upper },
                    count: documents.len(),
                    documents,
                })
            })
            .collect();

        if !overflow.is_empty() {
            groups.push(GroupResult {
                key: GroupKey::Default(self.default_label.clone()),
                count: overflow.len(),
                documents: overflow,
            });
        }
        groups
    }
}

/// A pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stage {
    /// Keep matching records.
    Match(Filter),
    /// Reorder records.
    Sort(Sort),
    /// Keep the first N records, or the first N groups after a bucket stage.
    Limit(usize),
    /// Group records into ranges.
    Bucket(BucketStage),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Bucket(_) => "$bucket",
        }
    }
}

/// Ordered list of stages ending in groups.
///
/// Stages run in declaration order. Exactly one `Bucket` stage is required; after it
/// only `Limit` may appear, and it then caps the number of groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a match stage.
    pub fn match_filter(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    /// Append a sort stage.
    pub fn sort(mut self, sort: Sort) -> Self {
        self.stages.push(Stage::Sort(sort));
        self
    }

    /// Append a limit stage.
    pub fn limit(mut self, limit: usize) -> Self {
        self.stages.push(Stage::Limit(limit));
        self
    }

    /// Append a bucket stage.
    pub fn bucket(mut self, boundaries: Boundaries, default_label: impl Into<String>) -> Self {
        self.stages.push(Stage::Bucket(BucketStage {
            boundaries,
            default_label: default_label.into(),
        }));
        self
    }

    /// The stages in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Evaluate against a partition's records (storage order).
    pub fn evaluate(&self, mut records: Vec<Record>) -> Result<Vec<GroupResult>, StorageError> {
        let mut groups: Option<Vec<GroupResult>> = None;

        for stage in &self.stages {
            if let Some(grouped) = groups.as_mut() {
                match stage {
                    Stage::Limit(limit) => grouped.truncate(*limit),
                    other => {
                        return Err(StorageError::InvalidPipeline(format!(
                            "{} cannot follow $bucket",
                            other.name()
                        )))
                    }
                }
                continue;
            }

            match stage {
                Stage::Match(filter) => records.retain(|r| filter.matches(r)),
                Stage::Sort(sort) => sort.apply(&mut records),
                Stage::Limit(limit) => records.truncate(*limit),
                Stage::Bucket(bucket) => {
                    if bucket.boundaries.len() < 2 {
                        return Err(StorageError::InvalidPipeline(
                            "$bucket needs at least two boundaries".into(),
                        ));
                    }
                    groups = Some(bucket.group(std::mem::take(&mut records)));
                }
            }
        }

        groups.ok_or_else(|| StorageError::InvalidPipeline("pipeline has no $bucket stage".into()))
    }
}
