//! Retrieval aggregator: re-bucketing queries over one partition.
//!
//! `aggregate` compiles to a three stage pipeline run by the store:
//!
//! 1. match `value > min_value`
//! 2. bucket by the caller's boundaries with a single overflow group
//! 3. keep at most `result_limit` groups
//!
//! The group cap applies to groups, never to the documents feeding them. Empty ranges
//! produce no group. `latest` is an independent newest-first lookup.

use crate::classifier::Boundaries;
use crate::config::RetrievalConfig;
use crate::data::store::{
    DocumentStore, Filter, FindQuery, GroupKey, GroupResult, Pipeline, Sort, SortField,
};
use crate::error::{BucketError, BucketResult};
use crate::reading::Record;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Label of the overflow group unless configured otherwise.
pub const DEFAULT_OVERFLOW_LABEL: &str = "other";

/// Boundaries needed to form at least one closed range.
pub const MIN_AGGREGATION_BOUNDARIES: usize = 2;

/// Parameters of one aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateQuery {
    /// Range edges; at least two.
    pub boundaries: Boundaries,
    /// Maximum number of groups returned.
    pub result_limit: usize,
    /// Only values strictly above this are grouped.
    pub min_value: f64,
    /// Label of the overflow group.
    pub default_label: String,
}

impl AggregateQuery {
    /// Query with the default overflow label.
    pub fn new(boundaries: Boundaries, result_limit: usize, min_value: f64) -> Self {
        Self {
            boundaries,
            result_limit,
            min_value,
            default_label: DEFAULT_OVERFLOW_LABEL.to_string(),
        }
    }

    /// Query described by the retrieval config section.
    pub fn from_config(config: &RetrievalConfig) -> BucketResult<Self> {
        Ok(Self {
            boundaries: config.boundaries()?,
            result_limit: config.result_limit,
            min_value: config.min_value,
            default_label: config.default_label.clone(),
        })
    }

    /// Use a different overflow label.
    pub fn with_default_label(mut self, label: impl Into<String>) -> Self {
        self.default_label = label.into();
        self
    }

    /// Check the query can form at least one range.
    pub fn validate(&self) -> BucketResult<()> {
        if self.boundaries.len() < MIN_AGGREGATION_BOUNDARIES {
            return Err(BucketError::TooFewBoundaries {
                required: MIN_AGGREGATION_BOUNDARIES,
                actual: self.boundaries.len(),
            });
        }
        Ok(())
    }

    /// The store pipeline implementing this query.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new()
            .match_filter(Filter::ValueGt(self.min_value))
            .bucket(self.boundaries.clone(), self.default_label.clone())
            .limit(self.result_limit)
    }
}

/// One group returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationGroup {
    /// `[lower, upper)` for a range group, the overflow label otherwise.
    pub label: String,
    /// Structured form of `label`.
    pub key: GroupKey,
    /// Number of records in the group.
    pub count: usize,
    /// The grouped records in storage order.
    pub documents: Vec<Record>,
}

impl From<GroupResult> for AggregationGroup {
    fn from(group: GroupResult) -> Self {
        Self {
            label: group.key.to_string(),
            key: group.key,
            count: group.count,
            documents: group.documents,
        }
    }
}

/// Read side of the bucket pattern.
#[derive(Clone)]
pub struct RetrievalAggregator {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for RetrievalAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalAggregator")
            .field("store", &self.store.backend())
            .finish()
    }
}

impl RetrievalAggregator {
    /// Aggregator reading from `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Group the records of `partition` with a value above `min_value` into the ranges
    /// of `boundaries`, returning at most `result_limit` groups.
    ///
    /// A missing or empty partition yields no groups. Store failures surface unchanged.
    pub async fn aggregate(
        &self,
        partition: &str,
        boundaries: &Boundaries,
        result_limit: usize,
        min_value: f64,
    ) -> BucketResult<Vec<AggregationGroup>> {
        let query = AggregateQuery::new(boundaries.clone(), result_limit, min_value);
        self.aggregate_with(partition, &query).await
    }

    /// `aggregate` with every parameter taken from `query`.
    ///
    /// Fails with `TooFewBoundaries` before touching the store when `query` holds fewer
    /// than two boundaries.
    #[instrument(skip(self, query), fields(limit = query.result_limit, min = query.min_value))]
    pub async fn aggregate_with(
        &self,
        partition: &str,
        query: &AggregateQuery,
    ) -> BucketResult<Vec<AggregationGroup>> {
        query.validate()?;
        let groups = self.store.aggregate(partition, &query.pipeline()).await?;
        debug!(groups = groups.len(), "Aggregation complete");
        Ok(groups.into_iter().map(AggregationGroup::from).collect())
    }

    /// The `limit` newest records of `partition`, `observedAt` descending.
    #[instrument(skip(self))]
    pub async fn latest(&self, partition: &str, limit: usize) -> BucketResult<Vec<Record>> {
        let query = FindQuery::new()
            .with_sort(Sort::descending(SortField::ObservedAt))
            .with_limit(limit);
        let records = self.store.find(partition, &query).await?;
        debug!(returned = records.len(), "Latest records fetched");
        Ok(records)
    }
}

/// Every document of `groups`, group by group.
pub fn flatten(groups: &[AggregationGroup]) -> Vec<&Record> {
    groups.iter().flat_map(|g| g.documents.iter()).collect()
}
