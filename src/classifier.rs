//! Value-range bucket classification.
//!
//! A boundary set `b1 < b2 < … < bn` splits the real line into `n + 1` half-open
//! intervals:
//!
//! | interval        | label       |
//! |-----------------|-------------|
//! | `(-inf, b1)`    | `lt_<b1>`   |
//! | `[b(i-1), bi)`  | `lt_<bi>`   |
//! | `[bn, +inf)`    | `gte_<bn>`  |
//!
//! A value equal to a boundary belongs to the interval starting at that boundary.
//! The same `Boundaries` type backs the aggregation pipeline, where only the closed
//! ranges `[bi, b(i+1))` are named and everything else falls into an overflow group.

use crate::error::{BucketError, BucketResult};
use serde::{Deserialize, Serialize};

/// Boundaries used by the ingestion path.
pub const INGESTION_BOUNDARIES: [f64; 3] = [0.0, 10.0, 20.0];

/// A validated, strictly increasing sequence of finite boundaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Boundaries(Vec<f64>);

impl Boundaries {
    /// Validate a boundary sequence.
    ///
    /// Fails with `TooFewBoundaries` when empty, `NonFiniteBoundary` for NaN or infinite
    /// entries and `UnorderedBoundaries` at the first entry not greater than its
    /// predecessor.
    pub fn new(values: Vec<f64>) -> BucketResult<Self> {
        Self::with_min_len(values, 1)
    }

    /// Validate a boundary sequence that must hold at least `required` entries.
    pub fn with_min_len(values: Vec<f64>, required: usize) -> BucketResult<Self> {
        if values.len() < required.max(1) {
            return Err(BucketError::TooFewBoundaries {
                required: required.max(1),
                actual: values.len(),
            });
        }
        for (index, &value) in values.iter().enumerate() {
            if !value.is_finite() {
                return Err(BucketError::NonFiniteBoundary { index, value });
            }
        }
        for (index, pair) in values.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(BucketError::UnorderedBoundaries {
                    index: index + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        Ok(Self(values))
    }

    /// The boundary values.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of boundaries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no boundaries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of boundaries `<= value`, which is the index of the open-ended interval
    /// holding `value` (0 for below the first boundary, `len()` for at or above the last).
    pub fn position(&self, value: f64) -> usize {
        self.0.partition_point(|b| *b <= value)
    }

    /// Index `i` of the closed range `[b(i), b(i+1))` holding `value`, or `None` when
    /// the value lies outside `[first, last)` or is NaN.
    pub fn range_index(&self, value: f64) -> Option<usize> {
        let first = *self.0.first()?;
        let last = *self.0.last()?;
        if !(value >= first && value < last) {
            return None;
        }
        Some(self.position(value) - 1)
    }

    /// Lower and upper bound of closed range `index`.
    pub fn range(&self, index: usize) -> Option<(f64, f64)> {
        let lower = *self.0.get(index)?;
        let upper = *self.0.get(index + 1)?;
        Some((lower, upper))
    }
}

impl<'de> Deserialize<'de> for Boundaries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values = Vec::<f64>::deserialize(deserializer)?;
        Boundaries::new(values).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<Vec<f64>> for Boundaries {
    type Error = BucketError;

    fn try_from(values: Vec<f64>) -> BucketResult<Self> {
        Boundaries::new(values)
    }
}

/// Maps values to bucket labels for a fixed boundary set.
#[derive(Debug, Clone)]
pub struct BucketClassifier {
    boundaries: Boundaries,
    labels: Vec<String>,
}

impl BucketClassifier {
    /// Build a classifier and precompute its labels.
    pub fn new(boundaries: Boundaries) -> Self {
        let values = boundaries.as_slice();
        let mut labels: Vec<String> = values.iter().map(|b| format!("lt_{b}")).collect();
        if let Some(last) = values.last() {
            labels.push(format!("gte_{last}"));
        }
        Self { boundaries, labels }
    }

    /// Classifier over `{0, 10, 20}` producing `lt_0`, `lt_10`, `lt_20`, `gte_20`.
    pub fn ingestion_default() -> Self {
        Self::new(Boundaries(INGESTION_BOUNDARIES.to_vec()))
    }

    /// Label of the interval holding `value`.
    pub fn classify(&self, value: f64) -> BucketResult<&str> {
        if !value.is_finite() {
            return Err(BucketError::InvalidValue { value });
        }
        Ok(&self.labels[self.boundaries.position(value)])
    }

    /// All labels in interval order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Label of interval `index`, if it exists.
    pub fn label_for_index(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// The boundaries this classifier was built from.
    pub fn boundaries(&self) -> &Boundaries {
        &self.boundaries
    }
}

impl Default for BucketClassifier {
    fn default() -> Self {
        Self::ingestion_default()
    }
}

/// One-shot classification against an unvalidated boundary slice.
///
/// Validates `boundaries` first, so an unordered set fails with `UnorderedBoundaries`
/// before any value is looked at.
pub fn classify(value: f64, boundaries: &[f64]) -> BucketResult<String> {
    let classifier = BucketClassifier::new(Boundaries::new(boundaries.to_vec())?);
    classifier.classify(value).map(str::to_owned)
}
