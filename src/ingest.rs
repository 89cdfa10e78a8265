//! Ingestion router: stream → classify → partition write.
//!
//! For every value pulled from a `ReadingStream` the router stamps the consumption time,
//! classifies the value, and inserts one record into the partition
//! `<prefix><label>`. Writes are sequential, one per reading, so records from one
//! session land in consumption order. Partitions are created by the store on first write.
//!
//! Failure handling:
//! - a non-finite value is skipped, logged and counted in `skipped_invalid`
//! - the first storage failure ends the loop; the caller gets an `IngestError` carrying
//!   the progress made so far
//!
//! Cancellation is checked before every pull and again before every write, so no
//! storage call starts after cancellation has been observed.

use crate::classifier::BucketClassifier;
use crate::config::AppConfig;
use crate::data::store::DocumentStore;
use crate::error::{BucketError, BucketResult, IngestError};
use crate::reading::Reading;
use crate::sensor::{ReadingStream, Sensor};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why an ingestion loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `max_count` records were inserted.
    #[default]
    LimitReached,
    /// The stream ended.
    SourceExhausted,
    /// The session was cancelled.
    Cancelled,
    /// A write failed; see the accompanying `IngestError`.
    StorageFailure,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::LimitReached => "limit reached",
            StopReason::SourceExhausted => "source exhausted",
            StopReason::Cancelled => "cancelled",
            StopReason::StorageFailure => "storage failure",
        };
        f.write_str(text)
    }
}

/// Progress of one ingestion loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Location tag of the stream.
    pub location: String,
    /// Records successfully inserted.
    pub inserted: usize,
    /// Readings rejected by the classifier (NaN or infinite).
    pub skipped_invalid: usize,
    /// Inserted records per partition.
    pub per_partition: BTreeMap<String, usize>,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
}

/// Routes readings into bucket partitions of a document store.
#[derive(Clone)]
pub struct IngestionRouter {
    store: Arc<dyn DocumentStore>,
    classifier: Arc<BucketClassifier>,
    prefix: String,
    cancel: CancellationToken,
}

impl fmt::Debug for IngestionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionRouter")
            .field("store", &self.store.backend())
            .field("labels", &self.classifier.labels())
            .field("prefix", &self.prefix)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl IngestionRouter {
    /// Router writing to partitions `<prefix><label>`.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        classifier: BucketClassifier,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            classifier: Arc::new(classifier),
            prefix: prefix.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Router built from the ingestion and storage sections of `config`.
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &AppConfig) -> BucketResult<Self> {
        Ok(Self::new(
            store,
            config.ingestion.classifier()?,
            config.storage.partition_prefix.clone(),
        ))
    }

    /// Copy of this router observing `cancel` instead of its own token.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Token observed by `ingest`.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The classifier in use.
    pub fn classifier(&self) -> &BucketClassifier {
        &self.classifier
    }

    /// Every partition this router can write to, in interval order.
    pub fn partitions(&self) -> Vec<String> {
        self.classifier
            .labels()
            .iter()
            .map(|label| format!("{}{}", self.prefix, label))
            .collect()
    }

    /// Partition a value would be written to.
    pub fn partition_for(&self, value: f64) -> BucketResult<String> {
        let label = self.classifier.classify(value)?;
        Ok(format!("{}{}", self.prefix, label))
    }

    /// Pull from `stream` until `max_count` records are inserted, the stream ends, or the
    /// router's token is cancelled.
    ///
    /// The stream is left running; dropping it or calling `shutdown` stops its producer.
    #[instrument(skip(self, stream), fields(location = %stream.location()))]
    pub async fn ingest(
        &self,
        stream: &mut ReadingStream,
        max_count: usize,
    ) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport {
            location: stream.location().to_string(),
            ..IngestReport::default()
        };

        loop {
            if report.inserted >= max_count {
                report.stop_reason = StopReason::LimitReached;
                break;
            }

            let value = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.stop_reason = StopReason::Cancelled;
                    break;
                }
                next = stream.next() => match next {
                    Some(value) => value,
                    None => {
                        report.stop_reason = StopReason::SourceExhausted;
                        break;
                    }
                },
            };
            let observed_at = Utc::now();

            let partition = match self.partition_for(value) {
                Ok(partition) => partition,
                Err(e) => {
                    report.skipped_invalid += 1;
                    warn!(value, error = %e, skipped = report.skipped_invalid, "Skipping invalid reading");
                    continue;
                }
            };

            if self.cancel.is_cancelled() {
                report.stop_reason = StopReason::Cancelled;
                break;
            }

            let reading = Reading::new(value, stream.location(), observed_at);
            match self.store.insert_one(&partition, &reading).await {
                Ok(id) => {
                    report.inserted += 1;
                    *report.per_partition.entry(partition.clone()).or_default() += 1;
                    debug!(%id, %partition, value, inserted = report.inserted, "Inserted reading");
                }
                Err(source) => {
                    report.stop_reason = StopReason::StorageFailure;
                    warn!(%partition, error = %source, inserted = report.inserted, "Insert failed, aborting ingestion");
                    return Err(IngestError { report, source });
                }
            }
        }

        info!(
            inserted = report.inserted,
            skipped = report.skipped_invalid,
            stop_reason = %report.stop_reason,
            "Ingestion finished"
        );
        Ok(report)
    }
}

/// One sensor ingesting on its own task.
pub struct IngestSession;

impl IngestSession {
    /// Spawn a session: start the sensor under a child of the router's token, ingest up to
    /// `max_count` records, then stop the producer.
    pub fn spawn(router: &IngestionRouter, sensor: Sensor, max_count: usize) -> SessionHandle {
        let cancel = router.cancellation_token().child_token();
        let router = router.with_cancellation(cancel.clone());
        let location = sensor.location().to_string();

        let task = tokio::spawn(async move {
            let mut stream = sensor.readings_with_cancel(router.cancellation_token().clone());
            let result = router.ingest(&mut stream, max_count).await;
            let emitted = stream.shutdown().await;
            debug!(location = %sensor.location(), emitted, "Session producer joined");
            result
        });

        SessionHandle {
            location,
            cancel,
            task,
        }
    }
}

/// Handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    location: String,
    cancel: CancellationToken,
    task: JoinHandle<Result<IngestReport, IngestError>>,
}

impl SessionHandle {
    /// Location tag of the session's sensor.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Ask the session to stop. Already completed writes are kept.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the session task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn join(self) -> BucketResult<IngestReport> {
        match self.task.await {
            Ok(result) => result.map_err(BucketError::from),
            Err(e) => Err(BucketError::SessionFailed {
                location: self.location,
                reason: e.to_string(),
            }),
        }
    }
}

/// Run one session per sensor concurrently and collect every outcome, in sensor order.
pub async fn run_sessions(
    router: &IngestionRouter,
    sensors: Vec<Sensor>,
    max_count: usize,
) -> Vec<BucketResult<IngestReport>> {
    let handles: Vec<SessionHandle> = sensors
        .into_iter()
        .map(|sensor| IngestSession::spawn(router, sensor, max_count))
        .collect();
    futures::future::join_all(handles.into_iter().map(SessionHandle::join)).await
}
