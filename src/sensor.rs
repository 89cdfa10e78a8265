//! Simulated sensor and the cancellable reading stream it produces.
//!
//! A `ReadingStream` couples a background producer task with a bounded channel. The
//! consumer pulls with `next().await` (or through `futures::Stream`) and suspends until
//! a value is available. The producer runs at most `capacity` values ahead and stops as
//! soon as any of these happen:
//!
//! - the token passed at spawn time (or any parent of it) is cancelled
//! - `shutdown` is called or the consumer drops the stream, which cancels only the
//!   stream's own child token
//! - the value iterator ends
//!
//! # Example
//!
//! ```rust,ignore
//! let sensor = Sensor::new("laboratory");
//! let mut stream = sensor.readings();
//! let first = stream.next().await;
//! let emitted = stream.shutdown().await;
//! ```

use crate::config::IngestionConfig;
use crate::error::{BucketError, BucketResult};
use futures::Stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Producer tuning shared by every kind of stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Values buffered between producer and consumer (at least 1).
    pub capacity: usize,
    /// Pause after each emitted value.
    pub interval: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            capacity: 1,
            interval: None,
        }
    }
}

/// Pull-based sequence of values from one location, fed by a producer task.
#[derive(Debug)]
pub struct ReadingStream {
    location: String,
    rx: mpsc::Receiver<f64>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<u64>>,
}

impl ReadingStream {
    /// Spawn a producer over `values`, stopped by `cancel` or anything above it.
    ///
    /// The stream holds a child of `cancel`, so dropping it never cancels the caller's
    /// token. Must be called from within a Tokio runtime.
    pub fn spawn<I>(
        location: impl Into<String>,
        values: I,
        options: StreamOptions,
        cancel: CancellationToken,
    ) -> Self
    where
        I: IntoIterator<Item = f64>,
        I::IntoIter: Send + 'static,
    {
        let location = location.into();
        let cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel(options.capacity.max(1));
        let producer = tokio::spawn(produce(
            location.clone(),
            values.into_iter(),
            tx,
            cancel.clone(),
            options.interval,
        ));

        Self {
            location,
            rx,
            cancel,
            producer: Some(producer),
        }
    }

    /// Stream over a fixed list of values; ends after the last one.
    pub fn from_values(location: impl Into<String>, values: Vec<f64>) -> Self {
        Self::spawn(
            location,
            values,
            StreamOptions::default(),
            CancellationToken::new(),
        )
    }

    /// Location tag of the producing sensor.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Next value, or `None` once the producer has stopped and the buffer is drained.
    pub async fn next(&mut self) -> Option<f64> {
        self.rx.recv().await
    }

    /// The stream's own token, a child of the one it was spawned with.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the producer task has exited.
    pub fn is_producer_finished(&self) -> bool {
        self.producer.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the producer, wait for it to exit and return how many values it emitted.
    pub async fn shutdown(mut self) -> u64 {
        self.cancel.cancel();
        self.rx.close();
        match self.producer.take() {
            Some(handle) => match handle.await {
                Ok(emitted) => emitted,
                Err(e) => {
                    warn!(location = %self.location, error = %e, "Reading producer task failed");
                    0
                }
            },
            None => 0,
        }
    }
}

impl Drop for ReadingStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for ReadingStream {
    type Item = f64;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<f64>> {
        self.rx.poll_recv(cx)
    }
}

async fn produce<I>(
    location: String,
    mut values: I,
    tx: mpsc::Sender<f64>,
    cancel: CancellationToken,
    interval: Option<Duration>,
) -> u64
where
    I: Iterator<Item = f64>,
{
    let mut emitted = 0u64;

    while !cancel.is_cancelled() {
        let Some(value) = values.next() else {
            break;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(value) => {
                if sent.is_err() {
                    // Receiver closed
                    break;
                }
            }
        }
        emitted += 1;

        if let Some(period) = interval {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }
    }

    debug!(%location, emitted, "Reading producer stopped");
    emitted
}

/// Simulated sensor emitting uniformly distributed values over `[min, max)`.
#[derive(Debug, Clone)]
pub struct Sensor {
    location: String,
    min: f64,
    max: f64,
    seed: Option<u64>,
    options: StreamOptions,
}

impl Sensor {
    /// Sensor at `location` reading over the default range `[-20, 40)`.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            min: -20.0,
            max: 40.0,
            seed: None,
            options: StreamOptions::default(),
        }
    }

    /// Sensor configured from the ingestion section.
    pub fn from_config(location: impl Into<String>, config: &IngestionConfig) -> BucketResult<Self> {
        let mut sensor = Self::new(location)
            .with_range(config.value_min, config.value_max)?
            .with_capacity(config.channel_capacity);
        sensor.options.interval = config.emit_interval();
        sensor.seed = config.seed;
        Ok(sensor)
    }

    /// Change the value range. Both bounds and their span must be finite, and `min < max`.
    pub fn with_range(mut self, min: f64, max: f64) -> BucketResult<Self> {
        if !(min < max && (max - min).is_finite()) {
            return Err(BucketError::Configuration(format!(
                "Invalid sensor range [{min}, {max})"
            )));
        }
        self.min = min;
        self.max = max;
        Ok(self)
    }

    /// Pause between readings.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.options.interval = Some(interval);
        self
    }

    /// Fixed RNG seed, for reproducible sequences.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Channel capacity between producer and consumer.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.options.capacity = capacity.max(1);
        self
    }

    /// Location tag.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Start producing with a fresh cancellation token.
    pub fn readings(&self) -> ReadingStream {
        self.readings_with_cancel(CancellationToken::new())
    }

    /// Start producing under `cancel`; cancelling it stops the producer.
    pub fn readings_with_cancel(&self, cancel: CancellationToken) -> ReadingStream {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (min, max) = (self.min, self.max);
        let values = std::iter::repeat_with(move || rng.gen_range(min..max));
        ReadingStream::spawn(self.location.clone(), values, self.options, cancel)
    }
}
