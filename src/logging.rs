//! Tracing setup
//!
//! Structured logging through `tracing` and `tracing-subscriber`:
//! - pretty, compact or JSON output
//! - level taken from `[application] log_level`, overridden by `RUST_LOG`
//! - idempotent initialization, so tests and embedding applications can call `init` freely
//!
//! # Example
//! ```no_run
//! use sensor_buckets::{config::AppConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! info!(partition = "temp_gte_20", "Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::AppConfig;
use crate::error::{BucketError, BucketResult};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, colored output for development
    #[default]
    Pretty,
    /// Single-line output without colors
    Compact,
    /// Newline-delimited JSON for log aggregation
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to emit span close events with timings
    pub with_span_events: bool,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to enable ANSI colors (Pretty format only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the application configuration
    pub fn from_app_config(config: &AppConfig) -> BucketResult<Self> {
        let level = parse_log_level(&config.application.log_level)?;
        Ok(Self {
            level,
            ..Default::default()
        })
    }

    /// Create tracing config at `level`
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span close events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable file and line numbers
    pub fn with_file_and_line(mut self, enabled: bool) -> Self {
        self.with_file_and_line = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the application configuration
pub fn init_from_config(config: &AppConfig) -> BucketResult<()> {
    init(TracingConfig::from_app_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// Returns `Ok(())` without changes when a global subscriber is already installed.
pub fn init(config: TracingConfig) -> BucketResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_filter(env_filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // Already initialized: expected in tests and when embedded
        Err(e) if e.to_string().contains("global default trace dispatcher has already been set") => {
            Ok(())
        }
        Err(e) => Err(BucketError::Configuration(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> BucketResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(BucketError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

fn level_to_filter_string(level: Level) -> String {
    level.as_str().to_lowercase()
}
