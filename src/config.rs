//! Configuration loading using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. A TOML file, `config/sensor_buckets.toml` unless another path is given
//! 3. Environment variables prefixed with `SENSOR_BUCKETS_`, nested keys separated by `__`
//!    (e.g. `SENSOR_BUCKETS_STORAGE__BACKEND=memory`)
//!
//! # Example
//! ```no_run
//! use sensor_buckets::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Writing to partitions prefixed '{}'", config.storage.partition_prefix);
//! # Ok::<(), sensor_buckets::error::BucketError>(())
//! ```

use crate::classifier::{Boundaries, BucketClassifier, INGESTION_BOUNDARIES};
use crate::error::{BucketError, BucketResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/sensor_buckets.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SENSOR_BUCKETS_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Document store settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Ingestion settings
    #[serde(default)]
    pub ingestion: IngestionConfig,
    /// Retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "sensor-buckets".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store backend (memory or jsonl)
    pub backend: String,
    /// Directory for file-backed stores
    pub data_dir: PathBuf,
    /// Prefix prepended to bucket labels to form partition names
    pub partition_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "jsonl".to_string(),
            data_dir: PathBuf::from("data/iot"),
            partition_prefix: "temp_".to_string(),
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Classification boundaries, strictly increasing
    pub boundaries: Vec<f64>,
    /// Records to insert per session before stopping
    pub max_count: usize,
    /// One sensor session per location tag
    pub locations: Vec<String>,
    /// Lower bound (inclusive) of simulated readings
    pub value_min: f64,
    /// Upper bound (exclusive) of simulated readings
    pub value_max: f64,
    /// Pause between emitted readings in milliseconds (0 = none)
    #[serde(default)]
    pub emit_interval_ms: u64,
    /// Readings buffered between producer and consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            boundaries: INGESTION_BOUNDARIES.to_vec(),
            max_count: 50,
            locations: vec!["laboratory".to_string()],
            value_min: -20.0,
            value_max: 40.0,
            emit_interval_ms: 0,
            channel_capacity: default_channel_capacity(),
            seed: None,
        }
    }
}

impl IngestionConfig {
    /// Validated classification boundaries.
    pub fn boundaries(&self) -> BucketResult<Boundaries> {
        Boundaries::new(self.boundaries.clone())
    }

    /// Classifier over the configured boundaries.
    pub fn classifier(&self) -> BucketResult<BucketClassifier> {
        Ok(BucketClassifier::new(self.boundaries()?))
    }

    /// Pause between emissions, if any.
    pub fn emit_interval(&self) -> Option<Duration> {
        (self.emit_interval_ms > 0).then(|| Duration::from_millis(self.emit_interval_ms))
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Partition queried by default
    pub partition: String,
    /// Aggregation boundaries, strictly increasing, at least two
    pub boundaries: Vec<f64>,
    /// Maximum number of groups returned
    pub result_limit: usize,
    /// Only records with a value strictly greater than this are grouped
    pub min_value: f64,
    /// Label of the overflow group
    #[serde(default = "default_overflow_label")]
    pub default_label: String,
    /// Records returned by the newest-first query
    #[serde(default = "default_latest_limit")]
    pub latest_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            partition: "temp_gte_20".to_string(),
            boundaries: vec![20.0, 25.0, 30.0, 35.0],
            result_limit: 4,
            min_value: 20.0,
            default_label: default_overflow_label(),
            latest_limit: default_latest_limit(),
        }
    }
}

impl RetrievalConfig {
    /// Validated aggregation boundaries.
    pub fn boundaries(&self) -> BucketResult<Boundaries> {
        Boundaries::with_min_len(self.boundaries.clone(), 2)
    }
}

// Default value functions
fn default_channel_capacity() -> usize {
    1
}

fn default_overflow_label() -> String {
    "other".to_string()
}

fn default_latest_limit() -> usize {
    10
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> BucketResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file leaves the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> BucketResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    /// The layered provider stack, exposed for callers that add their own layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> BucketResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BucketError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_backends = ["memory", "jsonl"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(BucketError::Configuration(format!(
                "Invalid storage backend '{}'. Must be one of: {}",
                self.storage.backend,
                valid_backends.join(", ")
            )));
        }

        let ingestion = &self.ingestion;
        ingestion.boundaries()?;
        let span = ingestion.value_max - ingestion.value_min;
        if !(ingestion.value_min < ingestion.value_max && span.is_finite()) {
            return Err(BucketError::Configuration(format!(
                "Invalid value range [{}, {}): bounds and span must be finite and increasing",
                ingestion.value_min, ingestion.value_max
            )));
        }
        if ingestion.channel_capacity == 0 {
            return Err(BucketError::Configuration(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if ingestion.locations.is_empty() {
            return Err(BucketError::Configuration(
                "At least one ingestion location is required".to_string(),
            ));
        }

        let retrieval = &self.retrieval;
        retrieval.boundaries()?;
        if !retrieval.min_value.is_finite() {
            return Err(BucketError::Configuration(format!(
                "Invalid min_value {}",
                retrieval.min_value
            )));
        }
        if retrieval.default_label.trim().is_empty() {
            return Err(BucketError::Configuration(
                "default_label must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> BucketResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BucketError::Configuration(format!("Failed to render config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.partition_prefix, "temp_");
        assert_eq!(config.ingestion.max_count, 50);
        assert_eq!(config.retrieval.partition, "temp_gte_20");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [storage]
            backend = "memory"
            data_dir = "unused"
            partition_prefix = "hum_"

            [ingestion]
            boundaries = [30.0, 60.0]
            max_count = 5
            locations = ["attic", "cellar"]
            value_min = 0.0
            value_max = 100.0
            "#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.partition_prefix, "hum_");
        assert_eq!(config.ingestion.locations, vec!["attic", "cellar"]);
        assert_eq!(config.ingestion.channel_capacity, 1);
        assert_eq!(config.retrieval, RetrievalConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(BucketError::Configuration(_))
        ));
    }

    #[test]
    fn test_unordered_boundaries_fail_validation() {
        let mut config = AppConfig::default();
        config.ingestion.boundaries = vec![0.0, 20.0, 10.0];
        assert!(matches!(
            config.validate(),
            Err(BucketError::UnorderedBoundaries { .. })
        ));
    }

    #[test]
    fn test_retrieval_needs_two_boundaries() {
        let mut config = AppConfig::default();
        config.retrieval.boundaries = vec![20.0];
        assert!(matches!(
            config.validate(),
            Err(BucketError::TooFewBoundaries { required: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_value_range() {
        let mut config = AppConfig::default();
        config.ingestion.value_min = 40.0;
        config.ingestion.value_max = -20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overflowing_value_span_rejected() {
        let mut config = AppConfig::default();
        config.ingestion.value_min = -1e308;
        config.ingestion.value_max = 1e308;
        assert!(matches!(
            config.validate(),
            Err(BucketError::Configuration(_))
        ));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = AppConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
