//! CLI Entry Point for sensor-buckets
//!
//! Provides command-line access to both sides of the bucket pattern:
//! - Ingesting simulated sensor readings into bucket partitions
//! - Re-grouping a partition into finer ranges and listing the newest records
//! - Inspecting and dropping partitions
//!
//! # Usage
//!
//! Ingest 50 readings from two sensors:
//! ```bash
//! sensor-buckets ingest --location attic --location cellar --count 50
//! ```
//!
//! Aggregate the hottest partition:
//! ```bash
//! sensor-buckets aggregate --partition temp_gte_20 --boundaries 20,25,30,35 --limit 4
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensor_buckets::classifier::Boundaries;
use sensor_buckets::config::{AppConfig, DEFAULT_CONFIG_PATH};
use sensor_buckets::data::{DocumentStore, StoreRegistry};
use sensor_buckets::ingest::{IngestSession, IngestionRouter};
use sensor_buckets::logging::{self, OutputFormat, TracingConfig};
use sensor_buckets::retrieval::{flatten, AggregateQuery, AggregationGroup, RetrievalAggregator};
use sensor_buckets::sensor::Sensor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sensor-buckets")]
#[command(about = "Bucketed storage for sensor readings", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest simulated readings, one concurrent session per location
    Ingest {
        /// Sensor location (repeatable; defaults to the configured locations)
        #[arg(long = "location")]
        locations: Vec<String>,

        /// Records to insert per session
        #[arg(long)]
        count: Option<usize>,

        /// Seed for reproducible readings
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Group a partition's records into value ranges
    Aggregate {
        #[command(flatten)]
        query: AggregateArgs,

        /// Print groups as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the newest records of a partition
    Latest {
        /// Partition to read (defaults to the configured retrieval partition)
        #[arg(long)]
        partition: Option<String>,

        /// Maximum records shown
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List partitions and their record counts
    Partitions,

    /// Remove a partition and its records
    Drop {
        /// Partition name
        partition: String,
    },

    /// Ingest from the configured locations, then aggregate and print the result
    Demo {
        /// Records to insert per session
        #[arg(long)]
        count: Option<usize>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
struct AggregateArgs {
    /// Partition to aggregate (defaults to the configured retrieval partition)
    #[arg(long)]
    partition: Option<String>,

    /// Range boundaries, comma separated and strictly increasing
    #[arg(long, value_delimiter = ',')]
    boundaries: Option<Vec<f64>>,

    /// Maximum number of groups
    #[arg(long)]
    limit: Option<usize>,

    /// Only group values strictly above this
    #[arg(long, allow_negative_numbers = true)]
    min: Option<f64>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate()?;

    let tracing_config = TracingConfig::from_app_config(&config)?.with_format(cli.log_format);
    logging::init(tracing_config)?;

    match cli.command {
        Commands::Ingest {
            locations,
            count,
            seed,
        } => {
            let store = open_store(&config).await?;
            run_ingest(&config, store, locations, count, seed).await
        }
        Commands::Aggregate { query, json } => {
            let store = open_store(&config).await?;
            run_aggregate(&config, store, query, json).await
        }
        Commands::Latest { partition, limit } => {
            let store = open_store(&config).await?;
            let partition = partition.unwrap_or_else(|| config.retrieval.partition.clone());
            let limit = limit.unwrap_or(config.retrieval.latest_limit);
            let records = RetrievalAggregator::new(store)
                .latest(&partition, limit)
                .await?;
            println!("{} newest records in {}:", records.len(), partition);
            for record in records {
                println!(
                    "  {}  {:>8.3}  {}  {}",
                    record.observed_at.to_rfc3339(),
                    record.value,
                    record.location,
                    record.id
                );
            }
            Ok(())
        }
        Commands::Partitions => {
            let store = open_store(&config).await?;
            for partition in store.list_partitions().await? {
                let count = store.count(&partition).await?;
                println!("{partition:<16} {count}");
            }
            Ok(())
        }
        Commands::Drop { partition } => {
            let store = open_store(&config).await?;
            store.drop_partition(&partition).await?;
            println!("Dropped {partition}");
            Ok(())
        }
        Commands::Demo { count } => {
            let store = open_store(&config).await?;
            run_ingest(&config, store.clone(), Vec::new(), count, None).await?;
            let query = AggregateArgs {
                partition: None,
                boundaries: None,
                limit: None,
                min: None,
            };
            run_aggregate(&config, store, query, false).await
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    StoreRegistry::new()
        .create(&config.storage)
        .await
        .with_context(|| format!("Failed to open '{}' store", config.storage.backend))
}

async fn run_ingest(
    config: &AppConfig,
    store: Arc<dyn DocumentStore>,
    locations: Vec<String>,
    count: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let locations = if locations.is_empty() {
        config.ingestion.locations.clone()
    } else {
        locations
    };
    let max_count = count.unwrap_or(config.ingestion.max_count);

    let cancel = CancellationToken::new();
    let router = IngestionRouter::from_config(store, config)?.with_cancellation(cancel.clone());

    let mut handles = Vec::with_capacity(locations.len());
    for (offset, location) in (0u64..).zip(locations) {
        let mut sensor = Sensor::from_config(location, &config.ingestion)?;
        if let Some(seed) = seed.or(config.ingestion.seed) {
            sensor = sensor.with_seed(seed.wrapping_add(offset));
        }
        handles.push(IngestSession::spawn(&router, sensor, max_count));
    }
    info!(sessions = handles.len(), max_count, "Ingestion started");

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping sessions");
            ctrl_c.cancel();
        }
    });

    let mut failed = 0usize;
    for handle in handles {
        let location = handle.location().to_string();
        match handle.join().await {
            Ok(report) => {
                println!(
                    "{location}: inserted {} ({} skipped, {})",
                    report.inserted, report.skipped_invalid, report.stop_reason
                );
                for (partition, inserted) in &report.per_partition {
                    println!("  {partition:<16} {inserted}");
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{location}: {e}");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} ingestion session(s) failed");
    }
    Ok(())
}

async fn run_aggregate(
    config: &AppConfig,
    store: Arc<dyn DocumentStore>,
    args: AggregateArgs,
    json: bool,
) -> Result<()> {
    let mut query = AggregateQuery::from_config(&config.retrieval)?;
    if let Some(boundaries) = args.boundaries {
        query.boundaries = Boundaries::with_min_len(boundaries, 2)?;
    }
    if let Some(limit) = args.limit {
        query.result_limit = limit;
    }
    if let Some(min) = args.min {
        query.min_value = min;
    }
    let partition = args
        .partition
        .unwrap_or_else(|| config.retrieval.partition.clone());

    let groups = RetrievalAggregator::new(store)
        .aggregate_with(&partition, &query)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    print_groups(&partition, &groups);
    Ok(())
}

fn print_groups(partition: &str, groups: &[AggregationGroup]) {
    println!("{} groups in {}:", groups.len(), partition);
    for group in groups {
        println!("  {:<10} {}", group.label, group.count);
    }
    let documents = flatten(groups);
    println!("{} documents:", documents.len());
    for record in documents {
        println!("  {:>8.3}  {}", record.value, record.location);
    }
}
