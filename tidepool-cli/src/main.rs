//! CLI for the tidepool sliding-window store and configuration registry.
//!
//! Provides commands for writing, checking and querying registry documents,
//! and a local producer/consumer demo of the window store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use tidepool::{
    AttrValue, BridgeConfigurationRegistry, Comparison, MatchRule, PredicateSet,
    RegistryDocument, ResourceConfiguration, Row, SlidingWindow, TidepoolError, WindowConfig,
    WindowError,
};
use tracing_subscriber::EnvFilter;

/// Lower bound on how long a demo consumer waits before reporting silence.
const MIN_CONSUMER_TIMEOUT: Duration = Duration::from_millis(100);

/// tidepool — sliding-window metric buffers and resource configuration registry.
#[derive(Parser)]
#[command(name = "tidepool", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a starter registry document for Scaphandre host metrics.
    Init {
        /// Path of the document to create.
        document: PathBuf,

        /// Overwrite the document if it already exists.
        #[arg(long)]
        force: bool,
    },

    /// Load a registry document, resolve its predicates and print it.
    Check {
        /// Path to the registry document.
        document: PathBuf,
    },

    /// Print the configurations matching a set of observed attributes.
    Match {
        /// Path to the registry document.
        document: PathBuf,

        /// Observed attributes as key=value (values parse as int, float, bool, else string).
        #[arg(value_name = "KEY=VALUE")]
        attributes: Vec<String>,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a local producer and consumers against one window.
    Demo {
        /// Window capacity.
        #[arg(long, default_value = "20")]
        max_rows: usize,

        /// Number of batches the producer appends.
        #[arg(long, default_value = "10")]
        batches: u64,

        /// Rows per batch.
        #[arg(long, default_value = "4")]
        batch_size: u64,

        /// Pause between batches, in milliseconds.
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Number of consumer threads.
        #[arg(long, default_value = "2")]
        consumers: usize,
    },
}

/// Output format for match results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// One configuration per line.
    Text,
    /// JSON array of configuration names and metrics.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { document, force } => cmd_init(&document, force),
        Commands::Check { document } => cmd_check(&document),
        Commands::Match {
            document,
            attributes,
            format,
        } => cmd_match(&document, &attributes, &format),
        Commands::Demo {
            max_rows,
            batches,
            batch_size,
            interval_ms,
            consumers,
        } => cmd_demo(
            max_rows,
            batches,
            batch_size,
            Duration::from_millis(interval_ms),
            consumers,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `tidepool init <document>`.
fn cmd_init(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!("'{}' already exists (use --force to overwrite)", path.display()).into());
    }

    let mut scaphandre = ResourceConfiguration::new(
        "scaphandre-metrics",
        vec![MatchRule::new("service.name", Comparison::Eq, "scaphandre")],
    );
    scaphandre.add_metric("scaph_host_power_microwatts");
    scaphandre.add_metric("scaph_host_load_avg_one");
    scaphandre.add_metric("scaph_host_memory_total_bytes");
    scaphandre.add_metric("scaph_host_memory_available_bytes");

    let mut registry = BridgeConfigurationRegistry::new();
    registry.set(scaphandre);

    RegistryDocument::from_registry(&registry, WindowConfig::default()).save(path)?;
    tracing::info!(document = %path.display(), "registry document written");
    print_registry(&registry, WindowConfig::default());
    Ok(())
}

/// Implements `tidepool check <document>`.
fn cmd_check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let document = RegistryDocument::load(path)?;
    let registry = document.to_registry(&PredicateSet::new())?;

    println!("Document: {}", path.display());
    print_registry(&registry, document.window);
    Ok(())
}

/// Implements `tidepool match <document> KEY=VALUE...`.
fn cmd_match(
    path: &Path,
    attributes: &[String],
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = RegistryDocument::load(path)?;
    let registry = document.to_registry(&PredicateSet::new())?;
    let observed = parse_attributes(attributes)?;

    let matched = registry.matching(&observed)?;

    match format {
        OutputFormat::Text => {
            if matched.is_empty() {
                println!("No configuration matches.");
            }
            for config in &matched {
                let metrics: Vec<&str> = config.metric_names().iter().map(String::as_str).collect();
                println!("{}: {}", config.name(), metrics.join(", "));
            }
        }
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = matched
                .iter()
                .map(|config| {
                    serde_json::json!({
                        "name": config.name(),
                        "metrics": config.metric_names(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `tidepool demo`.
#[allow(clippy::cast_precision_loss)] // Synthetic sample values
fn cmd_demo(
    max_rows: usize,
    batches: u64,
    batch_size: u64,
    interval: Duration,
    consumers: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let window = Arc::new(SlidingWindow::new(max_rows)?);

    println!("tidepool window demo");
    println!("  Max rows: {max_rows}");
    println!("  Batches: {batches} x {batch_size} rows, every {interval:?}");
    println!("  Consumers: {consumers}");
    println!();

    let timeout = consumer_timeout(interval);
    let handles: Vec<_> = (0..consumers)
        .map(|id| {
            let window = Arc::clone(&window);
            thread::spawn(move || consume(id, &window, timeout))
        })
        .collect();

    #[allow(clippy::cast_possible_truncation)] // Current epoch nanos fit in u64 until year 2554
    let base_ns = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos() as u64;
    let step_ns = 1_000_000_000u64;

    for b in 0..batches {
        let rows: Vec<Row> = (0..batch_size)
            .map(|i| {
                let n = b * batch_size + i;
                Row::new(base_ns + n * step_ns)
                    .with_metric("scaph_host_power_microwatts", 10_000_000.0 + (n % 7) as f64 * 250_000.0)
                    .with_metric("scaph_host_load_avg_one", (n % 10) as f64 / 10.0)
            })
            .collect();

        window.append(rows)?;
        thread::sleep(interval);
    }

    window.close();

    for handle in handles {
        let updates = handle
            .join()
            .map_err(|_| "consumer thread panicked")??;
        tracing::debug!(updates, "consumer finished");
    }

    if let Some(table) = window.snapshot() {
        println!();
        println!("Final window: {} / {max_rows} rows", table.len());
        for (ts, value) in table.column("scaph_host_power_microwatts") {
            println!("  {ts},{value}");
        }
    }

    Ok(())
}

/// Returns how long a consumer waits for the next batch: ten producer
/// intervals, but never less than [`MIN_CONSUMER_TIMEOUT`].
fn consumer_timeout(interval: Duration) -> Duration {
    interval.saturating_mul(10).max(MIN_CONSUMER_TIMEOUT)
}

/// Waits on `window` until it closes, logging what each update changed.
fn consume(id: usize, window: &SlidingWindow, timeout: Duration) -> Result<usize, TidepoolError> {
    let mut previous = window.snapshot().unwrap_or_default();
    let mut updates = 0;

    loop {
        match window.await_update_timeout(timeout) {
            Ok(table) => {
                updates += 1;
                let diff = table.diff(&previous);
                tracing::info!(
                    consumer = id,
                    rows = table.len(),
                    max_rows = window.max_rows(),
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    "window updated"
                );
                previous = table;
            }
            Err(TidepoolError::Window(WindowError::Closed)) => return Ok(updates),
            Err(TidepoolError::Window(WindowError::Timeout { waited })) => {
                tracing::warn!(consumer = id, ?waited, "no update, still waiting");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Parses `key=value` arguments into observed attributes.
fn parse_attributes(raw: &[String]) -> Result<Vec<(String, AttrValue)>, Box<dyn std::error::Error>> {
    raw.iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid attribute '{pair}': expected KEY=VALUE"))?;
            if key.is_empty() {
                return Err(format!("Invalid attribute '{pair}': empty key").into());
            }
            Ok((key.to_string(), AttrValue::parse(value)))
        })
        .collect()
}

/// Prints a registry the way `check` and `init` show it.
fn print_registry(registry: &BridgeConfigurationRegistry, window: WindowConfig) {
    println!("Dataframe TTL: {}s", registry.dataframe_ttl());
    println!("Window max rows: {}", window.max_rows);
    println!("Resource configurations: {}", registry.len());

    for config in registry.iter() {
        println!();
        println!("  - {}", config.name());
        if config.rules().is_empty() {
            println!("    Rules: none (matches every resource)");
        } else {
            println!("    Rules:");
            for rule in config.rules() {
                println!("      {rule}");
            }
        }
        let metrics: Vec<&str> = config.metric_names().iter().map(String::as_str).collect();
        println!("    Metrics: {}", metrics.join(", "));
    }
}
