use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use vecbench::{
    clients::{ClientError, Configurator, Metadata, SearchClient, UploadClient},
    config::{BenchConfig, ConfigError},
    filter::{FilterError, PgvectorConditionBuilder, compile_conditions, parse_conditions},
    observability::{self, TracingError, metrics::MetricsError},
};

/// CLI arguments for vecbench
#[derive(Parser, Debug)]
#[command(version, about = "pgvector benchmark clients", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "vecbench.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Compile a JSON conditions document and print the SQL fragment
    CompileFilter {
        /// Conditions document, e.g. '{"and": [{"year": {"range": {"gte": 2015}}}]}'
        conditions: String,
    },
    /// Drop and create the collection table and index
    Recreate,
    /// Upload `{"id", "vector", "metadata"}` JSON lines in batches
    Upload {
        /// JSON lines file
        input: PathBuf,
    },
    /// Run `{"vector", "conditions", "top"}` JSON lines and print the hits
    Search {
        /// JSON lines file
        input: PathBuf,
        /// Result count for lines without `top`
        #[arg(long, default_value = "10")]
        top: usize,
    },
    /// Tabulate a directory of result files into CSV tables
    #[cfg(feature = "csv-export")]
    Report {
        /// Directory holding result JSON files
        dir: PathBuf,
        /// Where to write the tables (defaults to the input directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show enabled compile-time features
    Features,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to load config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tracing(#[from] TracingError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Failed to read {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("{path}:{line}: invalid record: {source}")]
    Record {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "csv-export")]
    #[error(transparent)]
    Report(#[from] vecbench::report::ReportError),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            // Distinguish "engine cannot run this benchmark" from a failed run
            CliError::Client(e) if e.is_incompatible() => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadRecord {
    id: i64,
    vector: Vec<f32>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct SearchRecord {
    vector: Vec<f32>,
    #[serde(default)]
    conditions: serde_json::Value,
    #[serde(default)]
    top: Option<usize>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let result = match args.command {
        Command::CompileFilter { conditions } => run_compile_filter(&args.config, &conditions),
        Command::Recreate => run_recreate(&args.config).await,
        Command::Upload { input } => run_upload(&args.config, &input).await,
        Command::Search { input, top } => run_search(&args.config, &input, top).await,
        #[cfg(feature = "csv-export")]
        Command::Report { dir, output } => run_report(&dir, output.as_deref()),
        Command::Features => {
            run_features();
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

/// Load config and bring up logging and metrics.
fn init(config_path: &Path) -> Result<BenchConfig, CliError> {
    let config = BenchConfig::from_file(config_path)?;
    observability::init_tracing(&config.observability)?;
    observability::metrics::init_metrics(&config.observability.metrics)?;
    tracing::debug!(
        config_file = %config_path.display(),
        engine = %config.engine.kind,
        table_name = %config.collection.table_name,
        "Configuration loaded"
    );
    Ok(config)
}

/// Write the metrics registry at the end of a run, if metrics are enabled.
fn flush_metrics(config: &BenchConfig) -> Result<(), CliError> {
    let Some(rendered) = observability::metrics::render_metrics() else {
        return Ok(());
    };
    match &config.observability.metrics.output {
        Some(path) => {
            std::fs::write(path, rendered).map_err(|e| CliError::Io(e, path.clone()))?;
            tracing::info!(path = %path.display(), "Wrote metrics");
        }
        None => tracing::info!(metrics = %rendered, "Run metrics"),
    }
    Ok(())
}

fn run_compile_filter(config_path: &Path, conditions: &str) -> Result<(), CliError> {
    let config = init(config_path)?;
    let builder = PgvectorConditionBuilder::new(
        config.engine.capabilities(),
        &config.collection.schema,
    );
    let value: serde_json::Value = serde_json::from_str(conditions)?;
    let conditions = parse_conditions(&value)?;
    let fragment = compile_conditions(&builder, conditions.as_ref()).map_err(ClientError::from)?;
    if let Some(fragment) = fragment {
        println!("{fragment}");
    }
    Ok(())
}

async fn run_recreate(config_path: &Path) -> Result<(), CliError> {
    let config = init(config_path)?;
    let mut configurator = Configurator::connect(&config).await?;
    let result = async {
        configurator.clean().await?;
        configurator.recreate().await
    }
    .await;
    configurator.close().await;
    result?;
    flush_metrics(&config)
}

async fn run_upload(config_path: &Path, input: &Path) -> Result<(), CliError> {
    let config = init(config_path)?;
    let file = tokio::fs::File::open(input)
        .await
        .map_err(|e| CliError::Io(e, input.to_path_buf()))?;
    let mut lines = BufReader::new(file).lines();

    let batch_size = config.upload.batch_size;
    let mut client = UploadClient::new(&config);
    let mut ids = Vec::with_capacity(batch_size);
    let mut vectors = Vec::with_capacity(batch_size);
    let mut metadata = Vec::with_capacity(batch_size);
    let mut total = 0u64;
    let mut line_no = 0;

    let start = std::time::Instant::now();
    let result: Result<(), CliError> = async {
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| CliError::Io(e, input.to_path_buf()))?
        {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: UploadRecord =
                serde_json::from_str(&line).map_err(|source| CliError::Record {
                    path: input.to_path_buf(),
                    line: line_no,
                    source,
                })?;
            ids.push(record.id);
            vectors.push(record.vector);
            metadata.push(record.metadata);

            if ids.len() == batch_size {
                total += client.upload_batch(&ids, &vectors, &metadata).await?;
                ids.clear();
                vectors.clear();
                metadata.clear();
            }
        }
        if !ids.is_empty() {
            total += client.upload_batch(&ids, &vectors, &metadata).await?;
        }
        client.post_upload().await?;
        Ok(())
    }
    .await;
    client.close().await;
    result?;

    tracing::info!(
        input = %input.display(),
        item_count = total,
        duration_ms = start.elapsed().as_millis() as u64,
        "Upload finished"
    );
    flush_metrics(&config)
}

async fn run_search(config_path: &Path, input: &Path, default_top: usize) -> Result<(), CliError> {
    let config = init(config_path)?;
    let file = tokio::fs::File::open(input)
        .await
        .map_err(|e| CliError::Io(e, input.to_path_buf()))?;
    let mut lines = BufReader::new(file).lines();

    let mut client = SearchClient::connect(&config).await?;
    let mut queries = 0usize;
    let mut line_no = 0;

    let start = std::time::Instant::now();
    let result: Result<(), CliError> = async {
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| CliError::Io(e, input.to_path_buf()))?
        {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: SearchRecord =
                serde_json::from_str(&line).map_err(|source| CliError::Record {
                    path: input.to_path_buf(),
                    line: line_no,
                    source,
                })?;
            let conditions = parse_conditions(&record.conditions)?;
            let hits = client
                .search(
                    &record.vector,
                    conditions.as_ref(),
                    record.top.unwrap_or(default_top),
                )
                .await?;
            println!("{}", serde_json::to_string(&hits)?);
            queries += 1;
        }
        Ok(())
    }
    .await;
    client.close().await;
    result?;

    let elapsed = start.elapsed().as_secs_f64();
    tracing::info!(
        input = %input.display(),
        item_count = queries,
        duration_ms = (elapsed * 1000.0) as u64,
        rps = if elapsed > 0.0 { queries as f64 / elapsed } else { 0.0 },
        "Search finished"
    );
    flush_metrics(&config)
}

#[cfg(feature = "csv-export")]
fn run_report(dir: &Path, output: Option<&Path>) -> Result<(), CliError> {
    let tables = vecbench::report::ResultTables::load(dir)?;
    for path in tables.write_csv(output.unwrap_or(dir))? {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_features() {
    let version = env!("CARGO_PKG_VERSION");
    let features: &[(&str, bool)] = &[
        ("cli", cfg!(feature = "cli")),
        ("csv-export", cfg!(feature = "csv-export")),
        ("prometheus", cfg!(feature = "prometheus")),
    ];

    println!("vecbench {version}");
    println!();
    for (name, enabled) in features {
        let mark = if *enabled { "+" } else { "-" };
        println!("  {mark} {name}");
    }
}
