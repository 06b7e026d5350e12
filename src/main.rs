use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use cohort_wrangler::config::{Config, StorageBackend};
use cohort_wrangler::infra::SqliteStorage;
use cohort_wrangler::logging;
use cohort_wrangler::observability::metrics;
use cohort_wrangler::pipeline::{ingest_cohort, CohortPipeline, ReferenceData};
use cohort_wrangler::storage::{InMemoryStorage, Storage};
use cohort_wrangler::types::CohortTable;
use cohort_wrangler::TranslationPolicy;

#[derive(Parser)]
#[command(name = "cohort_wrangler")]
#[command(about = "Normalizes longitudinal survey cohorts into analysis-ready tables")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $COHORT_WRANGLER_CONFIG, then config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Write Prometheus metrics text here when the command finishes
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load cohort input files into the store
    Ingest {
        /// Cohorts to ingest (comma-separated). Defaults to every configured cohort
        #[arg(long)]
        cohorts: Option<String>,
    },
    /// Wrangle ingested cohorts and publish their tables
    Wrangle {
        #[arg(long)]
        cohorts: Option<String>,
        /// Overrides [translation].policy
        #[arg(long, value_enum)]
        policy: Option<TranslationPolicy>,
        /// Directory for one JSON-lines file per cohort
        #[arg(long, default_value = "output")]
        out: PathBuf,
    },
    /// Ingest then wrangle, in memory
    Run {
        #[arg(long)]
        cohorts: Option<String>,
        #[arg(long, value_enum)]
        policy: Option<TranslationPolicy>,
        #[arg(long, default_value = "output")]
        out: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::from_path(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Config::load().context("Failed to load config"),
    }
}

fn parse_cohorts(arg: Option<&str>, config: &Config) -> Result<Vec<i32>> {
    match arg {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i32>()
                    .with_context(|| format!("'{}' is not a cohort year", s))
            })
            .collect(),
        None => Ok(config.cohorts.iter().map(|c| c.year).collect()),
    }
}

fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let storage = SqliteStorage::open(&config.storage.sqlite_path).with_context(|| {
                format!(
                    "Failed to open SQLite store at {}",
                    config.storage.sqlite_path.display()
                )
            })?;
            Ok(Arc::new(storage))
        }
        StorageBackend::Memory => {
            warn!("In-memory store does not persist between commands");
            Ok(Arc::new(InMemoryStorage::new()))
        }
    }
}

async fn run_ingest(config: &Config, cohorts: &[i32], storage: &dyn Storage) -> Result<()> {
    for &cohort in cohorts {
        let source = config.cohort_source(cohort)?;
        let stats = ingest_cohort(storage, source)
            .await
            .with_context(|| format!("Failed to ingest cohort {}", cohort))?;
        println!(
            "Ingested cohort {}: {} respondents, {} responses, {} mapped rnums",
            cohort, stats.respondents, stats.responses, stats.mapped_rnums
        );
    }
    Ok(())
}

/// Wrangles each cohort independently; a failed cohort does not stop the others.
async fn run_wrangle(
    config: Arc<Config>,
    cohorts: &[i32],
    policy: TranslationPolicy,
    out: &Path,
    storage: Arc<dyn Storage>,
) -> Result<bool> {
    let reference = Arc::new(ReferenceData::load(&config).context("Failed to load reference data")?);
    let pipeline = CohortPipeline::new(reference, config, storage.clone());

    let mut all_ok = true;
    for &cohort in cohorts {
        let span = tracing::info_span!("cohort", cohort);
        let _enter = span.enter();

        match pipeline.run(cohort, policy).await {
            Ok(result) => {
                let table = storage
                    .read_cohort_table(cohort)
                    .await?
                    .with_context(|| format!("Cohort {} table missing after publish", cohort))?;
                let path = write_jsonl(out, &table)?;
                println!(
                    "Cohort {}: {} rows ({} issues, {} topcoded) -> {}",
                    cohort,
                    result.published_rows,
                    result.translation_issues.len(),
                    result.topcoded,
                    path.display()
                );
            }
            Err(e) => {
                all_ok = false;
                error!("Cohort {} failed: {}", cohort, e);
                println!("Cohort {} failed: {}", cohort, e);
            }
        }
    }
    Ok(all_ok)
}

/// One JSON object per row, plus a sidecar with the column order.
fn write_jsonl(dir: &Path, table: &CohortTable) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(format!("cohort_{}.jsonl", table.cohort));
    let mut writer = BufWriter::new(
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    for row in &table.rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    let columns_path = dir.join(format!("cohort_{}.columns.json", table.cohort));
    fs::write(&columns_path, serde_json::to_string_pretty(&table.columns)?)?;

    info!(path = %path.display(), rows = table.rows.len(), "Wrote cohort table");
    Ok(path)
}

fn write_metrics(path: &Path) -> Result<()> {
    match metrics::render() {
        Some(text) => fs::write(path, text)
            .with_context(|| format!("Failed to write metrics to {}", path.display())),
        None => {
            warn!("Metrics recorder not installed; nothing written");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    if cli.metrics_out.is_some() {
        metrics::init();
    }

    let config = Arc::new(load_config(cli.config.as_deref())?);

    let all_ok = match cli.command {
        Commands::Ingest { cohorts } => {
            let cohorts = parse_cohorts(cohorts.as_deref(), &config)?;
            let storage = open_storage(&config)?;
            run_ingest(&config, &cohorts, storage.as_ref()).await?;
            true
        }
        Commands::Wrangle {
            cohorts,
            policy,
            out,
        } => {
            let cohorts = parse_cohorts(cohorts.as_deref(), &config)?;
            let policy = policy.unwrap_or(config.translation.policy);
            let storage = open_storage(&config)?;
            run_wrangle(config.clone(), &cohorts, policy, &out, storage).await?
        }
        Commands::Run {
            cohorts,
            policy,
            out,
        } => {
            let cohorts = parse_cohorts(cohorts.as_deref(), &config)?;
            let policy = policy.unwrap_or(config.translation.policy);
            let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
            run_ingest(&config, &cohorts, storage.as_ref()).await?;
            run_wrangle(config.clone(), &cohorts, policy, &out, storage).await?
        }
    };

    if let Some(path) = cli.metrics_out.as_deref() {
        write_metrics(path)?;
    }

    if !all_ok {
        anyhow::bail!("one or more cohorts failed");
    }
    Ok(())
}
