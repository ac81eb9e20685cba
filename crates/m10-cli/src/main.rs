use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use m10_core::SaleRecord;
use m10_storage::{M10Store, MemoryStore, PgStore};
use m10_sync::{DeriveOutcome, M10Config, M10Engine, TracingObserver};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "m10")]
#[command(about = "M-10 bonus reconciliation: contracts, FPD feed ingestion and cohort totals")]
struct Cli {
    /// Use an in-process store instead of DATABASE_URL. Nothing persists.
    #[arg(long, global = true)]
    memory: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest an FPD feed file (csv, txt, tsv, xlsx, xlsm, xlsb, xls, ods).
    Import { file: PathBuf },
    /// Derive contracts from a JSON array of installed sales.
    Derive { sales: PathBuf },
    /// Retry every feed row that has no contract yet.
    Rematch,
    /// Re-evaluate bonus eligibility and cohort totals.
    Recount {
        /// Restrict to one cohort, as YYYY-MM.
        #[arg(long)]
        month: Option<String>,
    },
    /// Recompute invoice statuses from stored feed text with the current rules.
    Renormalize,
    /// Cancel the contracts listed in a churn file.
    Churn {
        file: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every M-10 record.
    Purge {
        #[arg(long)]
        confirm: bool,
    },
    /// Apply database migrations.
    Migrate,
    /// Run the rematch and recount cron jobs until interrupted.
    Schedule,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("M10_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn open_store(config: &M10Config, memory: bool) -> Result<Arc<dyn M10Store>> {
    if memory {
        warn!("using in-process store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set (pass --memory for an in-process store)")?;
    let store = PgStore::connect(url).await.context("connecting to postgres")?;
    Ok(Arc::new(store))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn parse_month(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .with_context(|| format!("invalid month {raw:?}, expected YYYY-MM"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = M10Config::from_env();

    let store = open_store(&config, cli.memory).await?;
    let engine = M10Engine::from_config(config, store)?
        .with_archive()
        .with_observer(Arc::new(TracingObserver::default()));

    match cli.command {
        Commands::Import { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let log = engine.ingestor().ingest(&bytes, &file_name(&file)).await?;
            let report = m10_sync::report::write_import_report(&engine.config().reports_dir, &log).await?;
            println!(
                "import {}: status={} total={} processed={} matched={} unmatched={} skipped={} errors={} amount={} report={}",
                log.id,
                log.status,
                log.total_rows,
                log.processed_rows,
                log.matched_rows,
                log.unmatched_rows,
                log.skipped_rows,
                log.error_rows,
                log.total_amount,
                report.display()
            );
        }
        Commands::Derive { sales } => {
            let text = tokio::fs::read_to_string(&sales)
                .await
                .with_context(|| format!("reading {}", sales.display()))?;
            let sales: Vec<SaleRecord> = serde_json::from_str(&text).context("parsing sales json")?;
            let (mut created, mut updated, mut failed) = (0usize, 0usize, 0usize);
            for sale in &sales {
                match engine.deriver().derive(sale).await {
                    Ok(derived) if derived.outcome == DeriveOutcome::Created => created += 1,
                    Ok(_) => updated += 1,
                    Err(err) => {
                        failed += 1;
                        warn!(sale_id = sale.sale_id, error = %err, "sale not derived");
                    }
                }
            }
            info!(created, updated, failed, "derivation finished");
            println!("derive: sales={} created={created} updated={updated} failed={failed}", sales.len());
        }
        Commands::Rematch => {
            let summary = engine.merger().rematch_unlinked().await?;
            println!(
                "rematch: examined={} matched={} unmatched={} errors={}",
                summary.examined, summary.matched, summary.unmatched, summary.errors
            );
        }
        Commands::Recount { month } => {
            let month = month.as_deref().map(parse_month).transpose()?;
            for recount in engine.recount_cohorts(month).await? {
                println!(
                    "{}: installed={} active={} eligible={} bonus={}",
                    recount.month.format("%Y-%m"),
                    recount.totals.total_installed,
                    recount.totals.total_active,
                    recount.totals.total_eligible,
                    recount.totals.total_bonus_value
                );
            }
        }
        Commands::Renormalize => {
            let summary = engine.renormalize_statuses().await?;
            println!("renormalize: examined={} changed={}", summary.examined, summary.changed);
        }
        Commands::Churn { file, dry_run } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let records = m10_feed::read_churn(&bytes, &file_name(&file))?;
            let summary = engine.apply_churn(&records, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Purge { confirm } => {
            let counts = engine.purge_all(confirm).await?;
            println!(
                "purged: invoices={} feed_rows={} contracts={} cohorts={} import_logs={}",
                counts.invoices, counts.feed_rows, counts.contracts, counts.cohorts, counts.import_logs
            );
        }
        Commands::Schedule => {
            let Some(sched) = engine.maybe_build_scheduler().await? else {
                bail!("scheduler is disabled; set M10_SCHEDULER_ENABLED=1");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running, ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
        Commands::Migrate => {
            let url = engine.config().database_url.as_deref().context("DATABASE_URL is not set")?;
            let store = PgStore::connect(url).await.context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
    }

    Ok(())
}
