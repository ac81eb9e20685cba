//! M-10 reconciliation orchestration: contract derivation, FPD ingestion,
//! feed-to-contract merging, cohort recounts and the administrative
//! operations built on top of them.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use m10_core::status::{StatusNormalizer, StatusRule, StatusRuleSet};
use m10_core::{ImportLog, InvoiceStatus};
use m10_storage::{BackoffPolicy, FeedArchive, M10Store};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

pub mod admin;
pub mod derive;
pub mod ingest;
pub mod merge;
pub mod report;

pub use admin::{ChurnSummary, CohortRecount, RenormalizeSummary};
pub use derive::{ContractDeriver, DeriveError, DeriveOutcome, Derived, ValidationError};
pub use ingest::{FeedIngestor, IngestError};
pub use merge::{MatchResult, MergeError, ReconciliationMerger, RematchSummary};

pub const STATUS_RULES_PATH: &str = "rules/fpd_status.yaml";

#[derive(Debug, Clone)]
pub struct M10Config {
    pub database_url: Option<String>,
    pub archive_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub bonus_per_contract: Decimal,
    pub error_sample_limit: usize,
    pub unmatched_sample_limit: usize,
    pub scheduler_enabled: bool,
    pub rematch_cron: String,
    pub recount_cron: String,
}

impl Default for M10Config {
    fn default() -> Self {
        Self {
            database_url: None,
            archive_dir: PathBuf::from("./archive"),
            reports_dir: PathBuf::from("./reports"),
            workspace_root: PathBuf::from("."),
            bonus_per_contract: Decimal::new(15000, 2),
            error_sample_limit: 10,
            unmatched_sample_limit: 20,
            scheduler_enabled: false,
            rematch_cron: "0 0 6 * * *".to_string(),
            recount_cron: "0 30 6 * * *".to_string(),
        }
    }
}

impl M10Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            archive_dir: std::env::var("M10_ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_dir),
            reports_dir: std::env::var("M10_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reports_dir),
            workspace_root: std::env::var("M10_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            bonus_per_contract: std::env::var("M10_BONUS_PER_CONTRACT")
                .ok()
                .and_then(|v| Decimal::from_str(v.trim()).ok())
                .unwrap_or(defaults.bonus_per_contract),
            error_sample_limit: std::env::var("M10_ERROR_SAMPLE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.error_sample_limit),
            unmatched_sample_limit: std::env::var("M10_UNMATCHED_SAMPLE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.unmatched_sample_limit),
            scheduler_enabled: std::env::var("M10_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            rematch_cron: std::env::var("M10_REMATCH_CRON").unwrap_or(defaults.rematch_cron),
            recount_cron: std::env::var("M10_RECOUNT_CRON").unwrap_or(defaults.recount_cron),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StatusRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    blank_status: Option<InvoiceStatus>,
    #[serde(default)]
    rules: Vec<StatusRule>,
}

/// Loads `rules/fpd_status.yaml` under `root`, or the built-in table when
/// the file does not exist.
pub fn load_status_rules(root: &Path) -> Result<StatusRuleSet> {
    let path = root.join(STATUS_RULES_PATH);
    if !path.exists() {
        debug!(path = %path.display(), "no status rules file, using built-in table");
        return Ok(StatusRuleSet::default());
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let file: StatusRulesFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    if file.rules.is_empty() {
        anyhow::bail!("{} declares no rules", path.display());
    }
    let defaults = StatusRuleSet::default();
    Ok(StatusRuleSet {
        blank_status: file.blank_status.unwrap_or(defaults.blank_status),
        rules: file.rules,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Matched,
    Unmatched,
    Skipped,
    Errored,
}

/// Progress telemetry for ingestion runs, separate from logging.
pub trait IngestObserver: Send + Sync {
    fn on_row(&self, line: usize, outcome: RowOutcome);
    fn on_finish(&self, log: &ImportLog);
}

#[derive(Default)]
pub struct NoopObserver;

impl IngestObserver for NoopObserver {
    fn on_row(&self, _line: usize, _outcome: RowOutcome) {}

    fn on_finish(&self, _log: &ImportLog) {}
}

/// Emits a progress event every `every` rows and a summary at the end.
pub struct TracingObserver {
    every: usize,
}

impl TracingObserver {
    pub fn new(every: usize) -> Self {
        Self { every: every.max(1) }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new(100)
    }
}

impl IngestObserver for TracingObserver {
    fn on_row(&self, line: usize, outcome: RowOutcome) {
        if line % self.every == 0 {
            info!(line, ?outcome, "ingest progress");
        }
    }

    fn on_finish(&self, log: &ImportLog) {
        info!(
            import_id = %log.id,
            status = %log.status,
            total = log.total_rows,
            processed = log.processed_rows,
            skipped = log.skipped_rows,
            errors = log.error_rows,
            matched = log.matched_rows,
            unmatched = log.unmatched_rows,
            "ingest finished"
        );
    }
}

/// Wires the store, configuration and status rules into the engine
/// components.
pub struct M10Engine {
    config: M10Config,
    store: Arc<dyn M10Store>,
    normalizer: StatusNormalizer,
    deriver: ContractDeriver,
    merger: Arc<ReconciliationMerger>,
    ingestor: FeedIngestor,
}

impl M10Engine {
    pub fn new(config: M10Config, store: Arc<dyn M10Store>, rules: StatusRuleSet) -> Self {
        let normalizer = StatusNormalizer::new(rules);
        let deriver = ContractDeriver::new(Arc::clone(&store), BackoffPolicy::default());
        let merger = Arc::new(ReconciliationMerger::new(Arc::clone(&store), normalizer.clone()));
        let ingestor = FeedIngestor::new(Arc::clone(&store), Arc::clone(&merger))
            .with_sample_limits(config.error_sample_limit, config.unmatched_sample_limit);
        Self {
            config,
            store,
            normalizer,
            deriver,
            merger,
            ingestor,
        }
    }

    /// Engine with rules from the configured workspace root.
    pub fn from_config(config: M10Config, store: Arc<dyn M10Store>) -> Result<Self> {
        let rules = load_status_rules(&config.workspace_root)?;
        Ok(Self::new(config, store, rules))
    }

    pub fn with_archive(mut self) -> Self {
        self.ingestor = self.ingestor.with_archive(FeedArchive::new(self.config.archive_dir.clone()));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.ingestor = self.ingestor.with_observer(observer);
        self
    }

    pub fn config(&self) -> &M10Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn M10Store> {
        &self.store
    }

    pub fn normalizer(&self) -> &StatusNormalizer {
        &self.normalizer
    }

    pub fn deriver(&self) -> &ContractDeriver {
        &self.deriver
    }

    pub fn merger(&self) -> &ReconciliationMerger {
        &self.merger
    }

    pub fn ingestor(&self) -> &FeedIngestor {
        &self.ingestor
    }

    pub async fn recount_cohorts(&self, month: Option<chrono::NaiveDate>) -> Result<Vec<CohortRecount>, m10_storage::StoreError> {
        admin::recount_cohorts(self.store.as_ref(), self.config.bonus_per_contract, month).await
    }

    pub async fn apply_churn(
        &self,
        records: &[Result<m10_core::ChurnRecord, m10_feed::RowIssue>],
        dry_run: bool,
    ) -> Result<ChurnSummary, m10_storage::StoreError> {
        admin::apply_churn(self.store.as_ref(), records, dry_run, self.config.bonus_per_contract).await
    }

    pub async fn renormalize_statuses(&self) -> Result<RenormalizeSummary, m10_storage::StoreError> {
        admin::renormalize_statuses(self.store.as_ref(), &self.normalizer).await
    }

    pub async fn purge_all(&self, confirmed: bool) -> Result<m10_storage::PurgeCounts> {
        admin::purge_all(self.store.as_ref(), confirmed).await
    }

    /// Cron jobs for the re-matching pass and cohort recount, when enabled.
    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let merger = Arc::clone(&self.merger);
        let cron = &self.config.rematch_cron;
        let rematch = Job::new_async(cron, move |_uuid, _l| {
            let merger = Arc::clone(&merger);
            Box::pin(async move {
                match merger.rematch_unlinked().await {
                    Ok(summary) => info!(?summary, "scheduled rematch finished"),
                    Err(err) => warn!(error = %err, "scheduled rematch failed"),
                }
            })
        })
        .with_context(|| format!("creating rematch job for cron {cron}"))?;
        sched.add(rematch).await.context("adding rematch job")?;

        let store = Arc::clone(&self.store);
        let bonus = self.config.bonus_per_contract;
        let cron = &self.config.recount_cron;
        let recount = Job::new_async(cron, move |_uuid, _l| {
            let store = Arc::clone(&store);
            Box::pin(async move {
                match admin::recount_cohorts(store.as_ref(), bonus, None).await {
                    Ok(cohorts) => info!(cohorts = cohorts.len(), "scheduled recount finished"),
                    Err(err) => warn!(error = %err, "scheduled recount failed"),
                }
            })
        })
        .with_context(|| format!("creating recount job for cron {cron}"))?;
        sched.add(recount).await.context("adding recount job")?;

        Ok(Some(sched))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use m10_storage::MemoryStore;
    use tempfile::tempdir;

    #[test]
    fn config_defaults_are_sane() {
        let config = M10Config::default();
        assert_eq!(config.bonus_per_contract, Decimal::new(150, 0));
        assert_eq!(config.error_sample_limit, 10);
        assert_eq!(config.unmatched_sample_limit, 20);
        assert!(!config.scheduler_enabled);
    }

    #[test]
    fn missing_rules_file_falls_back_to_builtin_table() {
        let dir = tempdir().unwrap();
        assert_eq!(load_status_rules(dir.path()).unwrap(), StatusRuleSet::default());
    }

    #[test]
    fn yaml_rules_replace_the_builtin_table() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rules")).unwrap();
        std::fs::write(
            dir.path().join(STATUS_RULES_PATH),
            "version: 1\nblank_status: OTHER\nrules:\n  - status: PAID\n    equals_any: [LIQUIDADO]\n",
        )
        .unwrap();

        let rules = load_status_rules(dir.path()).unwrap();
        let normalizer = StatusNormalizer::new(rules);
        assert_eq!(normalizer.normalize(Some("liquidado")), InvoiceStatus::Paid);
        assert_eq!(normalizer.normalize(Some("PAGO")), InvoiceStatus::Other);
        assert_eq!(normalizer.normalize(None), InvoiceStatus::Other);
    }

    #[test]
    fn workspace_rules_file_parses() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let rules = load_status_rules(&root).unwrap();
        let normalizer = StatusNormalizer::new(rules);
        assert_eq!(normalizer.normalize(Some("NAO_PAGO")), InvoiceStatus::Unpaid);
        assert_eq!(normalizer.normalize(Some("PAGA_AGUARDANDO_REPASSE")), InvoiceStatus::Paid);
        assert_eq!(normalizer.normalize(Some("VENCIDO")), InvoiceStatus::Late);
        assert_eq!(normalizer.normalize(Some("AGUARDANDO")), InvoiceStatus::Awaiting);
        assert_eq!(normalizer.normalize(Some("CANCELADA")), InvoiceStatus::Other);
        assert_eq!(normalizer.normalize(Some("")), InvoiceStatus::Unpaid);
    }

    #[tokio::test]
    async fn scheduler_is_off_unless_enabled() {
        let engine = M10Engine::new(
            M10Config::default(),
            Arc::new(MemoryStore::new()),
            StatusRuleSet::default(),
        );
        assert!(engine.maybe_build_scheduler().await.unwrap().is_none());
    }
}
