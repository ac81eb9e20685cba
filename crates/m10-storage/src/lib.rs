//! Persistence for the M-10 reconciliation engine: the `M10Store` contract,
//! its in-memory and PostgreSQL implementations, and a content-addressed
//! archive for ingested feed files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use m10_core::eligibility::CohortTotals;
use m10_core::{Cohort, Contract, ContractFeedShadow, FeedRow, ImportLog, Invoice, InvoiceStatus};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write; another writer got there first.
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("corrupt {table} row: {detail}")]
    Corrupt { table: &'static str, detail: String },
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            if db.is_unique_violation() {
                return StoreError::Conflict(db.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

/// Everything written when a feed row resolves to a contract. Implementations
/// apply it atomically: the feed-row link, the invoice #1 upsert and the
/// contract shadow update commit or roll back together.
#[derive(Debug, Clone)]
pub struct MatchCommit {
    pub feed_row_id: Uuid,
    pub contract_id: Uuid,
    /// Desired state of invoice #1, upserted on (`contract_id`, `seq`).
    pub invoice: Invoice,
    /// New shadow values. `definitive_contract_number` only fills an empty slot.
    pub contract_feed: ContractFeedShadow,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeCounts {
    pub invoices: u64,
    pub feed_rows: u64,
    pub contracts: u64,
    pub cohorts: u64,
    pub import_logs: u64,
}

#[async_trait]
pub trait M10Store: Send + Sync {
    /// Cohort for the month containing `month`, created on first use.
    async fn cohort_for_month(&self, month: NaiveDate) -> Result<Cohort, StoreError>;
    async fn list_cohorts(&self) -> Result<Vec<Cohort>, StoreError>;
    async fn save_cohort_totals(
        &self,
        cohort_id: Uuid,
        totals: &CohortTotals,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Exact-match lookup; no normalization happens at this layer.
    async fn contract_by_order_key(&self, order_key: &str) -> Result<Option<Contract>, StoreError>;
    async fn contract_by_id(&self, id: Uuid) -> Result<Option<Contract>, StoreError>;
    async fn contracts_in_cohort(&self, cohort_id: Uuid) -> Result<Vec<Contract>, StoreError>;
    /// Inserts a contract together with its invoices. Fails with
    /// [`StoreError::Conflict`] when the order key or contract number exists.
    async fn insert_contract(&self, contract: &Contract, invoices: &[Invoice]) -> Result<(), StoreError>;
    async fn relink_contract_sale(
        &self,
        contract_id: Uuid,
        sale_id: i64,
        customer_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    /// Rewrites lifecycle fields (status, cancellation, downgrade, eligibility, notes).
    async fn save_contract_lifecycle(&self, contract: &Contract) -> Result<(), StoreError>;

    async fn invoices_for_contract(&self, contract_id: Uuid) -> Result<Vec<Invoice>, StoreError>;
    /// Invoices carrying raw feed status text.
    async fn feed_synced_invoices(&self) -> Result<Vec<Invoice>, StoreError>;
    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Upserts on (`order_key`, `invoice_number`) and returns the stored row.
    /// An existing row keeps its id and contract link.
    async fn upsert_feed_row(&self, row: &FeedRow) -> Result<FeedRow, StoreError>;
    async fn unlinked_feed_rows(&self) -> Result<Vec<FeedRow>, StoreError>;
    async fn commit_match(&self, commit: &MatchCommit) -> Result<(), StoreError>;

    async fn save_import_log(&self, log: &ImportLog) -> Result<(), StoreError>;
    async fn import_log(&self, id: Uuid) -> Result<Option<ImportLog>, StoreError>;

    /// Deletes every core record. Irreversible.
    async fn purge_all(&self) -> Result<PurgeCounts, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Conflicts and dropped connections are worth another attempt; everything
/// else is reported as-is.
pub fn classify_store_error(err: &StoreError) -> RetryDisposition {
    match err {
        StoreError::Conflict(_) => RetryDisposition::Retryable,
        StoreError::Database(
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed,
        ) => RetryDisposition::Retryable,
        _ => RetryDisposition::NonRetryable,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct StoredFeedFile {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Content-addressed archive of ingested feed files, so every import log can
/// be traced back to the exact bytes that produced it.
#[derive(Debug, Clone)]
pub struct FeedArchive {
    root: PathBuf,
}

impl FeedArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn relative_path_for(content_hash: &str, filename: &str) -> PathBuf {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "bin".to_string());
        let shard = content_hash.get(..2).unwrap_or("00");
        PathBuf::from(shard).join(format!("{content_hash}.{ext}"))
    }

    /// Archives `bytes` under their hash. A file that is already present is
    /// left untouched and reported as deduplicated; a new one is staged next
    /// to its final name and renamed into place.
    pub async fn store_bytes(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<StoredFeedFile> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = Self::relative_path_for(&content_hash, filename);
        let mut stored = StoredFeedFile {
            absolute_path: self.root.join(&relative_path),
            content_hash,
            relative_path,
            byte_size: bytes.len(),
            deduplicated: true,
        };
        let target = &stored.absolute_path;
        if fs::try_exists(target).await.unwrap_or(false) {
            return Ok(stored);
        }

        if let Some(shard) = target.parent() {
            fs::create_dir_all(shard)
                .await
                .with_context(|| format!("creating archive shard {}", shard.display()))?;
        }
        let staging = target.with_extension(format!("{}.part", Uuid::new_v4().simple()));
        fs::write(&staging, bytes)
            .await
            .with_context(|| format!("staging {}", staging.display()))?;
        if let Err(err) = fs::rename(&staging, target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err).with_context(|| format!("archiving {}", target.display()));
        }

        stored.deduplicated = false;
        Ok(stored)
    }
}
