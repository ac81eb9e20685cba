//! FPD file ingestion: parse, upsert feed rows, first-pass reconcile.

use std::sync::Arc;

use chrono::Utc;
use m10_core::{FeedRow, ImportLog};
use m10_feed::{read_feed, FeedError, ImportErrorKind, RowIssue};
use m10_storage::{FeedArchive, M10Store, StoreError};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::merge::ReconciliationMerger;
use crate::{IngestObserver, NoopObserver, RowOutcome};

/// Progress is persisted on the import log every this many rows.
const PROGRESS_SAVE_EVERY: usize = 500;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{}: {source}", .kind.as_str())]
    Import {
        kind: ImportErrorKind,
        #[source]
        source: FeedError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<FeedError> for IngestError {
    fn from(source: FeedError) -> Self {
        IngestError::Import {
            kind: source.kind(),
            source,
        }
    }
}

pub struct FeedIngestor {
    store: Arc<dyn M10Store>,
    merger: Arc<ReconciliationMerger>,
    archive: Option<FeedArchive>,
    observer: Arc<dyn IngestObserver>,
    error_sample_limit: usize,
    unmatched_sample_limit: usize,
}

impl FeedIngestor {
    pub fn new(store: Arc<dyn M10Store>, merger: Arc<ReconciliationMerger>) -> Self {
        Self {
            store,
            merger,
            archive: None,
            observer: Arc::new(NoopObserver),
            error_sample_limit: 10,
            unmatched_sample_limit: 20,
        }
    }

    pub fn with_archive(mut self, archive: FeedArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_sample_limits(mut self, errors: usize, unmatched: usize) -> Self {
        self.error_sample_limit = errors;
        self.unmatched_sample_limit = unmatched;
        self
    }

    /// Ingests one feed file. File-level failures are recorded on an ERROR
    /// import log and returned; row-level failures only show up in the
    /// returned log's counters and samples.
    pub async fn ingest(&self, bytes: &[u8], filename: &str) -> Result<ImportLog, IngestError> {
        let mut log = ImportLog::start(filename, bytes.len(), Utc::now());
        log.content_hash = Some(FeedArchive::sha256_hex(bytes));
        let span = info_span!("feed_ingest", import_id = %log.id, filename);
        self.run(&mut log, bytes, filename).instrument(span).await?;
        Ok(log)
    }

    async fn run(&self, log: &mut ImportLog, bytes: &[u8], filename: &str) -> Result<(), IngestError> {
        self.store.save_import_log(log).await?;

        let parsed = match read_feed(bytes, filename) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "feed file rejected");
                log.fail(format!("{}: {err}", err.kind().as_str()), Utc::now());
                self.store.save_import_log(log).await?;
                self.observer.on_finish(log);
                return Err(err.into());
            }
        };

        if let Some(archive) = &self.archive {
            match archive.store_bytes(filename, bytes).await {
                Ok(stored) => debug!(
                    path = %stored.relative_path.display(),
                    deduplicated = stored.deduplicated,
                    "feed file archived"
                ),
                Err(err) => warn!(error = %err, "feed archive write failed"),
            }
        }

        log.total_rows = parsed.rows.len() as i64;
        info!(format = %parsed.format, rows = log.total_rows, "feed parsed");

        for (idx, row) in parsed.rows.iter().enumerate() {
            let outcome = match row {
                Err(issue) => self.record_issue(log, issue),
                Ok(record) => {
                    let line = record.line;
                    let candidate = FeedRow::from_record(record, Some(log.id), Utc::now());
                    match self.store.upsert_feed_row(&candidate).await {
                        Err(err) => {
                            self.record_error(log, format!("line {line} ({}): {err}", record.order_key));
                            RowOutcome::Errored
                        }
                        Ok(stored) => match self.merger.reconcile(&stored).await {
                            Err(err) => {
                                self.record_error(log, format!("line {line} ({}): {err}", record.order_key));
                                RowOutcome::Errored
                            }
                            Ok(result) => {
                                log.processed_rows += 1;
                                log.total_amount += stored.amount;
                                if result.matched {
                                    log.matched_rows += 1;
                                    RowOutcome::Matched
                                } else {
                                    log.unmatched_rows += 1;
                                    if log.unmatched_sample.len() < self.unmatched_sample_limit
                                        && !log.unmatched_sample.contains(&stored.order_key)
                                    {
                                        log.unmatched_sample.push(stored.order_key.clone());
                                    }
                                    RowOutcome::Unmatched
                                }
                            }
                        },
                    }
                }
            };

            let line = match row {
                Ok(record) => record.line,
                Err(RowIssue::MissingOrderKey { line } | RowIssue::Invalid { line, .. }) => *line,
            };
            self.observer.on_row(line, outcome);

            if (idx + 1) % PROGRESS_SAVE_EVERY == 0 {
                self.store.save_import_log(log).await?;
            }
        }

        log.finish(Utc::now());
        self.store.save_import_log(log).await?;
        self.observer.on_finish(log);
        info!(
            status = %log.status,
            processed = log.processed_rows,
            skipped = log.skipped_rows,
            errors = log.error_rows,
            matched = log.matched_rows,
            unmatched = log.unmatched_rows,
            total_amount = %log.total_amount,
            "feed ingest finished"
        );
        Ok(())
    }

    fn record_issue(&self, log: &mut ImportLog, issue: &RowIssue) -> RowOutcome {
        if issue.is_skip() {
            log.skipped_rows += 1;
            debug!(%issue, "row skipped");
            RowOutcome::Skipped
        } else {
            self.record_error(log, issue.to_string());
            RowOutcome::Errored
        }
    }

    fn record_error(&self, log: &mut ImportLog, message: String) {
        warn!(%message, "feed row failed");
        log.error_rows += 1;
        if log.error_sample.len() < self.error_sample_limit {
            log.error_sample.push(message);
        }
    }
}
