//! Operator-facing reports written after an ingestion run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use m10_core::ImportLog;
use tokio::fs;

/// Writes `<reports_dir>/<import_id>/import_summary.md` and
/// `import_log.json`, returning the report directory.
pub async fn write_import_report(reports_dir: &Path, log: &ImportLog) -> Result<PathBuf> {
    let dir = reports_dir.join(log.id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    fs::write(dir.join("import_summary.md"), render_summary(log))
        .await
        .context("writing import_summary.md")?;

    let json = serde_json::to_vec_pretty(log).context("serializing import log")?;
    fs::write(dir.join("import_log.json"), json)
        .await
        .context("writing import_log.json")?;

    Ok(dir)
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- none".to_string();
    }
    items.iter().map(|i| format!("- `{i}`")).collect::<Vec<_>>().join("\n")
}

fn render_summary(log: &ImportLog) -> String {
    let finished = log
        .finished_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let message = log
        .message
        .as_deref()
        .map(|m| format!("\n> {m}\n"))
        .unwrap_or_default();

    format!(
        "# FPD Import {status}\n{message}\n\
         - Import ID: `{id}`\n\
         - File: `{filename}` ({size} bytes)\n\
         - SHA-256: `{hash}`\n\
         - Started: {started}\n\
         - Finished: {finished}\n\
         - Duration: {duration} ms\n\n\
         ## Rows\n\n\
         | total | processed | matched | unmatched | skipped | errors |\n\
         |---|---|---|---|---|---|\n\
         | {total} | {processed} | {matched} | {unmatched} | {skipped} | {errors} |\n\n\
         Total amount: {amount}\n\n\
         ## Unmatched order keys (sample)\n\n{unmatched_sample}\n\n\
         ## Row errors (sample)\n\n{error_sample}\n",
        status = log.status,
        id = log.id,
        filename = log.filename,
        size = log.file_size,
        hash = log.content_hash.as_deref().unwrap_or("-"),
        started = log.started_at.to_rfc3339(),
        duration = log.duration_ms.unwrap_or_default(),
        total = log.total_rows,
        processed = log.processed_rows,
        matched = log.matched_rows,
        unmatched = log.unmatched_rows,
        skipped = log.skipped_rows,
        errors = log.error_rows,
        amount = log.total_amount,
        unmatched_sample = bullet_list(&log.unmatched_sample),
        error_sample = bullet_list(&log.error_sample),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use m10_core::ImportStatus;
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_summary_and_json() {
        let dir = tempdir().unwrap();
        let mut log = ImportLog::start("FPD_JAN.xlsx", 2048, Utc::now());
        log.total_rows = 3;
        log.processed_rows = 2;
        log.matched_rows = 1;
        log.unmatched_rows = 1;
        log.error_rows = 1;
        log.unmatched_sample = vec!["TEST123".into()];
        log.error_sample = vec!["line 3 (777): bad date".into()];
        log.total_amount = Decimal::new(112990, 2);
        log.finish(Utc::now());

        let out = write_import_report(dir.path(), &log).await.unwrap();
        assert_eq!(out, dir.path().join(log.id.to_string()));

        let summary = std::fs::read_to_string(out.join("import_summary.md")).unwrap();
        assert!(summary.starts_with("# FPD Import PARTIAL"));
        assert!(summary.contains("| 3 | 2 | 1 | 1 | 0 | 1 |"));
        assert!(summary.contains("- `TEST123`"));
        assert!(summary.contains("Total amount: 1129.90"));

        let json: ImportLog =
            serde_json::from_slice(&std::fs::read(out.join("import_log.json")).unwrap()).unwrap();
        assert_eq!(json.status, ImportStatus::Partial);
        assert_eq!(json, log);
    }
}
