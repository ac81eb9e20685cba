use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use m10_core::status::StatusRuleSet;
use m10_core::{ImportStatus, InvoiceStatus, SaleRecord};
use m10_storage::{M10Store, MemoryStore};
use m10_sync::report::write_import_report;
use m10_sync::{DeriveOutcome, M10Config, M10Engine};
use rust_decimal::Decimal;
use tempfile::tempdir;

fn fixture(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures").join(rel)
}

fn engine(store: Arc<MemoryStore>, root: &std::path::Path) -> M10Engine {
    let config = M10Config {
        archive_dir: root.join("archive"),
        reports_dir: root.join("reports"),
        ..M10Config::default()
    };
    M10Engine::new(config, store, StatusRuleSet::default()).with_archive()
}

async fn derive_fixture_sales(engine: &M10Engine) -> Vec<DeriveOutcome> {
    let sales: Vec<SaleRecord> =
        serde_json::from_str(&std::fs::read_to_string(fixture("sales/installed.json")).unwrap()).unwrap();
    let mut outcomes = Vec::new();
    for sale in &sales {
        if let Ok(derived) = engine.deriver().derive(sale).await {
            outcomes.push(derived.outcome);
        }
    }
    outcomes
}

#[tokio::test]
async fn derive_ingest_rematch_and_recount() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone(), dir.path());

    let outcomes = derive_fixture_sales(&engine).await;
    assert_eq!(outcomes, vec![DeriveOutcome::Created; 3]);

    let day29 = store.contract_by_order_key("99").await.unwrap().unwrap();
    let invoices = store.invoices_for_contract(day29.id).await.unwrap();
    assert_eq!(invoices[0].due_date, NaiveDate::from_ymd_opt(2026, 1, 26).unwrap());
    assert_eq!(invoices[1].due_date, NaiveDate::from_ymd_opt(2026, 2, 26).unwrap());

    let bytes = std::fs::read(fixture("fpd/sample.csv")).unwrap();
    let log = engine.ingestor().ingest(&bytes, "sample.csv").await.unwrap();
    assert_eq!(log.status, ImportStatus::Partial);
    assert_eq!(log.matched_rows, 3);
    assert_eq!(log.unmatched_rows, 1);
    assert_eq!(log.unmatched_sample, vec!["00098765".to_string()]);

    let test123 = store.contract_by_order_key("TEST123").await.unwrap().unwrap();
    let first = &store.invoices_for_contract(test123.id).await.unwrap()[0];
    assert_eq!(first.status, InvoiceStatus::Unpaid);
    assert_eq!(first.amount, Decimal::new(100000, 2));
    assert_eq!(first.due_date, NaiveDate::from_ymd_opt(2026, 1, 30).unwrap());

    let paid = store.contract_by_order_key("12345").await.unwrap().unwrap();
    assert_eq!(paid.feed.definitive_contract_number.as_deref(), Some("C-1001"));
    let first = &store.invoices_for_contract(paid.id).await.unwrap()[0];
    assert_eq!(first.status, InvoiceStatus::Paid);
    assert_eq!(first.payment_date, NaiveDate::from_ymd_opt(2026, 1, 28));

    let summary = engine.merger().rematch_unlinked().await.unwrap();
    assert_eq!((summary.examined, summary.matched), (1, 0));

    let recounts = engine.recount_cohorts(None).await.unwrap();
    let months: Vec<NaiveDate> = recounts.iter().map(|r| r.month).collect();
    assert_eq!(
        months,
        vec![
            NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
        ]
    );
    assert_eq!(recounts[0].totals.total_installed, 2);
    assert_eq!(recounts[0].totals.total_eligible, 0);

    let report = write_import_report(&engine.config().reports_dir, &log).await.unwrap();
    assert!(report.join("import_summary.md").exists());
    assert!(report.join("import_log.json").exists());

    let archived = dir
        .path()
        .join("archive")
        .join(m10_storage::FeedArchive::relative_path_for(
            log.content_hash.as_deref().unwrap(),
            "sample.csv",
        ));
    assert!(archived.exists());
}

#[tokio::test]
async fn churn_file_cancels_through_the_engine() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone(), dir.path());
    derive_fixture_sales(&engine).await;

    let bytes = std::fs::read(fixture("fpd/churn.csv")).unwrap();
    let records = m10_feed::read_churn(&bytes, "churn.csv").unwrap();

    let dry = engine.apply_churn(&records, true).await.unwrap();
    assert_eq!(dry.canceled, 1);
    let summary = engine.apply_churn(&records, false).await.unwrap();
    assert_eq!(summary.canceled, 1);
    assert_eq!(summary.missing_key, 1);

    let canceled = store.contract_by_order_key("12345").await.unwrap().unwrap();
    assert_eq!(canceled.status, m10_core::ContractStatus::Canceled);
    assert_eq!(canceled.cancellation_reason.as_deref(), Some("INADIMPLENCIA"));

    let counts = engine.purge_all(true).await.unwrap();
    assert_eq!(counts.contracts, 3);
    assert_eq!(counts.invoices, 30);
}
