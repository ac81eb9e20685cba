use std::path::PathBuf;

use chrono::NaiveDate;
use m10_core::FeedRecord;
use m10_feed::{read_churn, read_feed, FeedFormat, RowIssue};
use rust_decimal::Decimal;
use rust_xlsxwriter::Workbook;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/fpd")
        .join(name)
}

#[test]
fn sample_feed_matches_golden_records() {
    let bytes = std::fs::read(fixture("sample.csv")).expect("read sample feed");
    let parsed = read_feed(&bytes, "sample.csv").expect("parse sample feed");

    let records: Vec<FeedRecord> = parsed.rows.iter().filter_map(|r| r.as_ref().ok().cloned()).collect();
    let golden: Vec<FeedRecord> = serde_json::from_str(
        &std::fs::read_to_string(fixture("sample.expected.json")).expect("read golden"),
    )
    .expect("golden json");
    assert_eq!(records, golden);

    let issues: Vec<&RowIssue> = parsed.rows.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0], &RowIssue::MissingOrderKey { line: 4 });
    assert!(matches!(issues[1], RowIssue::Invalid { line: 5, .. }));
}

#[test]
fn workbook_feed_reads_text_keys_and_serial_dates() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in ["NR_ORDEM", "NR_FATURA", "DT_VENC_ORIG", "DS_STATUS_FATURA", "VL_FATURA"]
        .iter()
        .enumerate()
    {
        sheet.write_string(0, col as u16, *name).unwrap();
    }
    sheet.write_string(1, 0, "00012345").unwrap();
    sheet.write_number(1, 1, 1.0).unwrap();
    sheet.write_number(1, 2, 46052.0).unwrap();
    sheet.write_string(1, 3, "PAGO").unwrap();
    sheet.write_number(1, 4, 129.9).unwrap();
    sheet.write_number(2, 0, 4567.0).unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let parsed = read_feed(&bytes, "FPD.xlsx").unwrap();
    assert_eq!(parsed.format, FeedFormat::Xlsx);
    assert_eq!(parsed.rows.len(), 2);

    let first = parsed.rows[0].as_ref().unwrap();
    assert_eq!(first.order_key, "00012345");
    assert_eq!(first.invoice_number, "1");
    assert_eq!(first.due_date, NaiveDate::from_ymd_opt(2026, 1, 30));
    assert_eq!(first.amount, Decimal::new(12990, 2));

    let second = parsed.rows[1].as_ref().unwrap();
    assert_eq!(second.order_key, "4567");
    assert_eq!(second.invoice_number, "");
    assert_eq!(second.status_text, None);
}

#[test]
fn churn_fixture_parses() {
    let bytes = std::fs::read(fixture("churn.csv")).expect("read churn fixture");
    let rows = read_churn(&bytes, "churn.csv").unwrap();
    assert_eq!(rows.len(), 3);
    let first = rows[0].as_ref().unwrap();
    assert_eq!(first.order_key.as_deref(), Some("00012345"));
    assert_eq!(first.reason.as_deref(), Some("INADIMPLENCIA"));
    assert_eq!(rows[1].as_ref().unwrap().reason, None);
    assert_eq!(rows[2].as_ref().unwrap().order_key, None);
}
