//! FPD feed readers: delimited text and spreadsheet workbooks mapped into
//! explicit [`FeedRecord`]s, plus the churn file layout.

use std::fmt;

use m10_core::{ChurnRecord, FeedRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span};

pub mod coerce;
mod table;

pub use table::{decode_text, reader_for_filename, sniff_delimiter, DelimitedReader, FeedReader, WorkbookReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportErrorKind {
    EmptyFile,
    BadFormat,
    Unreadable,
    MissingColumn,
}

impl ImportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyFile => "EMPTY_FILE",
            Self::BadFormat => "BAD_FORMAT",
            Self::Unreadable => "UNREADABLE",
            Self::MissingColumn => "MISSING_COLUMN",
        }
    }
}

/// File-level failures. Any of these aborts the whole import.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed file is empty")]
    EmptyFile,
    #[error("unsupported feed format: {0}")]
    BadFormat(String),
    #[error("feed file could not be read: {0}")]
    Unreadable(String),
    #[error("required column {column} not found (columns: {found})")]
    MissingColumn { column: &'static str, found: String },
}

impl FeedError {
    pub fn kind(&self) -> ImportErrorKind {
        match self {
            Self::EmptyFile => ImportErrorKind::EmptyFile,
            Self::BadFormat(_) => ImportErrorKind::BadFormat,
            Self::Unreadable(_) => ImportErrorKind::Unreadable,
            Self::MissingColumn { .. } => ImportErrorKind::MissingColumn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    Delimited,
    Xlsx,
    Xlsb,
    Xls,
    Ods,
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delimited => "delimited",
            Self::Xlsx => "xlsx",
            Self::Xlsb => "xlsb",
            Self::Xls => "xls",
            Self::Ods => "ods",
        })
    }
}

/// Untyped cell as produced by a reader.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    /// Date-typed spreadsheet cell, as a serial day number.
    Serial(f64),
    Bool(bool),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// First non-blank row as headers, then every non-blank data row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Result<Self, FeedError> {
        let mut rows = rows
            .into_iter()
            .filter(|row| row.iter().any(|cell| !cell.is_blank()));
        let header_row = rows.next().ok_or(FeedError::EmptyFile)?;
        let headers = header_row
            .iter()
            .map(|cell| coerce::cell_text(cell).unwrap_or_default())
            .collect();
        Ok(Self {
            headers,
            rows: rows.collect(),
        })
    }
}

/// Lowercased, trimmed, inner whitespace runs collapsed to `_`.
pub fn normalize_column(name: &str) -> String {
    name.trim()
        .trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

const ORDER_KEY_ALIASES: &[&str] = &["nr_ordem", "ordem", "ordem_servico", "os", "order_key"];
const INVOICE_NUMBER_ALIASES: &[&str] = &["nr_fatura", "fatura", "numero_fatura", "invoice_number"];
const CONTRACT_NUMBER_ALIASES: &[&str] = &["id_contrato", "nr_contrato", "contrato", "contract_number"];
const DUE_DATE_ALIASES: &[&str] = &["dt_venc_orig", "dt_vencimento", "vencimento", "due_date"];
const PAYMENT_DATE_ALIASES: &[&str] = &["dt_pagamento", "data_pagamento", "payment_date"];
const STATUS_ALIASES: &[&str] = &["ds_status_fatura", "status_fatura", "status"];
const AMOUNT_ALIASES: &[&str] = &["vl_fatura", "valor_fatura", "valor", "amount"];
const DAYS_LATE_ALIASES: &[&str] = &["nr_dias_atraso", "dias_atraso", "days_late"];

const CHURN_ORDER_KEY_ALIASES: &[&str] = &["nr_ordem", "numero_pedido", "ordem", "os", "order_key"];
const CHURN_DATE_ALIASES: &[&str] = &["dt_retirada", "data_retirada", "removal_date"];
const CHURN_REASON_ALIASES: &[&str] = &["motivo_retirada", "motivo", "reason"];

fn find_column(normalized: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| normalized.iter().position(|h| h == alias))
}

fn require_column(
    normalized: &[String],
    aliases: &[&str],
    column: &'static str,
    headers: &[String],
) -> Result<usize, FeedError> {
    find_column(normalized, aliases).ok_or_else(|| FeedError::MissingColumn {
        column,
        found: headers.join(", "),
    })
}

/// Column positions resolved once per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedColumns {
    pub order_key: usize,
    pub invoice_number: Option<usize>,
    pub contract_number: Option<usize>,
    pub due_date: Option<usize>,
    pub payment_date: Option<usize>,
    pub status: Option<usize>,
    pub amount: Option<usize>,
    pub days_late: Option<usize>,
}

impl FeedColumns {
    pub fn resolve(headers: &[String]) -> Result<Self, FeedError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_column(h)).collect();
        Ok(Self {
            order_key: require_column(&normalized, ORDER_KEY_ALIASES, "NR_ORDEM", headers)?,
            invoice_number: find_column(&normalized, INVOICE_NUMBER_ALIASES),
            contract_number: find_column(&normalized, CONTRACT_NUMBER_ALIASES),
            due_date: find_column(&normalized, DUE_DATE_ALIASES),
            payment_date: find_column(&normalized, PAYMENT_DATE_ALIASES),
            status: find_column(&normalized, STATUS_ALIASES),
            amount: find_column(&normalized, AMOUNT_ALIASES),
            days_late: find_column(&normalized, DAYS_LATE_ALIASES),
        })
    }
}

/// Why a data row did not become a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowIssue {
    #[error("line {line}: blank order key")]
    MissingOrderKey { line: usize },
    #[error("line {line} ({order_key}): {reason}")]
    Invalid {
        line: usize,
        order_key: String,
        reason: String,
    },
}

impl RowIssue {
    pub fn is_skip(&self) -> bool {
        matches!(self, RowIssue::MissingOrderKey { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    pub columns: FeedColumns,
    /// One entry per non-blank data row, in file order.
    pub rows: Vec<Result<FeedRecord, RowIssue>>,
}

static EMPTY: Cell = Cell::Empty;

fn cell_at(row: &[Cell], idx: Option<usize>) -> &Cell {
    idx.and_then(|i| row.get(i)).unwrap_or(&EMPTY)
}

fn map_feed_row(line: usize, columns: &FeedColumns, row: &[Cell]) -> Result<FeedRecord, RowIssue> {
    let order_key = coerce::cell_text(cell_at(row, Some(columns.order_key)))
        .ok_or(RowIssue::MissingOrderKey { line })?;
    let invalid = |reason: String| RowIssue::Invalid {
        line,
        order_key: order_key.clone(),
        reason,
    };

    let due_date = coerce::parse_date(cell_at(row, columns.due_date))
        .map_err(|e| invalid(format!("due date: {e}")))?;
    let payment_date = coerce::parse_date(cell_at(row, columns.payment_date))
        .map_err(|e| invalid(format!("payment date: {e}")))?;

    let amount_cell = cell_at(row, columns.amount);
    let amount = coerce::parse_amount(amount_cell).unwrap_or_else(|| {
        if !amount_cell.is_blank() {
            debug!(line, ?amount_cell, "unparseable amount, using zero");
        }
        Decimal::ZERO
    });
    let days_late = coerce::parse_days(cell_at(row, columns.days_late)).unwrap_or(0);

    Ok(FeedRecord {
        line,
        invoice_number: coerce::cell_text(cell_at(row, columns.invoice_number)).unwrap_or_default(),
        contract_number: coerce::cell_text(cell_at(row, columns.contract_number)),
        due_date,
        payment_date,
        status_text: coerce::cell_text(cell_at(row, columns.status)),
        amount,
        days_late,
        order_key,
    })
}

fn read_table(bytes: &[u8], filename: &str) -> Result<(FeedFormat, RawTable), FeedError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(FeedError::EmptyFile);
    }
    let reader = reader_for_filename(filename).ok_or_else(|| FeedError::BadFormat(filename.to_string()))?;
    let table = reader.read_table(bytes)?;
    Ok((reader.format(), table))
}

/// Parses an FPD feed. File-level problems are errors; row-level problems
/// come back per row so the caller can count and continue.
pub fn read_feed(bytes: &[u8], filename: &str) -> Result<ParsedFeed, FeedError> {
    let span = info_span!("read_feed", filename);
    let _guard = span.enter();

    let (format, table) = read_table(bytes, filename)?;
    let columns = FeedColumns::resolve(&table.headers)?;
    debug!(%format, rows = table.rows.len(), ?columns, "feed columns resolved");

    let rows = table
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| map_feed_row(idx + 1, &columns, row))
        .collect();
    Ok(ParsedFeed { format, columns, rows })
}

/// Parses a churn file into records. Blank keys are kept (as `None`) so
/// the caller can count them.
pub fn read_churn(bytes: &[u8], filename: &str) -> Result<Vec<Result<ChurnRecord, RowIssue>>, FeedError> {
    let (_, table) = read_table(bytes, filename)?;
    let normalized: Vec<String> = table.headers.iter().map(|h| normalize_column(h)).collect();
    let key_col = require_column(&normalized, CHURN_ORDER_KEY_ALIASES, "NR_ORDEM", &table.headers)?;
    let date_col = find_column(&normalized, CHURN_DATE_ALIASES);
    let reason_col = find_column(&normalized, CHURN_REASON_ALIASES);

    Ok(table
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| -> Result<ChurnRecord, RowIssue> {
            let line = idx + 1;
            let order_key = coerce::cell_text(cell_at(row, Some(key_col)));
            let removal_date = coerce::parse_date(cell_at(row, date_col)).map_err(|e| RowIssue::Invalid {
                line,
                order_key: order_key.clone().unwrap_or_default(),
                reason: format!("removal date: {e}"),
            })?;
            Ok(ChurnRecord {
                line,
                order_key,
                removal_date,
                reason: coerce::cell_text(cell_at(row, reason_col)),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const FEED: &str = "\
NR_ORDEM;NR_FATURA;ID_CONTRATO;DT_VENC_ORIG;DT_PAGAMENTO;DS_STATUS_FATURA;VL_FATURA;NR_DIAS_ATRASO
00012345;FAT001;C-77;30/01/2026;;ABERTO;1.000,00;0
;FAT002;;30/01/2026;;PAGO;10,00;0
TEST123;FAT003;;99/99/2026;;PAGO;10,00;0
TEST124;FAT004;;2026-01-30;2026-02-02;PAGO;abc;3
";

    #[test]
    fn column_names_are_normalized() {
        assert_eq!(normalize_column("  DT  VENC ORIG "), "dt_venc_orig");
        assert_eq!(normalize_column("NR_ORDEM"), "nr_ordem");
    }

    #[test]
    fn feed_rows_map_into_records() {
        let parsed = read_feed(FEED.as_bytes(), "fpd.csv").unwrap();
        assert_eq!(parsed.format, FeedFormat::Delimited);
        assert_eq!(parsed.rows.len(), 4);

        let first = parsed.rows[0].as_ref().unwrap();
        assert_eq!(first.order_key, "00012345");
        assert_eq!(first.invoice_number, "FAT001");
        assert_eq!(first.contract_number.as_deref(), Some("C-77"));
        assert_eq!(first.due_date, NaiveDate::from_ymd_opt(2026, 1, 30));
        assert_eq!(first.payment_date, None);
        assert_eq!(first.amount, Decimal::new(100000, 2));

        assert_eq!(parsed.rows[1], Err(RowIssue::MissingOrderKey { line: 2 }));
        assert!(matches!(
            &parsed.rows[2],
            Err(RowIssue::Invalid { line: 3, order_key, .. }) if order_key == "TEST123"
        ));

        let last = parsed.rows[3].as_ref().unwrap();
        assert_eq!(last.amount, Decimal::ZERO);
        assert_eq!(last.days_late, 3);
    }

    #[test]
    fn missing_order_key_column_is_a_file_error() {
        let err = read_feed(b"NR_FATURA;VL_FATURA\nF1;10\n", "fpd.csv").unwrap_err();
        assert_eq!(err.kind(), ImportErrorKind::MissingColumn);
        assert!(err.to_string().contains("NR_FATURA"));
    }

    #[test]
    fn empty_and_unknown_files_are_rejected() {
        assert_eq!(read_feed(b"", "fpd.csv").unwrap_err().kind(), ImportErrorKind::EmptyFile);
        assert_eq!(read_feed(b" \n\n", "fpd.csv").unwrap_err().kind(), ImportErrorKind::EmptyFile);
        assert_eq!(read_feed(b"a;b\n", "fpd.pdf").unwrap_err().kind(), ImportErrorKind::BadFormat);
        assert_eq!(
            read_feed(b"not a workbook", "fpd.xlsx").unwrap_err().kind(),
            ImportErrorKind::Unreadable
        );
    }

    #[test]
    fn churn_rows_keep_blank_keys() {
        let rows = read_churn(
            b"NUMERO_PEDIDO,DT_RETIRADA,MOTIVO_RETIRADA\n123,15/03/2026,\n,15/03/2026,Mudanca\n",
            "churn.csv",
        )
        .unwrap();
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.order_key.as_deref(), Some("123"));
        assert_eq!(first.removal_date, NaiveDate::from_ymd_opt(2026, 3, 15));
        assert_eq!(first.reason, None);
        assert_eq!(rows[1].as_ref().unwrap().order_key, None);
    }
}
