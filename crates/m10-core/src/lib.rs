//! Core domain model for M-10 bonus tracking: cohorts, contracts, scheduled
//! invoices, ingested feed rows and import logs, plus the pure rules that
//! operate on them (order-key normalization, invoice scheduling, status
//! normalization, bonus eligibility).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod eligibility;
pub mod order_key;
pub mod schedule;
pub mod status;

pub use schedule::INVOICE_COUNT;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    #[default]
    Active,
    Canceled,
    Downgraded,
}

text_enum!(ContractStatus, "contract status", {
    Active => "ACTIVE",
    Canceled => "CANCELED",
    Downgraded => "DOWNGRADED",
});

/// Closed invoice status vocabulary. Raw feed text is mapped onto this by
/// [`status::StatusNormalizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Paid,
    #[default]
    Unpaid,
    Awaiting,
    Late,
    Other,
}

text_enum!(InvoiceStatus, "invoice status", {
    Paid => "PAID",
    Unpaid => "UNPAID",
    Awaiting => "AWAITING",
    Late => "LATE",
    Other => "OTHER",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Processing,
    Success,
    Partial,
    Error,
}

text_enum!(ImportStatus, "import status", {
    Processing => "PROCESSING",
    Success => "SUCCESS",
    Partial => "PARTIAL",
    Error => "ERROR",
});

/// Read-only view of an upstream sale, as handed to contract derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sale_id: i64,
    #[serde(default)]
    pub order_key: Option<String>,
    pub installation_date: NaiveDate,
    pub customer_name: String,
    #[serde(default)]
    pub customer_tax_id: Option<String>,
    #[serde(default)]
    pub plan_name: Option<String>,
    #[serde(default)]
    pub plan_value: Option<Decimal>,
    #[serde(default)]
    pub salesperson_id: Option<i64>,
    pub installed: bool,
}

/// One calendar month of installations ("safra").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub id: Uuid,
    /// Always the first day of the month.
    pub month: NaiveDate,
    pub total_installed: i64,
    pub total_active: i64,
    pub total_eligible: i64,
    pub total_bonus_value: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cohort {
    pub fn new(month: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            month: first_of_month(month),
            total_installed: 0,
            total_active: 0,
            total_eligible: 0,
            total_bonus_value: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Raw feed values mirrored onto a contract for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractFeedShadow {
    pub definitive_contract_number: Option<String>,
    pub status_text: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub days_late: Option<i32>,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub contract_number: String,
    pub order_key: String,
    pub cohort_id: Uuid,
    pub sale_id: Option<i64>,
    pub customer_name: String,
    pub customer_tax_id: Option<String>,
    pub salesperson_id: Option<i64>,
    pub installation_date: NaiveDate,
    pub original_plan: String,
    pub current_plan: String,
    pub plan_value: Decimal,
    pub status: ContractStatus,
    pub downgraded: bool,
    pub cancellation_date: Option<NaiveDate>,
    pub cancellation_reason: Option<String>,
    pub bonus_eligible: bool,
    pub notes: Option<String>,
    pub feed: ContractFeedShadow,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw feed values mirrored onto invoice #1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InvoiceFeedShadow {
    pub contract_number: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub status_text: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub contract_id: Uuid,
    /// 1..=10
    pub seq: i32,
    pub due_date: NaiveDate,
    pub availability_date: NaiveDate,
    pub amount: Decimal,
    pub status: InvoiceStatus,
    pub days_late: i32,
    pub payment_date: Option<NaiveDate>,
    pub operator_invoice_number: Option<String>,
    pub feed: InvoiceFeedShadow,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parsed feed row handed from the feed readers into ingestion. Identifier
/// fields are opaque text exactly as read (trimmed), never numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRecord {
    /// 1-based data row number within the source file.
    pub line: usize,
    pub order_key: String,
    pub invoice_number: String,
    pub contract_number: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub status_text: Option<String>,
    pub amount: Decimal,
    pub days_late: i32,
}

/// Persisted feed row, unique on (`order_key`, `invoice_number`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRow {
    pub id: Uuid,
    pub order_key: String,
    pub invoice_number: String,
    pub contract_number: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub status_text: Option<String>,
    pub amount: Decimal,
    pub days_late: i32,
    pub contract_id: Option<Uuid>,
    pub import_id: Option<Uuid>,
    pub imported_at: DateTime<Utc>,
}

impl FeedRow {
    pub fn from_record(record: &FeedRecord, import_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_key: record.order_key.clone(),
            invoice_number: record.invoice_number.clone(),
            contract_number: record.contract_number.clone(),
            due_date: record.due_date,
            payment_date: record.payment_date,
            status_text: record.status_text.clone(),
            amount: record.amount,
            days_late: record.days_late,
            contract_id: None,
            import_id,
            imported_at: now,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.contract_id.is_some()
    }
}

/// Churn/cancellation record read from an operator churn file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChurnRecord {
    pub line: usize,
    pub order_key: Option<String>,
    pub removal_date: Option<NaiveDate>,
    pub reason: Option<String>,
}

/// Observational record of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportLog {
    pub id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub content_hash: Option<String>,
    pub status: ImportStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub skipped_rows: i64,
    pub error_rows: i64,
    pub matched_rows: i64,
    pub unmatched_rows: i64,
    pub unmatched_sample: Vec<String>,
    pub error_sample: Vec<String>,
    pub total_amount: Decimal,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl ImportLog {
    pub fn start(filename: impl Into<String>, file_size: usize, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            file_size: file_size as i64,
            content_hash: None,
            status: ImportStatus::Processing,
            total_rows: 0,
            processed_rows: 0,
            skipped_rows: 0,
            error_rows: 0,
            matched_rows: 0,
            unmatched_rows: 0,
            unmatched_sample: Vec::new(),
            error_sample: Vec::new(),
            total_amount: Decimal::ZERO,
            message: None,
            started_at: now,
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Terminal status from the accumulated counters: SUCCESS when nothing
    /// errored or went unmatched, ERROR when no row was processed at all,
    /// PARTIAL otherwise.
    pub fn resolve_status(&self) -> ImportStatus {
        if self.processed_rows == 0 {
            ImportStatus::Error
        } else if self.error_rows == 0 && self.unmatched_rows == 0 {
            ImportStatus::Success
        } else {
            ImportStatus::Partial
        }
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.status = self.resolve_status();
        if self.status == ImportStatus::Error && self.message.is_none() {
            self.message = Some(format!(
                "no usable rows: {} total, {} skipped without order key, {} errored",
                self.total_rows, self.skipped_rows, self.error_rows
            ));
        }
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0));
    }

    /// Marks a file-level failure. No rows were committed for this run.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = ImportStatus::Error;
        self.message = Some(message.into());
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0));
    }
}
