//! Feed-row to contract reconciliation.

use std::sync::Arc;

use chrono::Utc;
use m10_core::schedule::{self, ScheduleError};
use m10_core::status::StatusNormalizer;
use m10_core::{order_key, Contract, ContractFeedShadow, FeedRow, Invoice, InvoiceFeedShadow};
use m10_storage::{M10Store, MatchCommit, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    pub contract_id: Option<Uuid>,
}

impl MatchResult {
    fn unmatched() -> Self {
        Self {
            matched: false,
            contract_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RematchSummary {
    pub examined: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub errors: usize,
}

/// Tries the order-key variants in order and returns the first contract
/// found. Blank keys never match.
pub async fn find_contract(store: &dyn M10Store, raw_key: &str) -> Result<Option<Contract>, StoreError> {
    for variant in order_key::variants(raw_key) {
        if let Some(contract) = store.contract_by_order_key(&variant).await? {
            return Ok(Some(contract));
        }
    }
    Ok(None)
}

pub struct ReconciliationMerger {
    store: Arc<dyn M10Store>,
    normalizer: StatusNormalizer,
}

impl ReconciliationMerger {
    pub fn new(store: Arc<dyn M10Store>, normalizer: StatusNormalizer) -> Self {
        Self { store, normalizer }
    }

    /// Links `row` to its contract and merges the feed values into invoice
    /// #1 and the contract shadow fields. An unresolved key is a normal
    /// outcome, not an error.
    pub async fn reconcile(&self, row: &FeedRow) -> Result<MatchResult, MergeError> {
        let Some(contract) = find_contract(self.store.as_ref(), &row.order_key).await? else {
            debug!(order_key = %row.order_key, invoice = %row.invoice_number, "no contract for feed row");
            return Ok(MatchResult::unmatched());
        };

        let now = Utc::now();
        let first = self
            .store
            .invoices_for_contract(contract.id)
            .await?
            .into_iter()
            .find(|i| i.seq == 1);
        let mut invoice = match first {
            Some(invoice) => invoice,
            None => first_invoice_for(&contract, now)?,
        };

        if let Some(due) = row.due_date {
            invoice.due_date = due;
        }
        invoice.operator_invoice_number = Some(row.invoice_number.clone()).filter(|n| !n.is_empty());
        invoice.payment_date = row.payment_date;
        invoice.days_late = row.days_late;
        invoice.amount = row.amount;
        invoice.status = self.normalizer.normalize(row.status_text.as_deref());
        invoice.feed = InvoiceFeedShadow {
            contract_number: row.contract_number.clone(),
            payment_date: row.payment_date,
            status_text: row.status_text.clone(),
            synced_at: Some(now),
        };
        invoice.updated_at = now;

        let contract_feed = ContractFeedShadow {
            definitive_contract_number: row.contract_number.clone(),
            status_text: row.status_text.clone(),
            due_date: row.due_date,
            payment_date: row.payment_date,
            amount: Some(row.amount),
            days_late: Some(row.days_late),
            synced_at: Some(now),
        };

        let status = invoice.status;
        self.store
            .commit_match(&MatchCommit {
                feed_row_id: row.id,
                contract_id: contract.id,
                invoice,
                contract_feed,
                now,
            })
            .await?;
        debug!(
            order_key = %row.order_key,
            contract = %contract.order_key,
            %status,
            "feed row merged into invoice #1"
        );

        Ok(MatchResult {
            matched: true,
            contract_id: Some(contract.id),
        })
    }

    /// Retries every feed row that has no contract yet, without re-reading
    /// the source file.
    pub async fn rematch_unlinked(&self) -> Result<RematchSummary, StoreError> {
        let rows = self.store.unlinked_feed_rows().await?;
        let mut summary = RematchSummary {
            examined: rows.len(),
            ..Default::default()
        };
        for row in &rows {
            match self.reconcile(row).await {
                Ok(result) if result.matched => summary.matched += 1,
                Ok(_) => summary.unmatched += 1,
                Err(err) => {
                    summary.errors += 1;
                    warn!(order_key = %row.order_key, invoice = %row.invoice_number, error = %err, "rematch failed");
                }
            }
        }
        info!(?summary, "rematch pass finished");
        Ok(summary)
    }
}

fn first_invoice_for(contract: &Contract, now: chrono::DateTime<Utc>) -> Result<Invoice, ScheduleError> {
    Ok(Invoice {
        id: Uuid::new_v4(),
        contract_id: contract.id,
        seq: 1,
        due_date: schedule::due_date(contract.installation_date, 1)?,
        availability_date: schedule::availability_date(contract.installation_date, 1)?,
        amount: contract.plan_value,
        status: Default::default(),
        days_late: 0,
        payment_date: None,
        operator_invoice_number: None,
        feed: InvoiceFeedShadow::default(),
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use m10_core::{ContractStatus, FeedRecord, InvoiceStatus};
    use m10_storage::{BackoffPolicy, MemoryStore};
    use rust_decimal::Decimal;

    use crate::derive::ContractDeriver;
    use crate::testing::sale;

    fn feed_row(order_key: &str, invoice: &str, contract_number: Option<&str>, status: &str) -> FeedRow {
        FeedRow::from_record(
            &FeedRecord {
                line: 1,
                order_key: order_key.into(),
                invoice_number: invoice.into(),
                contract_number: contract_number.map(str::to_string),
                due_date: NaiveDate::from_ymd_opt(2026, 1, 30),
                payment_date: None,
                status_text: Some(status.into()),
                amount: Decimal::new(12990, 2),
                days_late: 2,
            },
            None,
            Utc::now(),
        )
    }

    fn setup() -> (Arc<MemoryStore>, ContractDeriver, ReconciliationMerger) {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn M10Store> = store.clone();
        (
            store,
            ContractDeriver::new(Arc::clone(&dyn_store), BackoffPolicy::default()),
            ReconciliationMerger::new(dyn_store, StatusNormalizer::default()),
        )
    }

    #[tokio::test]
    async fn variants_bridge_zero_padding_and_prefixes() {
        let (store, deriver, _) = setup();
        let padded = deriver.derive(&sale(1, Some("00012345"), 3)).await.unwrap().contract;
        let tail = deriver.derive(&sale(2, Some("99"), 3)).await.unwrap().contract;

        let hit = find_contract(store.as_ref(), "12345.0").await.unwrap().unwrap();
        assert_eq!(hit.id, padded.id);
        let hit = find_contract(store.as_ref(), "777-99").await.unwrap().unwrap();
        assert_eq!(hit.id, tail.id);
        assert!(find_contract(store.as_ref(), "  ").await.unwrap().is_none());
        assert!(find_contract(store.as_ref(), "ABC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn match_updates_invoice_one_and_shadow_fields() {
        let (store, deriver, merger) = setup();
        let contract = deriver.derive(&sale(1, Some("555"), 3)).await.unwrap().contract;
        let row = store.upsert_feed_row(&feed_row("555", "FAT9", Some("CT-1"), "VENCIDO")).await.unwrap();

        let result = merger.reconcile(&row).await.unwrap();
        assert_eq!(
            result,
            MatchResult {
                matched: true,
                contract_id: Some(contract.id)
            }
        );

        let invoices = store.invoices_for_contract(contract.id).await.unwrap();
        assert_eq!(invoices.len(), 10);
        let first = &invoices[0];
        assert_eq!(first.status, InvoiceStatus::Late);
        assert_eq!(first.feed.status_text.as_deref(), Some("VENCIDO"));
        assert_eq!(first.operator_invoice_number.as_deref(), Some("FAT9"));
        assert_eq!(first.amount, Decimal::new(12990, 2));
        assert_eq!(first.days_late, 2);
        assert_eq!(first.due_date, NaiveDate::from_ymd_opt(2026, 1, 30).unwrap());
        assert!(invoices[1..].iter().all(|i| i.feed.status_text.is_none()));

        let stored = store.contract_by_id(contract.id).await.unwrap().unwrap();
        assert_eq!(stored.feed.definitive_contract_number.as_deref(), Some("CT-1"));
        assert_eq!(stored.feed.amount, Some(Decimal::new(12990, 2)));
    }

    #[tokio::test]
    async fn definitive_contract_number_is_first_writer_wins() {
        let (store, deriver, merger) = setup();
        let contract = deriver.derive(&sale(1, Some("555"), 3)).await.unwrap().contract;

        let first = store.upsert_feed_row(&feed_row("555", "F1", Some("CT-1"), "ABERTO")).await.unwrap();
        merger.reconcile(&first).await.unwrap();
        let second = store.upsert_feed_row(&feed_row("555", "F1", Some("CT-2"), "PAGO")).await.unwrap();
        merger.reconcile(&second).await.unwrap();

        let stored = store.contract_by_id(contract.id).await.unwrap().unwrap();
        assert_eq!(stored.feed.definitive_contract_number.as_deref(), Some("CT-1"));
        assert_eq!(stored.feed.status_text.as_deref(), Some("PAGO"));
        let invoices = store.invoices_for_contract(contract.id).await.unwrap();
        assert_eq!(invoices[0].status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn unlinked_rows_are_picked_up_by_rematch() {
        let (store, deriver, merger) = setup();
        let row = store.upsert_feed_row(&feed_row("00000777", "F1", None, "PAGO")).await.unwrap();
        assert!(!merger.reconcile(&row).await.unwrap().matched);

        let summary = merger.rematch_unlinked().await.unwrap();
        assert_eq!(summary, RematchSummary { examined: 1, matched: 0, unmatched: 1, errors: 0 });

        deriver.derive(&sale(9, Some("777"), 12)).await.unwrap();
        let summary = merger.rematch_unlinked().await.unwrap();
        assert_eq!(summary.matched, 1);
        assert!(store.unlinked_feed_rows().await.unwrap().is_empty());
    }

    /// A contract stored without its invoice schedule.
    async fn bare_contract(store: &MemoryStore, order_key: &str) -> Contract {
        let installed = NaiveDate::from_ymd_opt(2025, 12, 3).unwrap();
        let cohort = store.cohort_for_month(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()).await.unwrap();
        let now = Utc::now();
        let contract = Contract {
            id: Uuid::new_v4(),
            contract_number: format!("M10-{order_key}"),
            order_key: order_key.into(),
            cohort_id: cohort.id,
            sale_id: None,
            customer_name: "Cliente".into(),
            customer_tax_id: None,
            salesperson_id: None,
            installation_date: installed,
            original_plan: "FIBRA 500".into(),
            current_plan: "FIBRA 500".into(),
            plan_value: Decimal::new(9990, 2),
            status: ContractStatus::Active,
            downgraded: false,
            cancellation_date: None,
            cancellation_reason: None,
            bonus_eligible: false,
            notes: None,
            feed: ContractFeedShadow::default(),
            created_at: now,
            updated_at: now,
        };
        store.insert_contract(&contract, &[]).await.unwrap();
        contract
    }

    #[tokio::test]
    async fn match_creates_invoice_one_when_contract_has_none() {
        let (store, _, merger) = setup();
        let contract = bare_contract(&store, "777").await;
        let row = store.upsert_feed_row(&feed_row("777", "FAT1", Some("CT-7"), "VENCIDO")).await.unwrap();

        assert!(merger.reconcile(&row).await.unwrap().matched);

        let invoices = store.invoices_for_contract(contract.id).await.unwrap();
        assert_eq!(invoices.len(), 1);
        let first = &invoices[0];
        assert_eq!(first.seq, 1);
        assert_eq!(first.contract_id, contract.id);
        assert_eq!(first.status, InvoiceStatus::Late);
        assert_eq!(first.amount, Decimal::new(12990, 2));
        assert_eq!(first.due_date, NaiveDate::from_ymd_opt(2026, 1, 30).unwrap());
        assert_eq!(
            first.availability_date,
            schedule::availability_date(contract.installation_date, 1).unwrap()
        );
        assert_eq!(first.operator_invoice_number.as_deref(), Some("FAT1"));
        assert_eq!(first.days_late, 2);
        assert_eq!(first.feed.contract_number.as_deref(), Some("CT-7"));
        assert_eq!(first.feed.status_text.as_deref(), Some("VENCIDO"));

        // A second row for the same contract updates that invoice in place.
        let again = store.upsert_feed_row(&feed_row("777", "FAT2", None, "PAGO")).await.unwrap();
        merger.reconcile(&again).await.unwrap();
        let invoices = store.invoices_for_contract(contract.id).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].id, first.id);
        assert_eq!(invoices[0].status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn created_invoice_one_keeps_scheduled_due_date_without_feed_date() {
        let (store, _, merger) = setup();
        let contract = bare_contract(&store, "778").await;
        let mut row = feed_row("778", "FAT1", None, "ABERTO");
        row.due_date = None;
        let row = store.upsert_feed_row(&row).await.unwrap();

        merger.reconcile(&row).await.unwrap();

        let invoices = store.invoices_for_contract(contract.id).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].due_date, schedule::due_date(contract.installation_date, 1).unwrap());
        assert_eq!(invoices[0].status, InvoiceStatus::Unpaid);
        assert_eq!(invoices[0].amount, Decimal::new(12990, 2));
    }
}
