use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use m10_core::eligibility::CohortTotals;
use m10_core::{first_of_month, Cohort, Contract, FeedRow, ImportLog, Invoice, InvoiceStatus};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{M10Store, MatchCommit, PurgeCounts, StoreError};

/// In-process store with the same uniqueness rules as the SQL schema. One
/// lock guards all tables, so every call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    cohorts: HashMap<Uuid, Cohort>,
    contracts: HashMap<Uuid, Contract>,
    invoices: HashMap<Uuid, Invoice>,
    feed_rows: HashMap<Uuid, FeedRow>,
    import_logs: HashMap<Uuid, ImportLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contract_count(&self) -> usize {
        self.state.lock().await.contracts.len()
    }

    pub async fn feed_rows(&self) -> Vec<FeedRow> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state.feed_rows.values().cloned().collect();
        rows.sort_by(|a, b| (&a.order_key, &a.invoice_number).cmp(&(&b.order_key, &b.invoice_number)));
        rows
    }
}

impl MemoryState {
    fn contract_mut(&mut self, id: Uuid) -> Result<&mut Contract, StoreError> {
        self.contracts.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "contract",
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl M10Store for MemoryStore {
    async fn cohort_for_month(&self, month: NaiveDate) -> Result<Cohort, StoreError> {
        let month = first_of_month(month);
        let mut state = self.state.lock().await;
        if let Some(existing) = state.cohorts.values().find(|c| c.month == month) {
            return Ok(existing.clone());
        }
        let cohort = Cohort::new(month, Utc::now());
        state.cohorts.insert(cohort.id, cohort.clone());
        Ok(cohort)
    }

    async fn list_cohorts(&self) -> Result<Vec<Cohort>, StoreError> {
        let state = self.state.lock().await;
        let mut cohorts: Vec<_> = state.cohorts.values().cloned().collect();
        cohorts.sort_by_key(|c| c.month);
        Ok(cohorts)
    }

    async fn save_cohort_totals(
        &self,
        cohort_id: Uuid,
        totals: &CohortTotals,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let cohort = state.cohorts.get_mut(&cohort_id).ok_or_else(|| StoreError::NotFound {
            entity: "cohort",
            id: cohort_id.to_string(),
        })?;
        cohort.total_installed = totals.total_installed;
        cohort.total_active = totals.total_active;
        cohort.total_eligible = totals.total_eligible;
        cohort.total_bonus_value = totals.total_bonus_value;
        cohort.updated_at = now;
        Ok(())
    }

    async fn contract_by_order_key(&self, order_key: &str) -> Result<Option<Contract>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .contracts
            .values()
            .find(|c| c.order_key == order_key)
            .cloned())
    }

    async fn contract_by_id(&self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        Ok(self.state.lock().await.contracts.get(&id).cloned())
    }

    async fn contracts_in_cohort(&self, cohort_id: Uuid) -> Result<Vec<Contract>, StoreError> {
        let state = self.state.lock().await;
        let mut contracts: Vec<_> = state
            .contracts
            .values()
            .filter(|c| c.cohort_id == cohort_id)
            .cloned()
            .collect();
        contracts.sort_by(|a, b| a.order_key.cmp(&b.order_key));
        Ok(contracts)
    }

    async fn insert_contract(&self, contract: &Contract, invoices: &[Invoice]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.contracts.values().any(|c| c.order_key == contract.order_key) {
            return Err(StoreError::Conflict(format!(
                "contract with order key {} already exists",
                contract.order_key
            )));
        }
        if state
            .contracts
            .values()
            .any(|c| c.contract_number == contract.contract_number)
        {
            return Err(StoreError::Conflict(format!(
                "contract number {} already exists",
                contract.contract_number
            )));
        }
        for (idx, invoice) in invoices.iter().enumerate() {
            if invoices[..idx].iter().any(|other| other.seq == invoice.seq) {
                return Err(StoreError::Conflict(format!(
                    "duplicate invoice seq {} for contract {}",
                    invoice.seq, contract.id
                )));
            }
        }

        state.contracts.insert(contract.id, contract.clone());
        for invoice in invoices {
            state.invoices.insert(invoice.id, invoice.clone());
        }
        Ok(())
    }

    async fn relink_contract_sale(
        &self,
        contract_id: Uuid,
        sale_id: i64,
        customer_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let contract = state.contract_mut(contract_id)?;
        contract.sale_id = Some(sale_id);
        contract.customer_name = customer_name.to_string();
        contract.updated_at = now;
        Ok(())
    }

    async fn save_contract_lifecycle(&self, contract: &Contract) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.contract_mut(contract.id)?;
        stored.status = contract.status;
        stored.downgraded = contract.downgraded;
        stored.current_plan = contract.current_plan.clone();
        stored.cancellation_date = contract.cancellation_date;
        stored.cancellation_reason = contract.cancellation_reason.clone();
        stored.bonus_eligible = contract.bonus_eligible;
        stored.notes = contract.notes.clone();
        stored.updated_at = contract.updated_at;
        Ok(())
    }

    async fn invoices_for_contract(&self, contract_id: Uuid) -> Result<Vec<Invoice>, StoreError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<_> = state
            .invoices
            .values()
            .filter(|i| i.contract_id == contract_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.seq);
        Ok(invoices)
    }

    async fn feed_synced_invoices(&self) -> Result<Vec<Invoice>, StoreError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<_> = state
            .invoices
            .values()
            .filter(|i| i.feed.status_text.is_some())
            .cloned()
            .collect();
        invoices.sort_by_key(|i| (i.contract_id, i.seq));
        Ok(invoices)
    }

    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let invoice = state.invoices.get_mut(&invoice_id).ok_or_else(|| StoreError::NotFound {
            entity: "invoice",
            id: invoice_id.to_string(),
        })?;
        invoice.status = status;
        invoice.updated_at = now;
        Ok(())
    }

    async fn upsert_feed_row(&self, row: &FeedRow) -> Result<FeedRow, StoreError> {
        let mut state = self.state.lock().await;
        let existing = state
            .feed_rows
            .values_mut()
            .find(|r| r.order_key == row.order_key && r.invoice_number == row.invoice_number);

        if let Some(existing) = existing {
            existing.contract_number = row.contract_number.clone();
            existing.due_date = row.due_date;
            existing.payment_date = row.payment_date;
            existing.status_text = row.status_text.clone();
            existing.amount = row.amount;
            existing.days_late = row.days_late;
            existing.import_id = row.import_id;
            existing.imported_at = row.imported_at;
            return Ok(existing.clone());
        }

        state.feed_rows.insert(row.id, row.clone());
        Ok(row.clone())
    }

    async fn unlinked_feed_rows(&self) -> Result<Vec<FeedRow>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .feed_rows
            .values()
            .filter(|r| r.contract_id.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.imported_at);
        Ok(rows)
    }

    async fn commit_match(&self, commit: &MatchCommit) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        // Validate everything before mutating so a failure leaves no partial write.
        if !state.feed_rows.contains_key(&commit.feed_row_id) {
            return Err(StoreError::NotFound {
                entity: "feed row",
                id: commit.feed_row_id.to_string(),
            });
        }
        state.contract_mut(commit.contract_id)?;

        let existing_invoice = state
            .invoices
            .values()
            .find(|i| i.contract_id == commit.contract_id && i.seq == commit.invoice.seq)
            .map(|i| (i.id, i.created_at));
        let mut invoice = commit.invoice.clone();
        invoice.contract_id = commit.contract_id;
        if let Some((id, created_at)) = existing_invoice {
            invoice.id = id;
            invoice.created_at = created_at;
        }
        state.invoices.insert(invoice.id, invoice);

        if let Some(row) = state.feed_rows.get_mut(&commit.feed_row_id) {
            row.contract_id = Some(commit.contract_id);
        }

        let contract = state.contract_mut(commit.contract_id)?;
        let definitive = contract
            .feed
            .definitive_contract_number
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| commit.contract_feed.definitive_contract_number.clone());
        contract.feed = commit.contract_feed.clone();
        contract.feed.definitive_contract_number = definitive;
        contract.updated_at = commit.now;
        Ok(())
    }

    async fn save_import_log(&self, log: &ImportLog) -> Result<(), StoreError> {
        self.state.lock().await.import_logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn import_log(&self, id: Uuid) -> Result<Option<ImportLog>, StoreError> {
        Ok(self.state.lock().await.import_logs.get(&id).cloned())
    }

    async fn purge_all(&self) -> Result<PurgeCounts, StoreError> {
        let mut state = self.state.lock().await;
        let counts = PurgeCounts {
            invoices: state.invoices.len() as u64,
            feed_rows: state.feed_rows.len() as u64,
            contracts: state.contracts.len() as u64,
            cohorts: state.cohorts.len() as u64,
            import_logs: state.import_logs.len() as u64,
        };
        *state = MemoryState::default();
        Ok(counts)
    }
}
