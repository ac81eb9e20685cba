//! Contract derivation from installed sales.

use std::sync::Arc;

use chrono::Utc;
use m10_core::schedule::{self, ScheduleError};
use m10_core::{Contract, ContractFeedShadow, ContractStatus, Invoice, InvoiceFeedShadow, InvoiceStatus, SaleRecord};
use m10_storage::{classify_store_error, BackoffPolicy, M10Store, RetryDisposition, StoreError};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("sale {sale_id} has no order key")]
    MissingOrderKey { sale_id: i64 },
    #[error("sale {sale_id} is not installed")]
    NotInstalled { sale_id: i64 },
}

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("order key {0} still conflicting after retries")]
    ConflictExhausted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeriveOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct Derived {
    pub contract: Contract,
    pub outcome: DeriveOutcome,
}

pub struct ContractDeriver {
    store: Arc<dyn M10Store>,
    backoff: BackoffPolicy,
}

impl ContractDeriver {
    pub fn new(store: Arc<dyn M10Store>, backoff: BackoffPolicy) -> Self {
        Self { store, backoff }
    }

    /// Creates the contract for `sale` with its ten invoices, or refreshes
    /// the sale link and customer name of the existing one. Lookup is by the
    /// exact (trimmed) order key.
    pub async fn derive(&self, sale: &SaleRecord) -> Result<Derived, DeriveError> {
        let order_key = sale
            .order_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ValidationError::MissingOrderKey { sale_id: sale.sale_id })?;
        if !sale.installed {
            return Err(ValidationError::NotInstalled { sale_id: sale.sale_id }.into());
        }

        for attempt in 0..=self.backoff.max_retries {
            if let Some(existing) = self.store.contract_by_order_key(order_key).await? {
                let now = Utc::now();
                self.store
                    .relink_contract_sale(existing.id, sale.sale_id, &sale.customer_name, now)
                    .await?;
                debug!(order_key, sale_id = sale.sale_id, "contract relinked to sale");
                let contract = Contract {
                    sale_id: Some(sale.sale_id),
                    customer_name: sale.customer_name.clone(),
                    updated_at: now,
                    ..existing
                };
                return Ok(Derived {
                    contract,
                    outcome: DeriveOutcome::Updated,
                });
            }

            let (contract, invoices) = self.build(sale, order_key).await?;
            match self.store.insert_contract(&contract, &invoices).await {
                Ok(()) => {
                    info!(
                        order_key,
                        contract_number = %contract.contract_number,
                        installation_date = %contract.installation_date,
                        "contract created"
                    );
                    return Ok(Derived {
                        contract,
                        outcome: DeriveOutcome::Created,
                    });
                }
                Err(err)
                    if classify_store_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries =>
                {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(order_key, attempt, ?delay, error = %err, "contract insert lost a race, re-reading");
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::Conflict(_)) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Err(DeriveError::ConflictExhausted(order_key.to_string()))
    }

    async fn build(&self, sale: &SaleRecord, order_key: &str) -> Result<(Contract, Vec<Invoice>), DeriveError> {
        let now = Utc::now();
        let cohort = self.store.cohort_for_month(sale.installation_date).await?;
        let plan = sale.plan_name.clone().unwrap_or_default();
        let plan_value = sale.plan_value.unwrap_or(Decimal::ZERO);

        let contract = Contract {
            id: Uuid::new_v4(),
            contract_number: format!("{}-{}", sale.sale_id, order_key),
            order_key: order_key.to_string(),
            cohort_id: cohort.id,
            sale_id: Some(sale.sale_id),
            customer_name: sale.customer_name.clone(),
            customer_tax_id: sale.customer_tax_id.clone(),
            salesperson_id: sale.salesperson_id,
            installation_date: sale.installation_date,
            original_plan: plan.clone(),
            current_plan: plan,
            plan_value,
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

        let invoices = schedule::schedule(sale.installation_date)?
            .into_iter()
            .map(|slot| Invoice {
                id: Uuid::new_v4(),
                contract_id: contract.id,
                seq: i32::from(slot.seq),
                due_date: slot.due_date,
                availability_date: slot.availability_date,
                amount: plan_value,
                status: InvoiceStatus::Unpaid,
                days_late: 0,
                payment_date: None,
                operator_invoice_number: None,
                feed: InvoiceFeedShadow::default(),
                created_at: now,
                updated_at: now,
            })
            .collect();
        Ok((contract, invoices))
    }
}
