//! Administrative passes over stored contracts: cohort recount, churn,
//! status re-normalization and purge.

use std::collections::BTreeSet;

use anyhow::bail;
use chrono::{NaiveDate, Utc};
use m10_core::eligibility::{is_bonus_eligible, CohortTotals};
use m10_core::status::StatusNormalizer;
use m10_core::{first_of_month, ChurnRecord, ContractStatus};
use m10_feed::RowIssue;
use m10_storage::{M10Store, PurgeCounts, StoreError};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::merge::find_contract;

const DEFAULT_CHURN_REASON: &str = "CHURN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CohortRecount {
    pub cohort_id: Uuid,
    pub month: NaiveDate,
    pub totals: CohortTotals,
    /// Contracts whose eligibility flag flipped during this pass.
    pub flags_changed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChurnSummary {
    pub total: usize,
    pub canceled: usize,
    pub already_canceled: usize,
    pub not_found: usize,
    pub missing_key: usize,
    pub errors: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenormalizeSummary {
    pub examined: usize,
    pub changed: usize,
}

/// Re-evaluates every contract's eligibility and rewrites the cohort totals
/// from scratch. `month` narrows the pass to one cohort; a month without a
/// cohort yields nothing.
pub async fn recount_cohorts(
    store: &dyn M10Store,
    bonus_per_contract: Decimal,
    month: Option<NaiveDate>,
) -> Result<Vec<CohortRecount>, StoreError> {
    let wanted = month.map(first_of_month);
    let cohorts = store.list_cohorts().await?;
    let mut out = Vec::new();

    for cohort in cohorts.into_iter().filter(|c| wanted.map_or(true, |m| c.month == m)) {
        let mut contracts = store.contracts_in_cohort(cohort.id).await?;
        let mut flags_changed = 0;
        for contract in contracts.iter_mut() {
            let invoices = store.invoices_for_contract(contract.id).await?;
            let eligible = is_bonus_eligible(contract, &invoices);
            if eligible != contract.bonus_eligible {
                contract.bonus_eligible = eligible;
                contract.updated_at = Utc::now();
                store.save_contract_lifecycle(contract).await?;
                flags_changed += 1;
            }
        }

        let totals = CohortTotals::aggregate(
            contracts.iter().map(|c| (c, c.bonus_eligible)),
            bonus_per_contract,
        );
        store.save_cohort_totals(cohort.id, &totals, Utc::now()).await?;
        debug!(month = %cohort.month, ?totals, flags_changed, "cohort recounted");
        out.push(CohortRecount {
            cohort_id: cohort.id,
            month: cohort.month,
            totals,
            flags_changed,
        });
    }

    info!(cohorts = out.len(), "cohort recount finished");
    Ok(out)
}

/// Cancels the contracts named by a churn file. Nothing is written on a dry
/// run; the summary still reports what would have changed.
pub async fn apply_churn(
    store: &dyn M10Store,
    records: &[Result<ChurnRecord, RowIssue>],
    dry_run: bool,
    bonus_per_contract: Decimal,
) -> Result<ChurnSummary, StoreError> {
    let mut summary = ChurnSummary {
        total: records.len(),
        dry_run,
        ..Default::default()
    };
    let mut touched_months = BTreeSet::new();
    let today = Utc::now().date_naive();

    for record in records {
        let record = match record {
            Ok(record) => record,
            Err(issue) => {
                summary.errors += 1;
                warn!(%issue, "churn row rejected");
                continue;
            }
        };
        let Some(key) = record.order_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) else {
            summary.missing_key += 1;
            continue;
        };
        let Some(mut contract) = find_contract(store, key).await? else {
            summary.not_found += 1;
            debug!(order_key = key, line = record.line, "churn key has no contract");
            continue;
        };
        if contract.status == ContractStatus::Canceled {
            summary.already_canceled += 1;
            continue;
        }

        summary.canceled += 1;
        if dry_run {
            info!(order_key = key, contract = %contract.contract_number, "would cancel contract");
            continue;
        }

        contract.status = ContractStatus::Canceled;
        contract.cancellation_date = Some(record.removal_date.unwrap_or(today));
        contract.cancellation_reason = Some(
            record
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(DEFAULT_CHURN_REASON)
                .to_string(),
        );
        contract.bonus_eligible = false;
        contract.updated_at = Utc::now();
        if let Err(err) = store.save_contract_lifecycle(&contract).await {
            summary.canceled -= 1;
            summary.errors += 1;
            warn!(order_key = key, error = %err, "churn cancellation failed");
            continue;
        }
        touched_months.insert(first_of_month(contract.installation_date));
        info!(
            order_key = key,
            contract = %contract.contract_number,
            reason = contract.cancellation_reason.as_deref().unwrap_or_default(),
            "contract canceled by churn"
        );
    }

    for month in touched_months {
        recount_cohorts(store, bonus_per_contract, Some(month)).await?;
    }

    info!(?summary, "churn applied");
    Ok(summary)
}

/// Recomputes the canonical status of every feed-touched invoice from its
/// stored raw text under the current rule table.
pub async fn renormalize_statuses(
    store: &dyn M10Store,
    normalizer: &StatusNormalizer,
) -> Result<RenormalizeSummary, StoreError> {
    let invoices = store.feed_synced_invoices().await?;
    let mut summary = RenormalizeSummary {
        examined: invoices.len(),
        changed: 0,
    };
    for invoice in &invoices {
        let status = normalizer.normalize(invoice.feed.status_text.as_deref());
        if status != invoice.status {
            store.update_invoice_status(invoice.id, status, Utc::now()).await?;
            debug!(invoice = %invoice.id, from = %invoice.status, to = %status, "invoice status renormalized");
            summary.changed += 1;
        }
    }
    info!(?summary, "status renormalization finished");
    Ok(summary)
}

pub async fn purge_all(store: &dyn M10Store, confirmed: bool) -> anyhow::Result<PurgeCounts> {
    if !confirmed {
        bail!("purge deletes every M-10 record and needs explicit confirmation");
    }
    let counts = store.purge_all().await?;
    warn!(?counts, "all M-10 records purged");
    Ok(counts)
}
