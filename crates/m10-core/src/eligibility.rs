//! Bonus eligibility and cohort aggregation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Contract, ContractStatus, Invoice, InvoiceStatus, INVOICE_COUNT};

/// Eligible when all ten invoices are paid and the contract is still active
/// without a downgrade.
pub fn is_bonus_eligible(contract: &Contract, invoices: &[Invoice]) -> bool {
    let paid = invoices
        .iter()
        .filter(|i| i.contract_id == contract.id && i.status == InvoiceStatus::Paid)
        .count();
    paid == usize::from(INVOICE_COUNT)
        && !contract.downgraded
        && contract.status == ContractStatus::Active
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CohortTotals {
    pub total_installed: i64,
    pub total_active: i64,
    pub total_eligible: i64,
    pub total_bonus_value: Decimal,
}

impl CohortTotals {
    /// Full re-aggregation over `(contract, eligible)` pairs of one cohort.
    pub fn aggregate<'a>(
        contracts: impl IntoIterator<Item = (&'a Contract, bool)>,
        bonus_per_contract: Decimal,
    ) -> Self {
        let mut totals = Self::default();
        for (contract, eligible) in contracts {
            totals.total_installed += 1;
            if contract.status == ContractStatus::Active {
                totals.total_active += 1;
            }
            if eligible {
                totals.total_eligible += 1;
            }
        }
        totals.total_bonus_value = bonus_per_contract * Decimal::from(totals.total_eligible);
        totals
    }
}
