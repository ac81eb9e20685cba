use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use m10_core::eligibility::CohortTotals;
use m10_core::{
    first_of_month, Cohort, Contract, ContractFeedShadow, FeedRow, ImportLog, Invoice,
    InvoiceFeedShadow, InvoiceStatus,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{M10Store, MatchCommit, PurgeCounts, StoreError};

const CONTRACT_COLUMNS: &str = r#"
    id, contract_number, order_key, cohort_id, sale_id, customer_name, customer_tax_id,
    salesperson_id, installation_date, original_plan, current_plan, plan_value, status,
    downgraded, cancellation_date, cancellation_reason, bonus_eligible, notes,
    fpd_contract_number, fpd_status_text, fpd_due_date, fpd_payment_date, fpd_amount,
    fpd_days_late, fpd_synced_at, created_at, updated_at
"#;

const INVOICE_COLUMNS: &str = r#"
    id, contract_id, seq, due_date, availability_date, amount, status, days_late,
    payment_date, operator_invoice_number, fpd_contract_number, fpd_payment_date,
    fpd_status_text, fpd_synced_at, created_at, updated_at
"#;

const FEED_ROW_COLUMNS: &str = r#"
    id, order_key, invoice_number, contract_number, due_date, payment_date, status_text,
    amount, days_late, contract_id, import_id, imported_at
"#;

const COHORT_COLUMNS: &str = r#"
    id, month, total_installed, total_active, total_eligible, total_bonus_value,
    created_at, updated_at
"#;

/// PostgreSQL-backed store. Uniqueness lives in the schema; violations
/// surface as [`StoreError::Conflict`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("m10 schema migrations applied");
        Ok(())
    }
}

fn corrupt(table: &'static str) -> impl Fn(m10_core::UnknownVariant) -> StoreError {
    move |err| StoreError::Corrupt {
        table,
        detail: err.to_string(),
    }
}

fn cohort_from_row(row: &PgRow) -> Result<Cohort, StoreError> {
    Ok(Cohort {
        id: row.try_get("id")?,
        month: row.try_get("month")?,
        total_installed: row.try_get("total_installed")?,
        total_active: row.try_get("total_active")?,
        total_eligible: row.try_get("total_eligible")?,
        total_bonus_value: row.try_get("total_bonus_value")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn contract_from_row(row: &PgRow) -> Result<Contract, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Contract {
        id: row.try_get("id")?,
        contract_number: row.try_get("contract_number")?,
        order_key: row.try_get("order_key")?,
        cohort_id: row.try_get("cohort_id")?,
        sale_id: row.try_get("sale_id")?,
        customer_name: row.try_get("customer_name")?,
        customer_tax_id: row.try_get("customer_tax_id")?,
        salesperson_id: row.try_get("salesperson_id")?,
        installation_date: row.try_get("installation_date")?,
        original_plan: row.try_get("original_plan")?,
        current_plan: row.try_get("current_plan")?,
        plan_value: row.try_get("plan_value")?,
        status: status.parse().map_err(corrupt("m10_contracts"))?,
        downgraded: row.try_get("downgraded")?,
        cancellation_date: row.try_get("cancellation_date")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        bonus_eligible: row.try_get("bonus_eligible")?,
        notes: row.try_get("notes")?,
        feed: ContractFeedShadow {
            definitive_contract_number: row.try_get("fpd_contract_number")?,
            status_text: row.try_get("fpd_status_text")?,
            due_date: row.try_get("fpd_due_date")?,
            payment_date: row.try_get("fpd_payment_date")?,
            amount: row.try_get("fpd_amount")?,
            days_late: row.try_get("fpd_days_late")?,
            synced_at: row.try_get("fpd_synced_at")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn invoice_from_row(row: &PgRow) -> Result<Invoice, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Invoice {
        id: row.try_get("id")?,
        contract_id: row.try_get("contract_id")?,
        seq: row.try_get("seq")?,
        due_date: row.try_get("due_date")?,
        availability_date: row.try_get("availability_date")?,
        amount: row.try_get("amount")?,
        status: status.parse().map_err(corrupt("m10_invoices"))?,
        days_late: row.try_get("days_late")?,
        payment_date: row.try_get("payment_date")?,
        operator_invoice_number: row.try_get("operator_invoice_number")?,
        feed: InvoiceFeedShadow {
            contract_number: row.try_get("fpd_contract_number")?,
            payment_date: row.try_get("fpd_payment_date")?,
            status_text: row.try_get("fpd_status_text")?,
            synced_at: row.try_get("fpd_synced_at")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn feed_row_from_row(row: &PgRow) -> Result<FeedRow, StoreError> {
    Ok(FeedRow {
        id: row.try_get("id")?,
        order_key: row.try_get("order_key")?,
        invoice_number: row.try_get("invoice_number")?,
        contract_number: row.try_get("contract_number")?,
        due_date: row.try_get("due_date")?,
        payment_date: row.try_get("payment_date")?,
        status_text: row.try_get("status_text")?,
        amount: row.try_get("amount")?,
        days_late: row.try_get("days_late")?,
        contract_id: row.try_get("contract_id")?,
        import_id: row.try_get("import_id")?,
        imported_at: row.try_get("imported_at")?,
    })
}

fn import_log_from_row(row: &PgRow) -> Result<ImportLog, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(ImportLog {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        file_size: row.try_get("file_size")?,
        content_hash: row.try_get("content_hash")?,
        status: status.parse().map_err(corrupt("m10_import_logs"))?,
        total_rows: row.try_get("total_rows")?,
        processed_rows: row.try_get("processed_rows")?,
        skipped_rows: row.try_get("skipped_rows")?,
        error_rows: row.try_get("error_rows")?,
        matched_rows: row.try_get("matched_rows")?,
        unmatched_rows: row.try_get("unmatched_rows")?,
        unmatched_sample: row.try_get("unmatched_sample")?,
        error_sample: row.try_get("error_sample")?,
        total_amount: row.try_get("total_amount")?,
        message: row.try_get("message")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}

#[async_trait]
impl M10Store for PgStore {
    async fn cohort_for_month(&self, month: NaiveDate) -> Result<Cohort, StoreError> {
        let fresh = Cohort::new(first_of_month(month), Utc::now());
        sqlx::query(
            r#"
            INSERT INTO m10_cohorts (id, month, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (month) DO NOTHING
            "#,
        )
        .bind(fresh.id)
        .bind(fresh.month)
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {COHORT_COLUMNS} FROM m10_cohorts WHERE month = $1"
        ))
        .bind(fresh.month)
        .fetch_one(&self.pool)
        .await?;
        cohort_from_row(&row)
    }

    async fn list_cohorts(&self) -> Result<Vec<Cohort>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COHORT_COLUMNS} FROM m10_cohorts ORDER BY month"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(cohort_from_row).collect()
    }

    async fn save_cohort_totals(
        &self,
        cohort_id: Uuid,
        totals: &CohortTotals,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE m10_cohorts
               SET total_installed = $2,
                   total_active = $3,
                   total_eligible = $4,
                   total_bonus_value = $5,
                   updated_at = $6
             WHERE id = $1
            "#,
        )
        .bind(cohort_id)
        .bind(totals.total_installed)
        .bind(totals.total_active)
        .bind(totals.total_eligible)
        .bind(totals.total_bonus_value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "cohort",
                id: cohort_id.to_string(),
            });
        }
        Ok(())
    }

    async fn contract_by_order_key(&self, order_key: &str) -> Result<Option<Contract>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM m10_contracts WHERE order_key = $1"
        ))
        .bind(order_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(contract_from_row).transpose()
    }

    async fn contract_by_id(&self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM m10_contracts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(contract_from_row).transpose()
    }

    async fn contracts_in_cohort(&self, cohort_id: Uuid) -> Result<Vec<Contract>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM m10_contracts WHERE cohort_id = $1 ORDER BY order_key"
        ))
        .bind(cohort_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(contract_from_row).collect()
    }

    async fn insert_contract(&self, contract: &Contract, invoices: &[Invoice]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO m10_contracts (
                id, contract_number, order_key, cohort_id, sale_id, customer_name,
                customer_tax_id, salesperson_id, installation_date, original_plan,
                current_plan, plan_value, status, downgraded, cancellation_date,
                cancellation_reason, bonus_eligible, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(contract.id)
        .bind(&contract.contract_number)
        .bind(&contract.order_key)
        .bind(contract.cohort_id)
        .bind(contract.sale_id)
        .bind(&contract.customer_name)
        .bind(&contract.customer_tax_id)
        .bind(contract.salesperson_id)
        .bind(contract.installation_date)
        .bind(&contract.original_plan)
        .bind(&contract.current_plan)
        .bind(contract.plan_value)
        .bind(contract.status.as_str())
        .bind(contract.downgraded)
        .bind(contract.cancellation_date)
        .bind(&contract.cancellation_reason)
        .bind(contract.bonus_eligible)
        .bind(&contract.notes)
        .bind(contract.created_at)
        .bind(contract.updated_at)
        .execute(&mut *tx)
        .await?;

        for invoice in invoices {
            sqlx::query(
                r#"
                INSERT INTO m10_invoices (
                    id, contract_id, seq, due_date, availability_date, amount, status,
                    days_late, payment_date, operator_invoice_number, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(invoice.id)
            .bind(contract.id)
            .bind(invoice.seq)
            .bind(invoice.due_date)
            .bind(invoice.availability_date)
            .bind(invoice.amount)
            .bind(invoice.status.as_str())
            .bind(invoice.days_late)
            .bind(invoice.payment_date)
            .bind(&invoice.operator_invoice_number)
            .bind(invoice.created_at)
            .bind(invoice.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(order_key = %contract.order_key, invoices = invoices.len(), "contract inserted");
        Ok(())
    }

    async fn relink_contract_sale(
        &self,
        contract_id: Uuid,
        sale_id: i64,
        customer_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE m10_contracts SET sale_id = $2, customer_name = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(contract_id)
        .bind(sale_id)
        .bind(customer_name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "contract",
                id: contract_id.to_string(),
            });
        }
        Ok(())
    }

    async fn save_contract_lifecycle(&self, contract: &Contract) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE m10_contracts
               SET status = $2,
                   downgraded = $3,
                   current_plan = $4,
                   cancellation_date = $5,
                   cancellation_reason = $6,
                   bonus_eligible = $7,
                   notes = $8,
                   updated_at = $9
             WHERE id = $1
            "#,
        )
        .bind(contract.id)
        .bind(contract.status.as_str())
        .bind(contract.downgraded)
        .bind(&contract.current_plan)
        .bind(contract.cancellation_date)
        .bind(&contract.cancellation_reason)
        .bind(contract.bonus_eligible)
        .bind(&contract.notes)
        .bind(contract.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "contract",
                id: contract.id.to_string(),
            });
        }
        Ok(())
    }

    async fn invoices_for_contract(&self, contract_id: Uuid) -> Result<Vec<Invoice>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM m10_invoices WHERE contract_id = $1 ORDER BY seq"
        ))
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn feed_synced_invoices(&self) -> Result<Vec<Invoice>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM m10_invoices WHERE fpd_status_text IS NOT NULL ORDER BY contract_id, seq"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE m10_invoices SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(invoice_id)
            .bind(status.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "invoice",
                id: invoice_id.to_string(),
            });
        }
        Ok(())
    }

    async fn upsert_feed_row(&self, row: &FeedRow) -> Result<FeedRow, StoreError> {
        let stored = sqlx::query(&format!(
            r#"
            INSERT INTO m10_feed_rows (
                id, order_key, invoice_number, contract_number, due_date, payment_date,
                status_text, amount, days_late, contract_id, import_id, imported_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (order_key, invoice_number) DO UPDATE
               SET contract_number = EXCLUDED.contract_number,
                   due_date = EXCLUDED.due_date,
                   payment_date = EXCLUDED.payment_date,
                   status_text = EXCLUDED.status_text,
                   amount = EXCLUDED.amount,
                   days_late = EXCLUDED.days_late,
                   import_id = EXCLUDED.import_id,
                   imported_at = EXCLUDED.imported_at
            RETURNING {FEED_ROW_COLUMNS}
            "#
        ))
        .bind(row.id)
        .bind(&row.order_key)
        .bind(&row.invoice_number)
        .bind(&row.contract_number)
        .bind(row.due_date)
        .bind(row.payment_date)
        .bind(&row.status_text)
        .bind(row.amount)
        .bind(row.days_late)
        .bind(row.contract_id)
        .bind(row.import_id)
        .bind(row.imported_at)
        .fetch_one(&self.pool)
        .await?;
        feed_row_from_row(&stored)
    }

    async fn unlinked_feed_rows(&self) -> Result<Vec<FeedRow>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {FEED_ROW_COLUMNS} FROM m10_feed_rows WHERE contract_id IS NULL ORDER BY imported_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(feed_row_from_row).collect()
    }

    async fn commit_match(&self, commit: &MatchCommit) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let linked = sqlx::query("UPDATE m10_feed_rows SET contract_id = $2 WHERE id = $1")
            .bind(commit.feed_row_id)
            .bind(commit.contract_id)
            .execute(&mut *tx)
            .await?;
        if linked.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "feed row",
                id: commit.feed_row_id.to_string(),
            });
        }

        let invoice = &commit.invoice;
        sqlx::query(
            r#"
            INSERT INTO m10_invoices (
                id, contract_id, seq, due_date, availability_date, amount, status, days_late,
                payment_date, operator_invoice_number, fpd_contract_number, fpd_payment_date,
                fpd_status_text, fpd_synced_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
            ON CONFLICT (contract_id, seq) DO UPDATE
               SET due_date = EXCLUDED.due_date,
                   availability_date = EXCLUDED.availability_date,
                   amount = EXCLUDED.amount,
                   status = EXCLUDED.status,
                   days_late = EXCLUDED.days_late,
                   payment_date = EXCLUDED.payment_date,
                   operator_invoice_number = EXCLUDED.operator_invoice_number,
                   fpd_contract_number = EXCLUDED.fpd_contract_number,
                   fpd_payment_date = EXCLUDED.fpd_payment_date,
                   fpd_status_text = EXCLUDED.fpd_status_text,
                   fpd_synced_at = EXCLUDED.fpd_synced_at,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(invoice.id)
        .bind(commit.contract_id)
        .bind(invoice.seq)
        .bind(invoice.due_date)
        .bind(invoice.availability_date)
        .bind(invoice.amount)
        .bind(invoice.status.as_str())
        .bind(invoice.days_late)
        .bind(invoice.payment_date)
        .bind(&invoice.operator_invoice_number)
        .bind(&invoice.feed.contract_number)
        .bind(invoice.feed.payment_date)
        .bind(&invoice.feed.status_text)
        .bind(invoice.feed.synced_at)
        .bind(commit.now)
        .execute(&mut *tx)
        .await?;

        let feed = &commit.contract_feed;
        let updated = sqlx::query(
            r#"
            UPDATE m10_contracts
               SET fpd_contract_number = COALESCE(NULLIF(TRIM(fpd_contract_number), ''), $2),
                   fpd_status_text = $3,
                   fpd_due_date = $4,
                   fpd_payment_date = $5,
                   fpd_amount = $6,
                   fpd_days_late = $7,
                   fpd_synced_at = $8,
                   updated_at = $9
             WHERE id = $1
            "#,
        )
        .bind(commit.contract_id)
        .bind(&feed.definitive_contract_number)
        .bind(&feed.status_text)
        .bind(feed.due_date)
        .bind(feed.payment_date)
        .bind(feed.amount)
        .bind(feed.days_late)
        .bind(feed.synced_at)
        .bind(commit.now)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "contract",
                id: commit.contract_id.to_string(),
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_import_log(&self, log: &ImportLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO m10_import_logs (
                id, filename, file_size, content_hash, status, total_rows, processed_rows,
                skipped_rows, error_rows, matched_rows, unmatched_rows, unmatched_sample,
                error_sample, total_amount, message, started_at, finished_at, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE
               SET content_hash = EXCLUDED.content_hash,
                   status = EXCLUDED.status,
                   total_rows = EXCLUDED.total_rows,
                   processed_rows = EXCLUDED.processed_rows,
                   skipped_rows = EXCLUDED.skipped_rows,
                   error_rows = EXCLUDED.error_rows,
                   matched_rows = EXCLUDED.matched_rows,
                   unmatched_rows = EXCLUDED.unmatched_rows,
                   unmatched_sample = EXCLUDED.unmatched_sample,
                   error_sample = EXCLUDED.error_sample,
                   total_amount = EXCLUDED.total_amount,
                   message = EXCLUDED.message,
                   finished_at = EXCLUDED.finished_at,
                   duration_ms = EXCLUDED.duration_ms
            "#,
        )
        .bind(log.id)
        .bind(&log.filename)
        .bind(log.file_size)
        .bind(&log.content_hash)
        .bind(log.status.as_str())
        .bind(log.total_rows)
        .bind(log.processed_rows)
        .bind(log.skipped_rows)
        .bind(log.error_rows)
        .bind(log.matched_rows)
        .bind(log.unmatched_rows)
        .bind(&log.unmatched_sample)
        .bind(&log.error_sample)
        .bind(log.total_amount)
        .bind(&log.message)
        .bind(log.started_at)
        .bind(log.finished_at)
        .bind(log.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn import_log(&self, id: Uuid) -> Result<Option<ImportLog>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, filename, file_size, content_hash, status, total_rows, processed_rows,
                   skipped_rows, error_rows, matched_rows, unmatched_rows, unmatched_sample,
                   error_sample, total_amount, message, started_at, finished_at, duration_ms
              FROM m10_import_logs
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(import_log_from_row).transpose()
    }

    async fn purge_all(&self) -> Result<PurgeCounts, StoreError> {
        let mut tx = self.pool.begin().await?;
        let invoices = sqlx::query("DELETE FROM m10_invoices").execute(&mut *tx).await?;
        let feed_rows = sqlx::query("DELETE FROM m10_feed_rows").execute(&mut *tx).await?;
        let contracts = sqlx::query("DELETE FROM m10_contracts").execute(&mut *tx).await?;
        let cohorts = sqlx::query("DELETE FROM m10_cohorts").execute(&mut *tx).await?;
        let import_logs = sqlx::query("DELETE FROM m10_import_logs").execute(&mut *tx).await?;
        tx.commit().await?;

        let counts = PurgeCounts {
            invoices: invoices.rows_affected(),
            feed_rows: feed_rows.rows_affected(),
            contracts: contracts.rows_affected(),
            cohorts: cohorts.rows_affected(),
            import_logs: import_logs.rows_affected(),
        };
        info!(?counts, "m10 records purged");
        Ok(counts)
    }
}
