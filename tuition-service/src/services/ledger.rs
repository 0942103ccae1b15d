//! Read-only access to the external payment ledger (MySQL).

use crate::models::{PaymentEvent, LEDGER_PAID_STATUS};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::stores::LedgerStore;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::mysql::MySqlPool;
use tracing::{debug, instrument};

const PAYMENT_EVENT_SELECT: &str = r#"
    SELECT CAST(invoices.id AS SIGNED) AS invoice_id,
           virtual_accounts.virtual_account AS virtual_account,
           customers.identifier AS identifier,
           budget_periods.kode AS period_code,
           CAST(payments.amount AS DECIMAL(15,2)) AS amount,
           payments.created_at AS paid_at,
           invoices.status AS status
    FROM invoices
    INNER JOIN customers ON customers.id = invoices.customer_id
    INNER JOIN budget_periods ON budget_periods.id = invoices.budget_period_id
    INNER JOIN payments ON payments.invoice_id = invoices.id
    LEFT JOIN virtual_accounts ON virtual_accounts.payment_id = payments.id
"#;

#[derive(Clone)]
pub struct LedgerDb {
    pool: MySqlPool,
}

impl LedgerDb {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for LedgerDb {
    #[instrument(skip(self))]
    async fn paid_events_for(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Vec<PaymentEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ledger", "paid_events_for"])
            .start_timer();

        let events = sqlx::query_as::<_, PaymentEvent>(&format!(
            "{} WHERE customers.identifier = ? AND budget_periods.kode = ? AND invoices.status = ? ORDER BY payments.created_at DESC",
            PAYMENT_EVENT_SELECT
        ))
        .bind(student_id)
        .bind(period_code)
        .bind(LEDGER_PAID_STATUS)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to query ledger: {}", e)))?;

        timer.observe_duration();
        debug!(count = events.len(), "Ledger payment events fetched");
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn paid_events_for_virtual_account(
        &self,
        virtual_account: &str,
    ) -> Result<Vec<PaymentEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ledger", "paid_events_for_virtual_account"])
            .start_timer();

        let events = sqlx::query_as::<_, PaymentEvent>(&format!(
            "{} WHERE virtual_accounts.virtual_account = ? AND invoices.status = ? ORDER BY payments.created_at DESC",
            PAYMENT_EVENT_SELECT
        ))
        .bind(virtual_account)
        .bind(LEDGER_PAID_STATUS)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to query ledger: {}", e)))?;

        timer.observe_duration();
        Ok(events)
    }
}
