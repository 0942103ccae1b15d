//! Local PostgreSQL store: bills, payments, allocations, confirmations and the
//! reconciliation log.

use crate::models::{
    NewLogEntry, NewPaymentConfirmation, NewStudentBill, PaymentConfirmation,
    ReconciliationLogEntry, Settlement, SettlementOutcome, SettlementReceipt, StudentBill,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::stores::{AuditStore, BillStore};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const BILL_COLUMNS: &str = "bill_id, student_id, period_code, name, quantity, amount, scholarship_offset, paid_amount, draft, source_kind, source_id, due_date, settled_utc, created_utc, updated_utc";

const LOG_COLUMNS: &str = "log_id, bill_id, student_id, old_status, new_status, old_paid_amount, new_paid_amount, amount, payment_date, invoice_id, virtual_account, time_difference_seconds, outcome, source, message, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "tuition-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillStore for Database {
    #[instrument(skip(self))]
    async fn list_bills(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Vec<StudentBill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "list_bills"])
            .start_timer();

        let bills = sqlx::query_as::<_, StudentBill>(&format!(
            "SELECT {} FROM student_bills WHERE student_id = $1 AND period_code = $2 ORDER BY created_utc, name",
            BILL_COLUMNS
        ))
        .bind(student_id)
        .bind(period_code)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list bills: {}", e)))?;

        timer.observe_duration();
        Ok(bills)
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<StudentBill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "get_bill"])
            .start_timer();

        let bill = sqlx::query_as::<_, StudentBill>(&format!(
            "SELECT {} FROM student_bills WHERE bill_id = $1",
            BILL_COLUMNS
        ))
        .bind(bill_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get bill: {}", e)))?;

        timer.observe_duration();
        Ok(bill)
    }

    #[instrument(skip(self, bills), fields(count = bills.len()))]
    async fn insert_bills(&self, bills: &[NewStudentBill]) -> Result<Vec<StudentBill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "insert_bills"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let insert = format!(
            r#"
            INSERT INTO student_bills (bill_id, student_id, period_code, name, quantity, amount, scholarship_offset, paid_amount, draft, source_kind, source_id, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, FALSE, $8, $9, $10)
            RETURNING {}
            "#,
            BILL_COLUMNS
        );

        let mut created = Vec::with_capacity(bills.len());
        for bill in bills {
            let row = sqlx::query_as::<_, StudentBill>(&insert)
                .bind(Uuid::new_v4())
                .bind(&bill.student_id)
                .bind(&bill.period_code)
                .bind(&bill.name)
                .bind(bill.quantity)
                .bind(bill.amount)
                .bind(bill.scholarship_offset)
                .bind(bill.source.kind())
                .bind(bill.source.id())
                .bind(bill.due_date)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to insert bill: {}", e))
                })?;
            created.push(row);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn delete_unpaid_bills(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "delete_unpaid_bills"])
            .start_timer();

        let result = sqlx::query(
            r#"
            DELETE FROM student_bills b
            WHERE b.student_id = $1 AND b.period_code = $2
              AND b.paid_amount = 0 AND b.settled_utc IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM student_payment_allocations a WHERE a.bill_id = b.bill_id
              )
            "#,
        )
        .bind(student_id)
        .bind(period_code)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to delete unpaid bills: {}", e))
        })?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn unsettled_bills(&self, period_code: &str) -> Result<Vec<StudentBill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "unsettled_bills"])
            .start_timer();

        let bills = sqlx::query_as::<_, StudentBill>(&format!(
            "SELECT {} FROM student_bills WHERE period_code = $1 AND paid_amount = 0 AND settled_utc IS NULL ORDER BY created_utc",
            BILL_COLUMNS
        ))
        .bind(period_code)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list unsettled bills: {}", e))
        })?;

        timer.observe_duration();
        Ok(bills)
    }

    #[instrument(skip(self, settlement), fields(bill_id = %settlement.bill_id, payment_ref = %settlement.payment.payment_ref))]
    async fn apply_settlement(
        &self,
        settlement: &Settlement,
    ) -> Result<SettlementOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "apply_settlement"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Only a bill with no recorded payment may be settled.
        let updated = sqlx::query(
            r#"
            UPDATE student_bills SET paid_amount = $2, settled_utc = NOW(), updated_utc = NOW()
            WHERE bill_id = $1 AND paid_amount = 0 AND settled_utc IS NULL
            "#,
        )
        .bind(settlement.bill_id)
        .bind(settlement.new_paid_amount)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update bill: {}", e)))?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await.ok();
            timer.observe_duration();
            info!("Bill already settled by another writer");
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let payment = &settlement.payment;
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT payment_id FROM student_payments WHERE payment_ref = $1",
        )
        .bind(&payment.payment_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to look up payment: {}", e))
        })?;

        let (payment_id, payment_reused) = match existing {
            Some(id) => (id, true),
            None => {
                let inserted = sqlx::query_scalar::<_, Uuid>(
                    r#"
                    INSERT INTO student_payments (payment_id, student_id, period_code, payment_ref, amount, method, virtual_account, note, paid_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (payment_ref) DO NOTHING
                    RETURNING payment_id
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(&payment.student_id)
                .bind(&payment.period_code)
                .bind(&payment.payment_ref)
                .bind(payment.amount)
                .bind(&payment.method)
                .bind(&payment.virtual_account)
                .bind(&payment.note)
                .bind(payment.paid_at)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment: {}", e))
                })?;

                match inserted {
                    Some(id) => (id, false),
                    None => {
                        // Lost the insert race; the winner's row is visible now.
                        let id = sqlx::query_scalar::<_, Uuid>(
                            "SELECT payment_id FROM student_payments WHERE payment_ref = $1",
                        )
                        .bind(&payment.payment_ref)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|e| {
                            AppError::DatabaseError(anyhow::anyhow!(
                                "Failed to fetch existing payment: {}",
                                e
                            ))
                        })?;
                        (id, true)
                    }
                }
            }
        };

        if payment_reused {
            let allocated_elsewhere = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM student_payment_allocations WHERE payment_id = $1 AND bill_id <> $2",
            )
            .bind(payment_id)
            .bind(settlement.bill_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to check allocations: {}", e))
            })?
                > 0;

            if allocated_elsewhere {
                tx.rollback().await.ok();
                timer.observe_duration();
                info!(payment_id = %payment_id, "Payment already allocated to another bill");
                return Ok(SettlementOutcome::PaymentConsumed);
            }
        }

        let allocation_exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM student_payment_allocations WHERE payment_id = $1 AND bill_id = $2",
        )
        .bind(payment_id)
        .bind(settlement.bill_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check allocation: {}", e))
        })?
            > 0;

        let allocation_created = if allocation_exists {
            info!(payment_id = %payment_id, "Allocation already exists, skipping insert");
            false
        } else {
            let inserted = sqlx::query(
                r#"
                INSERT INTO student_payment_allocations (allocation_id, payment_id, bill_id, amount)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (payment_id, bill_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(payment_id)
            .bind(settlement.bill_id)
            .bind(settlement.allocation_amount)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert allocation: {}", e))
            })?
            .rows_affected();

            if inserted == 0 {
                warn!(
                    payment_id = %payment_id,
                    "Allocation inserted concurrently by another writer, treating as success"
                );
            }
            inserted > 0
        };

        insert_log(&mut tx, &settlement.log).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            payment_id = %payment_id,
            payment_reused = payment_reused,
            allocation_created = allocation_created,
            paid_amount = %settlement.new_paid_amount,
            "Bill settled"
        );

        Ok(SettlementOutcome::Applied(SettlementReceipt {
            payment_id,
            payment_reused,
            allocation_created,
        }))
    }

    #[instrument(skip(self, confirmation), fields(bill_id = %confirmation.bill_id))]
    async fn save_confirmation(
        &self,
        confirmation: &NewPaymentConfirmation,
    ) -> Result<PaymentConfirmation, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "save_confirmation"])
            .start_timer();

        let saved = sqlx::query_as::<_, PaymentConfirmation>(
            r#"
            INSERT INTO payment_confirmations (confirmation_id, bill_id, va_number, payment_date, proof_ref, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING confirmation_id, bill_id, va_number, payment_date, proof_ref, message, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(confirmation.bill_id)
        .bind(&confirmation.va_number)
        .bind(confirmation.payment_date)
        .bind(&confirmation.proof_ref)
        .bind(&confirmation.message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to save confirmation: {}", e))
        })?;

        timer.observe_duration();
        Ok(saved)
    }
}

#[async_trait]
impl AuditStore for Database {
    #[instrument(skip(self, entry), fields(bill_id = %entry.bill_id, outcome = entry.outcome.as_str()))]
    async fn append_log(&self, entry: &NewLogEntry) -> Result<ReconciliationLogEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "append_log"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;
        let logged = insert_log(&mut conn, entry).await?;

        timer.observe_duration();
        Ok(logged)
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn logs_for_bill(&self, bill_id: Uuid) -> Result<Vec<ReconciliationLogEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["local", "logs_for_bill"])
            .start_timer();

        let logs = sqlx::query_as::<_, ReconciliationLogEntry>(&format!(
            "SELECT {} FROM reconciliation_logs WHERE bill_id = $1 ORDER BY created_utc, log_id",
            LOG_COLUMNS
        ))
        .bind(bill_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list reconciliation logs: {}", e))
        })?;

        timer.observe_duration();
        Ok(logs)
    }
}

async fn insert_log(
    conn: &mut sqlx::PgConnection,
    entry: &NewLogEntry,
) -> Result<ReconciliationLogEntry, AppError> {
    sqlx::query_as::<_, ReconciliationLogEntry>(&format!(
        r#"
        INSERT INTO reconciliation_logs (log_id, bill_id, student_id, old_status, new_status, old_paid_amount, new_paid_amount, amount, payment_date, invoice_id, virtual_account, time_difference_seconds, outcome, source, message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING {}
        "#,
        LOG_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(entry.bill_id)
    .bind(&entry.student_id)
    .bind(&entry.old_status)
    .bind(&entry.new_status)
    .bind(entry.old_paid_amount)
    .bind(entry.new_paid_amount)
    .bind(entry.amount)
    .bind(entry.payment_date)
    .bind(entry.invoice_id)
    .bind(&entry.virtual_account)
    .bind(entry.time_difference_seconds)
    .bind(entry.outcome.as_str())
    .bind(&entry.source)
    .bind(&entry.message)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to insert reconciliation log: {}", e))
    })
}
