//! Read-only access to the academic master-data database (MySQL).
//!
//! Table and column names follow the external finance schema; every query
//! aliases them onto the local model field names.

use crate::models::{
    AwardKind, BillingPeriod, FeeSchedule, FeeScheduleEntry, FeeTemplate, FeeTemplateItem,
    InstallmentItem, InstallmentPlan, InstallmentPlanRow, OverrideScope, PeriodOverride,
    ProgramUnit, RegistrationCharge, ScholarshipAward, StudentProfile, StudentRow,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::stores::{MasterDataStore, ScholarshipStore};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// Open a pool against one of the external MySQL databases.
#[instrument(skip(database_url))]
pub async fn connect_mysql(
    database_url: &str,
    max_connections: u32,
    name: &str,
) -> Result<MySqlPool, AppError> {
    info!(database = name, max_connections = max_connections, "Connecting to MySQL");

    let pool = MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to connect to {}: {}", name, e))
        })?;

    info!(database = name, "MySQL connection pool established");
    Ok(pool)
}

#[derive(Clone)]
pub struct MasterDataDb {
    pool: MySqlPool,
}

impl MasterDataDb {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn query_error(operation: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", operation, e))
}

#[async_trait]
impl MasterDataStore for MasterDataDb {
    #[instrument(skip(self))]
    async fn active_period(&self) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "active_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, kode AS code, name, fiscal_year, semester,
                   payment_start_date AS payment_start, payment_end_date AS payment_end, is_active
            FROM budget_periods
            WHERE is_active = TRUE
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch active period", e))?;

        timer.observe_duration();
        Ok(period)
    }

    #[instrument(skip(self))]
    async fn find_period(&self, code: &str) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "find_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, kode AS code, name, fiscal_year, semester,
                   payment_start_date AS payment_start, payment_end_date AS payment_end, is_active
            FROM budget_periods
            WHERE kode = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch billing period", e))?;

        timer.observe_duration();
        Ok(period)
    }

    #[instrument(skip(self), fields(scope = scope.as_str()))]
    async fn find_override(
        &self,
        scope: OverrideScope,
        scope_id: &str,
        period_id: i64,
    ) -> Result<Option<PeriodOverride>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "find_override"])
            .start_timer();

        let found = sqlx::query_as::<_, PeriodOverride>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, CAST(budget_period_id AS SIGNED) AS period_id,
                   scope_type, scope_id,
                   payment_start_date AS payment_start, payment_end_date AS payment_end, is_active
            FROM budget_period_payment_overrides
            WHERE scope_type = ? AND scope_id = ? AND budget_period_id = ? AND is_active = TRUE
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(scope.as_str())
        .bind(scope_id)
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch period override", e))?;

        timer.observe_duration();
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn find_student(&self, student_id: &str) -> Result<Option<StudentProfile>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "find_student"])
            .start_timer();

        let row = sqlx::query_as::<_, StudentRow>(
            r#"
            SELECT m.MhswID AS student_id, m.Nama AS name,
                   m.tahun_masuk AS admission_year, m.semester_masuk AS admission_semester,
                   p.kode_prodi AS program_code, m.kel_ukt AS fee_group, m.bipot_id AS billing_code
            FROM mahasiswa m
            LEFT JOIN prodi p ON p.id = m.prodi_id
            WHERE m.MhswID = ?
            "#,
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch student", e))?;

        timer.observe_duration();
        Ok(row.map(StudentProfile::from))
    }

    #[instrument(skip(self))]
    async fn find_program(&self, program_code: &str) -> Result<Option<ProgramUnit>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "find_program"])
            .start_timer();

        let program = sqlx::query_as::<_, ProgramUnit>(
            r#"
            SELECT p.kode_prodi AS code, p.nama_prodi AS name, f.kode_fakultas AS faculty_code
            FROM prodi p
            INNER JOIN fakultas f ON f.id = p.fakultas_id
            WHERE p.kode_prodi = ? AND p.deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(program_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch program", e))?;

        timer.observe_duration();
        Ok(program)
    }

    #[instrument(skip(self))]
    async fn find_fee_schedule(
        &self,
        cohort: i32,
        program_code: &str,
    ) -> Result<Option<FeeSchedule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "find_fee_schedule"])
            .start_timer();

        let schedule = sqlx::query_as::<_, FeeSchedule>(
            r#"
            SELECT CAST(mt.id AS SIGNED) AS id, mt.angkatan AS cohort, p.kode_prodi AS program_code, mt.nama AS name
            FROM master_tagihan mt
            INNER JOIN prodi p ON p.id = mt.prodi_id
            WHERE mt.angkatan = ? AND p.kode_prodi = ? AND mt.deleted_at IS NULL
            ORDER BY mt.id DESC
            LIMIT 1
            "#,
        )
        .bind(cohort)
        .bind(program_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch fee schedule", e))?;

        timer.observe_duration();
        Ok(schedule)
    }

    #[instrument(skip(self))]
    async fn fee_schedule_entries(
        &self,
        schedule_id: i64,
        fee_group: Option<&str>,
    ) -> Result<Vec<FeeScheduleEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "fee_schedule_entries"])
            .start_timer();

        let entries = sqlx::query_as::<_, FeeScheduleEntry>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, CAST(master_tagihan_id AS SIGNED) AS schedule_id,
                   nama AS name, kel_ukt AS fee_group,
                   CAST(nominal AS DECIMAL(15,2)) AS nominal, urutan AS sequence
            FROM detail_master_tagihan
            WHERE master_tagihan_id = ? AND (? IS NULL OR kel_ukt = ?)
            ORDER BY urutan, id
            "#,
        )
        .bind(schedule_id)
        .bind(fee_group)
        .bind(fee_group)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("fetch fee schedule entries", e))?;

        timer.observe_duration();
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn find_fee_template(&self, code: &str) -> Result<Option<FeeTemplate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "find_fee_template"])
            .start_timer();

        let template = sqlx::query_as::<_, FeeTemplate>(
            "SELECT CAST(id AS SIGNED) AS id, code, name FROM bill_templates WHERE code = ? LIMIT 1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch fee template", e))?;

        timer.observe_duration();
        Ok(template)
    }

    #[instrument(skip(self))]
    async fn fee_template_items(&self, template_id: i64) -> Result<Vec<FeeTemplateItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "fee_template_items"])
            .start_timer();

        let items = sqlx::query_as::<_, FeeTemplateItem>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, CAST(bill_template_id AS SIGNED) AS template_id,
                   additional_name AS name, CAST(amount AS DECIMAL(15,2)) AS amount,
                   mulai_sesi AS starts_at_session, kali_sesi AS repeat_count
            FROM bill_template_items
            WHERE bill_template_id = ?
            ORDER BY id
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("fetch fee template items", e))?;

        timer.observe_duration();
        Ok(items)
    }

    #[instrument(skip(self))]
    async fn find_installment_plan(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Option<InstallmentPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "find_installment_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, InstallmentPlanRow>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, npm AS student_id, tahun_id AS period_code, kel_ukt AS fee_group
            FROM cicilans
            WHERE npm = ? AND tahun_id = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(student_id)
        .bind(period_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch installment plan", e))?;

        let Some(plan) = plan else {
            timer.observe_duration();
            return Ok(None);
        };

        let items = sqlx::query_as::<_, InstallmentItem>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, CAST(cicilan_id AS SIGNED) AS plan_id,
                   sequence_no AS sequence, due_date,
                   CAST(amount AS DECIMAL(15,2)) AS amount, status
            FROM detail_cicilans
            WHERE cicilan_id = ?
            ORDER BY sequence_no
            "#,
        )
        .bind(plan.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("fetch installment items", e))?;

        timer.observe_duration();
        Ok(Some(plan.with_items(items)))
    }

    #[instrument(skip(self))]
    async fn find_registration_charge(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Option<RegistrationCharge>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "find_registration_charge"])
            .start_timer();

        let charge = sqlx::query_as::<_, RegistrationCharge>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, npm AS student_id, tahun_id AS period_code, kel_ukt AS fee_group,
                   CAST(COALESCE(nominal_ukt, 0) AS DECIMAL(15,2)) AS nominal,
                   CAST(COALESCE(nominal_bayar, 0) AS DECIMAL(15,2)) AS paid_nominal,
                   sudah_bayar AS already_paid
            FROM registrasi_mahasiswa
            WHERE npm = ? AND tahun_id = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(student_id)
        .bind(period_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("fetch registration charge", e))?;

        timer.observe_duration();
        Ok(charge)
    }
}

#[async_trait]
impl ScholarshipStore for MasterDataDb {
    #[instrument(skip(self))]
    async fn awards_for(
        &self,
        student_id: &str,
        period_code: &str,
        kind: AwardKind,
    ) -> Result<Vec<ScholarshipAward>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["master", "awards_for"])
            .start_timer();

        let query = match kind {
            AwardKind::Scholarship => {
                r#"
                SELECT CAST(d.id AS SIGNED) AS id, d.npm AS student_id, d.tahun_id AS period_code,
                       'scholarship' AS kind, b.status AS program_status,
                       CAST(d.nominal_beasiswa AS DECIMAL(15,2)) AS nominal
                FROM detail_beasiswa d
                INNER JOIN beasiswa b ON b.id = d.beasiswa_id
                WHERE d.npm = ? AND d.tahun_id = ?
                "#
            }
            AwardKind::TuitionAid => {
                r#"
                SELECT CAST(a.id AS SIGNED) AS id, a.npm AS student_id, a.tahun_id AS period_code,
                       'tuition_aid' AS kind, a.status AS program_status,
                       CAST(a.nominal AS DECIMAL(15,2)) AS nominal
                FROM bantuan_ukt a
                WHERE a.npm = ? AND a.tahun_id = ?
                "#
            }
        };

        let awards = sqlx::query_as::<_, ScholarshipAward>(query)
            .bind(student_id)
            .bind(period_code)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(&format!("fetch {} awards", kind.as_str()), e))?;

        timer.observe_duration();
        Ok(awards)
    }
}
