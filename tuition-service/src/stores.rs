//! Store interfaces the billing engine depends on.
//!
//! Each component receives the handles it needs as `Arc<dyn _>` at
//! construction time. Production implementations live in [`crate::services`];
//! the master-data, scholarship and ledger stores are read-only.

use crate::models::{
    AwardKind, BillingPeriod, FeeSchedule, FeeScheduleEntry, FeeTemplate, FeeTemplateItem,
    InstallmentPlan, NewLogEntry, NewPaymentConfirmation, NewStudentBill, OverrideScope,
    PaymentConfirmation, PaymentEvent, PeriodOverride, ProgramUnit, ReconciliationLogEntry,
    RegistrationCharge, ScholarshipAward, Settlement, SettlementOutcome, StudentBill,
    StudentProfile,
};
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

/// Academic master data: periods, students, programs and fee definitions.
#[async_trait]
pub trait MasterDataStore: Send + Sync {
    async fn active_period(&self) -> Result<Option<BillingPeriod>, AppError>;

    async fn find_period(&self, code: &str) -> Result<Option<BillingPeriod>, AppError>;

    /// Active override for one scope of a period, if any.
    async fn find_override(
        &self,
        scope: OverrideScope,
        scope_id: &str,
        period_id: i64,
    ) -> Result<Option<PeriodOverride>, AppError>;

    async fn find_student(&self, student_id: &str) -> Result<Option<StudentProfile>, AppError>;

    async fn find_program(&self, program_code: &str) -> Result<Option<ProgramUnit>, AppError>;

    async fn find_fee_schedule(
        &self,
        cohort: i32,
        program_code: &str,
    ) -> Result<Option<FeeSchedule>, AppError>;

    /// Entries of a schedule in sequence order, optionally restricted to one
    /// fee group.
    async fn fee_schedule_entries(
        &self,
        schedule_id: i64,
        fee_group: Option<&str>,
    ) -> Result<Vec<FeeScheduleEntry>, AppError>;

    async fn find_fee_template(&self, code: &str) -> Result<Option<FeeTemplate>, AppError>;

    async fn fee_template_items(&self, template_id: i64) -> Result<Vec<FeeTemplateItem>, AppError>;

    async fn find_installment_plan(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Option<InstallmentPlan>, AppError>;

    async fn find_registration_charge(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Option<RegistrationCharge>, AppError>;
}

#[async_trait]
pub trait ScholarshipStore: Send + Sync {
    /// Awards of one kind for the student and period.
    async fn awards_for(
        &self,
        student_id: &str,
        period_code: &str,
        kind: AwardKind,
    ) -> Result<Vec<ScholarshipAward>, AppError>;
}

/// External payment ledger. Never written.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Paid events for a student and period, newest first.
    async fn paid_events_for(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Vec<PaymentEvent>, AppError>;

    /// Paid events carried by a virtual account, newest first.
    async fn paid_events_for_virtual_account(
        &self,
        virtual_account: &str,
    ) -> Result<Vec<PaymentEvent>, AppError>;
}

/// Local bill, payment and confirmation state.
#[async_trait]
pub trait BillStore: Send + Sync {
    async fn list_bills(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Vec<StudentBill>, AppError>;

    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<StudentBill>, AppError>;

    /// Insert all bills or none.
    async fn insert_bills(&self, bills: &[NewStudentBill]) -> Result<Vec<StudentBill>, AppError>;

    /// Delete bills with no recorded payment and no allocation. Returns the
    /// number removed.
    async fn delete_unpaid_bills(&self, student_id: &str, period_code: &str)
        -> Result<u64, AppError>;

    /// Bills of a period not yet settled, oldest first.
    async fn unsettled_bills(&self, period_code: &str) -> Result<Vec<StudentBill>, AppError>;

    /// Apply a settlement in one transaction: mark the bill paid if it is
    /// still unsettled, find or create the payment by reference, allocate it
    /// to the bill unless already allocated, and append the log entry. A
    /// payment already allocated to another bill is reported as consumed.
    async fn apply_settlement(&self, settlement: &Settlement)
        -> Result<SettlementOutcome, AppError>;

    async fn save_confirmation(
        &self,
        confirmation: &NewPaymentConfirmation,
    ) -> Result<PaymentConfirmation, AppError>;
}

/// Append-only reconciliation log.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_log(&self, entry: &NewLogEntry) -> Result<ReconciliationLogEntry, AppError>;

    /// Entries for a bill, oldest first.
    async fn logs_for_bill(&self, bill_id: Uuid) -> Result<Vec<ReconciliationLogEntry>, AppError>;
}
