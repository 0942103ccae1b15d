//! Domain models for tuition-service.

mod bill;
mod fee;
mod payment;
mod period;
mod reconciliation_log;
mod scholarship;
mod student;

pub use bill::{BillSource, BillStatus, BillView, NewStudentBill, StudentBill};
pub use fee::{
    FeeSchedule, FeeScheduleEntry, FeeTemplate, FeeTemplateItem, InstallmentItem,
    InstallmentPlan, InstallmentPlanRow, InstallmentStatus, RegistrationCharge,
};
pub use payment::{
    payment_reference, ConfirmationReceipt, ManualConfirmation, NewPaymentConfirmation,
    NewStudentPayment, PaymentAllocation, PaymentConfirmation, PaymentEvent, Settlement,
    SettlementOutcome, SettlementReceipt, StudentPayment, LEDGER_PAID_STATUS,
};
pub use period::{BillingPeriod, OverrideScope, PaymentWindow, PeriodOverride};
pub use reconciliation_log::{
    NewLogEntry, ReconcileOutcome, ReconciliationLogEntry, SOURCE_MANUAL_CONFIRMATION,
    SOURCE_RECONCILIATION_WORKER,
};
pub use scholarship::{AwardKind, ScholarshipAward};
pub use student::{DegreeLevel, ProgramUnit, StudentProfile, StudentRow, PROFILE_SCHEMA_VERSION};
