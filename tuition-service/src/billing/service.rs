//! Operations exposed to the rest of the platform.

use crate::billing::audit::AuditLog;
use crate::billing::generator::{BillGenerator, GenerationReport};
use crate::billing::period::BillingPeriodResolver;
use crate::billing::reconciliation::{MatchTolerance, ReconciliationWorker};
use crate::billing::scholarship::ScholarshipCalculator;
use crate::billing::session::PeriodCode;
use crate::models::{
    BillSource, BillStatus, BillView, BillingPeriod, ConfirmationReceipt, ManualConfirmation,
    NewPaymentConfirmation, PaymentWindow, ReconciliationLogEntry, StudentBill, StudentProfile,
};
use crate::stores::{AuditStore, BillStore, LedgerStore, MasterDataStore, ScholarshipStore};
use crate::workers::{ScanAccepted, ScanTrigger};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Store handles the engine runs against.
#[derive(Clone)]
pub struct BillingStores {
    pub master: Arc<dyn MasterDataStore>,
    pub scholarships: Arc<dyn ScholarshipStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub bills: Arc<dyn BillStore>,
    pub audit: Arc<dyn AuditStore>,
}

#[derive(Clone)]
pub struct BillingService {
    master: Arc<dyn MasterDataStore>,
    bills: Arc<dyn BillStore>,
    periods: BillingPeriodResolver,
    generator: BillGenerator,
    worker: ReconciliationWorker,
    audit: AuditLog,
    trigger: Option<ScanTrigger>,
}

impl BillingService {
    pub fn new(stores: BillingStores, tolerance: MatchTolerance) -> Self {
        let periods = BillingPeriodResolver::new(stores.master.clone());
        let audit = AuditLog::new(stores.audit);
        let generator = BillGenerator::new(
            stores.master.clone(),
            stores.bills.clone(),
            ScholarshipCalculator::new(stores.scholarships),
        );
        let worker = ReconciliationWorker::new(
            stores.bills.clone(),
            stores.ledger,
            audit.clone(),
            periods.clone(),
            tolerance,
        );

        Self {
            master: stores.master,
            bills: stores.bills,
            periods,
            generator,
            worker,
            audit,
            trigger: None,
        }
    }

    /// Attach the handle of a running scheduler.
    pub fn with_trigger(mut self, trigger: ScanTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn worker(&self) -> ReconciliationWorker {
        self.worker.clone()
    }

    pub async fn get_active_billing_period(&self) -> Result<BillingPeriod, AppError> {
        self.periods.resolve_active_period().await
    }

    #[instrument(skip(self))]
    pub async fn generate_bills(&self, student_id: &str) -> Result<GenerationReport, AppError> {
        let profile = self.student(student_id).await?;
        let period = self.periods.resolve_active_period().await?;
        self.generator.generate(&profile, &period).await
    }

    #[instrument(skip(self))]
    pub async fn regenerate_bills(&self, student_id: &str) -> Result<GenerationReport, AppError> {
        let profile = self.student(student_id).await?;
        let period = self.periods.resolve_active_period().await?;
        self.generator.regenerate(&profile, &period).await
    }

    /// Bills of the period that still have something to pay.
    pub async fn list_open_bills(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Vec<BillView>, AppError> {
        self.bill_views(student_id, period_code, |bill| bill.status() != BillStatus::Paid)
            .await
    }

    pub async fn list_paid_history(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Vec<BillView>, AppError> {
        self.bill_views(student_id, period_code, |bill| bill.status() == BillStatus::Paid)
            .await
    }

    pub fn trigger_reconciliation_scan(&self) -> Result<ScanAccepted, AppError> {
        let Some(trigger) = self.trigger.as_ref() else {
            warn!("Scan requested but the reconciliation scheduler is disabled");
            return Err(AppError::ServiceUnavailable);
        };

        let accepted = trigger.trigger()?;
        info!(queued = accepted.queued, "Reconciliation scan requested");
        Ok(accepted)
    }

    /// Store a student's payment claim and try to verify it against the
    /// ledger straight away. An unreachable ledger leaves the claim stored
    /// and unverified.
    #[instrument(skip(self, request), fields(bill_id = %request.bill_id))]
    pub async fn record_manual_payment_confirmation(
        &self,
        request: ManualConfirmation,
    ) -> Result<ConfirmationReceipt, AppError> {
        let va_number = request.va_number.trim().to_string();
        if va_number.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Virtual account number is required"
            )));
        }
        if request.proof_ref.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Proof of payment is required"
            )));
        }

        let bill = self.bills.get_bill(request.bill_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Bill {} not found", request.bill_id))
        })?;

        let (verified, message) = match self.worker.verify_virtual_account(&bill, &va_number).await
        {
            Ok(true) => (true, "Payment verified against the ledger".to_string()),
            Ok(false) if bill.is_settled() => {
                (false, "Bill already carries a payment".to_string())
            }
            Ok(false) => (
                false,
                "No matching ledger payment yet, awaiting review".to_string(),
            ),
            Err(e) => {
                warn!(error = %e, "Ledger verification failed, storing confirmation unverified");
                (false, format!("Ledger verification unavailable: {}", e))
            }
        };

        let confirmation = self
            .bills
            .save_confirmation(&NewPaymentConfirmation {
                bill_id: bill.bill_id,
                va_number,
                payment_date: request.payment_date,
                proof_ref: request.proof_ref,
                message,
            })
            .await?;

        info!(
            confirmation_id = %confirmation.confirmation_id,
            verified = verified,
            "Manual payment confirmation recorded"
        );

        Ok(ConfirmationReceipt {
            confirmation,
            verified,
        })
    }

    pub async fn reconciliation_history(
        &self,
        bill_id: Uuid,
    ) -> Result<Vec<ReconciliationLogEntry>, AppError> {
        self.audit.history(bill_id).await
    }

    async fn student(&self, student_id: &str) -> Result<StudentProfile, AppError> {
        self.master.find_student(student_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Student {} not found", student_id))
        })
    }

    async fn bill_views(
        &self,
        student_id: &str,
        period_code: &str,
        keep: impl Fn(&StudentBill) -> bool,
    ) -> Result<Vec<BillView>, AppError> {
        PeriodCode::parse(period_code)?;

        let bills: Vec<StudentBill> = self
            .bills
            .list_bills(student_id, period_code)
            .await?
            .into_iter()
            .filter(|bill| keep(bill))
            .collect();
        if bills.is_empty() {
            return Ok(Vec::new());
        }

        let period = self.periods.resolve_period(period_code).await?;
        let window = match self.master.find_student(student_id).await {
            Ok(Some(profile)) => self.periods.resolve_window_for(&profile, &period).await,
            Ok(None) => period.default_window(),
            Err(e) => {
                warn!(error = %e, student_id = student_id, "Student lookup failed, using period window");
                period.default_window()
            }
        };

        Ok(bills
            .into_iter()
            .map(|bill| {
                let bill_window = bill_window(&bill, window);
                BillView::new(bill, bill_window)
            })
            .collect())
    }
}

/// Installment bills are payable from their due date with no cutoff.
fn bill_window(bill: &StudentBill, period_window: PaymentWindow) -> PaymentWindow {
    match (bill.source(), bill.due_date) {
        (Ok(BillSource::Installment(_)), Some(due)) => PaymentWindow::open_ended(due),
        _ => period_window,
    }
}
