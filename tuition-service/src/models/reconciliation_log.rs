//! Reconciliation audit entries.

use super::{PaymentEvent, StudentBill};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const SOURCE_RECONCILIATION_WORKER: &str = "reconciliation_worker";
pub const SOURCE_MANUAL_CONFIRMATION: &str = "manual_confirmation";

/// Classification of one reconciliation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Checking,
    NoPayment,
    AmountMismatch,
    TimeMismatch,
    NoMatch,
    PaymentConsumed,
    Paid,
    UpdateError,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Checking => "checking",
            ReconcileOutcome::NoPayment => "no_payment",
            ReconcileOutcome::AmountMismatch => "amount_mismatch",
            ReconcileOutcome::TimeMismatch => "time_mismatch",
            ReconcileOutcome::NoMatch => "no_match",
            ReconcileOutcome::PaymentConsumed => "payment_consumed",
            ReconcileOutcome::Paid => "paid",
            ReconcileOutcome::UpdateError => "update_error",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "checking" => Some(ReconcileOutcome::Checking),
            "no_payment" => Some(ReconcileOutcome::NoPayment),
            "amount_mismatch" => Some(ReconcileOutcome::AmountMismatch),
            "time_mismatch" => Some(ReconcileOutcome::TimeMismatch),
            "no_match" => Some(ReconcileOutcome::NoMatch),
            "payment_consumed" => Some(ReconcileOutcome::PaymentConsumed),
            "paid" => Some(ReconcileOutcome::Paid),
            "update_error" => Some(ReconcileOutcome::UpdateError),
            _ => None,
        }
    }

    /// Status recorded as `new_status` for this outcome.
    fn new_status<'a>(&self, old_status: &'a str) -> &'a str {
        match self {
            ReconcileOutcome::Checking => "checking",
            ReconcileOutcome::Paid => "paid",
            ReconcileOutcome::UpdateError => "error",
            _ => old_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ReconciliationLogEntry {
    pub log_id: Uuid,
    pub bill_id: Uuid,
    pub student_id: String,
    pub old_status: String,
    pub new_status: String,
    pub old_paid_amount: Decimal,
    pub new_paid_amount: Decimal,
    pub amount: Decimal,
    pub payment_date: Option<DateTime<Utc>>,
    pub invoice_id: Option<i64>,
    pub virtual_account: Option<String>,
    pub time_difference_seconds: i64,
    pub outcome: String,
    pub source: String,
    pub message: String,
    pub created_utc: DateTime<Utc>,
}

impl ReconciliationLogEntry {
    pub fn reconcile_outcome(&self) -> Option<ReconcileOutcome> {
        ReconcileOutcome::from_string(&self.outcome)
    }
}

/// Input for appending a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub bill_id: Uuid,
    pub student_id: String,
    pub old_status: String,
    pub new_status: String,
    pub old_paid_amount: Decimal,
    pub new_paid_amount: Decimal,
    pub amount: Decimal,
    pub payment_date: Option<DateTime<Utc>>,
    pub invoice_id: Option<i64>,
    pub virtual_account: Option<String>,
    pub time_difference_seconds: i64,
    pub outcome: ReconcileOutcome,
    pub source: String,
    pub message: String,
}

impl NewLogEntry {
    /// Entry describing `outcome` for `bill`, with paid amounts unchanged.
    pub fn for_bill(bill: &StudentBill, outcome: ReconcileOutcome, source: &str) -> Self {
        let old_status = bill.status().as_str();
        Self {
            bill_id: bill.bill_id,
            student_id: bill.student_id.clone(),
            old_status: old_status.to_string(),
            new_status: outcome.new_status(old_status).to_string(),
            old_paid_amount: bill.paid_amount,
            new_paid_amount: bill.paid_amount,
            amount: bill.net_amount(),
            payment_date: None,
            invoice_id: None,
            virtual_account: None,
            time_difference_seconds: 0,
            outcome,
            source: source.to_string(),
            message: String::new(),
        }
    }

    /// Attach the candidate payment and the measured time delta.
    pub fn with_candidate(mut self, event: &PaymentEvent, time_difference_seconds: i64) -> Self {
        self.amount = event.amount;
        self.payment_date = Some(event.paid_at);
        self.invoice_id = Some(event.invoice_id);
        self.virtual_account = event.virtual_account.clone();
        self.time_difference_seconds = time_difference_seconds;
        self
    }

    pub fn with_new_paid_amount(mut self, new_paid_amount: Decimal) -> Self {
        self.new_paid_amount = new_paid_amount;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
