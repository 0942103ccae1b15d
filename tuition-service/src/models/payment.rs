//! Ledger payment events, local payment records and manual confirmations.

use super::NewLogEntry;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Ledger status that makes an invoice eligible for reconciliation.
pub const LEDGER_PAID_STATUS: &str = "Paid";

/// Payment recorded in the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PaymentEvent {
    pub invoice_id: i64,
    pub virtual_account: Option<String>,
    /// Student ID as known to the ledger's customer table.
    pub identifier: String,
    pub period_code: String,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub status: String,
}

impl PaymentEvent {
    pub fn is_paid(&self) -> bool {
        self.status == LEDGER_PAID_STATUS
    }

    /// Local payment reference derived from the ledger invoice.
    pub fn payment_ref(&self) -> String {
        payment_reference(self.invoice_id)
    }
}

pub fn payment_reference(invoice_id: i64) -> String {
    format!("INV-{}", invoice_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StudentPayment {
    pub payment_id: Uuid,
    pub student_id: String,
    pub period_code: String,
    pub payment_ref: String,
    pub amount: Decimal,
    pub method: String,
    pub virtual_account: Option<String>,
    pub note: String,
    pub paid_at: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PaymentAllocation {
    pub allocation_id: Uuid,
    pub payment_id: Uuid,
    pub bill_id: Uuid,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudentPayment {
    pub student_id: String,
    pub period_code: String,
    pub payment_ref: String,
    pub amount: Decimal,
    pub method: String,
    pub virtual_account: Option<String>,
    pub note: String,
    pub paid_at: DateTime<Utc>,
}

impl NewStudentPayment {
    pub fn from_event(event: &PaymentEvent, student_id: &str, note: impl Into<String>) -> Self {
        Self {
            student_id: student_id.to_string(),
            period_code: event.period_code.clone(),
            payment_ref: event.payment_ref(),
            amount: event.amount,
            method: "VA".to_string(),
            virtual_account: event.virtual_account.clone(),
            note: note.into(),
            paid_at: event.paid_at,
        }
    }
}

/// Everything written when a bill is settled. Applied atomically.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub bill_id: Uuid,
    pub new_paid_amount: Decimal,
    pub payment: NewStudentPayment,
    pub allocation_amount: Decimal,
    pub log: NewLogEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub payment_id: Uuid,
    pub payment_reused: bool,
    pub allocation_created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Applied(SettlementReceipt),
    /// Another writer recorded a payment on the bill first.
    AlreadySettled,
    /// The ledger payment is already allocated to a different bill.
    PaymentConsumed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PaymentConfirmation {
    pub confirmation_id: Uuid,
    pub bill_id: Uuid,
    pub va_number: String,
    pub payment_date: DateTime<Utc>,
    /// Object-storage key of the uploaded proof.
    pub proof_ref: String,
    pub message: String,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentConfirmation {
    pub bill_id: Uuid,
    pub va_number: String,
    pub payment_date: DateTime<Utc>,
    pub proof_ref: String,
    pub message: String,
}

/// Student-submitted claim that a bill was paid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManualConfirmation {
    pub bill_id: Uuid,
    pub va_number: String,
    pub payment_date: DateTime<Utc>,
    pub proof_ref: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationReceipt {
    pub confirmation: PaymentConfirmation,
    /// True when the ledger showed the payment and the bill was settled.
    pub verified: bool,
}
