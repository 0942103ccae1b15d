//! Student bill model.

use super::PaymentWindow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

/// Derived payment status of a bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Unpaid,
    Partial,
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Unpaid => "unpaid",
            BillStatus::Partial => "partial",
            BillStatus::Paid => "paid",
        }
    }
}

/// Master-data record a bill was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum BillSource {
    FeeSchedule(i64),
    FeeTemplate(i64),
    Installment(i64),
    Registration(i64),
}

impl BillSource {
    pub fn kind(&self) -> &'static str {
        match self {
            BillSource::FeeSchedule(_) => "fee_schedule",
            BillSource::FeeTemplate(_) => "fee_template",
            BillSource::Installment(_) => "installment",
            BillSource::Registration(_) => "registration",
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            BillSource::FeeSchedule(id)
            | BillSource::FeeTemplate(id)
            | BillSource::Installment(id)
            | BillSource::Registration(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: i64) -> Result<Self, AppError> {
        match kind {
            "fee_schedule" => Ok(BillSource::FeeSchedule(id)),
            "fee_template" => Ok(BillSource::FeeTemplate(id)),
            "installment" => Ok(BillSource::Installment(id)),
            "registration" => Ok(BillSource::Registration(id)),
            other => Err(AppError::InternalError(anyhow::anyhow!(
                "Unknown bill source kind: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StudentBill {
    pub bill_id: Uuid,
    pub student_id: String,
    pub period_code: String,
    pub name: String,
    pub quantity: i32,
    /// Gross amount before scholarship offset.
    pub amount: Decimal,
    pub scholarship_offset: Decimal,
    pub paid_amount: Decimal,
    pub draft: bool,
    pub source_kind: String,
    pub source_id: i64,
    pub due_date: Option<DateTime<Utc>>,
    /// Set once a ledger payment has been applied. A fully offset bill is
    /// settled with `paid_amount = 0`, so this marker is the settlement guard.
    pub settled_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl StudentBill {
    pub fn is_settled(&self) -> bool {
        self.settled_utc.is_some() || self.paid_amount > Decimal::ZERO
    }

    pub fn net_amount(&self) -> Decimal {
        (self.amount - self.scholarship_offset).max(Decimal::ZERO)
    }

    pub fn remaining(&self) -> Decimal {
        (self.net_amount() - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn status(&self) -> BillStatus {
        if self.remaining() <= Decimal::ZERO {
            BillStatus::Paid
        } else if self.paid_amount > Decimal::ZERO {
            BillStatus::Partial
        } else {
            BillStatus::Unpaid
        }
    }

    pub fn source(&self) -> Result<BillSource, AppError> {
        BillSource::from_parts(&self.source_kind, self.source_id)
    }
}

/// Input for creating a bill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudentBill {
    pub student_id: String,
    pub period_code: String,
    pub name: String,
    pub quantity: i32,
    pub amount: Decimal,
    pub scholarship_offset: Decimal,
    pub source: BillSource,
    pub due_date: Option<DateTime<Utc>>,
}

/// Bill with its derived amounts and the window in which it can be paid.
#[derive(Debug, Clone, Serialize)]
pub struct BillView {
    #[serde(flatten)]
    pub bill: StudentBill,
    pub net_amount: Decimal,
    pub remaining: Decimal,
    pub status: BillStatus,
    pub payment_window: PaymentWindow,
}

impl BillView {
    pub fn new(bill: StudentBill, payment_window: PaymentWindow) -> Self {
        Self {
            net_amount: bill.net_amount(),
            remaining: bill.remaining(),
            status: bill.status(),
            bill,
            payment_window,
        }
    }
}
