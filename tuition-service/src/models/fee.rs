//! Master fee schedules, graduate fee templates, installment plans and
//! registration charges.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Master fee schedule for one cohort and program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FeeSchedule {
    pub id: i64,
    pub cohort: i32,
    pub program_code: String,
    pub name: String,
}

/// One component of a student's gross obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FeeScheduleEntry {
    pub id: i64,
    pub schedule_id: i64,
    pub name: String,
    pub fee_group: Option<String>,
    pub nominal: Decimal,
    pub sequence: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FeeTemplate {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// Graduate template item charged for a range of sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FeeTemplateItem {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub amount: Decimal,
    pub starts_at_session: i32,
    /// Number of consecutive sessions charged; zero means every session from
    /// `starts_at_session` onward.
    pub repeat_count: i32,
}

impl FeeTemplateItem {
    pub fn applies_to_session(&self, session: i32) -> bool {
        let last_session = self.starts_at_session + self.repeat_count - 1;
        let in_range = self.starts_at_session <= session && session <= last_session;
        let recurring =
            self.repeat_count == 0 && self.starts_at_session > 0 && self.starts_at_session <= session;
        in_range || recurring
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Unpaid,
    Partial,
    Paid,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Unpaid => "unpaid",
            InstallmentStatus::Partial => "partial",
            InstallmentStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => InstallmentStatus::Paid,
            "partial" => InstallmentStatus::Partial,
            _ => InstallmentStatus::Unpaid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InstallmentItem {
    pub id: i64,
    pub plan_id: i64,
    pub sequence: i32,
    pub due_date: DateTime<Utc>,
    pub amount: Decimal,
    pub status: String,
}

impl InstallmentItem {
    pub fn installment_status(&self) -> InstallmentStatus {
        InstallmentStatus::from_string(&self.status)
    }
}

/// Pre-approved installment schedule for one student and period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub id: i64,
    pub student_id: String,
    pub period_code: String,
    pub fee_group: Option<String>,
    pub items: Vec<InstallmentItem>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InstallmentPlanRow {
    pub id: i64,
    pub student_id: String,
    pub period_code: String,
    pub fee_group: Option<String>,
}

impl InstallmentPlanRow {
    pub fn with_items(self, mut items: Vec<InstallmentItem>) -> InstallmentPlan {
        items.sort_by_key(|item| item.sequence);
        InstallmentPlan {
            id: self.id,
            student_id: self.student_id,
            period_code: self.period_code,
            fee_group: self.fee_group,
            items,
        }
    }
}

/// One-time registration charge with a hard deadline at the window end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RegistrationCharge {
    pub id: i64,
    pub student_id: String,
    pub period_code: String,
    pub fee_group: Option<String>,
    pub nominal: Decimal,
    pub paid_nominal: Decimal,
    pub already_paid: bool,
}

impl RegistrationCharge {
    pub fn outstanding(&self) -> Decimal {
        (self.nominal - self.paid_nominal).max(Decimal::ZERO)
    }
}
