//! Billing period and payment window models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Academic billing period, read from the master-data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BillingPeriod {
    pub id: i64,
    /// Administrative code in `YYYYS` form, e.g. `20251`.
    pub code: String,
    pub name: String,
    pub fiscal_year: String,
    pub semester: i32,
    pub payment_start: DateTime<Utc>,
    pub payment_end: DateTime<Utc>,
    pub is_active: bool,
}

impl BillingPeriod {
    pub fn default_window(&self) -> PaymentWindow {
        PaymentWindow {
            start: self.payment_start,
            end: Some(self.payment_end),
        }
    }
}

/// Scope an override applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideScope {
    Faculty,
    Program,
    Individual,
}

impl OverrideScope {
    /// Value stored in `budget_period_payment_overrides.scope_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideScope::Faculty => "fakultas",
            OverrideScope::Program => "prodi",
            OverrideScope::Individual => "individual",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "fakultas" | "faculty" => Some(OverrideScope::Faculty),
            "prodi" | "program" => Some(OverrideScope::Program),
            "individual" => Some(OverrideScope::Individual),
            _ => None,
        }
    }
}

/// Alternate payment window for one scope of a billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PeriodOverride {
    pub id: i64,
    pub period_id: i64,
    pub scope_type: String,
    pub scope_id: String,
    pub payment_start: DateTime<Utc>,
    pub payment_end: DateTime<Utc>,
    pub is_active: bool,
}

impl PeriodOverride {
    pub fn scope(&self) -> Option<OverrideScope> {
        OverrideScope::from_string(&self.scope_type)
    }

    pub fn window(&self) -> PaymentWindow {
        PaymentWindow {
            start: self.payment_start,
            end: Some(self.payment_end),
        }
    }
}

/// Effective payment window. `end = None` means there is no late cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWindow {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl PaymentWindow {
    pub fn open_ended(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }
}
