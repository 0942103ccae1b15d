//! Scholarship and tuition-aid awards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Award sources, looked up separately so one can fail without the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardKind {
    Scholarship,
    TuitionAid,
}

impl AwardKind {
    pub const ALL: [AwardKind; 2] = [AwardKind::Scholarship, AwardKind::TuitionAid];

    pub fn as_str(&self) -> &'static str {
        match self {
            AwardKind::Scholarship => "scholarship",
            AwardKind::TuitionAid => "tuition_aid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "tuition_aid" => AwardKind::TuitionAid,
            _ => AwardKind::Scholarship,
        }
    }
}

/// A student's share of a scholarship or aid program for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ScholarshipAward {
    pub id: i64,
    pub student_id: String,
    pub period_code: String,
    pub kind: String,
    /// Status of the parent program: `draft`, `active` or `inactive`.
    pub program_status: String,
    pub nominal: Decimal,
}

impl ScholarshipAward {
    pub fn is_active(&self) -> bool {
        self.program_status == "active"
    }

    pub fn award_kind(&self) -> AwardKind {
        AwardKind::from_string(&self.kind)
    }
}
