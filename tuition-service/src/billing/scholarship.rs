//! Scholarship and tuition-aid offset totals.

use crate::models::AwardKind;
use crate::stores::ScholarshipStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{instrument, warn};

#[derive(Clone)]
pub struct ScholarshipCalculator {
    store: Arc<dyn ScholarshipStore>,
}

impl ScholarshipCalculator {
    pub fn new(store: Arc<dyn ScholarshipStore>) -> Self {
        Self { store }
    }

    /// Sum of active awards for the student and period. A failed lookup of
    /// one award kind contributes zero.
    #[instrument(skip(self))]
    pub async fn total_active_award(&self, student_id: &str, period_code: &str) -> Decimal {
        let mut total = Decimal::ZERO;
        for kind in AwardKind::ALL {
            total += self.active_award(student_id, period_code, kind).await;
        }
        total
    }

    async fn active_award(&self, student_id: &str, period_code: &str, kind: AwardKind) -> Decimal {
        match self.store.awards_for(student_id, period_code, kind).await {
            Ok(awards) => awards
                .iter()
                .filter(|a| a.is_active() && a.award_kind() == kind)
                .filter(|a| a.student_id == student_id && a.period_code == period_code)
                .map(|a| a.nominal)
                .sum(),
            Err(e) => {
                warn!(error = %e, kind = kind.as_str(), "Award lookup failed, assuming no award");
                Decimal::ZERO
            }
        }
    }
}
