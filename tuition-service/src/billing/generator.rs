//! Per-student bill generation.
//!
//! Path selection, first match wins: installment plan, registration charge,
//! graduate fee template, master fee schedule. A source that already has a
//! bill for the student and period is never billed twice.

use crate::billing::scholarship::ScholarshipCalculator;
use crate::billing::session::session_number;
use crate::models::{
    BillSource, BillingPeriod, FeeScheduleEntry, InstallmentPlan, InstallmentStatus,
    NewStudentBill, RegistrationCharge, StudentBill, StudentProfile,
};
use crate::services::metrics::record_bills_generated;
use crate::stores::{BillStore, MasterDataStore};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPath {
    Installment,
    Registration,
    FeeTemplate,
    FeeSchedule,
}

impl GenerationPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPath::Installment => "installment",
            GenerationPath::Registration => "registration",
            GenerationPath::FeeTemplate => "fee_template",
            GenerationPath::FeeSchedule => "fee_schedule",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub student_id: String,
    pub period_code: String,
    pub path: GenerationPath,
    pub created: Vec<StudentBill>,
    /// Planned bills whose source was already billed.
    pub skipped_existing: usize,
}

/// Offsets for `nominals` when `balance` is consumed greedily in order.
pub fn allocate_scholarship(balance: Decimal, nominals: &[Decimal]) -> Vec<Decimal> {
    let mut remaining = balance.max(Decimal::ZERO);
    nominals
        .iter()
        .map(|nominal| {
            let offset = remaining.min((*nominal).max(Decimal::ZERO));
            remaining -= offset;
            offset
        })
        .collect()
}

#[derive(Clone)]
pub struct BillGenerator {
    master: Arc<dyn MasterDataStore>,
    bills: Arc<dyn BillStore>,
    scholarships: ScholarshipCalculator,
}

impl BillGenerator {
    pub fn new(
        master: Arc<dyn MasterDataStore>,
        bills: Arc<dyn BillStore>,
        scholarships: ScholarshipCalculator,
    ) -> Self {
        Self {
            master,
            bills,
            scholarships,
        }
    }

    #[instrument(skip(self, profile, period), fields(student_id = %profile.student_id, period = %period.code))]
    pub async fn generate(
        &self,
        profile: &StudentProfile,
        period: &BillingPeriod,
    ) -> Result<GenerationReport, AppError> {
        let (path, planned) = self.plan(profile, period).await?;

        let billed: HashSet<BillSource> = self
            .bills
            .list_bills(&profile.student_id, &period.code)
            .await?
            .iter()
            .filter_map(|bill| bill.source().ok())
            .collect();

        let (fresh, existing): (Vec<_>, Vec<_>) = planned
            .into_iter()
            .partition(|bill| !billed.contains(&bill.source));

        let created = if fresh.is_empty() {
            Vec::new()
        } else {
            self.bills.insert_bills(&fresh).await?
        };

        record_bills_generated(path.as_str(), created.len());
        info!(
            path = path.as_str(),
            created = created.len(),
            skipped_existing = existing.len(),
            "Bills generated"
        );

        Ok(GenerationReport {
            student_id: profile.student_id.clone(),
            period_code: period.code.clone(),
            path,
            created,
            skipped_existing: existing.len(),
        })
    }

    /// Drop bills with no recorded payment and generate again.
    #[instrument(skip(self, profile, period), fields(student_id = %profile.student_id, period = %period.code))]
    pub async fn regenerate(
        &self,
        profile: &StudentProfile,
        period: &BillingPeriod,
    ) -> Result<GenerationReport, AppError> {
        let removed = self
            .bills
            .delete_unpaid_bills(&profile.student_id, &period.code)
            .await?;
        info!(removed = removed, "Unpaid bills removed before regeneration");

        self.generate(profile, period).await
    }

    async fn plan(
        &self,
        profile: &StudentProfile,
        period: &BillingPeriod,
    ) -> Result<(GenerationPath, Vec<NewStudentBill>), AppError> {
        if let Some(plan) = self
            .master
            .find_installment_plan(&profile.student_id, &period.code)
            .await?
        {
            return Ok((GenerationPath::Installment, installment_bills(&plan)));
        }

        if let Some(charge) = self
            .master
            .find_registration_charge(&profile.student_id, &period.code)
            .await?
        {
            let award = self
                .scholarships
                .total_active_award(&profile.student_id, &period.code)
                .await;
            return Ok((GenerationPath::Registration, registration_bills(&charge, award)));
        }

        if profile.is_graduate() {
            let bills = self.template_bills(profile, period).await?;
            return Ok((GenerationPath::FeeTemplate, bills));
        }

        let bills = self.schedule_bills(profile, period).await?;
        Ok((GenerationPath::FeeSchedule, bills))
    }

    async fn schedule_bills(
        &self,
        profile: &StudentProfile,
        period: &BillingPeriod,
    ) -> Result<Vec<NewStudentBill>, AppError> {
        let cohort = profile.cohort().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No cohort recorded for student {}",
                profile.student_id
            ))
        })?;
        let program_code = profile.program_code.as_deref().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No study program recorded for student {}",
                profile.student_id
            ))
        })?;
        let fee_group = profile.fee_group.as_deref().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No fee group recorded for student {}",
                profile.student_id
            ))
        })?;

        let schedule = self
            .master
            .find_fee_schedule(cohort, program_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "No fee schedule found for this student's cohort ({} / {})",
                    cohort,
                    program_code
                ))
            })?;

        let mut entries = self
            .master
            .fee_schedule_entries(schedule.id, Some(fee_group))
            .await?;
        if entries.is_empty() {
            warn!(
                schedule_id = schedule.id,
                fee_group = fee_group,
                "No entries for fee group, falling back to the whole schedule"
            );
            entries = self.master.fee_schedule_entries(schedule.id, None).await?;
        }
        if entries.is_empty() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Fee schedule '{}' has no entries for fee group {}",
                schedule.name,
                fee_group
            )));
        }

        let award = self
            .scholarships
            .total_active_award(&profile.student_id, &period.code)
            .await;

        Ok(schedule_entry_bills(profile, period, &entries, award))
    }

    async fn template_bills(
        &self,
        profile: &StudentProfile,
        period: &BillingPeriod,
    ) -> Result<Vec<NewStudentBill>, AppError> {
        let code = profile.billing_code.as_deref().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No billing code recorded for student {}",
                profile.student_id
            ))
        })?;

        let template = self.master.find_fee_template(code).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("No fee template found for billing code {}", code))
        })?;

        let items = self.master.fee_template_items(template.id).await?;
        if items.is_empty() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Fee template {} has no items",
                template.code
            )));
        }

        let admission = profile.admission_period_code().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No admission period recorded for student {}",
                profile.student_id
            ))
        })?;
        let session = session_number(&admission, &period.code)?;

        let bills: Vec<NewStudentBill> = items
            .iter()
            .filter(|item| item.applies_to_session(session))
            .map(|item| NewStudentBill {
                student_id: profile.student_id.clone(),
                period_code: period.code.clone(),
                name: item.name.clone(),
                quantity: 1,
                amount: item.amount,
                scholarship_offset: Decimal::ZERO,
                source: BillSource::FeeTemplate(item.id),
                due_date: None,
            })
            .collect();

        if bills.is_empty() {
            warn!(template = %template.code, session = session, "No template items apply to the current session");
        }

        Ok(bills)
    }
}

fn schedule_entry_bills(
    profile: &StudentProfile,
    period: &BillingPeriod,
    entries: &[FeeScheduleEntry],
    award: Decimal,
) -> Vec<NewStudentBill> {
    let nominals: Vec<Decimal> = entries.iter().map(|e| e.nominal).collect();
    let offsets = allocate_scholarship(award, &nominals);

    entries
        .iter()
        .zip(offsets)
        .map(|(entry, offset)| NewStudentBill {
            student_id: profile.student_id.clone(),
            period_code: period.code.clone(),
            name: entry.name.clone(),
            quantity: 1,
            amount: entry.nominal,
            scholarship_offset: offset,
            source: BillSource::FeeSchedule(entry.id),
            due_date: None,
        })
        .collect()
}

fn installment_bills(plan: &InstallmentPlan) -> Vec<NewStudentBill> {
    plan.items
        .iter()
        .filter(|item| item.installment_status() != InstallmentStatus::Paid)
        .map(|item| NewStudentBill {
            student_id: plan.student_id.clone(),
            period_code: plan.period_code.clone(),
            name: format!("Installment {}", item.sequence),
            quantity: 1,
            amount: item.amount,
            scholarship_offset: Decimal::ZERO,
            source: BillSource::Installment(item.id),
            due_date: Some(item.due_date),
        })
        .collect()
}

fn registration_bills(charge: &RegistrationCharge, award: Decimal) -> Vec<NewStudentBill> {
    let gross = charge.outstanding();
    if charge.already_paid || gross.is_zero() {
        return Vec::new();
    }

    let name = match charge.fee_group.as_deref() {
        Some(group) if !group.trim().is_empty() => format!("UKT Group {}", group),
        _ => "Registration charge".to_string(),
    };

    vec![NewStudentBill {
        student_id: charge.student_id.clone(),
        period_code: charge.period_code.clone(),
        name,
        quantity: 1,
        amount: gross,
        scholarship_offset: award.max(Decimal::ZERO).min(gross),
        source: BillSource::Registration(charge.id),
        due_date: None,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn greedy_allocation_consumes_balance_in_order() {
        let offsets = allocate_scholarship(d(600), &[d(500), d(300), d(400)]);
        assert_eq!(offsets, vec![d(500), d(100), d(0)]);

        let nets: Vec<Decimal> = [d(500), d(300), d(400)]
            .iter()
            .zip(&offsets)
            .map(|(n, o)| n - o)
            .collect();
        assert_eq!(nets, vec![d(0), d(200), d(400)]);
    }

    #[test]
    fn allocation_without_balance_is_all_zero() {
        assert_eq!(allocate_scholarship(d(0), &[d(10), d(20)]), vec![d(0), d(0)]);
        assert_eq!(allocate_scholarship(d(-5), &[d(10)]), vec![d(0)]);
    }

    #[test]
    fn registration_bill_caps_offset_at_outstanding() {
        let charge = RegistrationCharge {
            id: 7,
            student_id: "S1".into(),
            period_code: "20251".into(),
            fee_group: Some("4".into()),
            nominal: d(2_000_000),
            paid_nominal: d(500_000),
            already_paid: false,
        };

        let bills = registration_bills(&charge, d(3_000_000));
        assert_eq!(bills.len(), 1);
        assert_eq!(bills[0].name, "UKT Group 4");
        assert_eq!(bills[0].amount, d(1_500_000));
        assert_eq!(bills[0].scholarship_offset, d(1_500_000));
        assert_eq!(bills[0].source, BillSource::Registration(7));
    }

    #[test]
    fn settled_registration_produces_no_bill() {
        let charge = RegistrationCharge {
            id: 7,
            student_id: "S1".into(),
            period_code: "20251".into(),
            fee_group: None,
            nominal: d(1_000),
            paid_nominal: d(0),
            already_paid: true,
        };
        assert!(registration_bills(&charge, d(0)).is_empty());
    }
}
