//! Shared fixtures and in-memory stores for tuition-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use tuition_service::billing::{BillingService, BillingStores, MatchTolerance};
use tuition_service::models::{
    AwardKind, BillingPeriod, FeeSchedule, FeeScheduleEntry, FeeTemplate, FeeTemplateItem,
    InstallmentPlan, NewLogEntry, NewPaymentConfirmation, NewStudentBill, OverrideScope,
    PaymentAllocation, PaymentConfirmation, PaymentEvent, PeriodOverride, ProgramUnit,
    ReconciliationLogEntry, RegistrationCharge, ScholarshipAward, Settlement, SettlementOutcome,
    SettlementReceipt, StudentBill, StudentPayment, StudentProfile, LEDGER_PAID_STATUS,
};
use tuition_service::stores::{
    AuditStore, BillStore, LedgerStore, MasterDataStore, ScholarshipStore,
};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,tuition_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn rupiah(value: i64) -> Decimal {
    Decimal::from(value)
}

pub fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, day, hour, minute, second)
        .single()
        .expect("valid fixture timestamp")
}

fn db_error(operation: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: injected failure", operation))
}

// ---------------------------------------------------------------------------
// Master data
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MasterState {
    pub periods: Vec<BillingPeriod>,
    pub overrides: Vec<PeriodOverride>,
    pub failing_scopes: HashSet<OverrideScope>,
    pub students: Vec<StudentProfile>,
    pub programs: Vec<ProgramUnit>,
    pub fail_program_lookup: bool,
    pub schedules: Vec<FeeSchedule>,
    pub schedule_entries: Vec<FeeScheduleEntry>,
    pub templates: Vec<FeeTemplate>,
    pub template_items: Vec<FeeTemplateItem>,
    pub installment_plans: Vec<InstallmentPlan>,
    pub registrations: Vec<RegistrationCharge>,
}

#[derive(Default)]
pub struct InMemoryMasterData {
    state: Mutex<MasterState>,
}

impl InMemoryMasterData {
    pub fn update(&self, f: impl FnOnce(&mut MasterState)) {
        let mut state = self.state.lock().unwrap();
        f(&mut state);
    }
}

#[async_trait]
impl MasterDataStore for InMemoryMasterData {
    async fn active_period(&self) -> Result<Option<BillingPeriod>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.periods.iter().rev().find(|p| p.is_active).cloned())
    }

    async fn find_period(&self, code: &str) -> Result<Option<BillingPeriod>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.periods.iter().find(|p| p.code == code).cloned())
    }

    async fn find_override(
        &self,
        scope: OverrideScope,
        scope_id: &str,
        period_id: i64,
    ) -> Result<Option<PeriodOverride>, AppError> {
        let state = self.state.lock().unwrap();
        if state.failing_scopes.contains(&scope) {
            return Err(db_error("fetch period override"));
        }
        Ok(state
            .overrides
            .iter()
            .rev()
            .find(|o| {
                o.scope() == Some(scope)
                    && o.scope_id == scope_id
                    && o.period_id == period_id
                    && o.is_active
            })
            .cloned())
    }

    async fn find_student(&self, student_id: &str) -> Result<Option<StudentProfile>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .students
            .iter()
            .find(|s| s.student_id == student_id)
            .cloned())
    }

    async fn find_program(&self, program_code: &str) -> Result<Option<ProgramUnit>, AppError> {
        let state = self.state.lock().unwrap();
        if state.fail_program_lookup {
            return Err(db_error("fetch program"));
        }
        Ok(state
            .programs
            .iter()
            .find(|p| p.code == program_code)
            .cloned())
    }

    async fn find_fee_schedule(
        &self,
        cohort: i32,
        program_code: &str,
    ) -> Result<Option<FeeSchedule>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .schedules
            .iter()
            .find(|s| s.cohort == cohort && s.program_code == program_code)
            .cloned())
    }

    async fn fee_schedule_entries(
        &self,
        schedule_id: i64,
        fee_group: Option<&str>,
    ) -> Result<Vec<FeeScheduleEntry>, AppError> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<FeeScheduleEntry> = state
            .schedule_entries
            .iter()
            .filter(|e| e.schedule_id == schedule_id)
            .filter(|e| fee_group.map_or(true, |g| e.fee_group.as_deref() == Some(g)))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.sequence, e.id));
        Ok(entries)
    }

    async fn find_fee_template(&self, code: &str) -> Result<Option<FeeTemplate>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.templates.iter().find(|t| t.code == code).cloned())
    }

    async fn fee_template_items(&self, template_id: i64) -> Result<Vec<FeeTemplateItem>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .template_items
            .iter()
            .filter(|i| i.template_id == template_id)
            .cloned()
            .collect())
    }

    async fn find_installment_plan(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Option<InstallmentPlan>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .installment_plans
            .iter()
            .find(|p| p.student_id == student_id && p.period_code == period_code)
            .cloned())
    }

    async fn find_registration_charge(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Option<RegistrationCharge>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .registrations
            .iter()
            .find(|r| r.student_id == student_id && r.period_code == period_code)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Scholarships and ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryScholarships {
    pub awards: Mutex<Vec<ScholarshipAward>>,
    pub fail: AtomicBool,
    pub failing_kinds: Mutex<HashSet<AwardKind>>,
}

impl InMemoryScholarships {
    pub fn add(&self, award: ScholarshipAward) {
        self.awards.lock().unwrap().push(award);
    }

    pub fn fail_kind(&self, kind: AwardKind) {
        self.failing_kinds.lock().unwrap().insert(kind);
    }
}

#[async_trait]
impl ScholarshipStore for InMemoryScholarships {
    async fn awards_for(
        &self,
        student_id: &str,
        period_code: &str,
        kind: AwardKind,
    ) -> Result<Vec<ScholarshipAward>, AppError> {
        if self.fail.load(Ordering::SeqCst) || self.failing_kinds.lock().unwrap().contains(&kind) {
            return Err(db_error("fetch awards"));
        }
        Ok(self
            .awards
            .lock()
            .unwrap()
            .iter()
            .filter(|a| {
                a.student_id == student_id && a.period_code == period_code && a.award_kind() == kind
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    pub events: Mutex<Vec<PaymentEvent>>,
    pub fail: AtomicBool,
}

impl InMemoryLedger {
    pub fn add(&self, event: PaymentEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn paid_sorted(&self, keep: impl Fn(&PaymentEvent) -> bool) -> Vec<PaymentEvent> {
        let mut events: Vec<PaymentEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.is_paid() && keep(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        events
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn paid_events_for(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Vec<PaymentEvent>, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(db_error("fetch ledger payments"));
        }
        Ok(self.paid_sorted(|e| e.identifier == student_id && e.period_code == period_code))
    }

    async fn paid_events_for_virtual_account(
        &self,
        virtual_account: &str,
    ) -> Result<Vec<PaymentEvent>, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(db_error("fetch ledger payments"));
        }
        Ok(self.paid_sorted(|e| e.virtual_account.as_deref() == Some(virtual_account)))
    }
}

// ---------------------------------------------------------------------------
// Local bill store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BillState {
    pub bills: Vec<StudentBill>,
    pub payments: Vec<StudentPayment>,
    pub allocations: Vec<PaymentAllocation>,
    pub confirmations: Vec<PaymentConfirmation>,
    pub logs: Vec<ReconciliationLogEntry>,
    pub failing_settlements: HashSet<Uuid>,
    pub fail_log_writes: bool,
}

/// Mirrors the Postgres store, including the settlement guards.
#[derive(Default)]
pub struct InMemoryBillStore {
    state: Mutex<BillState>,
}

impl InMemoryBillStore {
    pub fn update(&self, f: impl FnOnce(&mut BillState)) {
        let mut state = self.state.lock().unwrap();
        f(&mut state);
    }

    pub fn read<T>(&self, f: impl FnOnce(&BillState) -> T) -> T {
        let state = self.state.lock().unwrap();
        f(&state)
    }

    pub fn seed_bill(&self, bill: StudentBill) {
        self.state.lock().unwrap().bills.push(bill);
    }

    pub fn bill(&self, bill_id: Uuid) -> StudentBill {
        self.read(|s| {
            s.bills
                .iter()
                .find(|b| b.bill_id == bill_id)
                .cloned()
                .expect("bill exists")
        })
    }

    pub fn logs_with_outcome(&self, bill_id: Uuid, outcome: &str) -> Vec<ReconciliationLogEntry> {
        self.read(|s| {
            s.logs
                .iter()
                .filter(|l| l.bill_id == bill_id && l.outcome == outcome)
                .cloned()
                .collect()
        })
    }

    pub fn allocations_for(&self, bill_id: Uuid) -> Vec<PaymentAllocation> {
        self.read(|s| {
            s.allocations
                .iter()
                .filter(|a| a.bill_id == bill_id)
                .cloned()
                .collect()
        })
    }

    fn to_log_row(entry: &NewLogEntry) -> ReconciliationLogEntry {
        ReconciliationLogEntry {
            log_id: Uuid::new_v4(),
            bill_id: entry.bill_id,
            student_id: entry.student_id.clone(),
            old_status: entry.old_status.clone(),
            new_status: entry.new_status.clone(),
            old_paid_amount: entry.old_paid_amount,
            new_paid_amount: entry.new_paid_amount,
            amount: entry.amount,
            payment_date: entry.payment_date,
            invoice_id: entry.invoice_id,
            virtual_account: entry.virtual_account.clone(),
            time_difference_seconds: entry.time_difference_seconds,
            outcome: entry.outcome.as_str().to_string(),
            source: entry.source.clone(),
            message: entry.message.clone(),
            created_utc: Utc::now(),
        }
    }
}

#[async_trait]
impl BillStore for InMemoryBillStore {
    async fn list_bills(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<Vec<StudentBill>, AppError> {
        Ok(self.read(|s| {
            s.bills
                .iter()
                .filter(|b| b.student_id == student_id && b.period_code == period_code)
                .cloned()
                .collect()
        }))
    }

    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<StudentBill>, AppError> {
        Ok(self.read(|s| s.bills.iter().find(|b| b.bill_id == bill_id).cloned()))
    }

    async fn insert_bills(&self, bills: &[NewStudentBill]) -> Result<Vec<StudentBill>, AppError> {
        let now = Utc::now();
        let created: Vec<StudentBill> = bills
            .iter()
            .map(|b| StudentBill {
                bill_id: Uuid::new_v4(),
                student_id: b.student_id.clone(),
                period_code: b.period_code.clone(),
                name: b.name.clone(),
                quantity: b.quantity,
                amount: b.amount,
                scholarship_offset: b.scholarship_offset,
                paid_amount: Decimal::ZERO,
                draft: false,
                source_kind: b.source.kind().to_string(),
                source_id: b.source.id(),
                due_date: b.due_date,
                settled_utc: None,
                created_utc: now,
                updated_utc: now,
            })
            .collect();

        self.update(|s| s.bills.extend(created.iter().cloned()));
        Ok(created)
    }

    async fn delete_unpaid_bills(
        &self,
        student_id: &str,
        period_code: &str,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let allocated: HashSet<Uuid> = state.allocations.iter().map(|a| a.bill_id).collect();
        let before = state.bills.len();
        state.bills.retain(|b| {
            !(b.student_id == student_id
                && b.period_code == period_code
                && !b.is_settled()
                && !allocated.contains(&b.bill_id))
        });
        Ok((before - state.bills.len()) as u64)
    }

    async fn unsettled_bills(&self, period_code: &str) -> Result<Vec<StudentBill>, AppError> {
        let mut bills: Vec<StudentBill> = self.read(|s| {
            s.bills
                .iter()
                .filter(|b| b.period_code == period_code && !b.is_settled())
                .cloned()
                .collect()
        });
        bills.sort_by_key(|b| b.created_utc);
        Ok(bills)
    }

    async fn apply_settlement(
        &self,
        settlement: &Settlement,
    ) -> Result<SettlementOutcome, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_settlements.contains(&settlement.bill_id) {
            return Err(db_error("update bill"));
        }

        let now = Utc::now();
        let Some(index) = state
            .bills
            .iter()
            .position(|b| b.bill_id == settlement.bill_id && !b.is_settled())
        else {
            return Ok(SettlementOutcome::AlreadySettled);
        };

        let existing = state
            .payments
            .iter()
            .find(|p| p.payment_ref == settlement.payment.payment_ref)
            .map(|p| p.payment_id);
        if let Some(payment_id) = existing {
            let allocated_elsewhere = state
                .allocations
                .iter()
                .any(|a| a.payment_id == payment_id && a.bill_id != settlement.bill_id);
            if allocated_elsewhere {
                return Ok(SettlementOutcome::PaymentConsumed);
            }
        }

        let bill = &mut state.bills[index];
        bill.paid_amount = settlement.new_paid_amount;
        bill.settled_utc = Some(now);
        bill.updated_utc = now;

        let (payment_id, payment_reused) = match existing {
            Some(id) => (id, true),
            None => {
                let payment = &settlement.payment;
                let id = Uuid::new_v4();
                state.payments.push(StudentPayment {
                    payment_id: id,
                    student_id: payment.student_id.clone(),
                    period_code: payment.period_code.clone(),
                    payment_ref: payment.payment_ref.clone(),
                    amount: payment.amount,
                    method: payment.method.clone(),
                    virtual_account: payment.virtual_account.clone(),
                    note: payment.note.clone(),
                    paid_at: payment.paid_at,
                    created_utc: now,
                });
                (id, false)
            }
        };

        let allocated = state
            .allocations
            .iter()
            .any(|a| a.payment_id == payment_id && a.bill_id == settlement.bill_id);
        if !allocated {
            state.allocations.push(PaymentAllocation {
                allocation_id: Uuid::new_v4(),
                payment_id,
                bill_id: settlement.bill_id,
                amount: settlement.allocation_amount,
                created_utc: now,
            });
        }

        let log = Self::to_log_row(&settlement.log);
        state.logs.push(log);

        Ok(SettlementOutcome::Applied(SettlementReceipt {
            payment_id,
            payment_reused,
            allocation_created: !allocated,
        }))
    }

    async fn save_confirmation(
        &self,
        confirmation: &NewPaymentConfirmation,
    ) -> Result<PaymentConfirmation, AppError> {
        let saved = PaymentConfirmation {
            confirmation_id: Uuid::new_v4(),
            bill_id: confirmation.bill_id,
            va_number: confirmation.va_number.clone(),
            payment_date: confirmation.payment_date,
            proof_ref: confirmation.proof_ref.clone(),
            message: confirmation.message.clone(),
            created_utc: Utc::now(),
        };
        self.update(|s| s.confirmations.push(saved.clone()));
        Ok(saved)
    }
}

#[async_trait]
impl AuditStore for InMemoryBillStore {
    async fn append_log(&self, entry: &NewLogEntry) -> Result<ReconciliationLogEntry, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_log_writes {
            return Err(db_error("insert reconciliation log"));
        }
        let row = Self::to_log_row(entry);
        state.logs.push(row.clone());
        Ok(row)
    }

    async fn logs_for_bill(&self, bill_id: Uuid) -> Result<Vec<ReconciliationLogEntry>, AppError> {
        Ok(self.read(|s| {
            s.logs
                .iter()
                .filter(|l| l.bill_id == bill_id)
                .cloned()
                .collect()
        }))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const PERIOD_CODE: &str = "20251";

pub fn active_period() -> BillingPeriod {
    BillingPeriod {
        id: 1,
        code: PERIOD_CODE.to_string(),
        name: "Even semester 2025".to_string(),
        fiscal_year: "2025".to_string(),
        semester: 1,
        payment_start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        payment_end: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        is_active: true,
    }
}

pub fn period_override(
    id: i64,
    scope: OverrideScope,
    scope_id: &str,
    start_day: u32,
    end_day: u32,
) -> PeriodOverride {
    PeriodOverride {
        id,
        period_id: 1,
        scope_type: scope.as_str().to_string(),
        scope_id: scope_id.to_string(),
        payment_start: at(start_day, 0, 0, 0),
        payment_end: at(end_day, 0, 0, 0),
        is_active: true,
    }
}

/// Undergraduate admitted 2023/1 into program `IF` with fee group 3.
pub fn undergraduate(student_id: &str) -> StudentProfile {
    let mut profile = StudentProfile::new(student_id, "Test Student");
    profile.admission_year = Some(2023);
    profile.admission_semester = Some(1);
    profile.program_code = Some("IF".to_string());
    profile.fee_group = Some("3".to_string());
    profile
}

pub fn program_if() -> ProgramUnit {
    ProgramUnit {
        code: "IF".to_string(),
        name: "Informatics".to_string(),
        faculty_code: "FT".to_string(),
    }
}

pub fn schedule_entry(id: i64, name: &str, fee_group: &str, nominal: i64, sequence: i32) -> FeeScheduleEntry {
    FeeScheduleEntry {
        id,
        schedule_id: 10,
        name: name.to_string(),
        fee_group: Some(fee_group.to_string()),
        nominal: rupiah(nominal),
        sequence,
    }
}

pub fn if_schedule() -> FeeSchedule {
    FeeSchedule {
        id: 10,
        cohort: 2023,
        program_code: "IF".to_string(),
        name: "Informatics 2023".to_string(),
    }
}

pub fn scholarship(student_id: &str, nominal: i64) -> ScholarshipAward {
    ScholarshipAward {
        id: 1,
        student_id: student_id.to_string(),
        period_code: PERIOD_CODE.to_string(),
        kind: "scholarship".to_string(),
        program_status: "active".to_string(),
        nominal: rupiah(nominal),
    }
}

pub fn unpaid_bill(student_id: &str, amount: i64, offset: i64, created_utc: DateTime<Utc>) -> StudentBill {
    StudentBill {
        bill_id: Uuid::new_v4(),
        student_id: student_id.to_string(),
        period_code: PERIOD_CODE.to_string(),
        name: "Tuition".to_string(),
        quantity: 1,
        amount: rupiah(amount),
        scholarship_offset: rupiah(offset),
        paid_amount: Decimal::ZERO,
        draft: false,
        source_kind: "fee_schedule".to_string(),
        source_id: 1,
        due_date: None,
        settled_utc: None,
        created_utc,
        updated_utc: created_utc,
    }
}

pub fn paid_event(invoice_id: i64, student_id: &str, amount: i64, paid_at: DateTime<Utc>) -> PaymentEvent {
    PaymentEvent {
        invoice_id,
        virtual_account: Some(format!("8800{}", student_id)),
        identifier: student_id.to_string(),
        period_code: PERIOD_CODE.to_string(),
        amount: rupiah(amount),
        paid_at,
        status: LEDGER_PAID_STATUS.to_string(),
    }
}

pub fn hours(h: i64) -> Duration {
    Duration::hours(h)
}

/// In-memory stores wired into a billing service.
pub struct Harness {
    pub master: Arc<InMemoryMasterData>,
    pub scholarships: Arc<InMemoryScholarships>,
    pub ledger: Arc<InMemoryLedger>,
    pub bills: Arc<InMemoryBillStore>,
    pub service: BillingService,
}

pub fn harness() -> Harness {
    init_tracing();

    let master = Arc::new(InMemoryMasterData::default());
    let scholarships = Arc::new(InMemoryScholarships::default());
    let ledger = Arc::new(InMemoryLedger::default());
    let bills = Arc::new(InMemoryBillStore::default());

    master.update(|s| s.periods.push(active_period()));

    let service = BillingService::new(
        BillingStores {
            master: master.clone(),
            scholarships: scholarships.clone(),
            ledger: ledger.clone(),
            bills: bills.clone(),
            audit: bills.clone(),
        },
        MatchTolerance::default(),
    );

    Harness {
        master,
        scholarships,
        ledger,
        bills,
        service,
    }
}
