//! Matching of unsettled bills against paid ledger events.
//!
//! A scan walks every bill of the active period that has no recorded
//! payment, strictly one at a time. Each bill is compared with the
//! student's paid ledger events, newest first, and the first event within
//! both the amount tolerance and the time window settles the bill. Every
//! decision lands in the reconciliation log.
//!
//! Settlement is idempotent through three keys: the conditional bill update
//! on the settlement marker, the `INV-{invoice_id}` payment reference and the
//! unique `(payment_id, bill_id)` allocation. Running the same scan twice,
//! or racing it against a manual confirmation, never double-books. A ledger
//! payment already allocated to another bill is consumed and skipped.

use crate::billing::audit::AuditLog;
use crate::billing::period::BillingPeriodResolver;
use crate::models::{
    NewLogEntry, NewStudentPayment, PaymentEvent, ReconcileOutcome, Settlement,
    SettlementOutcome, StudentBill, SOURCE_MANUAL_CONFIRMATION, SOURCE_RECONCILIATION_WORKER,
};
use crate::services::metrics::{record_error, record_outcome, record_scan, SCAN_DURATION};
use crate::stores::{BillStore, LedgerStore};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Acceptance bounds for a candidate payment. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchTolerance {
    pub amount: Decimal,
    pub time_window: Duration,
}

impl Default for MatchTolerance {
    fn default() -> Self {
        Self {
            amount: Decimal::from(1000),
            time_window: Duration::hours(3),
        }
    }
}

impl MatchTolerance {
    pub fn amount_matches(&self, expected: Decimal, actual: Decimal) -> bool {
        (actual - expected).abs() <= self.amount
    }

    pub fn time_matches(&self, delta: Duration) -> bool {
        abs_duration(delta) <= self.time_window
    }
}

/// Counts for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub processed: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub failed: usize,
}

enum Settle {
    Settled,
    AlreadySettled,
    PaymentConsumed,
}

fn abs_duration(delta: Duration) -> Duration {
    if delta < Duration::zero() {
        -delta
    } else {
        delta
    }
}

#[derive(Clone)]
pub struct ReconciliationWorker {
    bills: Arc<dyn BillStore>,
    ledger: Arc<dyn LedgerStore>,
    audit: AuditLog,
    periods: BillingPeriodResolver,
    tolerance: MatchTolerance,
}

impl ReconciliationWorker {
    pub fn new(
        bills: Arc<dyn BillStore>,
        ledger: Arc<dyn LedgerStore>,
        audit: AuditLog,
        periods: BillingPeriodResolver,
        tolerance: MatchTolerance,
    ) -> Self {
        Self {
            bills,
            ledger,
            audit,
            periods,
            tolerance,
        }
    }

    /// One full pass over the unsettled bills of the active period.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ScanSummary, AppError> {
        let timer = SCAN_DURATION.start_timer();

        let period = match self.periods.resolve_active_period().await {
            Ok(period) => period,
            Err(e) => {
                record_scan("aborted");
                warn!(error = %e, "Reconciliation scan aborted: no active period");
                return Err(e);
            }
        };

        let bills = match self.bills.unsettled_bills(&period.code).await {
            Ok(bills) => bills,
            Err(e) => {
                record_scan("aborted");
                error!(error = %e, period = %period.code, "Reconciliation scan aborted: failed to list bills");
                return Err(e);
            }
        };

        info!(period = %period.code, bills = bills.len(), "Reconciliation scan started");

        let mut summary = ScanSummary::default();
        for bill in &bills {
            summary.processed += 1;
            match self.reconcile_bill(bill).await {
                Ok(true) => summary.matched += 1,
                Ok(false) => summary.unmatched += 1,
                Err(e) => {
                    summary.failed += 1;
                    record_error("reconcile_bill");
                    error!(error = %e, bill_id = %bill.bill_id, "Failed to reconcile bill");
                }
            }
        }

        timer.observe_duration();
        record_scan("completed");
        info!(
            period = %period.code,
            processed = summary.processed,
            matched = summary.matched,
            unmatched = summary.unmatched,
            failed = summary.failed,
            "Reconciliation scan finished"
        );

        Ok(summary)
    }

    /// Try to settle one bill from the ledger. `Ok(true)` when this call
    /// marked the bill paid.
    #[instrument(skip(self, bill), fields(bill_id = %bill.bill_id, student_id = %bill.student_id))]
    pub async fn reconcile_bill(&self, bill: &StudentBill) -> Result<bool, AppError> {
        let net = bill.net_amount();

        let candidates: Vec<PaymentEvent> = self
            .ledger
            .paid_events_for(&bill.student_id, &bill.period_code)
            .await?
            .into_iter()
            .filter(|event| event.is_paid())
            .collect();

        self.log(
            NewLogEntry::for_bill(bill, ReconcileOutcome::Checking, SOURCE_RECONCILIATION_WORKER)
                .with_message(format!(
                    "Checking bill '{}' with net amount {} against {} paid ledger event(s)",
                    bill.name,
                    net,
                    candidates.len()
                )),
        )
        .await;

        if candidates.is_empty() {
            self.log(
                NewLogEntry::for_bill(bill, ReconcileOutcome::NoPayment, SOURCE_RECONCILIATION_WORKER)
                    .with_message(format!(
                        "No paid ledger event for student {} in period {}",
                        bill.student_id, bill.period_code
                    )),
            )
            .await;
            return Ok(false);
        }

        for event in &candidates {
            let delta = event.paid_at - bill.created_utc;
            let delta_secs = abs_duration(delta).num_seconds();

            if !self.tolerance.amount_matches(net, event.amount) {
                self.log(
                    NewLogEntry::for_bill(
                        bill,
                        ReconcileOutcome::AmountMismatch,
                        SOURCE_RECONCILIATION_WORKER,
                    )
                    .with_candidate(event, delta_secs)
                    .with_message(format!(
                        "Invoice {} amount {} differs from net {} by {} (tolerance {})",
                        event.invoice_id,
                        event.amount,
                        net,
                        (event.amount - net).abs(),
                        self.tolerance.amount
                    )),
                )
                .await;
                continue;
            }

            if !self.tolerance.time_matches(delta) {
                self.log(
                    NewLogEntry::for_bill(
                        bill,
                        ReconcileOutcome::TimeMismatch,
                        SOURCE_RECONCILIATION_WORKER,
                    )
                    .with_candidate(event, delta_secs)
                    .with_message(format!(
                        "Invoice {} paid {}s away from bill creation (window {}s)",
                        event.invoice_id,
                        delta_secs,
                        self.tolerance.time_window.num_seconds()
                    )),
                )
                .await;
                continue;
            }

            let message = format!(
                "Matched ledger invoice {}. Amount: {}, payment date: {}, time difference: {:.1} hours",
                event.invoice_id,
                event.amount,
                event.paid_at.to_rfc3339(),
                delta_secs as f64 / 3600.0
            );
            let note = format!("Automatic payment from reconciliation - invoice {}", event.invoice_id);

            match self
                .settle(bill, event, delta_secs, SOURCE_RECONCILIATION_WORKER, note, message)
                .await?
            {
                Settle::Settled => return Ok(true),
                Settle::AlreadySettled => return Ok(false),
                Settle::PaymentConsumed => continue,
            }
        }

        self.log(
            NewLogEntry::for_bill(bill, ReconcileOutcome::NoMatch, SOURCE_RECONCILIATION_WORKER)
                .with_message(format!(
                    "None of {} ledger event(s) matched amount and time",
                    candidates.len()
                )),
        )
        .await;

        Ok(false)
    }

    /// Settle `bill` from a ledger event carried by `virtual_account`. Only
    /// the amount tolerance applies; the student-supplied payment date is
    /// not trusted for matching.
    #[instrument(skip(self, bill), fields(bill_id = %bill.bill_id))]
    pub async fn verify_virtual_account(
        &self,
        bill: &StudentBill,
        virtual_account: &str,
    ) -> Result<bool, AppError> {
        let virtual_account = virtual_account.trim();
        if virtual_account.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Virtual account number is required"
            )));
        }

        if bill.is_settled() {
            info!("Bill already carries a payment, nothing to verify");
            return Ok(false);
        }

        let net = bill.net_amount();
        let events = self
            .ledger
            .paid_events_for_virtual_account(virtual_account)
            .await?;

        let matching = events.iter().filter(|event| {
            event.is_paid()
                && event.identifier == bill.student_id
                && event.period_code == bill.period_code
                && self.tolerance.amount_matches(net, event.amount)
        });

        for event in matching {
            let delta_secs = abs_duration(event.paid_at - bill.created_utc).num_seconds();
            let message = format!(
                "Confirmed through virtual account {}. Invoice {}, amount {}",
                virtual_account, event.invoice_id, event.amount
            );
            let note = format!("Manual confirmation - invoice {}", event.invoice_id);

            match self
                .settle(bill, event, delta_secs, SOURCE_MANUAL_CONFIRMATION, note, message)
                .await?
            {
                Settle::Settled => return Ok(true),
                Settle::AlreadySettled => return Ok(false),
                Settle::PaymentConsumed => continue,
            }
        }

        self.log(
            NewLogEntry::for_bill(bill, ReconcileOutcome::NoMatch, SOURCE_MANUAL_CONFIRMATION)
                .with_message(format!(
                    "No unallocated paid ledger event on virtual account {} matches net {}",
                    virtual_account, net
                )),
        )
        .await;
        Ok(false)
    }

    async fn settle(
        &self,
        bill: &StudentBill,
        event: &PaymentEvent,
        delta_secs: i64,
        source: &str,
        note: String,
        message: String,
    ) -> Result<Settle, AppError> {
        let net = bill.net_amount();
        let settlement = Settlement {
            bill_id: bill.bill_id,
            new_paid_amount: net,
            payment: NewStudentPayment::from_event(event, &bill.student_id, note),
            allocation_amount: event.amount,
            log: NewLogEntry::for_bill(bill, ReconcileOutcome::Paid, source)
                .with_candidate(event, delta_secs)
                .with_new_paid_amount(net)
                .with_message(message),
        };

        match self.bills.apply_settlement(&settlement).await {
            Ok(SettlementOutcome::Applied(receipt)) => {
                record_outcome(ReconcileOutcome::Paid.as_str());
                info!(
                    invoice_id = event.invoice_id,
                    payment_id = %receipt.payment_id,
                    payment_reused = receipt.payment_reused,
                    allocation_created = receipt.allocation_created,
                    "Bill settled"
                );
                Ok(Settle::Settled)
            }
            Ok(SettlementOutcome::AlreadySettled) => {
                info!(invoice_id = event.invoice_id, "Bill was settled by another writer");
                Ok(Settle::AlreadySettled)
            }
            Ok(SettlementOutcome::PaymentConsumed) => {
                self.log(
                    NewLogEntry::for_bill(bill, ReconcileOutcome::PaymentConsumed, source)
                        .with_candidate(event, delta_secs)
                        .with_message(format!(
                            "Invoice {} is already allocated to another bill",
                            event.invoice_id
                        )),
                )
                .await;
                Ok(Settle::PaymentConsumed)
            }
            Err(e) => {
                self.log(
                    NewLogEntry::for_bill(bill, ReconcileOutcome::UpdateError, source)
                        .with_candidate(event, delta_secs)
                        .with_message(format!(
                            "Failed to settle from invoice {}: {}",
                            event.invoice_id, e
                        )),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn log(&self, entry: NewLogEntry) {
        if entry.outcome != ReconcileOutcome::Checking {
            record_outcome(entry.outcome.as_str());
        }
        self.audit.record(entry).await;
    }
}
