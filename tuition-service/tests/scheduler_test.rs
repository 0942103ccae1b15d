//! Scheduled and on-demand reconciliation scans.

mod common;

use common::{at, harness, hours, paid_event, unpaid_bill};
use service_core::error::AppError;
use std::time::Duration;
use tuition_service::models::BillStatus;
use tuition_service::workers::ReconciliationScheduler;
use uuid::Uuid;

async fn wait_until_paid(h: &common::Harness, bill_id: Uuid) -> bool {
    for _ in 0..200 {
        if h.bills.bill(bill_id).status() == BillStatus::Paid {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn scans_at_startup_and_on_trigger() {
    let h = harness();
    let created = at(1, 8, 0, 0);
    let first = unpaid_bill("S1", 700_000, 0, created);
    h.bills.seed_bill(first.clone());
    h.ledger.add(paid_event(1, "S1", 700_000, created + hours(1)));

    let (scheduler, trigger) =
        ReconciliationScheduler::new(h.service.worker(), Duration::from_secs(3600));
    let shutdown = scheduler.shutdown_token();
    let handle = tokio::spawn(scheduler.run());

    assert!(wait_until_paid(&h, first.bill_id).await);

    let second = unpaid_bill("S2", 500_000, 0, created);
    h.bills.seed_bill(second.clone());
    h.ledger.add(paid_event(2, "S2", 500_000, created + hours(2)));

    let accepted = tokio_test::assert_ok!(trigger.trigger());
    assert!(accepted.queued);
    assert!(wait_until_paid(&h, second.bill_id).await);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler stops after cancellation")
        .unwrap();
}

#[tokio::test]
async fn pending_trigger_absorbs_further_requests() {
    let h = harness();
    let (_scheduler, trigger) =
        ReconciliationScheduler::new(h.service.worker(), Duration::from_secs(3600));

    assert!(trigger.trigger().unwrap().queued);
    assert!(!trigger.trigger().unwrap().queued);
    assert!(!trigger.clone().trigger().unwrap().queued);
}

#[tokio::test]
async fn trigger_without_running_scheduler_is_unavailable() {
    let h = harness();
    let (scheduler, trigger) =
        ReconciliationScheduler::new(h.service.worker(), Duration::from_secs(3600));
    drop(scheduler);

    assert!(matches!(
        trigger.trigger().unwrap_err(),
        AppError::ServiceUnavailable
    ));
}

#[tokio::test]
async fn service_trigger_requires_scheduler() {
    let h = harness();
    assert!(matches!(
        h.service.trigger_reconciliation_scan().unwrap_err(),
        AppError::ServiceUnavailable
    ));

    let (_scheduler, trigger) =
        ReconciliationScheduler::new(h.service.worker(), Duration::from_secs(3600));
    let service = h.service.clone().with_trigger(trigger);
    assert!(service.trigger_reconciliation_scan().unwrap().queued);
}

#[tokio::test]
async fn shutdown_stops_an_idle_scheduler() {
    let h = harness();
    h.master.update(|s| s.periods.clear());

    let (scheduler, _trigger) =
        ReconciliationScheduler::new(h.service.worker(), Duration::from_millis(20));
    let token = scheduler.shutdown_token();
    let handle = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(60)).await;
    token.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler stops after cancellation")
        .unwrap();
}
