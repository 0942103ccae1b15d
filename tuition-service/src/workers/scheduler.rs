use crate::billing::reconciliation::ReconciliationWorker;
use serde::Serialize;
use service_core::error::AppError;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Response to an on-demand scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanAccepted {
    /// False when a requested scan was already pending and absorbed this one.
    pub queued: bool,
}

/// Handle for requesting a scan outside the regular interval.
#[derive(Debug, Clone)]
pub struct ScanTrigger {
    tx: mpsc::Sender<()>,
}

impl ScanTrigger {
    pub fn trigger(&self) -> Result<ScanAccepted, AppError> {
        match self.tx.try_send(()) {
            Ok(()) => Ok(ScanAccepted { queued: true }),
            Err(TrySendError::Full(())) => Ok(ScanAccepted { queued: false }),
            Err(TrySendError::Closed(())) => {
                tracing::warn!("Scan requested but the reconciliation scheduler is not running");
                Err(AppError::ServiceUnavailable)
            }
        }
    }
}

/// Runs reconciliation scans on a fixed interval and on demand. Scans run
/// inline in the loop, so two scans never overlap.
pub struct ReconciliationScheduler {
    worker: ReconciliationWorker,
    interval: Duration,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_token: CancellationToken,
}

impl ReconciliationScheduler {
    pub fn new(worker: ReconciliationWorker, interval: Duration) -> (Self, ScanTrigger) {
        let (tx, trigger_rx) = mpsc::channel(1);

        let scheduler = Self {
            worker,
            interval,
            trigger_rx,
            shutdown_token: CancellationToken::new(),
        };

        (scheduler, ScanTrigger { tx })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn run(self) {
        let Self {
            worker,
            interval,
            mut trigger_rx,
            shutdown_token,
        } = self;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut triggers_open = true;

        tracing::info!(
            interval_secs = interval.as_secs(),
            "Reconciliation scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    tracing::info!("Reconciliation scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    scan(&worker, "interval").await;
                }
                request = trigger_rx.recv(), if triggers_open => {
                    match request {
                        Some(()) => scan(&worker, "trigger").await,
                        None => {
                            tracing::info!("All scan triggers dropped, continuing on interval only");
                            triggers_open = false;
                        }
                    }
                }
            }
        }
    }
}

async fn scan(worker: &ReconciliationWorker, reason: &'static str) {
    match worker.run_once().await {
        Ok(summary) => tracing::debug!(
            reason = reason,
            processed = summary.processed,
            matched = summary.matched,
            "Scheduled reconciliation scan completed"
        ),
        Err(e) => tracing::warn!(
            reason = reason,
            error = %e,
            "Scheduled reconciliation scan did not run"
        ),
    }
}
