use crate::models::{NewLogEntry, ReconciliationLogEntry};
use crate::services::metrics::record_error;
use crate::stores::AuditStore;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Append-only reconciliation history.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append an entry. Store failures are logged and dropped.
    pub async fn record(&self, entry: NewLogEntry) {
        match self.store.append_log(&entry).await {
            Ok(saved) => debug!(
                log_id = %saved.log_id,
                bill_id = %saved.bill_id,
                outcome = %saved.outcome,
                "Reconciliation log entry written"
            ),
            Err(e) => {
                record_error("audit_write");
                error!(
                    error = %e,
                    bill_id = %entry.bill_id,
                    outcome = entry.outcome.as_str(),
                    "Failed to write reconciliation log entry"
                );
            }
        }
    }

    pub async fn history(&self, bill_id: Uuid) -> Result<Vec<ReconciliationLogEntry>, AppError> {
        self.store.logs_for_bill(bill_id).await
    }
}
