//! Billing engine: period resolution, bill generation, scholarship offsets
//! and payment reconciliation.

pub mod audit;
pub mod generator;
pub mod period;
pub mod reconciliation;
pub mod scholarship;
pub mod service;
pub mod session;

pub use audit::AuditLog;
pub use generator::{allocate_scholarship, BillGenerator, GenerationPath, GenerationReport};
pub use period::BillingPeriodResolver;
pub use reconciliation::{MatchTolerance, ReconciliationWorker, ScanSummary};
pub use scholarship::ScholarshipCalculator;
pub use service::{BillingService, BillingStores};
pub use session::{session_number, PeriodCode};
