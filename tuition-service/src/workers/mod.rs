pub mod scheduler;

pub use scheduler::{ReconciliationScheduler, ScanAccepted, ScanTrigger};
