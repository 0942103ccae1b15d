//! Services module for tuition-service.

pub mod database;
pub mod ledger;
pub mod master_data;
pub mod metrics;

pub use database::Database;
pub use ledger::LedgerDb;
pub use master_data::{connect_mysql, MasterDataDb};
pub use metrics::{
    get_metrics, init_metrics, record_bills_generated, record_error, record_outcome, record_scan,
};
