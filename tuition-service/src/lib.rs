//! Tuition Service - student bill generation and payment reconciliation.

pub mod billing;
pub mod config;
pub mod models;
pub mod services;
pub mod startup;
pub mod stores;
pub mod workers;
