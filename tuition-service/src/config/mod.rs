//! Configuration for tuition-service.

use crate::billing::MatchTolerance;
use rust_decimal::Decimal;
use service_core::config::{self as core_config, parse_env, required_env};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub master_database: ExternalDatabaseConfig,
    pub ledger_database: ExternalDatabaseConfig,
    pub reconciliation: ReconciliationSettings,
}

/// Local Postgres holding bills, payments and the reconciliation log.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Read-only MySQL source.
#[derive(Debug, Clone)]
pub struct ExternalDatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ReconciliationSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub amount_tolerance: Decimal,
    pub time_window: Duration,
}

impl ReconciliationSettings {
    pub fn tolerance(&self) -> Result<MatchTolerance, AppError> {
        let time_window = chrono::Duration::from_std(self.time_window).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Reconciliation time window out of range: {}", e))
        })?;

        Ok(MatchTolerance {
            amount: self.amount_tolerance,
            time_window,
        })
    }
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            amount_tolerance: Decimal::from(1000),
            time_window: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = ReconciliationSettings::default();
        let external_max = parse_env("EXTERNAL_DB_MAX_CONNECTIONS", 5u32)?;

        let interval_secs = parse_env("RECONCILIATION_INTERVAL_SECS", defaults.interval.as_secs())?;
        if interval_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RECONCILIATION_INTERVAL_SECS must be greater than zero"
            )));
        }

        let amount_tolerance =
            parse_env("RECONCILIATION_AMOUNT_TOLERANCE", defaults.amount_tolerance)?;
        if amount_tolerance < Decimal::ZERO {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RECONCILIATION_AMOUNT_TOLERANCE must not be negative"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "tuition-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.trim().is_empty()),
            database: DatabaseConfig {
                url: required_env("DATABASE_URL")?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            master_database: ExternalDatabaseConfig {
                url: required_env("MASTER_DATABASE_URL")?,
                max_connections: external_max,
            },
            ledger_database: ExternalDatabaseConfig {
                url: required_env("LEDGER_DATABASE_URL")?,
                max_connections: external_max,
            },
            reconciliation: ReconciliationSettings {
                enabled: parse_env("RECONCILIATION_ENABLED", defaults.enabled)?,
                interval: Duration::from_secs(interval_secs),
                amount_tolerance,
                time_window: Duration::from_secs(parse_env(
                    "RECONCILIATION_TIME_WINDOW_SECS",
                    defaults.time_window.as_secs(),
                )?),
            },
        })
    }
}
