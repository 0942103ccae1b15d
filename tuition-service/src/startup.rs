//! Application startup and lifecycle management.

use crate::billing::{BillingService, BillingStores};
use crate::config::BillingConfig;
use crate::services::{connect_mysql, get_metrics, init_metrics, Database, LedgerDb, MasterDataDb};
use crate::workers::ReconciliationScheduler;
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
}

/// Liveness probe.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "tuition-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "tuition-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Operational router: health, readiness and Prometheus metrics.
pub fn http_router(db: Arc<Database>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(HealthState { db })
}

pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    db: Arc<Database>,
    scheduler: Option<ReconciliationScheduler>,
}

impl Application {
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build without running migrations, for harnesses that apply them.
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        let master_pool = connect_mysql(
            &config.master_database.url,
            config.master_database.max_connections,
            "master-data",
        )
        .await?;
        let ledger_pool = connect_mysql(
            &config.ledger_database.url,
            config.ledger_database.max_connections,
            "ledger",
        )
        .await?;

        let master = Arc::new(MasterDataDb::new(master_pool));
        let stores = BillingStores {
            master: master.clone(),
            scholarships: master,
            ledger: Arc::new(LedgerDb::new(ledger_pool)),
            bills: db.clone(),
            audit: db.clone(),
        };

        let tolerance = config.reconciliation.tolerance()?;
        let billing = BillingService::new(stores, tolerance);

        let scheduler = if config.reconciliation.enabled {
            // Timer-driven here; no in-process caller requests scans.
            let (scheduler, _trigger) =
                ReconciliationScheduler::new(billing.worker(), config.reconciliation.interval);
            Some(scheduler)
        } else {
            tracing::info!("Reconciliation scheduler disabled by configuration");
            None
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            amount_tolerance = %tolerance.amount,
            time_window_secs = tolerance.time_window.num_seconds(),
            "Tuition service listener bound"
        );

        Ok(Self {
            http_port,
            http_listener,
            db,
            scheduler,
        })
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = match self.scheduler {
            Some(scheduler) => {
                let token = scheduler.shutdown_token();
                tokio::spawn(scheduler.run());
                token
            }
            None => CancellationToken::new(),
        };

        // Stops the scheduler even when this future is dropped mid-serve.
        let _scheduler_guard = shutdown.drop_guard();
        let router = http_router(self.db.clone());

        tracing::info!(
            service = "tuition-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
