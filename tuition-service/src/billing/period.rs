//! Active billing period and effective payment window resolution.

use crate::billing::session::PeriodCode;
use crate::models::{BillingPeriod, OverrideScope, PaymentWindow, StudentProfile};
use crate::stores::MasterDataStore;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct BillingPeriodResolver {
    master: Arc<dyn MasterDataStore>,
}

impl BillingPeriodResolver {
    pub fn new(master: Arc<dyn MasterDataStore>) -> Self {
        Self { master }
    }

    /// The single active billing period.
    #[instrument(skip(self))]
    pub async fn resolve_active_period(&self) -> Result<BillingPeriod, AppError> {
        self.master
            .active_period()
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No active billing period")))
    }

    /// Period by its `YYYYS` code.
    #[instrument(skip(self))]
    pub async fn resolve_period(&self, code: &str) -> Result<BillingPeriod, AppError> {
        PeriodCode::parse(code)?;
        self.master.find_period(code).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Billing period {} not found", code))
        })
    }

    /// Payment window for a student in `period`, after applying overrides in
    /// faculty, program, individual order. Lookup failures at any scope leave
    /// the window from the previous scope in place.
    #[instrument(skip(self, profile, period), fields(student_id = %profile.student_id, period = %period.code))]
    pub async fn resolve_window_for(
        &self,
        profile: &StudentProfile,
        period: &BillingPeriod,
    ) -> PaymentWindow {
        let mut window = period.default_window();

        let program = match profile.program_code.as_deref() {
            Some(code) => match self.master.find_program(code).await {
                Ok(program) => program,
                Err(e) => {
                    warn!(error = %e, program_code = code, "Program lookup failed, skipping program and faculty overrides");
                    None
                }
            },
            None => None,
        };

        if let Some(program) = &program {
            if let Some(w) = self
                .scoped_window(OverrideScope::Faculty, &program.faculty_code, period)
                .await
            {
                window = w;
            }
            if let Some(w) = self
                .scoped_window(OverrideScope::Program, &program.code, period)
                .await
            {
                window = w;
            }
        }

        if let Some(w) = self
            .scoped_window(OverrideScope::Individual, &profile.student_id, period)
            .await
        {
            window = w;
        }

        window
    }

    /// Active period together with the student's effective window.
    pub async fn resolve_active_window(
        &self,
        profile: &StudentProfile,
    ) -> Result<(BillingPeriod, PaymentWindow), AppError> {
        let period = self.resolve_active_period().await?;
        let window = self.resolve_window_for(profile, &period).await;
        Ok((period, window))
    }

    async fn scoped_window(
        &self,
        scope: OverrideScope,
        scope_id: &str,
        period: &BillingPeriod,
    ) -> Option<PaymentWindow> {
        match self.master.find_override(scope, scope_id, period.id).await {
            Ok(Some(found)) if found.is_active => {
                debug!(scope = scope.as_str(), scope_id = scope_id, "Applying payment window override");
                Some(found.window())
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, scope = scope.as_str(), scope_id = scope_id, "Override lookup failed, ignoring scope");
                None
            }
        }
    }
}
