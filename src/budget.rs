use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetPlan {
    pub total: f64,
    pub duration_days: u32,
    /// `total / duration_days` before the platform floor was applied.
    pub raw_daily: f64,
    pub daily: f64,
    pub clamped: bool,
}

impl BudgetPlan {
    pub fn compute(total: f64, duration_days: u32, platform_minimum_per_day: f64) -> AppResult<Self> {
        if !total.is_finite() || total <= 0.0 {
            return Err(AppError::Validation(format!(
                "Budget must be a positive amount (got {})",
                total
            )));
        }
        if duration_days == 0 {
            return Err(AppError::Validation(
                "Duration must be at least one day".to_string(),
            ));
        }

        let raw_daily = total / f64::from(duration_days);
        let daily = daily_budget(total, duration_days, platform_minimum_per_day);
        let clamped = daily > raw_daily;
        if clamped {
            tracing::warn!(
                total,
                duration_days,
                raw_daily,
                daily,
                "daily budget raised to platform minimum"
            );
        }

        Ok(Self {
            total,
            duration_days,
            raw_daily,
            daily,
            clamped,
        })
    }

    /// Rebuilds the plan of an experiment that was already persisted.
    pub fn from_stored(total: f64, duration_days: u32, daily: f64) -> Self {
        let raw_daily = total / f64::from(duration_days.max(1));
        Self {
            total,
            duration_days,
            raw_daily,
            daily,
            clamped: daily > raw_daily,
        }
    }

    /// Amount sent to the platform, in cents.
    pub fn daily_minor_units(&self) -> i64 {
        to_minor_units(self.daily)
    }

    pub fn clamp_warning(&self) -> Option<String> {
        self.clamped.then(|| {
            format!(
                "Daily budget raised from {:.2} to the platform minimum of {:.2}; total spend may exceed {:.2}",
                self.raw_daily, self.daily, self.total
            )
        })
    }
}

pub fn daily_budget(total: f64, duration_days: u32, platform_minimum_per_day: f64) -> f64 {
    let raw = total / f64::from(duration_days.max(1));
    raw.max(platform_minimum_per_day)
}

pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}
