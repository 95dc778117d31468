use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{DailyMetricRecord, MetricValues};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Ratios stored next to the raw counts. All of them are zero when the denominator is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedMetrics {
    /// Click-through rate as a percentage.
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
}

impl DerivedMetrics {
    pub fn from_values(values: &MetricValues) -> Self {
        Self {
            ctr: ratio(values.clicks as f64, values.impressions as f64) * 100.0,
            cpc: ratio(values.spend, values.clicks as f64),
            cpm: ratio(values.spend, values.impressions as f64) * 1_000.0,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Keeps at most one metric row per (experiment, object, day). A re-sync of the
/// same day replaces the row with the newest platform numbers.
///
/// Writers for the same key are serialized through a per-key lock; the scheduled
/// sweep and a manual sync can both target today's row.
#[derive(Clone)]
pub struct MetricsStore {
    db: Arc<Database>,
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MetricsStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn key_lock(&self, key: &str) -> AppResult<Arc<Mutex<()>>> {
        let mut locks = self
            .key_locks
            .lock()
            .map_err(|_| AppError::Internal("metrics key lock poisoned".to_string()))?;
        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    /// Drops the caller's handle first so the map's count is exact under the map lock.
    fn release_key(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        if let Ok(mut locks) = self.key_locks.lock() {
            if locks.get(key).is_some_and(|entry| Arc::strong_count(entry) == 1) {
                locks.remove(key);
            }
        }
    }

    pub fn upsert_daily(
        &self,
        experiment_id: &str,
        external_object_id: &str,
        day: NaiveDate,
        values: MetricValues,
    ) -> AppResult<DailyMetricRecord> {
        if values.impressions < 0 || values.clicks < 0 || values.conversions < 0 {
            return Err(AppError::Validation(format!(
                "negative metric counts for {} on {}",
                external_object_id, day
            )));
        }
        if !values.spend.is_finite() || values.spend < 0.0 {
            return Err(AppError::Validation(format!(
                "invalid spend {} for {} on {}",
                values.spend, external_object_id, day
            )));
        }

        let derived = DerivedMetrics::from_values(&values);
        let key = format!("{}|{}|{}", experiment_id, external_object_id, day);
        let lock = self.key_lock(&key)?;
        let result = {
            let _guard = lock
                .lock()
                .map_err(|_| AppError::Internal("metrics key lock poisoned".to_string()))?;
            self.db
                .upsert_daily_metric(experiment_id, external_object_id, day, &values, &derived, Utc::now())
        };
        self.release_key(&key, lock);
        let record = result?;
        tracing::debug!(
            experiment_id,
            external_object_id,
            day = %day,
            impressions = record.impressions,
            clicks = record.clicks,
            "daily metrics upserted"
        );
        Ok(record)
    }
}
