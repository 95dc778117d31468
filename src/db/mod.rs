use crate::errors::{AppError, AppResult};
use crate::metrics_store::DerivedMetrics;
use crate::models::{
    AccountConnection, ConnectAccountPayload, CreativeContent, DailyMetricRecord, DateRange, EngineSettings,
    Experiment, ExperimentStatus, ListExperimentsFilters, MetricValues, OrphanedCampaign, SweepError,
    SyncRunRecord, Variant,
};
use crate::vocabulary::PlatformObjective;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const EXPERIMENT_COLUMNS: &str = "id, owner_id, name, variant_creative_ids_json, external_campaign_id, external_ad_set_id,
     objective, budget_total, daily_budget, duration_days, status, winner_creative_id, start_date, end_date,
     idempotency_key, last_synced_at, last_sync_error, created_at, updated_at";

const VARIANT_COLUMNS: &str = "id, experiment_id, creative_id, position, external_creative_id, external_ad_id,
     creation_error, created_at, updated_at";

const METRIC_COLUMNS: &str = "id, experiment_id, external_object_id, metric_date, impressions, clicks, spend,
     conversions, ctr, cpc, cpm, synced_at";

const METRIC_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Settings ─────────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<EngineSettings> {
        let conn = self.lock()?;
        let raw: String = conn.query_row("SELECT settings_json FROM settings WHERE id = 1", [], |row| row.get(0))?;
        Ok(serde_json::from_str(&raw).unwrap_or_else(|error| {
            tracing::warn!(error = %error, "stored settings are unreadable, using defaults");
            EngineSettings::default()
        }))
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<EngineSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: EngineSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("Invalid settings update: {}", error)))?;

        let conn = self.lock()?;
        conn.execute(
            "UPDATE settings SET settings_json = ?1, updated_at = ?2 WHERE id = 1",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;
        Ok(settings)
    }

    // ─── Account connections ──────────────────────────────────────────────────

    pub fn upsert_connection(&self, owner_id: &str, payload: &ConnectAccountPayload) -> AppResult<AccountConnection> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO account_connections (
               owner_id, access_token, ad_account_id, page_id, token_expires_at, connected_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(owner_id) DO UPDATE SET
               access_token = excluded.access_token,
               ad_account_id = excluded.ad_account_id,
               page_id = excluded.page_id,
               token_expires_at = excluded.token_expires_at,
               updated_at = excluded.updated_at",
            params![
                owner_id,
                payload.access_token,
                payload.ad_account_id,
                payload.page_id,
                payload.token_expires_at.map(|at| at.to_rfc3339()),
                now.to_rfc3339(),
            ],
        )?;
        conn.query_row(
            "SELECT owner_id, access_token, ad_account_id, page_id, token_expires_at, connected_at, updated_at
             FROM account_connections WHERE owner_id = ?1",
            [owner_id],
            parse_connection_row,
        )
        .map_err(AppError::from)
    }

    pub fn get_connection(&self, owner_id: &str) -> AppResult<Option<AccountConnection>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT owner_id, access_token, ad_account_id, page_id, token_expires_at, connected_at, updated_at
             FROM account_connections WHERE owner_id = ?1",
            [owner_id],
            parse_connection_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn delete_connection(&self, owner_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM account_connections WHERE owner_id = ?1", [owner_id])?;
        Ok(changed > 0)
    }

    // ─── Creatives ────────────────────────────────────────────────────────────

    pub fn upsert_creative(&self, creative: &CreativeContent) -> AppResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO creatives (id, owner_id, headline, body, cta, asset_ref, link_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(id) DO UPDATE SET
               headline = excluded.headline,
               body = excluded.body,
               cta = excluded.cta,
               asset_ref = excluded.asset_ref,
               link_url = excluded.link_url,
               updated_at = excluded.updated_at
             WHERE creatives.owner_id = excluded.owner_id",
            params![
                creative.creative_id,
                creative.owner_id,
                creative.headline,
                creative.body,
                creative.cta,
                creative.asset_ref,
                creative.link_url,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_creative(&self, creative_id: &str) -> AppResult<Option<CreativeContent>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, owner_id, headline, body, cta, asset_ref, link_url FROM creatives WHERE id = ?1",
            [creative_id],
            |row| {
                Ok(CreativeContent {
                    creative_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    headline: row.get(2)?,
                    body: row.get(3)?,
                    cta: row.get(4)?,
                    asset_ref: row.get(5)?,
                    link_url: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    // ─── Experiments ──────────────────────────────────────────────────────────

    /// Writes an experiment and all of its variants in one transaction.
    pub fn insert_experiment(&self, experiment: &Experiment, variants: &[Variant]) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO experiments (
               id, owner_id, name, variant_creative_ids_json, external_campaign_id, external_ad_set_id,
               objective, budget_total, daily_budget, duration_days, status, winner_creative_id, start_date,
               end_date, idempotency_key, last_synced_at, last_sync_error, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                experiment.id,
                experiment.owner_id,
                experiment.name,
                serde_json::to_string(&experiment.variant_creative_ids)?,
                experiment.external_campaign_id,
                experiment.external_ad_set_id,
                experiment.objective.as_str(),
                experiment.budget_total,
                experiment.daily_budget,
                experiment.duration_days,
                experiment.status.as_str(),
                experiment.winner_creative_id,
                experiment.start_date.map(|at| at.to_rfc3339()),
                experiment.end_date.map(|at| at.to_rfc3339()),
                experiment.idempotency_key,
                experiment.last_synced_at.map(|at| at.to_rfc3339()),
                experiment.last_sync_error,
                experiment.created_at.to_rfc3339(),
                experiment.updated_at.to_rfc3339(),
            ],
        )?;
        for variant in variants {
            tx.execute(
                "INSERT INTO variants (
                   id, experiment_id, creative_id, position, external_creative_id, external_ad_id,
                   creation_error, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    variant.id,
                    variant.experiment_id,
                    variant.creative_id,
                    variant.position,
                    variant.external_creative_id,
                    variant.external_ad_id,
                    variant.creation_error,
                    variant.created_at.to_rfc3339(),
                    variant.updated_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_experiment(&self, experiment_id: &str) -> AppResult<Option<Experiment>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM experiments WHERE id = ?1", EXPERIMENT_COLUMNS),
            [experiment_id],
            parse_experiment_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn find_experiment_by_idempotency_key(&self, owner_id: &str, key: &str) -> AppResult<Option<Experiment>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM experiments WHERE owner_id = ?1 AND idempotency_key = ?2",
                EXPERIMENT_COLUMNS
            ),
            params![owner_id, key],
            parse_experiment_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_experiments(&self, owner_id: &str, filters: &ListExperimentsFilters) -> AppResult<Vec<Experiment>> {
        let conn = self.lock()?;
        let mut query = format!("SELECT {} FROM experiments WHERE owner_id = ?", EXPERIMENT_COLUMNS);
        let mut params_vec: Vec<String> = vec![owner_id.to_string()];

        if let Some(status) = filters.status {
            query.push_str(" AND status = ?");
            params_vec.push(status.as_str().to_string());
        }

        query.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
        let limit = filters.limit.unwrap_or(100);
        let offset = filters.offset.unwrap_or(0);

        let mut statement = conn.prepare(&query)?;
        let mut dyn_params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|param| param as &dyn rusqlite::ToSql)
            .collect();
        dyn_params.push(&limit);
        dyn_params.push(&offset);

        let rows = statement.query_map(rusqlite::params_from_iter(dyn_params), parse_experiment_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Experiments the sweep should visit: live status and a remote campaign, optionally for one owner.
    pub fn list_syncable_experiments(&self, owner_id: Option<&str>) -> AppResult<Vec<Experiment>> {
        let conn = self.lock()?;
        let base = format!(
            "SELECT {} FROM experiments
             WHERE status IN ('created', 'active') AND external_campaign_id IS NOT NULL",
            EXPERIMENT_COLUMNS
        );
        let rows = match owner_id {
            Some(owner_id) => {
                let mut statement = conn.prepare(&format!("{} AND owner_id = ?1 ORDER BY created_at ASC", base))?;
                let rows = statement
                    .query_map([owner_id], parse_experiment_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut statement = conn.prepare(&format!("{} ORDER BY created_at ASC", base))?;
                let rows = statement
                    .query_map([], parse_experiment_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Compare-and-set on status so a concurrent writer cannot be silently overwritten.
    pub fn transition_experiment_status(
        &self,
        experiment_id: &str,
        from: ExperimentStatus,
        to: ExperimentStatus,
    ) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE experiments SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![to.as_str(), Utc::now().to_rfc3339(), experiment_id, from.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// `created -> active`, stamping `start_date` the first time only.
    pub fn activate_experiment(&self, experiment_id: &str, from: ExperimentStatus, at: DateTime<Utc>) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE experiments
             SET status = 'active', start_date = COALESCE(start_date, ?1), updated_at = ?1
             WHERE id = ?2 AND status = ?3",
            params![at.to_rfc3339(), experiment_id, from.as_str()],
        )?;
        Ok(changed > 0)
    }

    pub fn complete_experiment(
        &self,
        experiment_id: &str,
        from: ExperimentStatus,
        winner_creative_id: &str,
        ended_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE experiments
             SET status = 'completed', winner_creative_id = ?1, end_date = ?2, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![winner_creative_id, ended_at.to_rfc3339(), experiment_id, from.as_str()],
        )?;
        Ok(changed > 0)
    }

    pub fn record_sync_result(&self, experiment_id: &str, synced_at: Option<DateTime<Utc>>, error: Option<&str>) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE experiments
             SET last_synced_at = COALESCE(?1, last_synced_at), last_sync_error = ?2
             WHERE id = ?3",
            params![synced_at.map(|at| at.to_rfc3339()), error, experiment_id],
        )?;
        Ok(())
    }

    pub fn delete_experiment(&self, experiment_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM experiments WHERE id = ?1", [experiment_id])?;
        Ok(changed > 0)
    }

    // ─── Variants ─────────────────────────────────────────────────────────────

    pub fn list_variants(&self, experiment_id: &str) -> AppResult<Vec<Variant>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {} FROM variants WHERE experiment_id = ?1 ORDER BY position ASC",
            VARIANT_COLUMNS
        ))?;
        let rows = statement
            .query_map([experiment_id], parse_variant_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stores a retry result. A variant that already owns a remote ad is never touched.
    pub fn update_variant_result(
        &self,
        variant_id: &str,
        external_creative_id: Option<&str>,
        external_ad_id: Option<&str>,
        creation_error: Option<&str>,
    ) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE variants
             SET external_creative_id = COALESCE(?1, external_creative_id), external_ad_id = ?2,
                 creation_error = ?3, updated_at = ?4
             WHERE id = ?5 AND external_ad_id IS NULL",
            params![
                external_creative_id,
                external_ad_id,
                creation_error,
                Utc::now().to_rfc3339(),
                variant_id
            ],
        )?;
        Ok(changed > 0)
    }

    // ─── Daily metrics ────────────────────────────────────────────────────────

    pub fn upsert_daily_metric(
        &self,
        experiment_id: &str,
        external_object_id: &str,
        day: NaiveDate,
        values: &MetricValues,
        derived: &DerivedMetrics,
        synced_at: DateTime<Utc>,
    ) -> AppResult<DailyMetricRecord> {
        let conn = self.lock()?;
        let day_raw = day.format(METRIC_DATE_FORMAT).to_string();
        conn.execute(
            "INSERT INTO daily_metrics (
               id, experiment_id, external_object_id, metric_date, impressions, clicks, spend, conversions,
               ctr, cpc, cpm, synced_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(experiment_id, external_object_id, metric_date) DO UPDATE SET
               impressions = excluded.impressions,
               clicks = excluded.clicks,
               spend = excluded.spend,
               conversions = excluded.conversions,
               ctr = excluded.ctr,
               cpc = excluded.cpc,
               cpm = excluded.cpm,
               synced_at = excluded.synced_at",
            params![
                Uuid::new_v4().to_string(),
                experiment_id,
                external_object_id,
                day_raw,
                values.impressions,
                values.clicks,
                values.spend,
                values.conversions,
                derived.ctr,
                derived.cpc,
                derived.cpm,
                synced_at.to_rfc3339(),
            ],
        )?;
        conn.query_row(
            &format!(
                "SELECT {} FROM daily_metrics
                 WHERE experiment_id = ?1 AND external_object_id = ?2 AND metric_date = ?3",
                METRIC_COLUMNS
            ),
            params![experiment_id, external_object_id, day_raw],
            parse_metric_row,
        )
        .map_err(AppError::from)
    }

    pub fn list_daily_metrics(
        &self,
        experiment_id: &str,
        external_object_id: Option<&str>,
        range: Option<DateRange>,
    ) -> AppResult<Vec<DailyMetricRecord>> {
        let conn = self.lock()?;
        let mut query = format!("SELECT {} FROM daily_metrics WHERE experiment_id = ?", METRIC_COLUMNS);
        let mut params_vec: Vec<String> = vec![experiment_id.to_string()];

        if let Some(object_id) = external_object_id {
            query.push_str(" AND external_object_id = ?");
            params_vec.push(object_id.to_string());
        }
        if let Some(range) = range {
            query.push_str(" AND metric_date >= ? AND metric_date <= ?");
            params_vec.push(range.start.format(METRIC_DATE_FORMAT).to_string());
            params_vec.push(range.end.format(METRIC_DATE_FORMAT).to_string());
        }
        query.push_str(" ORDER BY metric_date DESC, external_object_id ASC");

        let mut statement = conn.prepare(&query)?;
        let rows = statement
            .query_map(rusqlite::params_from_iter(params_vec.iter()), parse_metric_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn latest_daily_metric(&self, experiment_id: &str, external_object_id: &str) -> AppResult<Option<DailyMetricRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM daily_metrics
                 WHERE experiment_id = ?1 AND external_object_id = ?2
                 ORDER BY metric_date DESC LIMIT 1",
                METRIC_COLUMNS
            ),
            params![experiment_id, external_object_id],
            parse_metric_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn count_daily_metrics(&self, experiment_id: &str) -> AppResult<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM daily_metrics WHERE experiment_id = ?1",
            [experiment_id],
            |row| row.get(0),
        )
        .map_err(AppError::from)
    }

    // ─── Cleanup ledger and sync runs ─────────────────────────────────────────

    pub fn insert_orphaned_campaign(&self, campaign_id: &str, owner_id: &str, reason: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO orphaned_campaigns (campaign_id, owner_id, reason, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, NULL)
             ON CONFLICT(campaign_id) DO UPDATE SET reason = excluded.reason",
            params![campaign_id, owner_id, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_orphaned_campaigns(&self) -> AppResult<Vec<OrphanedCampaign>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT campaign_id, owner_id, reason, created_at, resolved_at
             FROM orphaned_campaigns WHERE resolved_at IS NULL ORDER BY created_at ASC",
        )?;
        let rows = statement
            .query_map([], |row| {
                Ok(OrphanedCampaign {
                    campaign_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    reason: row.get(2)?,
                    created_at: parse_time(&row.get::<_, String>(3)?)?,
                    resolved_at: parse_optional_time(row.get(4)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_sync_run(&self, record: &SyncRunRecord) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (id, scope, synced, failed, skipped, errors_json, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.scope,
                record.synced as i64,
                record.failed as i64,
                record.skipped as i64,
                serde_json::to_string(&record.errors)?,
                record.started_at.to_rfc3339(),
                record.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_sync_run(&self) -> AppResult<Option<SyncRunRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, scope, synced, failed, skipped, errors_json, started_at, finished_at
             FROM sync_runs ORDER BY finished_at DESC LIMIT 1",
            [],
            |row| {
                Ok(SyncRunRecord {
                    id: row.get(0)?,
                    scope: row.get(1)?,
                    synced: row.get::<_, i64>(2)?.max(0) as usize,
                    failed: row.get::<_, i64>(3)?.max(0) as usize,
                    skipped: row.get::<_, i64>(4)?.max(0) as usize,
                    errors: serde_json::from_str::<Vec<SweepError>>(&row.get::<_, String>(5)?).unwrap_or_default(),
                    started_at: parse_time(&row.get::<_, String>(6)?)?,
                    finished_at: parse_time(&row.get::<_, String>(7)?)?,
                })
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO settings (id, settings_json, updated_at) VALUES (1, ?1, ?2)",
            params![
                serde_json::to_string(&EngineSettings::default())?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

fn parse_experiment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Experiment> {
    let creative_ids_raw: String = row.get(3)?;
    let objective_raw: String = row.get(6)?;
    Ok(Experiment {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        variant_creative_ids: serde_json::from_str::<Vec<String>>(&creative_ids_raw).map_err(|error| {
            conversion_error(3, format!("invalid variant creative ids: {}", error))
        })?,
        external_campaign_id: row.get(4)?,
        external_ad_set_id: row.get(5)?,
        objective: PlatformObjective::from_platform(&objective_raw)
            .ok_or_else(|| conversion_error(6, format!("Unknown objective '{}'", objective_raw)))?,
        budget_total: row.get(7)?,
        daily_budget: row.get(8)?,
        duration_days: row.get(9)?,
        status: parse_status(&row.get::<_, String>(10)?)?,
        winner_creative_id: row.get(11)?,
        start_date: parse_optional_time(row.get(12)?)?,
        end_date: parse_optional_time(row.get(13)?)?,
        idempotency_key: row.get(14)?,
        last_synced_at: parse_optional_time(row.get(15)?)?,
        last_sync_error: row.get(16)?,
        created_at: parse_time(&row.get::<_, String>(17)?)?,
        updated_at: parse_time(&row.get::<_, String>(18)?)?,
    })
}

fn parse_variant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Variant> {
    Ok(Variant {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        creative_id: row.get(2)?,
        position: row.get(3)?,
        external_creative_id: row.get(4)?,
        external_ad_id: row.get(5)?,
        creation_error: row.get(6)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
        updated_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}

fn parse_metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyMetricRecord> {
    Ok(DailyMetricRecord {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        external_object_id: row.get(2)?,
        date: parse_date(&row.get::<_, String>(3)?)?,
        impressions: row.get(4)?,
        clicks: row.get(5)?,
        spend: row.get(6)?,
        conversions: row.get(7)?,
        ctr: row.get(8)?,
        cpc: row.get(9)?,
        cpm: row.get(10)?,
        synced_at: parse_time(&row.get::<_, String>(11)?)?,
    })
}

fn parse_connection_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountConnection> {
    Ok(AccountConnection {
        owner_id: row.get(0)?,
        access_token: row.get(1)?,
        ad_account_id: row.get(2)?,
        page_id: row.get(3)?,
        token_expires_at: parse_optional_time(row.get(4)?)?,
        connected_at: parse_time(&row.get::<_, String>(5)?)?,
        updated_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

fn parse_status(raw: &str) -> rusqlite::Result<ExperimentStatus> {
    ExperimentStatus::parse(raw).ok_or_else(|| conversion_error(0, format!("Unknown experiment status '{}'", raw)))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(0, error.to_string()))
}

fn parse_optional_time(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_time(&value)).transpose()
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, METRIC_DATE_FORMAT).map_err(|error| conversion_error(0, error.to_string()))
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
