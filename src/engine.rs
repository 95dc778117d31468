use crate::adapters::collaborators::{DatabaseCreativeSource, HttpAssetSigner};
use crate::adapters::graph::GraphAdsClient;
use crate::adapters::{AdsPlatform, AssetSigner, CreativeSource};
use crate::builder::ExperimentBuilder;
use crate::config::ServiceConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::kpi;
use crate::lifecycle;
use crate::metrics_store::MetricsStore;
use crate::models::{
    BuildOutcome, ConnectAccountPayload, ConnectionStatus, CreateExperimentPayload, CreativeContent, DateRange,
    EngineSettings, Experiment, ExperimentAnalytics, ExperimentDetail, ExperimentStatus, ExperimentSummary,
    KpiReport, ListExperimentsFilters, OrphanedCampaign, PlatformCredentials, RemoteStatus, SweepReport,
    SyncRunRecord, VariantAnalytics,
};
use crate::redaction::redact_error;
use crate::retry::RetryPolicy;
use crate::scheduler::{SweepFuture, SyncScheduler};
use crate::sync::{AnalyticsSync, SyncOutcome};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Entry point for every engine operation. Each call that names an experiment checks that
/// the caller owns it; experiments of other owners are reported as not found.
#[derive(Clone)]
pub struct EngineCore {
    db: Arc<Database>,
    platform: Arc<dyn AdsPlatform>,
    builder: ExperimentBuilder,
    sync: AnalyticsSync,
    scheduler: SyncScheduler,
}

impl EngineCore {
    pub fn new(
        db: Arc<Database>,
        platform: Arc<dyn AdsPlatform>,
        signer: Arc<dyn AssetSigner>,
        creatives: Arc<dyn CreativeSource>,
    ) -> AppResult<Arc<Self>> {
        let settings = db.get_settings()?;
        let metrics = MetricsStore::new(db.clone());
        let scheduler = SyncScheduler::new(Duration::from_secs(settings.sync_interval_secs));

        let this = Arc::new(Self {
            builder: ExperimentBuilder::new(db.clone(), platform.clone(), signer, creatives),
            sync: AnalyticsSync::new(db.clone(), platform.clone(), metrics),
            db,
            platform,
            scheduler: scheduler.clone(),
        });

        match this.db.list_orphaned_campaigns() {
            Ok(orphans) if !orphans.is_empty() => {
                tracing::warn!(count = orphans.len(), "orphaned campaigns are waiting for cleanup");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(error = %error, "failed to read orphaned campaigns"),
        }

        let weak = Arc::downgrade(&this);
        scheduler.set_executor(Arc::new(move || -> SweepFuture {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(strong) => match strong.sweep().await {
                        Ok(report) => report.failed == 0,
                        Err(error) => {
                            tracing::error!(error = %error, "scheduled sweep could not run");
                            false
                        }
                    },
                    None => false,
                }
            })
        }));

        Ok(this)
    }

    /// Production wiring: SQLite under the data directory, the Graph client, the HTTP signer
    /// and the local creatives table.
    pub fn from_config(config: &ServiceConfig) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&config.database_path())?);
        let timeout = Duration::from_secs(config.http_timeout_secs);
        let platform = Arc::new(GraphAdsClient::new(
            &config.graph_base_url,
            &config.graph_api_version,
            timeout,
        )?);
        let signer = Arc::new(HttpAssetSigner::new(
            config.asset_signer_url.clone(),
            config.asset_signer_api_key.clone(),
            timeout,
        )?);
        let creatives = Arc::new(DatabaseCreativeSource::new(db.clone()));
        Self::new(db, platform, signer, creatives)
    }

    pub async fn start_scheduler(&self) {
        self.scheduler.start().await;
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    // ─── Settings ─────────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<EngineSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<EngineSettings> {
        let settings = self.db.update_settings(update)?;
        tracing::info!(
            sync_interval_secs = settings.sync_interval_secs,
            platform_min_daily_budget = settings.platform_min_daily_budget,
            "engine settings updated"
        );
        Ok(settings)
    }

    // ─── Account connections ──────────────────────────────────────────────────

    pub fn connect_account(&self, owner_id: &str, payload: ConnectAccountPayload) -> AppResult<ConnectionStatus> {
        require_owner(owner_id)?;
        if payload.access_token.trim().is_empty() {
            return Err(AppError::Validation("An access token is required".to_string()));
        }
        if payload.token_expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(AppError::Validation("The access token has already expired".to_string()));
        }
        let payload = ConnectAccountPayload {
            access_token: payload.access_token.trim().to_string(),
            ad_account_id: non_blank(payload.ad_account_id),
            page_id: non_blank(payload.page_id),
            token_expires_at: payload.token_expires_at,
        };
        self.db.upsert_connection(owner_id, &payload)?;
        tracing::info!(owner_id, has_ad_account = payload.ad_account_id.is_some(), "ads account connected");
        self.connection_status(owner_id)
    }

    pub fn disconnect_account(&self, owner_id: &str) -> AppResult<bool> {
        let removed = self.db.delete_connection(owner_id)?;
        if removed {
            tracing::info!(owner_id, "ads account disconnected");
        }
        Ok(removed)
    }

    pub fn connection_status(&self, owner_id: &str) -> AppResult<ConnectionStatus> {
        let Some(connection) = self.db.get_connection(owner_id)? else {
            return Ok(ConnectionStatus {
                connected: false,
                ads_access: false,
                publishing_access: false,
                ad_account_id: None,
                message: Some("No ads account connected".to_string()),
            });
        };

        let valid = connection.has_valid_credential(Utc::now());
        let ads_access = valid && connection.ad_account_id.is_some();
        let publishing_access = valid && connection.page_id.is_some();
        let message = if !valid {
            Some("Access token expired; reconnect the account".to_string())
        } else if !ads_access {
            Some("No ad account selected".to_string())
        } else if !publishing_access {
            Some("No page selected; experiments cannot be created".to_string())
        } else {
            None
        };
        Ok(ConnectionStatus {
            connected: true,
            ads_access,
            publishing_access,
            ad_account_id: connection.ad_account_id,
            message,
        })
    }

    // ─── Creatives ────────────────────────────────────────────────────────────

    pub fn register_creative(&self, owner_id: &str, creative: CreativeContent) -> AppResult<CreativeContent> {
        require_owner(owner_id)?;
        if creative.owner_id != owner_id {
            return Err(AppError::Validation("Creative owner does not match the caller".to_string()));
        }
        if creative.creative_id.trim().is_empty() || creative.asset_ref.trim().is_empty() {
            return Err(AppError::Validation("A creative needs an id and an asset reference".to_string()));
        }
        if creative.headline.trim().is_empty() {
            return Err(AppError::Validation("A creative needs a headline".to_string()));
        }
        if let Some(existing) = self.db.get_creative(&creative.creative_id)? {
            if existing.owner_id != owner_id {
                return Err(AppError::Conflict(format!(
                    "Creative id {} is already in use",
                    creative.creative_id
                )));
            }
        }
        self.db.upsert_creative(&creative)?;
        Ok(creative)
    }

    // ─── Experiments ──────────────────────────────────────────────────────────

    pub async fn create_experiment(&self, owner_id: &str, payload: CreateExperimentPayload) -> AppResult<BuildOutcome> {
        require_owner(owner_id)?;
        self.builder.build(owner_id, payload).await
    }

    pub async fn retry_failed_variants(&self, owner_id: &str, experiment_id: &str) -> AppResult<BuildOutcome> {
        self.builder.retry_failed_variants(owner_id, experiment_id).await
    }

    pub fn list_experiments(&self, owner_id: &str, filters: ListExperimentsFilters) -> AppResult<Vec<ExperimentSummary>> {
        let experiments = self.db.list_experiments(owner_id, &filters)?;
        let mut summaries = Vec::with_capacity(experiments.len());
        for experiment in experiments {
            let latest_metrics = match experiment.external_campaign_id.as_deref() {
                Some(campaign_id) => self.db.latest_daily_metric(&experiment.id, campaign_id)?,
                None => None,
            };
            summaries.push(ExperimentSummary {
                experiment,
                latest_metrics,
            });
        }
        Ok(summaries)
    }

    pub fn get_experiment(&self, owner_id: &str, experiment_id: &str) -> AppResult<ExperimentDetail> {
        let experiment = self.owned_experiment(owner_id, experiment_id)?;
        let variants = self.db.list_variants(&experiment.id)?;
        Ok(ExperimentDetail { experiment, variants })
    }

    pub fn get_analytics(
        &self,
        owner_id: &str,
        experiment_id: &str,
        range: Option<DateRange>,
    ) -> AppResult<ExperimentAnalytics> {
        if let Some(range) = range.as_ref() {
            kpi::check_range(range)?;
        }
        let experiment = self.owned_experiment(owner_id, experiment_id)?;
        let campaign = match experiment.external_campaign_id.as_deref() {
            Some(campaign_id) => self.db.list_daily_metrics(&experiment.id, Some(campaign_id), range)?,
            None => Vec::new(),
        };
        let mut variants = Vec::new();
        for variant in self.db.list_variants(&experiment.id)? {
            let records = match variant.external_ad_id.as_deref() {
                Some(ad_id) => self.db.list_daily_metrics(&experiment.id, Some(ad_id), range)?,
                None => Vec::new(),
            };
            variants.push(VariantAnalytics {
                variant_id: variant.id,
                creative_id: variant.creative_id,
                external_ad_id: variant.external_ad_id,
                records,
            });
        }
        Ok(ExperimentAnalytics {
            experiment_id: experiment.id,
            last_synced_at: experiment.last_synced_at,
            last_sync_error: experiment.last_sync_error,
            campaign,
            variants,
        })
    }

    /// Top-line KPIs for `range` against the equal-length window right before it.
    pub fn get_kpis(&self, owner_id: &str, experiment_id: &str, range: DateRange) -> AppResult<KpiReport> {
        let previous = kpi::comparison_window(&range)?;
        let experiment = self.owned_experiment(owner_id, experiment_id)?;
        let records = match experiment.external_campaign_id.as_deref() {
            Some(campaign_id) => {
                let span = DateRange {
                    start: previous.start,
                    end: range.end,
                };
                self.db.list_daily_metrics(&experiment.id, Some(campaign_id), Some(span))?
            }
            None => Vec::new(),
        };
        kpi::compare_windows(&records, range)
    }

    pub fn export_analytics_csv(
        &self,
        owner_id: &str,
        experiment_id: &str,
        range: Option<DateRange>,
    ) -> AppResult<String> {
        if let Some(range) = range.as_ref() {
            kpi::check_range(range)?;
        }
        let experiment = self.owned_experiment(owner_id, experiment_id)?;
        let records = match experiment.external_campaign_id.as_deref() {
            Some(campaign_id) => self.db.list_daily_metrics(&experiment.id, Some(campaign_id), range)?,
            None => Vec::new(),
        };
        Ok(kpi::render_csv(&records))
    }

    pub fn list_orphaned_campaigns(&self) -> AppResult<Vec<OrphanedCampaign>> {
        self.db.list_orphaned_campaigns()
    }

    // ─── Sync ─────────────────────────────────────────────────────────────────

    pub async fn sync_experiment(&self, owner_id: &str, experiment_id: &str) -> AppResult<SyncOutcome> {
        self.sync.sync_one(owner_id, experiment_id).await
    }

    pub async fn sync_owner(&self, owner_id: &str) -> AppResult<SweepReport> {
        self.sync.sync_owner(owner_id).await
    }

    pub async fn sweep(&self) -> AppResult<SweepReport> {
        self.sync.sweep().await
    }

    pub fn latest_sync_run(&self) -> AppResult<Option<SyncRunRecord>> {
        self.db.latest_sync_run()
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Mirrors a delivery change to the platform first; the local status only moves once the
    /// remote call succeeded.
    pub async fn update_status(&self, owner_id: &str, experiment_id: &str, status: RemoteStatus) -> AppResult<Experiment> {
        let experiment = self.owned_experiment(owner_id, experiment_id)?;
        let target = status.local_status();
        if experiment.status == target {
            return Ok(experiment);
        }
        lifecycle::check_transition(experiment.status, target)?;
        let campaign_id = experiment
            .external_campaign_id
            .as_deref()
            .ok_or_else(|| AppError::Validation(format!("Experiment {} has no campaign", experiment.id)))?;

        let credentials = self.credentials(owner_id)?;
        let policy = RetryPolicy::from_settings(&self.db.get_settings()?);
        policy
            .run("update_status", || {
                self.platform.update_status(&credentials, campaign_id, status)
            })
            .await
            .map_err(|error| {
                tracing::warn!(
                    experiment_id = %experiment.id,
                    campaign_id,
                    status = status.as_str(),
                    error = %redact_error(&error),
                    "remote status update failed, local status unchanged"
                );
                error
            })?;

        let now = Utc::now();
        let moved = if experiment.status == ExperimentStatus::Created && target == ExperimentStatus::Active {
            self.db.activate_experiment(&experiment.id, experiment.status, now)?
        } else {
            self.db.transition_experiment_status(&experiment.id, experiment.status, target)?
        };
        if !moved {
            return Err(AppError::Conflict(format!(
                "Experiment {} changed while its status was being updated",
                experiment.id
            )));
        }
        tracing::info!(
            experiment_id = %experiment.id,
            from = experiment.status.as_str(),
            to = target.as_str(),
            "experiment status updated"
        );
        self.owned_experiment(owner_id, experiment_id)
    }

    pub async fn declare_winner(
        &self,
        owner_id: &str,
        experiment_id: &str,
        winner_creative_id: &str,
    ) -> AppResult<Experiment> {
        let experiment = self.owned_experiment(owner_id, experiment_id)?;
        lifecycle::validate_winner(&experiment, winner_creative_id)?;

        if experiment.status == ExperimentStatus::Active {
            self.pause_best_effort(&experiment, "winner declared").await;
        }

        let ended_at = Utc::now();
        if !self
            .db
            .complete_experiment(&experiment.id, experiment.status, winner_creative_id, ended_at)?
        {
            return Err(AppError::Conflict(format!(
                "Experiment {} changed while the winner was being declared",
                experiment.id
            )));
        }
        tracing::info!(experiment_id = %experiment.id, winner_creative_id, "winner declared");
        self.owned_experiment(owner_id, experiment_id)
    }

    /// Deletes an experiment with its variants and metrics. A delivering campaign is paused
    /// first when possible; the delete goes ahead either way.
    pub async fn delete_experiment(&self, owner_id: &str, experiment_id: &str) -> AppResult<()> {
        let experiment = self.owned_experiment(owner_id, experiment_id)?;
        if experiment.status == ExperimentStatus::Active {
            self.pause_best_effort(&experiment, "experiment deleted").await;
        }
        self.db.delete_experiment(&experiment.id)?;
        tracing::info!(experiment_id = %experiment.id, "experiment deleted");
        Ok(())
    }

    async fn pause_best_effort(&self, experiment: &Experiment, reason: &str) {
        let Some(campaign_id) = experiment.external_campaign_id.as_deref() else {
            return;
        };
        let credentials = match self.credentials(&experiment.owner_id) {
            Ok(credentials) => credentials,
            Err(error) => {
                tracing::warn!(experiment_id = %experiment.id, reason, error = %error, "cannot pause campaign");
                return;
            }
        };
        let policy = match self.db.get_settings() {
            Ok(settings) => RetryPolicy::from_settings(&settings),
            Err(_) => RetryPolicy::from_settings(&EngineSettings::default()),
        };
        if let Err(error) = policy
            .run("pause_campaign", || {
                self.platform.update_status(&credentials, campaign_id, RemoteStatus::Paused)
            })
            .await
        {
            tracing::warn!(
                experiment_id = %experiment.id,
                campaign_id,
                reason,
                error = %redact_error(&error),
                "best-effort campaign pause failed"
            );
        }
    }

    fn owned_experiment(&self, owner_id: &str, experiment_id: &str) -> AppResult<Experiment> {
        self.db
            .get_experiment(experiment_id)?
            .filter(|experiment| experiment.owner_id == owner_id)
            .ok_or_else(|| AppError::NotFound(format!("experiment {}", experiment_id)))
    }

    fn credentials(&self, owner_id: &str) -> AppResult<PlatformCredentials> {
        let connection = self
            .db
            .get_connection(owner_id)?
            .ok_or_else(|| AppError::NotConnected("No ads account connected".to_string()))?;
        if !connection.has_valid_credential(Utc::now()) {
            return Err(AppError::NotConnected(
                "The ads account access token has expired; reconnect the account".to_string(),
            ));
        }
        Ok(connection.reporting_credentials())
    }
}

fn require_owner(owner_id: &str) -> AppResult<()> {
    if owner_id.trim().is_empty() {
        return Err(AppError::Validation("An owner id is required".to_string()));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
