use crate::adapters::AdsPlatform;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::in_flight::InFlight;
use crate::metrics_store::MetricsStore;
use crate::models::{
    DailyMetricRecord, Experiment, ExperimentStatus, PlatformCredentials, SweepError, SweepReport, SyncRunRecord,
};
use crate::redaction::redact_error;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Updated {
        record: DailyMetricRecord,
        /// The experiment moved from `created` to `active` on this sync.
        activated: bool,
        variant_rows: usize,
    },
    /// The platform has no reporting data for the campaign yet.
    NoInsights,
}

#[derive(Debug, Clone, Copy)]
enum SweepScope<'a> {
    All,
    Owner(&'a str),
}

impl SweepScope<'_> {
    fn owner(self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Owner(owner_id) => Some(owner_id.to_string()),
        }
    }

    fn label(self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Owner(owner_id) => format!("owner:{}", owner_id),
        }
    }
}

/// Pulls insights for live experiments into the metrics store. At most one sync runs per
/// experiment at a time, whether it was started by the scheduler or by a user.
#[derive(Clone)]
pub struct AnalyticsSync {
    db: Arc<Database>,
    platform: Arc<dyn AdsPlatform>,
    metrics: MetricsStore,
    in_flight: InFlight,
}

impl AnalyticsSync {
    pub fn new(db: Arc<Database>, platform: Arc<dyn AdsPlatform>, metrics: MetricsStore) -> Self {
        Self {
            db,
            platform,
            metrics,
            in_flight: InFlight::new(),
        }
    }

    /// Manual sync of one experiment on behalf of its owner.
    pub async fn sync_one(&self, owner_id: &str, experiment_id: &str) -> AppResult<SyncOutcome> {
        let experiment = self
            .db
            .get_experiment(experiment_id)?
            .filter(|experiment| experiment.owner_id == owner_id)
            .ok_or_else(|| AppError::NotFound(format!("experiment {}", experiment_id)))?;
        let credentials = self
            .reporting_credentials(owner_id)?
            .ok_or_else(|| AppError::NotConnected("Connect an ads account to sync analytics".to_string()))?;
        let settings = self.db.get_settings()?;
        self.sync_experiment(
            &experiment,
            &credentials,
            RetryPolicy::from_settings(&settings),
            settings.sync_variant_metrics,
        )
        .await
    }

    /// One scheduled sweep over every live experiment.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        self.run_sweep(SweepScope::All).await
    }

    pub async fn sync_owner(&self, owner_id: &str) -> AppResult<SweepReport> {
        self.run_sweep(SweepScope::Owner(owner_id)).await
    }

    async fn run_sweep(&self, scope: SweepScope<'_>) -> AppResult<SweepReport> {
        let settings = self.db.get_settings()?;
        let policy = RetryPolicy::from_settings(&settings);
        let delay = Duration::from_millis(settings.sync_delay_ms);
        let deadline = Instant::now() + Duration::from_secs(settings.sweep_deadline_secs.max(1));
        let started_at = Utc::now();

        let owner = scope.owner();
        let experiments = self.db.list_syncable_experiments(owner.as_deref())?;
        let total = experiments.len();
        let mut report = SweepReport {
            synced: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            deadline_exceeded: false,
            started_at,
            finished_at: started_at,
        };

        for (index, experiment) in experiments.iter().enumerate() {
            let now = Instant::now();
            if now >= deadline {
                report.deadline_exceeded = true;
                report.skipped += total - index;
                tracing::warn!(remaining = total - index, "sweep deadline reached, skipping remaining experiments");
                break;
            }

            match self.reporting_credentials(&experiment.owner_id) {
                Ok(Some(credentials)) => {
                    let sync = self.sync_experiment(experiment, &credentials, policy, settings.sync_variant_metrics);
                    match tokio::time::timeout(deadline - now, sync).await {
                        Ok(Ok(_)) => report.synced += 1,
                        Ok(Err(AppError::Conflict(_))) => {
                            tracing::debug!(experiment_id = %experiment.id, "sync already in progress, skipping");
                            report.skipped += 1;
                        }
                        Ok(Err(error)) => {
                            report.failed += 1;
                            report.errors.push(SweepError {
                                experiment_id: experiment.id.clone(),
                                error: redact_error(&error),
                            });
                        }
                        Err(_) => {
                            let message = "sweep deadline reached during sync".to_string();
                            self.note_failure(&experiment.id, &message);
                            report.failed += 1;
                            report.deadline_exceeded = true;
                            report.errors.push(SweepError {
                                experiment_id: experiment.id.clone(),
                                error: message,
                            });
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!(
                        experiment_id = %experiment.id,
                        owner_id = %experiment.owner_id,
                        "owner has no valid credential, skipping"
                    );
                    report.skipped += 1;
                }
                Err(error) => {
                    report.failed += 1;
                    report.errors.push(SweepError {
                        experiment_id: experiment.id.clone(),
                        error: redact_error(&error),
                    });
                }
            }

            if index + 1 < total && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        report.finished_at = Utc::now();
        let run = SyncRunRecord {
            id: Uuid::new_v4().to_string(),
            scope: scope.label(),
            synced: report.synced,
            failed: report.failed,
            skipped: report.skipped,
            errors: report.errors.clone(),
            started_at: report.started_at,
            finished_at: report.finished_at,
        };
        if let Err(error) = self.db.insert_sync_run(&run) {
            tracing::error!(error = %error, "failed to record sync run");
        }

        tracing::info!(
            scope = %run.scope,
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            deadline_exceeded = report.deadline_exceeded,
            "analytics sweep finished"
        );
        Ok(report)
    }

    async fn sync_experiment(
        &self,
        experiment: &Experiment,
        credentials: &PlatformCredentials,
        policy: RetryPolicy,
        include_variants: bool,
    ) -> AppResult<SyncOutcome> {
        let _guard = self.in_flight.try_acquire(&experiment.id)?.ok_or_else(|| {
            AppError::Conflict(format!("A sync is already running for experiment {}", experiment.id))
        })?;
        let campaign_id = experiment
            .external_campaign_id
            .as_deref()
            .ok_or_else(|| AppError::Validation(format!("Experiment {} has no campaign", experiment.id)))?;

        let insights = match policy
            .run("get_insights", || self.platform.get_insights(credentials, campaign_id))
            .await
        {
            Ok(insights) => insights,
            Err(error) => {
                let message = redact_error(&error);
                tracing::warn!(experiment_id = %experiment.id, campaign_id, error = %message, "insights fetch failed");
                self.note_failure(&experiment.id, &message);
                return Err(error);
            }
        };

        let now = Utc::now();
        let Some(insights) = insights else {
            tracing::debug!(experiment_id = %experiment.id, campaign_id, "no insights yet");
            self.db.record_sync_result(&experiment.id, Some(now), None)?;
            return Ok(SyncOutcome::NoInsights);
        };

        let values = insights.values();
        let record = match self
            .metrics
            .upsert_daily(&experiment.id, campaign_id, now.date_naive(), values)
        {
            Ok(record) => record,
            Err(error) => {
                self.note_failure(&experiment.id, &redact_error(&error));
                return Err(error);
            }
        };

        let activated = values.impressions > 0
            && experiment.status == ExperimentStatus::Created
            && self.db.activate_experiment(&experiment.id, ExperimentStatus::Created, now)?;
        if activated {
            tracing::info!(experiment_id = %experiment.id, impressions = values.impressions, "experiment is now active");
        }

        let variant_rows = if include_variants {
            self.sync_variants(experiment, credentials, policy, now).await
        } else {
            0
        };

        self.db.record_sync_result(&experiment.id, Some(now), None)?;
        Ok(SyncOutcome::Updated {
            record,
            activated,
            variant_rows,
        })
    }

    /// Per-ad rows. Failures here are logged and never fail the experiment's sync.
    async fn sync_variants(
        &self,
        experiment: &Experiment,
        credentials: &PlatformCredentials,
        policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> usize {
        let variants = match self.db.list_variants(&experiment.id) {
            Ok(variants) => variants,
            Err(error) => {
                tracing::warn!(experiment_id = %experiment.id, error = %error, "could not list variants for sync");
                return 0;
            }
        };

        let mut written = 0;
        for variant in variants {
            let Some(ad_id) = variant.external_ad_id.as_deref() else {
                continue;
            };
            let result = policy
                .run("get_ad_insights", || self.platform.get_insights(credentials, ad_id))
                .await;
            match result {
                Ok(Some(insights)) => {
                    match self
                        .metrics
                        .upsert_daily(&experiment.id, ad_id, now.date_naive(), insights.values())
                    {
                        Ok(_) => written += 1,
                        Err(error) => {
                            tracing::warn!(experiment_id = %experiment.id, ad_id, error = %error, "variant metrics not stored")
                        }
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        experiment_id = %experiment.id,
                        ad_id,
                        error = %redact_error(&error),
                        "variant insights fetch failed"
                    );
                }
            }
        }
        written
    }

    fn reporting_credentials(&self, owner_id: &str) -> AppResult<Option<PlatformCredentials>> {
        Ok(self
            .db
            .get_connection(owner_id)?
            .filter(|connection| connection.has_valid_credential(Utc::now()))
            .map(|connection| connection.reporting_credentials()))
    }

    fn note_failure(&self, experiment_id: &str, message: &str) {
        if let Err(error) = self.db.record_sync_result(experiment_id, None, Some(message)) {
            tracing::error!(experiment_id, error = %error, "failed to record sync error");
        }
    }
}
