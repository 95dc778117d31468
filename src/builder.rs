use crate::adapters::{
    AdCreativeRequest, AdRequest, AdSetRequest, AdsPlatform, AssetSigner, CampaignRequest, CreativeSource,
};
use crate::budget::BudgetPlan;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::in_flight::InFlight;
use crate::lifecycle;
use crate::models::{
    BuildOutcome, BuildStatus, CreateExperimentPayload, EngineSettings, Experiment, ExperimentStatus,
    PlatformCredentials, RemoteStatus, Targeting, Variant,
};
use crate::redaction::redact_error;
use crate::retry::RetryPolicy;
use crate::vocabulary::{map_call_to_action, map_objective, optimization_goal};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Longest lifetime the ads platform accepts for a fetched image URL.
pub const MAX_SIGNED_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

const MIN_TARGETING_AGE: u8 = 13;
const MAX_TARGETING_AGE: u8 = 65;

/// Everything a variant needs that is shared across the whole request.
struct VariantContext<'a> {
    owner_id: &'a str,
    experiment_name: &'a str,
    credentials: &'a PlatformCredentials,
    ad_set_id: &'a str,
    default_link_url: &'a str,
    signed_url_ttl_secs: u64,
    policy: RetryPolicy,
}

#[derive(Debug, Clone)]
struct VariantAttempt {
    creative_id: String,
    external_creative_id: Option<String>,
    external_ad_id: Option<String>,
    error: Option<String>,
}

/// Turns a create request into a paused campaign, one ad set and one ad per variant,
/// then persists the experiment as `created`.
///
/// A request carrying an idempotency key holds that key for the whole build, and a variant
/// retry holds its experiment, so concurrent duplicates never reach the platform.
#[derive(Clone)]
pub struct ExperimentBuilder {
    db: Arc<Database>,
    platform: Arc<dyn AdsPlatform>,
    signer: Arc<dyn AssetSigner>,
    creatives: Arc<dyn CreativeSource>,
    pending_keys: InFlight,
    retrying: InFlight,
}

impl ExperimentBuilder {
    pub fn new(
        db: Arc<Database>,
        platform: Arc<dyn AdsPlatform>,
        signer: Arc<dyn AssetSigner>,
        creatives: Arc<dyn CreativeSource>,
    ) -> Self {
        Self {
            db,
            platform,
            signer,
            creatives,
            pending_keys: InFlight::new(),
            retrying: InFlight::new(),
        }
    }

    pub async fn build(&self, owner_id: &str, payload: CreateExperimentPayload) -> AppResult<BuildOutcome> {
        let settings = self.db.get_settings()?;
        let creative_ids = normalize_creative_ids(&payload.creative_ids)?;
        lifecycle::check_draft_ready(creative_ids.len())?;

        let idempotency_key = payload
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        let _key_guard = match idempotency_key.as_deref() {
            Some(key) => {
                let guard = self
                    .pending_keys
                    .try_acquire(&format!("{}\u{1f}{}", owner_id, key))?
                    .ok_or_else(|| {
                        AppError::Conflict(format!("A request with idempotency key {} is already in progress", key))
                    })?;
                if let Some(existing) = self.db.find_experiment_by_idempotency_key(owner_id, key)? {
                    tracing::info!(experiment_id = %existing.id, "idempotency key reused, returning stored experiment");
                    return self.outcome_for(existing, Vec::new(), true);
                }
                Some(guard)
            }
            None => None,
        };

        let credentials = self.require_credentials(owner_id)?;

        let objective = map_objective(payload.objective.as_deref());
        let goal = optimization_goal(objective);
        let duration_days = payload.duration_days.unwrap_or(settings.default_duration_days);
        let plan = BudgetPlan::compute(payload.budget, duration_days, settings.platform_min_daily_budget)?;
        let targeting = payload.audience.clone().unwrap_or_default();
        validate_targeting(&targeting)?;

        let now = Utc::now();
        let name = payload
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Creative test {}", now.format("%Y-%m-%d %H:%M")));
        let policy = RetryPolicy::from_settings(&settings);

        let campaign_request = CampaignRequest {
            name: name.clone(),
            objective,
        };
        let campaign_id = policy
            .run("create_campaign", || self.platform.create_campaign(&credentials, &campaign_request))
            .await
            .map_err(|error| {
                tracing::warn!(owner_id, error = %redact_error(&error), "campaign creation failed");
                error
            })?;
        tracing::info!(owner_id, campaign_id = %campaign_id, objective = objective.as_str(), "campaign created");

        let ad_set_request = AdSetRequest {
            name: format!("{} - Ad Set", name),
            campaign_id: campaign_id.clone(),
            daily_budget: plan.daily_minor_units(),
            optimization_goal: goal,
            targeting,
        };
        let ad_set_id = match policy
            .run("create_ad_set", || self.platform.create_ad_set(&credentials, &ad_set_request))
            .await
        {
            Ok(ad_set_id) => ad_set_id,
            Err(error) => {
                self.abandon_campaign(&credentials, owner_id, &campaign_id, policy, &error).await;
                return Err(error);
            }
        };

        let context = VariantContext {
            owner_id,
            experiment_name: &name,
            credentials: &credentials,
            ad_set_id: &ad_set_id,
            default_link_url: &settings.default_link_url,
            signed_url_ttl_secs: signed_url_ttl(&settings),
            policy,
        };
        let attempts = join_all(
            creative_ids
                .iter()
                .enumerate()
                .map(|(position, creative_id)| self.create_variant(&context, position, creative_id.clone(), None)),
        )
        .await;

        let experiment_id = Uuid::new_v4().to_string();
        let variants: Vec<Variant> = attempts
            .into_iter()
            .enumerate()
            .map(|(position, attempt)| Variant {
                id: Uuid::new_v4().to_string(),
                experiment_id: experiment_id.clone(),
                creative_id: attempt.creative_id,
                position: position as u32,
                external_creative_id: attempt.external_creative_id,
                external_ad_id: attempt.external_ad_id,
                creation_error: attempt.error,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let experiment = Experiment {
            id: experiment_id,
            owner_id: owner_id.to_string(),
            name,
            variant_creative_ids: creative_ids,
            external_campaign_id: Some(campaign_id),
            external_ad_set_id: Some(ad_set_id),
            objective,
            budget_total: plan.total,
            daily_budget: plan.daily,
            duration_days,
            status: ExperimentStatus::Created,
            winner_creative_id: None,
            start_date: None,
            end_date: None,
            idempotency_key,
            last_synced_at: None,
            last_sync_error: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(error) = self.db.insert_experiment(&experiment, &variants) {
            tracing::error!(
                owner_id,
                campaign_id = ?experiment.external_campaign_id,
                error = %error,
                "remote objects created but experiment could not be stored"
            );
            if let Some(campaign_id) = experiment.external_campaign_id.as_deref() {
                self.abandon_campaign(&credentials, owner_id, campaign_id, policy, &error).await;
            }
            // Another process may have stored the same key first.
            if let Some(key) = experiment.idempotency_key.as_deref() {
                if let Some(existing) = self.db.find_experiment_by_idempotency_key(owner_id, key)? {
                    tracing::info!(experiment_id = %existing.id, "idempotency key stored concurrently, returning it");
                    return self.outcome_for(existing, Vec::new(), true);
                }
            }
            return Err(error);
        }

        let mut warnings = Vec::new();
        if let Some(warning) = plan.clamp_warning() {
            warnings.push(warning);
        }
        let outcome = self.outcome_for(experiment, warnings, false)?;
        tracing::info!(
            experiment_id = %outcome.experiment.id,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            status = ?outcome.status,
            "experiment built"
        );
        Ok(outcome)
    }

    /// Re-attempts only the variants that never got a remote ad. A variant that already has an
    /// ad is left alone, and a remote creative from an earlier attempt is reused.
    pub async fn retry_failed_variants(&self, owner_id: &str, experiment_id: &str) -> AppResult<BuildOutcome> {
        let _guard = self.retrying.try_acquire(experiment_id)?.ok_or_else(|| {
            AppError::Conflict(format!("Variants of experiment {} are already being retried", experiment_id))
        })?;
        let experiment = self
            .db
            .get_experiment(experiment_id)?
            .filter(|experiment| experiment.owner_id == owner_id)
            .ok_or_else(|| AppError::NotFound(format!("experiment {}", experiment_id)))?;
        if !matches!(
            experiment.status,
            ExperimentStatus::Created | ExperimentStatus::Active | ExperimentStatus::Paused
        ) {
            return Err(AppError::Validation(format!(
                "Variants cannot be retried on a {} experiment",
                experiment.status.as_str()
            )));
        }
        let ad_set_id = experiment
            .external_ad_set_id
            .clone()
            .ok_or_else(|| AppError::Validation(format!("Experiment {} has no ad set", experiment.id)))?;

        let failed: Vec<Variant> = self
            .db
            .list_variants(&experiment.id)?
            .into_iter()
            .filter(|variant| !variant.is_live())
            .collect();
        if failed.is_empty() {
            return self.outcome_for(experiment, Vec::new(), false);
        }

        let credentials = self.require_credentials(owner_id)?;
        let settings = self.db.get_settings()?;
        let context = VariantContext {
            owner_id,
            experiment_name: &experiment.name,
            credentials: &credentials,
            ad_set_id: &ad_set_id,
            default_link_url: &settings.default_link_url,
            signed_url_ttl_secs: signed_url_ttl(&settings),
            policy: RetryPolicy::from_settings(&settings),
        };
        let attempts = join_all(failed.iter().map(|variant| {
            self.create_variant(
                &context,
                variant.position as usize,
                variant.creative_id.clone(),
                variant.external_creative_id.clone(),
            )
        }))
        .await;

        for (variant, attempt) in failed.iter().zip(attempts) {
            self.db.update_variant_result(
                &variant.id,
                attempt.external_creative_id.as_deref(),
                attempt.external_ad_id.as_deref(),
                attempt.error.as_deref(),
            )?;
        }

        let outcome = self.outcome_for(experiment, Vec::new(), false)?;
        tracing::info!(
            experiment_id = %outcome.experiment.id,
            retried = failed.len(),
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "failed variants retried"
        );
        Ok(outcome)
    }

    fn require_credentials(&self, owner_id: &str) -> AppResult<PlatformCredentials> {
        let connection = self
            .db
            .get_connection(owner_id)?
            .ok_or_else(|| AppError::NotConnected("Connect an ads account before creating experiments".to_string()))?;
        if !connection.has_valid_credential(Utc::now()) {
            return Err(AppError::NotConnected(
                "The ads account access token has expired; reconnect the account".to_string(),
            ));
        }
        connection.platform_credentials().ok_or_else(|| {
            AppError::NotConnected("Both an ad account and a page must be connected".to_string())
        })
    }

    async fn create_variant(
        &self,
        context: &VariantContext<'_>,
        position: usize,
        creative_id: String,
        existing_creative_id: Option<String>,
    ) -> VariantAttempt {
        let mut attempt = VariantAttempt {
            creative_id,
            external_creative_id: existing_creative_id,
            external_ad_id: None,
            error: None,
        };
        if let Err(error) = self.try_create_variant(context, position, &mut attempt).await {
            let message = redact_error(&error);
            tracing::warn!(
                creative_id = %attempt.creative_id,
                position,
                error = %message,
                "variant creation failed"
            );
            attempt.error = Some(message);
        }
        attempt
    }

    async fn try_create_variant(
        &self,
        context: &VariantContext<'_>,
        position: usize,
        attempt: &mut VariantAttempt,
    ) -> AppResult<()> {
        let variant_name = format!("{} - Variant {}", context.experiment_name, position + 1);

        if attempt.external_creative_id.is_none() {
            let creative = self.creatives.get_creative(&attempt.creative_id).await?;
            if creative.owner_id != context.owner_id {
                return Err(AppError::NotFound(format!("creative {}", attempt.creative_id)));
            }
            let image_url = context
                .policy
                .run("sign_asset", || {
                    self.signer.sign(&creative.asset_ref, context.signed_url_ttl_secs)
                })
                .await?;
            let request = AdCreativeRequest {
                name: format!("{} Creative", variant_name),
                headline: creative.headline.clone(),
                body: creative.body.clone(),
                image_url,
                link_url: creative
                    .link_url
                    .clone()
                    .filter(|link| !link.trim().is_empty())
                    .unwrap_or_else(|| context.default_link_url.to_string()),
                cta: map_call_to_action(&creative.cta),
            };
            let remote_creative_id = context
                .policy
                .run("create_ad_creative", || {
                    self.platform.create_ad_creative(context.credentials, &request)
                })
                .await?;
            attempt.external_creative_id = Some(remote_creative_id);
        }

        let request = AdRequest {
            name: variant_name,
            ad_set_id: context.ad_set_id.to_string(),
            creative_id: attempt.external_creative_id.clone().unwrap_or_default(),
        };
        let ad_id = context
            .policy
            .run("create_ad", || self.platform.create_ad(context.credentials, &request))
            .await?;
        attempt.external_ad_id = Some(ad_id);
        attempt.error = None;
        Ok(())
    }

    /// Best effort: archive a campaign the engine will not track, and put it on the cleanup
    /// ledger if even that fails.
    async fn abandon_campaign(
        &self,
        credentials: &PlatformCredentials,
        owner_id: &str,
        campaign_id: &str,
        policy: RetryPolicy,
        cause: &AppError,
    ) {
        let reason = redact_error(cause);
        match policy
            .run("archive_campaign", || {
                self.platform.update_status(credentials, campaign_id, RemoteStatus::Archived)
            })
            .await
        {
            Ok(()) => {
                tracing::warn!(owner_id, campaign_id, reason = %reason, "untracked campaign archived");
            }
            Err(archive_error) => {
                tracing::warn!(
                    owner_id,
                    campaign_id,
                    reason = %reason,
                    archive_error = %redact_error(&archive_error),
                    "untracked campaign could not be archived, recording orphan"
                );
                if let Err(db_error) = self.db.insert_orphaned_campaign(campaign_id, owner_id, &reason) {
                    tracing::error!(campaign_id, error = %db_error, "failed to record orphaned campaign");
                }
            }
        }
    }

    fn outcome_for(&self, experiment: Experiment, mut warnings: Vec<String>, reused: bool) -> AppResult<BuildOutcome> {
        let variants = self.db.list_variants(&experiment.id)?;
        let succeeded = variants.iter().filter(|variant| variant.is_live()).count();
        let failed = variants.len() - succeeded;
        let status = build_status(succeeded, failed);
        for variant in variants.iter().filter(|variant| !variant.is_live()) {
            warnings.push(format!(
                "Variant {} failed: {}",
                variant.creative_id,
                variant.creation_error.as_deref().unwrap_or("not created")
            ));
        }
        if status == BuildStatus::Degraded {
            warnings.push("No variant ads were created; retry the failed variants before launching".to_string());
        }

        Ok(BuildOutcome {
            status,
            budget: BudgetPlan::from_stored(experiment.budget_total, experiment.duration_days, experiment.daily_budget),
            experiment,
            variants,
            succeeded,
            failed,
            warnings,
            reused,
        })
    }
}

fn signed_url_ttl(settings: &EngineSettings) -> u64 {
    settings.signed_url_ttl_secs.clamp(1, MAX_SIGNED_URL_TTL_SECS)
}

pub fn build_status(succeeded: usize, failed: usize) -> BuildStatus {
    match (succeeded, failed) {
        (0, _) => BuildStatus::Degraded,
        (_, 0) => BuildStatus::Complete,
        _ => BuildStatus::Partial,
    }
}

fn normalize_creative_ids(raw: &[String]) -> AppResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(raw.len());
    for id in raw {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::Validation("Creative ids cannot be empty".to_string()));
        }
        if !seen.insert(id.to_string()) {
            return Err(AppError::Validation(format!("Creative {} is listed more than once", id)));
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

fn validate_targeting(targeting: &Targeting) -> AppResult<()> {
    if targeting.countries.is_empty() {
        return Err(AppError::Validation("Targeting needs at least one country".to_string()));
    }
    if targeting.age_min < MIN_TARGETING_AGE
        || targeting.age_max > MAX_TARGETING_AGE
        || targeting.age_min > targeting.age_max
    {
        return Err(AppError::Validation(format!(
            "Targeting ages must satisfy {} <= min <= max <= {} (got {}-{})",
            MIN_TARGETING_AGE, MAX_TARGETING_AGE, targeting.age_min, targeting.age_max
        )));
    }
    if targeting.genders.iter().any(|gender| !matches!(gender, 1 | 2)) {
        return Err(AppError::Validation("Targeting genders must be 1 or 2".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{build_status, normalize_creative_ids, signed_url_ttl, validate_targeting, MAX_SIGNED_URL_TTL_SECS};
    use crate::models::{BuildStatus, EngineSettings, Targeting};

    #[test]
    fn build_status_reflects_variant_outcomes() {
        assert_eq!(build_status(3, 0), BuildStatus::Complete);
        assert_eq!(build_status(2, 1), BuildStatus::Partial);
        assert_eq!(build_status(0, 3), BuildStatus::Degraded);
    }

    #[test]
    fn duplicate_or_blank_creatives_are_rejected() {
        assert!(normalize_creative_ids(&["a".to_string(), " a ".to_string()]).is_err());
        assert!(normalize_creative_ids(&["a".to_string(), "".to_string()]).is_err());
        assert_eq!(
            normalize_creative_ids(&[" a".to_string(), "b ".to_string()]).expect("ids"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn signed_url_ttl_never_exceeds_platform_maximum() {
        let settings = EngineSettings {
            signed_url_ttl_secs: 30 * 24 * 60 * 60,
            ..EngineSettings::default()
        };
        assert_eq!(signed_url_ttl(&settings), MAX_SIGNED_URL_TTL_SECS);
        let short = EngineSettings {
            signed_url_ttl_secs: 600,
            ..EngineSettings::default()
        };
        assert_eq!(signed_url_ttl(&short), 600);
    }

    #[test]
    fn targeting_defaults_are_valid() {
        assert!(validate_targeting(&Targeting::default()).is_ok());
        let inverted = Targeting {
            age_min: 50,
            age_max: 30,
            ..Targeting::default()
        };
        assert!(validate_targeting(&inverted).is_err());
        let nowhere = Targeting {
            countries: Vec::new(),
            ..Targeting::default()
        };
        assert!(validate_targeting(&nowhere).is_err());
    }
}
