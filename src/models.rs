use crate::budget::BudgetPlan;
use crate::vocabulary::PlatformObjective;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExperimentStatus {
    Draft,
    Created,
    Active,
    Paused,
    Completed,
    Archived,
}

impl ExperimentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Created => "created",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "created" => Some(Self::Created),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Statuses the analytics sweep keeps pulling insights for.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Created | Self::Active)
    }
}

/// Delivery states the remote platform accepts on a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Active,
    Paused,
    Archived,
}

impl RemoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn local_status(self) -> ExperimentStatus {
        match self {
            Self::Active => ExperimentStatus::Active,
            Self::Paused => ExperimentStatus::Paused,
            Self::Archived => ExperimentStatus::Archived,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub variant_creative_ids: Vec<String>,
    pub external_campaign_id: Option<String>,
    pub external_ad_set_id: Option<String>,
    pub objective: PlatformObjective,
    pub budget_total: f64,
    pub daily_budget: f64,
    pub duration_days: u32,
    pub status: ExperimentStatus,
    pub winner_creative_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub experiment_id: String,
    pub creative_id: String,
    pub position: u32,
    pub external_creative_id: Option<String>,
    pub external_ad_id: Option<String>,
    pub creation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Variant {
    pub fn is_live(&self) -> bool {
        self.external_ad_id.is_some()
    }
}

/// Raw counts as reported by the platform for one object and one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValues {
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub conversions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetricRecord {
    pub id: String,
    pub experiment_id: String,
    pub external_object_id: String,
    pub date: NaiveDate,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub conversions: i64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub synced_at: DateTime<Utc>,
}

impl DailyMetricRecord {
    pub fn values(&self) -> MetricValues {
        MetricValues {
            impressions: self.impressions,
            clicks: self.clicks,
            spend: self.spend,
            conversions: self.conversions,
        }
    }
}

/// Decoded reporting payload for a campaign or an ad.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub ctr: Option<f64>,
    pub cpc: Option<f64>,
    pub cpm: Option<f64>,
    pub conversions: Option<i64>,
}

impl Insights {
    pub fn values(&self) -> MetricValues {
        MetricValues {
            impressions: self.impressions,
            clicks: self.clicks,
            spend: self.spend,
            conversions: self.conversions.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Targeting {
    pub countries: Vec<String>,
    pub age_min: u8,
    pub age_max: u8,
    #[serde(default)]
    pub genders: Vec<u8>,
}

impl Default for Targeting {
    fn default() -> Self {
        Self {
            countries: vec!["US".to_string()],
            age_min: 25,
            age_max: 45,
            genders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateExperimentPayload {
    pub creative_ids: Vec<String>,
    pub budget: f64,
    pub objective: Option<String>,
    pub audience: Option<Targeting>,
    pub duration_days: Option<u32>,
    pub name: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
    /// Every variant has a remote ad.
    Complete,
    /// Some variants failed; the experiment runs with the rest.
    Partial,
    /// Campaign exists but no variant made it; nothing to test.
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub experiment: Experiment,
    pub variants: Vec<Variant>,
    pub succeeded: usize,
    pub failed: usize,
    pub budget: BudgetPlan,
    pub warnings: Vec<String>,
    /// True when an earlier request with the same idempotency key was returned.
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SweepError {
    pub experiment_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<SweepError>,
    pub deadline_exceeded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunRecord {
    pub id: String,
    pub scope: String,
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<SweepError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformCredentials {
    #[serde(skip_serializing)]
    pub access_token: String,
    pub ad_account_id: String,
    pub page_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConnection {
    pub owner_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub ad_account_id: Option<String>,
    pub page_id: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountConnection {
    pub fn has_valid_credential(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.trim().is_empty() {
            return false;
        }
        self.token_expires_at.map(|at| at > now).unwrap_or(true)
    }

    /// Full credential set needed to create remote objects.
    pub fn platform_credentials(&self) -> Option<PlatformCredentials> {
        Some(PlatformCredentials {
            access_token: self.access_token.clone(),
            ad_account_id: self.ad_account_id.clone()?,
            page_id: self.page_id.clone()?,
        })
    }

    /// Read-only credential; reporting calls need neither account nor page.
    pub fn reporting_credentials(&self) -> PlatformCredentials {
        PlatformCredentials {
            access_token: self.access_token.clone(),
            ad_account_id: self.ad_account_id.clone().unwrap_or_default(),
            page_id: self.page_id.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAccountPayload {
    pub access_token: String,
    pub ad_account_id: Option<String>,
    pub page_id: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub ads_access: bool,
    pub publishing_access: bool,
    pub ad_account_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreativeContent {
    pub creative_id: String,
    pub owner_id: String,
    pub headline: String,
    pub body: String,
    pub cta: String,
    pub asset_ref: String,
    pub link_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedCampaign {
    pub campaign_id: String,
    pub owner_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListExperimentsFilters {
    pub status: Option<ExperimentStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSummary {
    pub experiment: Experiment,
    pub latest_metrics: Option<DailyMetricRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDetail {
    pub experiment: Experiment,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAnalytics {
    pub variant_id: String,
    pub creative_id: String,
    pub external_ad_id: Option<String>,
    pub records: Vec<DailyMetricRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentAnalytics {
    pub experiment_id: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    /// Campaign-level rows, newest day first.
    pub campaign: Vec<DailyMetricRecord>,
    pub variants: Vec<VariantAnalytics>,
}

/// Inclusive day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    /// The equal-length window ending the day before `start`, if the calendar reaches that far back.
    pub fn previous(&self) -> Option<Self> {
        let len = chrono::Duration::days(self.days());
        Some(Self {
            start: self.start.checked_sub_signed(len)?,
            end: self.start.checked_sub_signed(chrono::Duration::days(1))?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendResult {
    pub change_percent: f64,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiValue {
    pub current: f64,
    pub previous: f64,
    pub change_percent: f64,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiReport {
    pub current_range: DateRange,
    pub previous_range: DateRange,
    pub impressions: KpiValue,
    pub clicks: KpiValue,
    pub ctr: KpiValue,
    pub spend: KpiValue,
    pub cpc: KpiValue,
    pub conversions: KpiValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub sync_interval_secs: u64,
    pub sync_delay_ms: u64,
    pub sweep_deadline_secs: u64,
    pub platform_min_daily_budget: f64,
    pub default_duration_days: u32,
    pub signed_url_ttl_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub call_timeout_secs: u64,
    pub default_link_url: String,
    pub sync_variant_metrics: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sync_interval_secs: 3_600,
            sync_delay_ms: 1_000,
            sweep_deadline_secs: 1_800,
            platform_min_daily_budget: 1.0,
            default_duration_days: 5,
            signed_url_ttl_secs: 604_800,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            call_timeout_secs: 30,
            default_link_url: "https://example.com".to_string(),
            sync_variant_metrics: true,
        }
    }
}
