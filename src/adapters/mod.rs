pub mod collaborators;
pub mod graph;

use crate::errors::AppResult;
use crate::models::{CreativeContent, Insights, PlatformCredentials, RemoteStatus, Targeting};
use crate::vocabulary::{PlatformCta, PlatformObjective};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct CampaignRequest {
    pub name: String,
    pub objective: PlatformObjective,
}

#[derive(Debug, Clone)]
pub struct AdSetRequest {
    pub name: String,
    pub campaign_id: String,
    /// Minor currency units (cents).
    pub daily_budget: i64,
    pub optimization_goal: &'static str,
    pub targeting: Targeting,
}

#[derive(Debug, Clone)]
pub struct AdCreativeRequest {
    pub name: String,
    pub headline: String,
    pub body: String,
    pub image_url: String,
    pub link_url: String,
    pub cta: PlatformCta,
}

#[derive(Debug, Clone)]
pub struct AdRequest {
    pub name: String,
    pub ad_set_id: String,
    pub creative_id: String,
}

/// Remote ads platform. Every object is created paused; delivery starts only through `update_status`.
#[async_trait]
pub trait AdsPlatform: Send + Sync {
    async fn create_campaign(&self, credentials: &PlatformCredentials, request: &CampaignRequest) -> AppResult<String>;

    async fn create_ad_set(&self, credentials: &PlatformCredentials, request: &AdSetRequest) -> AppResult<String>;

    async fn create_ad_creative(&self, credentials: &PlatformCredentials, request: &AdCreativeRequest)
        -> AppResult<String>;

    async fn create_ad(&self, credentials: &PlatformCredentials, request: &AdRequest) -> AppResult<String>;

    /// `Ok(None)` when the object has no reporting data yet.
    async fn get_insights(&self, credentials: &PlatformCredentials, object_id: &str) -> AppResult<Option<Insights>>;

    async fn update_status(
        &self,
        credentials: &PlatformCredentials,
        object_id: &str,
        status: RemoteStatus,
    ) -> AppResult<()>;
}

/// Turns a stored asset reference into a time-limited public URL.
#[async_trait]
pub trait AssetSigner: Send + Sync {
    async fn sign(&self, asset_ref: &str, ttl_secs: u64) -> AppResult<String>;
}

#[async_trait]
pub trait CreativeSource: Send + Sync {
    async fn get_creative(&self, creative_id: &str) -> AppResult<CreativeContent>;
}
