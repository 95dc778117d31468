#![allow(dead_code)]

use async_trait::async_trait;
use creativity_engine::adapters::collaborators::DatabaseCreativeSource;
use creativity_engine::adapters::{
    AdCreativeRequest, AdRequest, AdSetRequest, AdsPlatform, AssetSigner, CampaignRequest,
};
use creativity_engine::db::Database;
use creativity_engine::engine::EngineCore;
use creativity_engine::errors::{AppError, AppResult};
use creativity_engine::models::{
    ConnectAccountPayload, CreateExperimentPayload, CreativeContent, Insights, PlatformCredentials, RemoteStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const OWNER: &str = "owner-1";

#[derive(Debug, Clone)]
pub enum InsightsReply {
    Data(Insights),
    Empty,
    ServerError,
}

/// In-memory ads platform that hands out sequential ids and records every call.
#[derive(Default)]
pub struct FakePlatform {
    next_id: AtomicUsize,
    pub campaigns: Mutex<Vec<CampaignRequest>>,
    pub ad_sets: Mutex<Vec<AdSetRequest>>,
    pub creatives: Mutex<Vec<AdCreativeRequest>>,
    pub ads: Mutex<Vec<AdRequest>>,
    pub status_updates: Mutex<Vec<(String, RemoteStatus)>>,
    pub insights: Mutex<HashMap<String, InsightsReply>>,
    pub insight_calls: Mutex<Vec<String>>,
    pub fail_ad_set: AtomicBool,
    pub fail_status: AtomicBool,
    /// Added to campaign, ad and insights calls so concurrent requests overlap.
    pub delay_ms: AtomicU64,
}

impl FakePlatform {
    fn id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn slow_down(&self, millis: u64) {
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    async fn pause(&self) {
        let millis = self.delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    pub fn set_insights(&self, object_id: &str, reply: InsightsReply) {
        self.insights
            .lock()
            .expect("insights lock")
            .insert(object_id.to_string(), reply);
    }

    pub fn campaign_count(&self) -> usize {
        self.campaigns.lock().expect("campaigns lock").len()
    }

    pub fn status_updates(&self) -> Vec<(String, RemoteStatus)> {
        self.status_updates.lock().expect("status lock").clone()
    }
}

#[async_trait]
impl AdsPlatform for FakePlatform {
    async fn create_campaign(&self, _credentials: &PlatformCredentials, request: &CampaignRequest) -> AppResult<String> {
        self.pause().await;
        self.campaigns.lock().expect("campaigns lock").push(request.clone());
        Ok(self.id("cmp"))
    }

    async fn create_ad_set(&self, _credentials: &PlatformCredentials, request: &AdSetRequest) -> AppResult<String> {
        if self.fail_ad_set.load(Ordering::SeqCst) {
            return Err(AppError::RemotePolicy("HTTP 400: (#100) Invalid targeting spec".to_string()));
        }
        self.ad_sets.lock().expect("ad sets lock").push(request.clone());
        Ok(self.id("set"))
    }

    async fn create_ad_creative(
        &self,
        _credentials: &PlatformCredentials,
        request: &AdCreativeRequest,
    ) -> AppResult<String> {
        self.creatives.lock().expect("creatives lock").push(request.clone());
        Ok(self.id("cr"))
    }

    async fn create_ad(&self, _credentials: &PlatformCredentials, request: &AdRequest) -> AppResult<String> {
        self.pause().await;
        self.ads.lock().expect("ads lock").push(request.clone());
        Ok(self.id("ad"))
    }

    async fn get_insights(&self, _credentials: &PlatformCredentials, object_id: &str) -> AppResult<Option<Insights>> {
        self.insight_calls
            .lock()
            .expect("insight calls lock")
            .push(object_id.to_string());
        self.pause().await;
        let reply = self
            .insights
            .lock()
            .expect("insights lock")
            .get(object_id)
            .cloned()
            .unwrap_or(InsightsReply::Empty);
        match reply {
            InsightsReply::Data(insights) => Ok(Some(insights)),
            InsightsReply::Empty => Ok(None),
            InsightsReply::ServerError => Err(AppError::RemoteTransient(
                "HTTP 500: An unknown error has occurred. access_token=EAAB1234567890abcdefghij".to_string(),
            )),
        }
    }

    async fn update_status(
        &self,
        _credentials: &PlatformCredentials,
        object_id: &str,
        status: RemoteStatus,
    ) -> AppResult<()> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(AppError::RemoteTransient("HTTP 503: try again later".to_string()));
        }
        self.status_updates
            .lock()
            .expect("status lock")
            .push((object_id.to_string(), status));
        Ok(())
    }
}

/// Signs every asset except the ones listed in `failing`.
#[derive(Default)]
pub struct FakeSigner {
    pub failing: Mutex<HashSet<String>>,
    pub ttls: Mutex<Vec<u64>>,
}

impl FakeSigner {
    pub fn fail_for(&self, asset_ref: &str) {
        self.failing.lock().expect("failing lock").insert(asset_ref.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().expect("failing lock").clear();
    }
}

#[async_trait]
impl AssetSigner for FakeSigner {
    async fn sign(&self, asset_ref: &str, ttl_secs: u64) -> AppResult<String> {
        self.ttls.lock().expect("ttls lock").push(ttl_secs);
        if self.failing.lock().expect("failing lock").contains(asset_ref) {
            return Err(AppError::RemotePolicy(format!("asset {} is not readable", asset_ref)));
        }
        Ok(format!("https://cdn.test/{}?expires={}", asset_ref, ttl_secs))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub db: Arc<Database>,
    pub platform: Arc<FakePlatform>,
    pub signer: Arc<FakeSigner>,
    pub engine: Arc<EngineCore>,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::new(&dir.path().join("engine.db")).expect("database"));
    db.update_settings(serde_json::json!({
        "syncDelayMs": 0,
        "retryMaxAttempts": 2,
        "retryBaseDelayMs": 0,
        "retryMaxDelayMs": 0,
        "callTimeoutSecs": 5,
        "platformMinDailyBudget": 2.0
    }))
    .expect("settings");

    let platform = Arc::new(FakePlatform::default());
    let signer = Arc::new(FakeSigner::default());
    let creatives = Arc::new(DatabaseCreativeSource::new(db.clone()));
    let engine = EngineCore::new(db.clone(), platform.clone(), signer.clone(), creatives).expect("engine");

    Harness {
        dir,
        db,
        platform,
        signer,
        engine,
    }
}

impl Harness {
    /// A second engine over the same database file, standing in for another process.
    pub fn second_engine(&self) -> Arc<EngineCore> {
        let db = Arc::new(Database::new(&self.dir.path().join("engine.db")).expect("second database"));
        let creatives = Arc::new(DatabaseCreativeSource::new(db.clone()));
        EngineCore::new(db, self.platform.clone(), self.signer.clone(), creatives).expect("second engine")
    }

    pub fn connect(&self, owner_id: &str) {
        self.engine
            .connect_account(
                owner_id,
                ConnectAccountPayload {
                    access_token: format!("token-for-{}", owner_id),
                    ad_account_id: Some("act_42".to_string()),
                    page_id: Some("page-7".to_string()),
                    token_expires_at: None,
                },
            )
            .expect("connect");
    }

    /// Registers creatives `<prefix>-1..=count` for the owner and returns their ids.
    pub fn register_creatives(&self, owner_id: &str, prefix: &str, count: usize) -> Vec<String> {
        (1..=count)
            .map(|n| {
                let creative_id = format!("{}-{}", prefix, n);
                self.engine
                    .register_creative(
                        owner_id,
                        CreativeContent {
                            creative_id: creative_id.clone(),
                            owner_id: owner_id.to_string(),
                            headline: format!("Headline {}", n),
                            body: format!("Body copy {}", n),
                            cta: "Get Started".to_string(),
                            asset_ref: format!("assets/{}.png", creative_id),
                            link_url: None,
                        },
                    )
                    .expect("register creative");
                creative_id
            })
            .collect()
    }

    pub fn payload(&self, creative_ids: Vec<String>) -> CreateExperimentPayload {
        CreateExperimentPayload {
            creative_ids,
            budget: 50.0,
            objective: Some("traffic".to_string()),
            duration_days: Some(5),
            name: Some("Spring launch".to_string()),
            ..CreateExperimentPayload::default()
        }
    }
}

pub fn insights(impressions: i64, clicks: i64, spend: f64) -> Insights {
    Insights {
        impressions,
        clicks,
        spend,
        ..Insights::default()
    }
}
