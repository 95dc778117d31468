use crate::adapters::{AdCreativeRequest, AdRequest, AdSetRequest, AdsPlatform, CampaignRequest};
use crate::errors::{AppError, AppResult};
use crate::models::{Insights, PlatformCredentials, RemoteStatus};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_GRAPH_VERSION: &str = "v18.0";

const INSIGHT_FIELDS: &str = "impressions,clicks,spend,ctr,cpc,cpm,actions";
const CONVERSION_ACTION_TYPES: &[&str] = &["offsite_conversion", "purchase", "lead", "complete_registration"];
const DEFAULT_BID_AMOUNT: i64 = 200;

/// Graph-style REST client for the ads platform.
#[derive(Debug, Clone)]
pub struct GraphAdsClient {
    client: reqwest::Client,
    base_url: String,
}

impl GraphAdsClient {
    pub fn new(base_url: &str, version: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {}", error)))?;
        Ok(Self {
            client,
            base_url: format!("{}/{}", base_url.trim_end_matches('/'), version.trim_matches('/')),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post(&self, credentials: &PlatformCredentials, path: &str, body: Value) -> AppResult<Value> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&credentials.access_token)
            .json(&body)
            .send()
            .await?;
        read_body(response).await
    }

    async fn get(&self, credentials: &PlatformCredentials, path: &str, query: &[(&str, &str)]) -> AppResult<Value> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&credentials.access_token)
            .query(query)
            .send()
            .await?;
        read_body(response).await
    }

    async fn upload_image(&self, credentials: &PlatformCredentials, image_url: &str) -> AppResult<String> {
        let body = self
            .post(
                credentials,
                &format!("{}/adimages", account_path(&credentials.ad_account_id)),
                json!({ "url": image_url }),
            )
            .await?;
        decode_image_hash(&body)
    }
}

#[async_trait]
impl AdsPlatform for GraphAdsClient {
    async fn create_campaign(&self, credentials: &PlatformCredentials, request: &CampaignRequest) -> AppResult<String> {
        let body = self
            .post(
                credentials,
                &format!("{}/campaigns", account_path(&credentials.ad_account_id)),
                json!({
                    "name": request.name,
                    "objective": request.objective.as_str(),
                    "status": RemoteStatus::Paused.as_str(),
                    "special_ad_categories": [],
                }),
            )
            .await?;
        decode_object_id(&body)
    }

    async fn create_ad_set(&self, credentials: &PlatformCredentials, request: &AdSetRequest) -> AppResult<String> {
        let mut targeting = json!({
            "geo_locations": { "countries": request.targeting.countries },
            "age_min": request.targeting.age_min,
            "age_max": request.targeting.age_max,
        });
        if !request.targeting.genders.is_empty() {
            targeting["genders"] = json!(request.targeting.genders);
        }
        let body = self
            .post(
                credentials,
                &format!("{}/adsets", account_path(&credentials.ad_account_id)),
                json!({
                    "name": request.name,
                    "campaign_id": request.campaign_id,
                    "daily_budget": request.daily_budget,
                    "billing_event": "IMPRESSIONS",
                    "optimization_goal": request.optimization_goal,
                    "bid_amount": DEFAULT_BID_AMOUNT,
                    "targeting": targeting,
                    "status": RemoteStatus::Paused.as_str(),
                }),
            )
            .await?;
        decode_object_id(&body)
    }

    async fn create_ad_creative(
        &self,
        credentials: &PlatformCredentials,
        request: &AdCreativeRequest,
    ) -> AppResult<String> {
        let image_hash = self.upload_image(credentials, &request.image_url).await?;
        let body = self
            .post(
                credentials,
                &format!("{}/adcreatives", account_path(&credentials.ad_account_id)),
                json!({
                    "name": request.name,
                    "object_story_spec": {
                        "page_id": credentials.page_id,
                        "link_data": {
                            "image_hash": image_hash,
                            "link": request.link_url,
                            "message": request.body,
                            "name": request.headline,
                            "call_to_action": { "type": request.cta.as_str() },
                        },
                    },
                }),
            )
            .await?;
        decode_object_id(&body)
    }

    async fn create_ad(&self, credentials: &PlatformCredentials, request: &AdRequest) -> AppResult<String> {
        let body = self
            .post(
                credentials,
                &format!("{}/ads", account_path(&credentials.ad_account_id)),
                json!({
                    "name": request.name,
                    "adset_id": request.ad_set_id,
                    "creative": { "creative_id": request.creative_id },
                    "status": RemoteStatus::Paused.as_str(),
                }),
            )
            .await?;
        decode_object_id(&body)
    }

    async fn get_insights(&self, credentials: &PlatformCredentials, object_id: &str) -> AppResult<Option<Insights>> {
        let body = self
            .get(
                credentials,
                &format!("{}/insights", object_id),
                &[("fields", INSIGHT_FIELDS), ("date_preset", "today")],
            )
            .await?;
        decode_insights(&body)
    }

    async fn update_status(
        &self,
        credentials: &PlatformCredentials,
        object_id: &str,
        status: RemoteStatus,
    ) -> AppResult<()> {
        let body = self
            .post(credentials, object_id, json!({ "status": status.as_str() }))
            .await?;
        match body.get("success").and_then(Value::as_bool) {
            Some(true) => Ok(()),
            _ => Err(AppError::RemotePolicy(format!(
                "status update to {} was not acknowledged for {}",
                status.as_str(),
                object_id
            ))),
        }
    }
}

async fn read_body(response: reqwest::Response) -> AppResult<Value> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(classify_error(status, &text));
    }
    serde_json::from_str(&text)
        .map_err(|error| AppError::RemotePolicy(format!("response is not valid JSON: {}", error)))
}

fn account_path(ad_account_id: &str) -> String {
    if ad_account_id.starts_with("act_") {
        ad_account_id.to_string()
    } else {
        format!("act_{}", ad_account_id)
    }
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    error_user_msg: Option<String>,
    #[serde(default)]
    is_transient: Option<bool>,
}

/// Maps a non-2xx response to the error taxonomy. The platform's own reason is kept in the message.
pub fn classify_error(status: StatusCode, body: &str) -> AppError {
    let parsed = serde_json::from_str::<GraphErrorEnvelope>(body).ok().map(|envelope| envelope.error);
    let reason = match &parsed {
        Some(error) => {
            let mut reason = error.message.clone();
            if let Some(user_message) = error.error_user_msg.as_deref().filter(|msg| !msg.is_empty()) {
                reason = format!("{} ({})", reason, user_message);
            }
            if let Some(code) = error.code {
                reason = format!("(#{}) {}", code, reason);
            }
            reason
        }
        None => body.chars().take(300).collect::<String>(),
    };
    let reason = format!("HTTP {}: {}", status.as_u16(), reason);

    let transient_hint = parsed.as_ref().and_then(|error| error.is_transient).unwrap_or(false);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || transient_hint {
        AppError::RemoteTransient(reason)
    } else {
        AppError::RemotePolicy(reason)
    }
}

pub fn decode_object_id(body: &Value) -> AppResult<String> {
    body.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::RemotePolicy("create response is missing an object id".to_string()))
}

pub fn decode_image_hash(body: &Value) -> AppResult<String> {
    body.get("images")
        .and_then(Value::as_object)
        .and_then(|images| images.values().next())
        .and_then(|image| image.get("hash"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::RemotePolicy("image upload response is missing a hash".to_string()))
}

#[derive(Debug, Deserialize)]
struct InsightsEnvelope {
    data: Vec<InsightsRow>,
}

#[derive(Debug, Deserialize)]
struct InsightsRow {
    impressions: Option<String>,
    clicks: Option<String>,
    spend: Option<String>,
    ctr: Option<String>,
    cpc: Option<String>,
    cpm: Option<String>,
    #[serde(default)]
    actions: Vec<InsightsAction>,
}

#[derive(Debug, Deserialize)]
struct InsightsAction {
    action_type: String,
    value: String,
}

/// Strict decode of the insights payload. Empty `data` means "no data yet"; any other
/// shape the client does not understand is a policy failure rather than a zero row.
pub fn decode_insights(body: &Value) -> AppResult<Option<Insights>> {
    let envelope: InsightsEnvelope = serde_json::from_value(body.clone())
        .map_err(|error| AppError::RemotePolicy(format!("unexpected insights shape: {}", error)))?;
    let Some(row) = envelope.data.into_iter().next() else {
        return Ok(None);
    };

    let conversions = if row.actions.is_empty() {
        None
    } else {
        let mut total = 0i64;
        for action in row.actions.iter().filter(|action| {
            CONVERSION_ACTION_TYPES
                .iter()
                .any(|kind| action.action_type == *kind || action.action_type.starts_with("offsite_conversion."))
        }) {
            total += parse_count("actions.value", &action.value)?;
        }
        Some(total)
    };

    Ok(Some(Insights {
        impressions: parse_optional_count("impressions", row.impressions.as_deref())?,
        clicks: parse_optional_count("clicks", row.clicks.as_deref())?,
        spend: parse_optional_amount("spend", row.spend.as_deref())?.unwrap_or(0.0),
        ctr: parse_optional_amount("ctr", row.ctr.as_deref())?,
        cpc: parse_optional_amount("cpc", row.cpc.as_deref())?,
        cpm: parse_optional_amount("cpm", row.cpm.as_deref())?,
        conversions,
    }))
}

fn parse_count(field: &str, raw: &str) -> AppResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::RemotePolicy(format!("insights field {} is not an integer: '{}'", field, raw)))
}

fn parse_optional_count(field: &str, raw: Option<&str>) -> AppResult<i64> {
    raw.map(|value| parse_count(field, value)).transpose().map(|value| value.unwrap_or(0))
}

fn parse_optional_amount(field: &str, raw: Option<&str>) -> AppResult<Option<f64>> {
    raw.map(|value| {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|amount| amount.is_finite())
            .ok_or_else(|| AppError::RemotePolicy(format!("insights field {} is not a number: '{}'", field, value)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::{account_path, classify_error, decode_image_hash, decode_insights, decode_object_id};
    use crate::errors::AppError;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn decodes_string_encoded_insights() {
        let body = json!({
            "data": [{
                "impressions": "1200",
                "clicks": "30",
                "spend": "12.50",
                "ctr": "2.5",
                "cpc": "0.416",
                "cpm": "10.41",
                "actions": [
                    { "action_type": "link_click", "value": "30" },
                    { "action_type": "offsite_conversion.fb_pixel_purchase", "value": "2" },
                    { "action_type": "lead", "value": "1" }
                ]
            }]
        });
        let insights = decode_insights(&body).expect("decode").expect("row");
        assert_eq!(insights.impressions, 1_200);
        assert_eq!(insights.clicks, 30);
        assert_eq!(insights.spend, 12.5);
        assert_eq!(insights.conversions, Some(3));
        assert_eq!(insights.ctr, Some(2.5));
    }

    #[test]
    fn empty_data_means_no_insights_yet() {
        assert!(decode_insights(&json!({ "data": [] })).expect("decode").is_none());
    }

    #[test]
    fn unexpected_shapes_fail_closed() {
        assert!(matches!(
            decode_insights(&json!({ "rows": [] })),
            Err(AppError::RemotePolicy(_))
        ));
        assert!(matches!(
            decode_insights(&json!({ "data": [{ "impressions": "lots" }] })),
            Err(AppError::RemotePolicy(_))
        ));
        assert!(matches!(decode_object_id(&json!({ "success": true })), Err(AppError::RemotePolicy(_))));
    }

    #[test]
    fn classifies_http_failures() {
        let policy = classify_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Invalid parameter","code":100,"error_user_msg":"Ad text too long"}}"#,
        );
        match policy {
            AppError::RemotePolicy(message) => {
                assert!(message.contains("(#100) Invalid parameter"));
                assert!(message.contains("Ad text too long"));
            }
            other => panic!("expected policy error, got {:?}", other),
        }
        assert!(classify_error(StatusCode::INTERNAL_SERVER_ERROR, "oops").is_retryable());
        assert!(classify_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Service temporarily unavailable","is_transient":true}}"#
        )
        .is_retryable());
    }

    #[test]
    fn image_hash_and_account_path() {
        let body = json!({ "images": { "upload.png": { "hash": "abc123" } } });
        assert_eq!(decode_image_hash(&body).expect("hash"), "abc123");
        assert_eq!(account_path("123"), "act_123");
        assert_eq!(account_path("act_123"), "act_123");
    }
}
