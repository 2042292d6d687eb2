use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::provider::{DnsProvider, DnsRecord};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare v4 API client scoped to a single managed record.
///
/// Every response is a JSON envelope `{success, errors, result}`;
/// `success=false` is treated as an error regardless of HTTP status.
/// HTTP 429 is retried with doubling delays up to the configured attempt
/// budget; 401/403 fail immediately since retrying cannot change the outcome.
pub struct CloudflareClient {
    client: Client,
    base_url: String,
    api_token: String,
    domain: String,
    record_name: String,
    ttl: u32,
    configured_zone: Option<String>,
    resolved_zone: OnceCell<String>,
    backoff: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ZonePayload {
    id: String,
    #[allow(dead_code)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordPayload {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    #[serde(default)]
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct TokenStatus {
    status: String,
}

impl<T> ApiEnvelope<T> {
    fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return "unknown error".to_string();
        }
        self.errors
            .iter()
            .map(|e| format!("{} (code {})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl CloudflareClient {
    pub fn new(api_token: String, settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.cloudflare.timeout_seconds))
            .build()
            .context("failed to build HTTP client for Cloudflare API")?;

        Ok(Self {
            client,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            api_token,
            domain: settings.domain.clone(),
            record_name: settings.record_name.clone(),
            ttl: settings.cloudflare.ttl,
            configured_zone: settings.configured_zone_id().map(str::to_string),
            resolved_zone: OnceCell::new(),
            backoff: RetryPolicy::exponential(
                settings.cloudflare.rate_limit_attempts,
                Duration::from_secs(settings.cloudflare.rate_limit_base_delay_seconds),
                Duration::from_secs(settings.cloudflare.rate_limit_max_delay_seconds),
            ),
        })
    }

    /// Point the client at a different API base. Used against mock servers
    /// and API gateways.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Check that the API token is valid and active.
    pub async fn verify_token(&self) -> Result<()> {
        let url = format!("{}/user/tokens/verify", self.base_url);
        let status: TokenStatus = self.call(Method::GET, url, None).await?;
        if status.status != "active" {
            return Err(Error::auth(format!(
                "API token is not active (status: {})",
                status.status
            )));
        }
        Ok(())
    }

    async fn zone_id(&self) -> Result<&str> {
        if let Some(zone) = &self.configured_zone {
            return Ok(zone);
        }
        self.resolved_zone
            .get_or_try_init(|| self.lookup_zone_id())
            .await
            .map(String::as_str)
    }

    async fn lookup_zone_id(&self) -> Result<String> {
        let zone_name = registrable_domain(&self.domain);
        let url = format!("{}/zones?name={}", self.base_url, zone_name);

        let zones: Vec<ZonePayload> = self.call(Method::GET, url, None).await?;
        let zone = zones.into_iter().next().ok_or_else(|| {
            Error::provider(format!("no zone named {} is visible to this token", zone_name))
        })?;

        debug!(zone = %zone_name, zone_id = %zone.id, "resolved zone id");
        Ok(zone.id)
    }

    /// Issue a request, retrying with exponential backoff while the API
    /// answers with throttling signals.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<T> {
        let mut attempt = 1u32;
        loop {
            match self.call_once(method.clone(), &url, body.as_ref()).await {
                Err(Error::RateLimit(msg)) => {
                    if !self.backoff.should_retry(attempt) {
                        return Err(Error::rate_limit(format!(
                            "{} ({} attempts)",
                            msg, attempt
                        )));
                    }
                    let delay = self.backoff.delay_for_retry(attempt - 1);
                    warn!(attempt, delay_secs = delay.as_secs(), "Cloudflare throttling, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::provider(format!("request to Cloudflare failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::auth(format!(
                "Cloudflare rejected the API token (HTTP {})",
                status.as_u16()
            )));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::rate_limit("Cloudflare answered HTTP 429"));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!(
                "Cloudflare API error (HTTP {}): {}",
                status.as_u16(),
                truncate(&body)
            )));
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("failed to parse Cloudflare response: {}", e)))?;

        if !envelope.success {
            return Err(Error::provider(format!(
                "Cloudflare reported failure: {}",
                envelope.error_summary()
            )));
        }

        envelope
            .result
            .ok_or_else(|| Error::provider("Cloudflare response is missing the result payload"))
    }
}

#[async_trait]
impl DnsProvider for CloudflareClient {
    async fn fetch_record(&self) -> Result<DnsRecord> {
        let zone_id = self.zone_id().await?;
        let url = format!(
            "{}/zones/{}/dns_records?type=A&name={}",
            self.base_url, zone_id, self.record_name
        );

        let records: Vec<RecordPayload> = self.call(Method::GET, url, None).await?;
        let record = records.into_iter().next().ok_or_else(|| {
            Error::record_not_found(format!(
                "no A record named {} in zone {}; create it once by hand before running",
                self.record_name, zone_id
            ))
        })?;

        debug!(record_id = %record.id, content = %record.content, "fetched DNS record");
        Ok(DnsRecord {
            id: record.id,
            name: record.name,
            record_type: record.record_type,
            content: record.content,
            ttl: record.ttl,
        })
    }

    async fn update_record(&self, record_id: &str, new_ip: Ipv4Addr) -> Result<()> {
        let zone_id = self.zone_id().await?;
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        );
        let payload = json!({
            "type": "A",
            "name": self.record_name,
            "content": new_ip.to_string(),
            "ttl": self.ttl,
        });

        let _updated: RecordPayload = self.call(Method::PUT, url, Some(payload)).await?;
        info!(record = %self.record_name, %new_ip, "DNS record updated");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

/// Registrable root of a name: "home.lab.example.com" -> "example.com".
fn registrable_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() <= 2 {
        domain.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

fn truncate(s: &str) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
