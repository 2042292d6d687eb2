use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use super::{Notifier, Severity};
use crate::error::Result;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts human-readable alerts to a webhook-style endpoint.
///
/// The payload carries the message as a `text` field, which Telegram-style
/// webhooks and most chat integrations accept directly.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .context("failed to build HTTP client for notifications")?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str, severity: Severity) {
        let payload = json!({
            "text": format!("[{}] cfddns: {}", severity, message),
            "severity": severity.to_string().to_lowercase(),
        });

        let result = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => debug!("notification delivered"),
            Err(e) => warn!("notification delivery failed (ignored): {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_message_with_severity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"severity": "error"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri())).unwrap();
        notifier.notify("update failed", Severity::Error).await;
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri()).unwrap();
        // Must not panic or propagate anything.
        notifier.notify("message", Severity::Warning).await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_swallowed() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/unroutable".to_string()).unwrap();
        notifier.notify("message", Severity::Info).await;
    }
}
