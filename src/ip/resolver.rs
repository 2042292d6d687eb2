use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::{ResolverConfig, Settings};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Detects the host's public IPv4 address from external echo services.
///
/// Services are tried in priority order. Each service gets a fixed retry
/// budget with a fixed inter-attempt delay before the resolver falls through
/// to the next one; the first validated address wins. A malformed or empty
/// body counts against the retry budget exactly like a transport failure.
pub struct IpResolver {
    client: Client,
    services: Vec<String>,
    policy: RetryPolicy,
}

impl IpResolver {
    pub fn new(services: Vec<String>, config: &ResolverConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to build HTTP client for IP resolver")?;

        Ok(Self {
            client,
            services,
            policy: RetryPolicy::fixed(
                config.attempts_per_service,
                Duration::from_secs(config.retry_delay_seconds),
            ),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.ip_services.clone(), &settings.resolver)
    }

    /// Resolve the current public address, or fail once every service is
    /// exhausted. Retries never leak state across calls.
    pub async fn resolve(&self) -> Result<Ipv4Addr> {
        let mut total_attempts = 0u32;

        for service in &self.services {
            let mut attempt = 1u32;
            loop {
                total_attempts += 1;
                match self.fetch_once(service).await {
                    Ok(ip) => {
                        info!(%ip, service = %service, "resolved public IP");
                        return Ok(ip);
                    }
                    Err(e) => {
                        debug!(service = %service, attempt, "IP lookup attempt failed: {e:#}");
                    }
                }

                if !self.policy.should_retry(attempt) {
                    warn!(service = %service, attempts = attempt, "IP service exhausted, trying next");
                    break;
                }
                tokio::time::sleep(self.policy.delay_for_retry(attempt - 1)).await;
                attempt += 1;
            }
        }

        Err(Error::resolution(format!(
            "all {} services exhausted after {} attempts",
            self.services.len(),
            total_attempts
        )))
    }

    async fn fetch_once(&self, url: &str) -> anyhow::Result<Ipv4Addr> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty response body"));
        }

        trimmed
            .parse::<Ipv4Addr>()
            .map_err(|_| anyhow!("response is not a valid IPv4 address: {:?}", truncate(trimmed)))
    }
}

// Keep junk bodies from flooding the log.
fn truncate(s: &str) -> &str {
    let max = 64;
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config(attempts: u32) -> ResolverConfig {
        ResolverConfig {
            timeout_seconds: 2,
            attempts_per_service: attempts,
            retry_delay_seconds: 0,
        }
    }

    #[tokio::test]
    async fn test_first_service_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7\n"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.8"))
            .expect(0)
            .mount(&server)
            .await;

        let resolver = IpResolver::new(
            vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())],
            &fast_config(3),
        )
        .unwrap();

        let ip = resolver.resolve().await.unwrap();
        assert_eq!(ip, "203.0.113.7".parse::<Ipv4Addr>().unwrap());
    }

    #[tokio::test]
    async fn test_malformed_body_falls_through_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not an ip</html>"))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_string("198.51.100.7"))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = IpResolver::new(
            vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())],
            &fast_config(3),
        )
        .unwrap();

        let ip = resolver.resolve().await.unwrap();
        assert_eq!(ip, "198.51.100.7".parse::<Ipv4Addr>().unwrap());
    }

    #[tokio::test]
    async fn test_server_error_retried_per_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let resolver =
            IpResolver::new(vec![format!("{}/flaky", server.uri())], &fast_config(2)).unwrap();

        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = IpResolver::new(
            vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())],
            &fast_config(2),
        )
        .unwrap();

        let err = resolver.resolve().await.unwrap_err();
        match err {
            Error::Resolution(msg) => {
                assert!(msg.contains("2 services"), "unexpected message: {msg}");
                assert!(msg.contains("4 attempts"), "unexpected message: {msg}");
            }
            other => panic!("expected Resolution error, got {other:?}"),
        }
    }

    #[test]
    fn test_ipv6_and_garbage_rejected_by_grammar() {
        for bad in ["2001:db8::1", "256.1.1.1", "1.2.3", "ip: 1.2.3.4"] {
            assert!(bad.parse::<Ipv4Addr>().is_err(), "{bad} should not parse");
        }
        for good in ["203.0.113.45", "0.0.0.0", "255.255.255.255"] {
            assert!(good.parse::<Ipv4Addr>().is_ok(), "{good} should parse");
        }
    }
}
