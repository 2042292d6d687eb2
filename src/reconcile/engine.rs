use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info};

use crate::config::Settings;
use crate::dns::DnsProvider;
use crate::error::Error;
use crate::ip::IpResolver;
use crate::notify::{Notifier, Severity};
use crate::state::{FileStateStore, RunState};

/// Result of one reconciliation cycle; summarized into [`RunState`] and
/// discarded.
#[derive(Debug)]
pub struct CycleOutcome {
    pub resolved_ip: Option<Ipv4Addr>,
    pub record_ip: Option<String>,
    pub changed: bool,
    pub updated: bool,
    pub error: Option<Error>,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Orchestrates one pass: resolve, fetch, compare, update when needed,
/// persist, notify. Holds no state between invocations; cross-run
/// continuity lives entirely in the state file.
pub struct Reconciler {
    resolver: IpResolver,
    provider: Arc<dyn DnsProvider>,
    store: FileStateStore,
    notifier: Arc<dyn Notifier>,
    domain: String,
    heartbeat_every: u64,
}

impl Reconciler {
    pub fn new(
        resolver: IpResolver,
        provider: Arc<dyn DnsProvider>,
        store: FileStateStore,
        notifier: Arc<dyn Notifier>,
        settings: &Settings,
    ) -> Self {
        Self {
            resolver,
            provider,
            store,
            notifier,
            domain: settings.record_name.clone(),
            heartbeat_every: settings.notification.heartbeat_every,
        }
    }

    /// Run one reconciliation cycle to completion.
    ///
    /// Never panics on component failures: every abort path increments the
    /// failure counter, persists state, emits an alert, and reports the
    /// error in the outcome for exit-code mapping.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let mut state = self.store.load();
        state.total_runs += 1;
        info!(run = state.total_runs, record = %self.domain, "starting reconciliation cycle");

        let started = Instant::now();
        let ip = match self.resolver.resolve().await {
            Ok(ip) => ip,
            Err(err) => {
                // No trustworthy address; never fall back to a stale one.
                return self.abort(state, err, None, None, false).await;
            }
        };
        state.record_response_time(started.elapsed().as_secs_f64() * 1000.0);
        state.current_ip = Some(ip);

        let record = match self.provider.fetch_record().await {
            Ok(record) => record,
            Err(err) => return self.abort(state, err, Some(ip), None, false).await,
        };
        let record_ip = record.content.clone();

        if record.current_ip() == Some(ip) {
            info!(%ip, "published record already matches, no update needed");
            state.last_run = Some(Utc::now());
            if let Err(err) = self.store.save(&state) {
                return self
                    .persist_failed(err, Some(ip), Some(record_ip), false, false)
                    .await;
            }
            self.maybe_heartbeat(&state).await;
            return CycleOutcome {
                resolved_ip: Some(ip),
                record_ip: Some(record_ip),
                changed: false,
                updated: false,
                error: None,
            };
        }

        info!(from = %record_ip, to = %ip, "address diverged, updating record");
        match self.provider.update_record(&record.id, ip).await {
            Ok(()) => {
                state.successful_updates += 1;
                state.last_ip_change = Some(Utc::now());
                state.last_run = Some(Utc::now());
                if let Err(err) = self.store.save(&state) {
                    return self
                        .persist_failed(err, Some(ip), Some(record_ip), true, true)
                        .await;
                }
                self.notifier
                    .notify(
                        &format!("{} updated: {} -> {}", self.domain, record_ip, ip),
                        Severity::Info,
                    )
                    .await;
                self.maybe_heartbeat(&state).await;
                CycleOutcome {
                    resolved_ip: Some(ip),
                    record_ip: Some(record_ip),
                    changed: true,
                    updated: true,
                    error: None,
                }
            }
            Err(err) => {
                // The failed attempt must land in metrics and alerts, not
                // vanish silently.
                self.abort(state, err, Some(ip), Some(record_ip), true).await
            }
        }
    }

    async fn abort(
        &self,
        mut state: RunState,
        err: Error,
        resolved_ip: Option<Ipv4Addr>,
        record_ip: Option<String>,
        changed: bool,
    ) -> CycleOutcome {
        error!(kind = err.kind(), "cycle aborted: {err}");
        state.failed_attempts += 1;
        state.last_run = Some(Utc::now());
        if let Err(save_err) = self.store.save(&state) {
            error!("additionally failed to persist state: {save_err}");
        }
        self.notifier
            .notify(
                &format!("{} reconciliation failed ({}): {}", self.domain, err.kind(), err),
                Severity::Error,
            )
            .await;

        CycleOutcome {
            resolved_ip,
            record_ip,
            changed,
            updated: false,
            error: Some(err),
        }
    }

    async fn persist_failed(
        &self,
        err: Error,
        resolved_ip: Option<Ipv4Addr>,
        record_ip: Option<String>,
        changed: bool,
        updated: bool,
    ) -> CycleOutcome {
        error!(kind = err.kind(), "cycle completed but state could not be saved: {err}");
        self.notifier
            .notify(
                &format!("{} state persistence failed: {}", self.domain, err),
                Severity::Error,
            )
            .await;

        CycleOutcome {
            resolved_ip,
            record_ip,
            changed,
            updated,
            error: Some(err),
        }
    }

    async fn maybe_heartbeat(&self, state: &RunState) {
        if self.heartbeat_every == 0 || state.total_runs % self.heartbeat_every != 0 {
            return;
        }
        let ip = state
            .current_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.notifier
            .notify(
                &format!(
                    "heartbeat: {} runs, {} updates, current IP {}",
                    state.total_runs, state.successful_updates, ip
                ),
                Severity::Info,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::dns::{CloudflareClient, DnsRecord};
    use crate::error::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct MockProvider {
        record_content: Mutex<String>,
        fail_fetch_with: Option<fn() -> Error>,
        fail_update_with: Option<fn() -> Error>,
        fetch_calls: AtomicUsize,
        update_calls: Mutex<Vec<Ipv4Addr>>,
    }

    impl MockProvider {
        fn serving(content: &str) -> Self {
            Self {
                record_content: Mutex::new(content.to_string()),
                fail_fetch_with: None,
                fail_update_with: None,
                fetch_calls: AtomicUsize::new(0),
                update_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DnsProvider for MockProvider {
        async fn fetch_record(&self) -> Result<DnsRecord> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(make_err) = self.fail_fetch_with {
                return Err(make_err());
            }
            Ok(DnsRecord {
                id: "rec1".to_string(),
                name: "lab.example.com".to_string(),
                record_type: "A".to_string(),
                content: self.record_content.lock().unwrap().clone(),
                ttl: 300,
            })
        }

        async fn update_record(&self, _record_id: &str, new_ip: Ipv4Addr) -> Result<()> {
            self.update_calls.lock().unwrap().push(new_ip);
            if let Some(make_err) = self.fail_update_with {
                return Err(make_err());
            }
            *self.record_content.lock().unwrap() = new_ip.to_string();
            Ok(())
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(String, Severity)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str, severity: Severity) {
            self.messages
                .lock()
                .unwrap()
                .push((message.to_string(), severity));
        }
    }

    fn test_settings() -> Settings {
        let mut settings: Settings =
            toml::from_str(r#"domain = "lab.example.com""#).expect("settings");
        settings.record_name = settings.domain.clone();
        settings
    }

    async fn ip_server(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn resolver_for(server: &MockServer) -> IpResolver {
        IpResolver::new(
            vec![format!("{}/ip", server.uri())],
            &ResolverConfig {
                timeout_seconds: 2,
                attempts_per_service: 1,
                retry_delay_seconds: 0,
            },
        )
        .unwrap()
    }

    struct Harness {
        reconciler: Reconciler,
        provider: Arc<MockProvider>,
        notifier: Arc<RecordingNotifier>,
        store_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness(ip_srv: &MockServer, provider: MockProvider, settings: Settings) -> Harness {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("state.json");
        let provider = Arc::new(provider);
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Reconciler::new(
            resolver_for(ip_srv),
            provider.clone(),
            FileStateStore::new(&store_path),
            notifier.clone(),
            &settings,
        );
        Harness {
            reconciler,
            provider,
            notifier,
            store_path,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_no_op_cycle_never_calls_update() {
        let ip_srv = ip_server("203.0.113.44").await;
        let h = harness(&ip_srv, MockProvider::serving("203.0.113.44"), test_settings());

        let outcome = h.reconciler.run_cycle().await;
        assert!(outcome.is_success());
        assert!(!outcome.changed);
        assert!(!outcome.updated);
        assert!(h.provider.update_calls.lock().unwrap().is_empty());
        assert!(h.notifier.messages.lock().unwrap().is_empty());

        let state = FileStateStore::new(&h.store_path).load();
        assert_eq!(state.total_runs, 1);
        assert_eq!(state.successful_updates, 0);
        assert_eq!(state.failed_attempts, 0);
        assert_eq!(state.current_ip, Some("203.0.113.44".parse().unwrap()));
        assert!(state.last_ip_change.is_none());
        assert!(state.last_run.is_some());
    }

    #[tokio::test]
    async fn test_divergence_converges_then_no_ops() {
        let ip_srv = ip_server("203.0.113.45").await;
        let h = harness(&ip_srv, MockProvider::serving("203.0.113.44"), test_settings());

        let outcome = h.reconciler.run_cycle().await;
        assert!(outcome.is_success());
        assert!(outcome.changed);
        assert!(outcome.updated);
        assert_eq!(outcome.record_ip.as_deref(), Some("203.0.113.44"));
        assert_eq!(
            *h.provider.update_calls.lock().unwrap(),
            vec!["203.0.113.45".parse::<Ipv4Addr>().unwrap()]
        );

        let state = FileStateStore::new(&h.store_path).load();
        assert_eq!(state.total_runs, 1);
        assert_eq!(state.successful_updates, 1);
        assert_eq!(state.current_ip, Some("203.0.113.45".parse().unwrap()));
        assert!(state.last_ip_change.is_some());

        let messages = h.notifier.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0.contains("203.0.113.45"));
        assert_eq!(messages[0].1, Severity::Info);
        drop(messages);

        // Same resolved address again: exactly one update total.
        let outcome = h.reconciler.run_cycle().await;
        assert!(outcome.is_success());
        assert!(!outcome.changed);
        assert_eq!(h.provider.update_calls.lock().unwrap().len(), 1);

        let state = FileStateStore::new(&h.store_path).load();
        assert_eq!(state.total_runs, 2);
        assert_eq!(state.successful_updates, 1);
    }

    #[tokio::test]
    async fn test_resolution_exhaustion_skips_provider_entirely() {
        let ip_srv = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&ip_srv)
            .await;
        let h = harness(&ip_srv, MockProvider::serving("203.0.113.44"), test_settings());

        let outcome = h.reconciler.run_cycle().await;
        assert!(matches!(outcome.error, Some(Error::Resolution(_))));
        assert_eq!(h.provider.fetch_calls.load(Ordering::SeqCst), 0);
        assert!(h.provider.update_calls.lock().unwrap().is_empty());

        let state = FileStateStore::new(&h.store_path).load();
        assert_eq!(state.total_runs, 1);
        assert_eq!(state.failed_attempts, 1);
        assert!(state.current_ip.is_none());

        let messages = h.notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, Severity::Error);
        assert!(messages[0].0.contains("resolution"));
    }

    #[tokio::test]
    async fn test_fetch_auth_failure_aborts_with_bookkeeping() {
        let ip_srv = ip_server("203.0.113.45").await;
        let mut provider = MockProvider::serving("203.0.113.44");
        provider.fail_fetch_with = Some(|| Error::auth("token rejected"));
        let h = harness(&ip_srv, provider, test_settings());

        let outcome = h.reconciler.run_cycle().await;
        assert!(matches!(outcome.error, Some(Error::Auth(_))));
        assert!(h.provider.update_calls.lock().unwrap().is_empty());

        let state = FileStateStore::new(&h.store_path).load();
        assert_eq!(state.failed_attempts, 1);
        // The resolved address is still recorded.
        assert_eq!(state.current_ip, Some("203.0.113.45".parse().unwrap()));

        let messages = h.notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0.contains("auth"));
    }

    #[tokio::test]
    async fn test_failed_update_is_persisted_and_alerted() {
        let ip_srv = ip_server("203.0.113.45").await;
        let mut provider = MockProvider::serving("203.0.113.44");
        provider.fail_update_with = Some(|| Error::rate_limit("throttled"));
        let h = harness(&ip_srv, provider, test_settings());

        let outcome = h.reconciler.run_cycle().await;
        assert!(matches!(outcome.error, Some(Error::RateLimit(_))));
        assert!(outcome.changed);
        assert!(!outcome.updated);
        assert_eq!(h.provider.update_calls.lock().unwrap().len(), 1);

        let state = FileStateStore::new(&h.store_path).load();
        assert_eq!(state.failed_attempts, 1);
        assert_eq!(state.successful_updates, 0);
        assert!(state.last_ip_change.is_none());

        let messages = h.notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, Severity::Error);
        assert!(messages[0].0.contains("rate-limit"));
    }

    #[tokio::test]
    async fn test_heartbeat_fires_on_schedule() {
        let ip_srv = ip_server("203.0.113.44").await;
        let mut settings = test_settings();
        settings.notification.heartbeat_every = 2;
        let h = harness(&ip_srv, MockProvider::serving("203.0.113.44"), settings);

        h.reconciler.run_cycle().await;
        assert!(h.notifier.messages.lock().unwrap().is_empty());

        h.reconciler.run_cycle().await;
        let messages = h.notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0.contains("heartbeat"));
        assert_eq!(messages[0].1, Severity::Info);
    }

    #[tokio::test]
    async fn test_unwritable_state_surfaces_persistence_error() {
        let ip_srv = ip_server("203.0.113.44").await;
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let provider = Arc::new(MockProvider::serving("203.0.113.44"));
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Reconciler::new(
            resolver_for(&ip_srv),
            provider,
            FileStateStore::new(blocker.join("state.json")),
            notifier.clone(),
            &test_settings(),
        );

        let outcome = reconciler.run_cycle().await;
        assert!(matches!(outcome.error, Some(Error::Persistence(_))));
        assert_eq!(notifier.messages.lock().unwrap().len(), 1);
    }

    // End-to-end pass with the real Cloudflare client against a mock API:
    // mismatch detected, one PUT issued, counters and notification updated.
    #[tokio::test]
    async fn test_full_cycle_against_mock_provider_api() {
        let ip_srv = ip_server("203.0.113.45").await;

        let api = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone9/dns_records"))
            .and(query_param("type", "A"))
            .and(query_param("name", "lab.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [{
                    "id": "rec123",
                    "type": "A",
                    "name": "lab.example.com",
                    "content": "203.0.113.44",
                    "ttl": 300
                }]
            })))
            .expect(1)
            .mount(&api)
            .await;
        Mock::given(method("PUT"))
            .and(path("/zones/zone9/dns_records/rec123"))
            .and(body_partial_json(json!({"content": "203.0.113.45"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": {
                    "id": "rec123",
                    "type": "A",
                    "name": "lab.example.com",
                    "content": "203.0.113.45",
                    "ttl": 300
                }
            })))
            .expect(1)
            .mount(&api)
            .await;

        let mut settings = test_settings();
        settings.cloudflare.zone_id = "zone9".to_string();
        let client = CloudflareClient::new("test-token".to_string(), &settings)
            .unwrap()
            .with_base_url(api.uri());

        let dir = tempdir().unwrap();
        let store_path = dir.path().join("state.json");
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Reconciler::new(
            resolver_for(&ip_srv),
            Arc::new(client),
            FileStateStore::new(&store_path),
            notifier.clone(),
            &settings,
        );

        let outcome = reconciler.run_cycle().await;
        assert!(outcome.is_success(), "error: {:?}", outcome.error);
        assert!(outcome.changed);
        assert!(outcome.updated);
        assert_eq!(outcome.resolved_ip, Some("203.0.113.45".parse().unwrap()));
        assert_eq!(outcome.record_ip.as_deref(), Some("203.0.113.44"));

        let state = FileStateStore::new(&store_path).load();
        assert_eq!(state.current_ip, Some("203.0.113.45".parse().unwrap()));
        assert_eq!(state.successful_updates, 1);
        assert!(state.last_ip_change.is_some());

        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0.contains("203.0.113.44 -> 203.0.113.45"));
    }
}
