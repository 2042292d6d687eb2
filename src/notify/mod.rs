mod webhook;

use std::sync::Arc;

pub use webhook::WebhookNotifier;

use crate::config::NotificationConfig;
use crate::error::Result;

use async_trait::async_trait;

/// Message severity, rendered into the outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Best-effort alert channel.
///
/// `notify` never reports failure to the caller; delivery problems are
/// logged and dropped so reconciliation never depends on the messaging
/// endpoint being reachable.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, severity: Severity);
}

/// Notifier that discards everything, used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _message: &str, _severity: Severity) {}
}

pub fn create_notifier(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url.clone())?)),
        None => Ok(Arc::new(NoopNotifier)),
    }
}
