use thiserror::Error;

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for one reconciliation cycle.
///
/// Each variant maps to a distinct failure mode the reconciler reacts to:
/// transient failures are retried inside the component that produced them,
/// and only surface here once the local retry budget is exhausted.
#[derive(Error, Debug)]
pub enum Error {
    /// Every configured IP detection service was exhausted without a valid address
    #[error("public IP resolution failed: {0}")]
    Resolution(String),

    /// The provider holds no matching record; creation is a manual prerequisite
    #[error("DNS record not found: {0}")]
    RecordNotFound(String),

    /// Credential rejected by the provider; never retried
    #[error("provider authentication failed: {0}")]
    Auth(String),

    /// Provider throttling persisted through the backoff budget
    #[error("provider rate limit exceeded: {0}")]
    RateLimit(String),

    /// Any other provider-side failure, including `success=false` envelopes
    #[error("provider error: {0}")]
    Provider(String),

    /// Run state could not be written
    #[error("state persistence failed: {0}")]
    Persistence(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything outside the enumerated taxonomy; always fatal for the cycle
    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

impl Error {
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn record_not_found(msg: impl Into<String>) -> Self {
        Self::RecordNotFound(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn rate_limit(msg: impl Into<String>) -> Self {
        Self::RateLimit(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short label used in log lines and notification messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution",
            Self::RecordNotFound(_) => "record-not-found",
            Self::Auth(_) => "auth",
            Self::RateLimit(_) => "rate-limit",
            Self::Provider(_) => "provider",
            Self::Persistence(_) => "persistence",
            Self::Config(_) => "config",
            Self::Unclassified(_) => "unclassified",
        }
    }
}
