use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable carrying the Cloudflare API token.
///
/// The token is never stored in the configuration file and never logged.
pub const TOKEN_ENV: &str = "CLOUDFLARE_API_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Fully-qualified domain name of the managed A record
    pub domain: String,

    /// Record name, defaults to `domain` when omitted or empty
    #[serde(default)]
    pub record_name: String,

    /// Ordered list of public IP echo services, tried in priority order
    #[serde(default = "default_ip_services")]
    pub ip_services: Vec<String>,

    #[serde(default)]
    pub cloudflare: CloudflareConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub notification: NotificationConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareConfig {
    /// Zone identifier, or "auto-detect" to look it up from the domain
    #[serde(default = "default_zone_id")]
    pub zone_id: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,
    /// Attempt budget when the API answers with throttling signals
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,
    #[serde(default = "default_rate_limit_base_delay")]
    pub rate_limit_base_delay_seconds: u64,
    #[serde(default = "default_rate_limit_max_delay")]
    pub rate_limit_max_delay_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolver_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_attempts_per_service")]
    pub attempts_per_service: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook endpoint for alerts; notifications are disabled when absent
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Send a heartbeat message every N runs; 0 disables the heartbeat
    #[serde(default)]
    pub heartbeat_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Daily log files kept on disk; older files are pruned
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

fn default_ip_services() -> Vec<String> {
    vec![
        "https://api.ipify.org".to_string(),
        "https://icanhazip.com".to_string(),
        "https://checkip.amazonaws.com".to_string(),
        "https://ipinfo.io/ip".to_string(),
    ]
}

fn default_zone_id() -> String {
    "auto-detect".to_string()
}

fn default_ttl() -> u32 {
    300
}

fn default_api_timeout() -> u64 {
    30
}

fn default_rate_limit_attempts() -> u32 {
    4
}

fn default_rate_limit_base_delay() -> u64 {
    2
}

fn default_rate_limit_max_delay() -> u64 {
    60
}

fn default_resolver_timeout() -> u64 {
    10
}

fn default_attempts_per_service() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_state_path() -> PathBuf {
    state_root().join("state.json")
}

fn default_log_dir() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/var/log/cfddns")
    }
    #[cfg(windows)]
    {
        PathBuf::from(r"C:\ProgramData\cfddns\logs")
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_files() -> usize {
    7
}

fn state_root() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/var/lib/cfddns")
    }
    #[cfg(windows)]
    {
        PathBuf::from(r"C:\ProgramData\cfddns")
    }
}

impl Settings {
    /// Load and validate settings from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut settings: Settings = toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        if settings.record_name.is_empty() {
            settings.record_name = settings.domain.clone();
        }
        settings.validate()?;

        Ok(settings)
    }

    pub fn config_path() -> PathBuf {
        #[cfg(unix)]
        {
            PathBuf::from("/etc/cfddns/config.toml")
        }
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\ProgramData\cfddns\config.toml")
        }
    }

    /// Configured zone identifier, or `None` when auto-detection is requested.
    pub fn configured_zone_id(&self) -> Option<&str> {
        let id = self.cloudflare.zone_id.trim();
        if id.is_empty() || id.eq_ignore_ascii_case("auto-detect") {
            None
        } else {
            Some(id)
        }
    }

    fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(Error::config("domain must not be empty"));
        }
        if !self.domain.contains('.') {
            return Err(Error::config(format!(
                "domain {:?} is not a fully-qualified name",
                self.domain
            )));
        }
        if self.ip_services.is_empty() {
            return Err(Error::config("ip_services must list at least one endpoint"));
        }
        for service in &self.ip_services {
            if !service.starts_with("http://") && !service.starts_with("https://") {
                return Err(Error::config(format!(
                    "ip service {:?} is not an http(s) URL",
                    service
                )));
            }
        }
        if self.resolver.attempts_per_service == 0 {
            return Err(Error::config(
                "resolver.attempts_per_service must be at least 1",
            ));
        }
        if self.cloudflare.rate_limit_attempts == 0 {
            return Err(Error::config(
                "cloudflare.rate_limit_attempts must be at least 1",
            ));
        }
        if let Some(url) = &self.notification.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::config(format!(
                    "notification.webhook_url {:?} is not an http(s) URL",
                    url
                )));
            }
        }
        Ok(())
    }
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            zone_id: default_zone_id(),
            ttl: default_ttl(),
            timeout_seconds: default_api_timeout(),
            rate_limit_attempts: default_rate_limit_attempts(),
            rate_limit_base_delay_seconds: default_rate_limit_base_delay(),
            rate_limit_max_delay_seconds: default_rate_limit_max_delay(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_resolver_timeout(),
            attempts_per_service: default_attempts_per_service(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            level: default_log_level(),
            max_files: default_log_max_files(),
        }
    }
}

/// Read the API token from the environment.
///
/// Fails with a descriptive error before any network activity when the
/// variable is missing or empty.
pub fn api_token() -> Result<String> {
    match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(Error::config(format!(
            "{} is not set; export the Cloudflare API token before running",
            TOKEN_ENV
        ))),
    }
}
