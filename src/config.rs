//! Configuration management for the content gateway

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variables that override `upstream.override_url`, checked in order
pub const OVERRIDE_URL_ENV_VARS: [&str; 2] = ["UPSTREAM_API_BASE_URL", "API_BASE_URL"];

/// Environment variable selecting the deployment profile
pub const ENVIRONMENT_ENV_VAR: &str = "GATEWAY_ENV";

/// Deployment profile, controls namespace defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Configuration for the whole gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to (default: "0.0.0.0:3001")
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Deployment profile (default: development)
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub ttl: TtlConfig,

    /// Directory holding the static JSON snapshots (default: "apiResponse")
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,

    #[serde(default)]
    pub stream: StreamConfig,

    /// Purge configuration (optional)
    #[serde(default)]
    pub purge: Option<PurgeConfig>,
}

/// Policy of a single cache namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacePolicy {
    /// Default TTL for entries stored without an explicit TTL
    pub ttl_secs: u64,
    /// Maximum number of entries before the oldest one is evicted
    pub max_entries: usize,
}

impl NamespacePolicy {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        NamespacePolicy {
            ttl_secs,
            max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Per-namespace overrides of the profile defaults
    #[serde(default)]
    pub namespaces: HashMap<String, NamespacePolicy>,

    /// Interval of the background expiry sweep, profile default when unset
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

/// Upstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Operator override, wins over every other source
    #[serde(default)]
    pub override_url: Option<String>,

    /// JSON file containing `{ "base_url": "..." }` (default: "endpoint.json")
    #[serde(default = "default_fallback_file")]
    pub fallback_file: String,

    /// Last-resort base URL (default: "http://localhost:3000/v1")
    #[serde(default = "default_upstream_url")]
    pub default_url: String,

    /// Per-attempt timeout in milliseconds (default: 5000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// User agent sent to the upstream API
    #[serde(default = "default_api_user_agent")]
    pub user_agent: String,

    /// Timeout of `/v1/*` pass-through requests in milliseconds (default: 10000)
    #[serde(default = "default_passthrough_timeout_ms")]
    pub passthrough_timeout_ms: u64,
}

/// Retry configuration, fixed for the lifetime of the gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the first retry, doubled for each further retry (default: 300)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit (default: 3)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a probe is allowed (default: 30)
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
}

/// TTLs of the endpoint classes stored in the api namespace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TtlConfig {
    /// Frequently-changing listings (default: 300)
    #[serde(default = "default_volatile_ttl")]
    pub volatile_secs: u64,

    /// Detail pages and archive listings (default: 600)
    #[serde(default = "default_standard_ttl")]
    pub standard_secs: u64,

    /// Static reference data (default: 3600)
    #[serde(default = "default_reference_ttl")]
    pub reference_secs: u64,
}

/// Streaming proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Embed page that tokens are appended to (default: "https://www.blogger.com/video.g")
    #[serde(default = "default_embed_base_url")]
    pub embed_base_url: String,

    /// Timeout for fetching the embed page in milliseconds (default: 10000)
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,

    /// Connect timeout towards media hosts in milliseconds (default: 10000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Longest silence between two reads from a media host in milliseconds (default: 45000)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Download endpoint behind `/gdrive/<id>` (default: "https://docs.google.com/uc")
    #[serde(default = "default_direct_download_url")]
    pub direct_download_url: String,

    /// Browser-like user agent sent to embed pages and media hosts
    #[serde(default = "default_browser_user_agent")]
    pub user_agent: String,

    /// Cache-Control sent to streaming clients
    #[serde(default = "default_stream_cache_control")]
    pub cache_control: String,
}

/// Configuration for cache purge functionality
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurgeConfig {
    /// Whether to enable purge functionality (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Authentication token for purge requests (optional)
    /// If not set, purge requests will not require authentication
    pub auth_token: Option<String>,
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_snapshot_dir() -> String {
    "apiResponse".to_string()
}

fn default_fallback_file() -> String {
    "endpoint.json".to_string()
}

fn default_upstream_url() -> String {
    "http://localhost:3000/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_api_user_agent() -> String {
    "KitaNime/1.0".to_string()
}

fn default_passthrough_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> usize {
    3
}

fn default_backoff_base_ms() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_open_duration_secs() -> u64 {
    30
}

fn default_volatile_ttl() -> u64 {
    300
}

fn default_standard_ttl() -> u64 {
    600
}

fn default_reference_ttl() -> u64 {
    3600
}

fn default_embed_base_url() -> String {
    "https://www.blogger.com/video.g".to_string()
}

fn default_resolve_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    45_000
}

fn default_direct_download_url() -> String {
    "https://docs.google.com/uc".to_string()
}

fn default_browser_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

fn default_stream_cache_control() -> String {
    "public, max-age=3600".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            override_url: None,
            fallback_file: default_fallback_file(),
            default_url: default_upstream_url(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_api_user_agent(),
            passthrough_timeout_ms: default_passthrough_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_secs: default_open_duration_secs(),
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            volatile_secs: default_volatile_ttl(),
            standard_secs: default_standard_ttl(),
            reference_secs: default_reference_ttl(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            embed_base_url: default_embed_base_url(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            direct_download_url: default_direct_download_url(),
            user_agent: default_browser_user_agent(),
            cache_control: default_stream_cache_control(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_address: default_listen_address(),
            environment: Environment::default(),
            cache: CacheConfig::default(),
            upstream: UpstreamConfig::default(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            ttl: TtlConfig::default(),
            snapshot_dir: default_snapshot_dir(),
            stream: StreamConfig::default(),
            purge: None,
        }
    }
}

impl Environment {
    /// Built-in namespace policies of this profile
    pub fn namespace_defaults(&self) -> Vec<(&'static str, NamespacePolicy)> {
        match self {
            Environment::Production => vec![
                ("api", NamespacePolicy::new(900, 2000)),
                ("user", NamespacePolicy::new(3600, 500)),
                ("static", NamespacePolicy::new(7200, 1000)),
            ],
            Environment::Development => vec![
                ("api", NamespacePolicy::new(600, 1000)),
                ("user", NamespacePolicy::new(1800, 200)),
                ("static", NamespacePolicy::new(3600, 500)),
            ],
        }
    }

    /// Default interval of the cache expiry sweep
    pub fn sweep_interval(&self) -> Duration {
        match self {
            Environment::Production => Duration::from_secs(180),
            Environment::Development => Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    ///
    /// Environment overrides are applied before validation.
    ///
    /// # Returns
    /// * `Ok(GatewayConfig)` if loading and validation succeed
    /// * `Err(GatewayError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without validating it
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to parse config file: {}", e))
        })
    }

    /// Apply environment overrides through the given lookup function
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = OVERRIDE_URL_ENV_VARS
            .iter()
            .filter_map(|key| lookup(key))
            .find(|value| value.starts_with("http"))
        {
            self.upstream.override_url = Some(url);
        }

        match lookup(ENVIRONMENT_ENV_VAR).as_deref() {
            Some("production") => self.environment = Environment::Production,
            Some("development") => self.environment = Environment::Development,
            _ => {}
        }
    }

    /// Effective namespace policies: profile defaults merged with overrides
    pub fn namespace_policies(&self) -> Vec<(String, NamespacePolicy)> {
        let mut policies: Vec<(String, NamespacePolicy)> = self
            .environment
            .namespace_defaults()
            .into_iter()
            .map(|(name, policy)| {
                let policy = self.cache.namespaces.get(name).copied().unwrap_or(policy);
                (name.to_string(), policy)
            })
            .collect();

        for (name, policy) in &self.cache.namespaces {
            if !policies.iter().any(|(existing, _)| existing == name) {
                policies.push((name.clone(), *policy));
            }
        }

        policies
    }

    /// Effective cache sweep interval
    pub fn sweep_interval(&self) -> Duration {
        self.cache
            .sweep_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.environment.sweep_interval())
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address must be a socket address
    /// - default_url and override_url must be absolute http(s) URLs
    /// - timeouts, sweep interval, attempt count and breaker threshold must be > 0
    /// - every namespace must allow at least one entry
    pub fn validate(&self) -> Result<()> {
        self.listen_address.parse::<SocketAddr>().map_err(|e| {
            GatewayError::ConfigError(format!(
                "listen_address '{}' is not a socket address: {}",
                self.listen_address, e
            ))
        })?;

        validate_http_url("upstream.default_url", &self.upstream.default_url)?;
        if let Some(url) = &self.upstream.override_url {
            validate_http_url("upstream.override_url", url)?;
        }
        validate_http_url("stream.embed_base_url", &self.stream.embed_base_url)?;
        validate_http_url(
            "stream.direct_download_url",
            &self.stream.direct_download_url,
        )?;

        if self.upstream.request_timeout_ms == 0 || self.upstream.passthrough_timeout_ms == 0 {
            return Err(GatewayError::ConfigError(
                "upstream timeouts must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(GatewayError::ConfigError(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(GatewayError::ConfigError(
                "breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.stream.resolve_timeout_ms == 0
            || self.stream.connect_timeout_ms == 0
            || self.stream.read_timeout_ms == 0
        {
            return Err(GatewayError::ConfigError(
                "stream timeouts must be greater than 0".to_string(),
            ));
        }

        if self.cache.sweep_interval_secs == Some(0) {
            return Err(GatewayError::ConfigError(
                "cache.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }

        for (name, policy) in self.namespace_policies() {
            if policy.max_entries == 0 {
                return Err(GatewayError::ConfigError(format!(
                    "cache namespace '{}' must allow at least one entry",
                    name
                )));
            }
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value).map_err(|e| {
        GatewayError::ConfigError(format!("{} '{}' is not a valid URL: {}", field, value, e))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(GatewayError::ConfigError(format!(
            "{} must use http or https, got '{}'",
            field, other
        ))),
    }
}
