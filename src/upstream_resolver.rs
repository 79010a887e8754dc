//! Upstream base URL resolution
//!
//! The base URL is resolved fresh for every live request, from the first source
//! in this chain that yields an absolute http(s) URL:
//! 1. operator override
//! 2. active endpoint reported by the configuration store
//! 3. `base_url` from the fallback file
//! 4. hardcoded default
//!
//! Resolution never fails: an unavailable store or an unreadable file falls through.

use crate::config::UpstreamConfig;
use crate::error::{GatewayError, Result};
use crate::models::{EndpointSource, UpstreamEndpoint};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Upper bound on a single configuration store lookup
const STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Read-only view of the external configuration store
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// URL of the currently active upstream API endpoint, if one is configured
    async fn active_endpoint(&self) -> Result<Option<String>>;

    /// Feature toggle or other named setting
    async fn setting(&self, key: &str) -> Result<Option<String>>;
}

/// In-process configuration store
///
/// Used by the binary when no external store is wired in, and by tests to
/// simulate an unavailable store.
#[derive(Default)]
pub struct InMemoryConfigStore {
    active_endpoint: RwLock<Option<String>>,
    settings: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_active_endpoint(&self, url: Option<String>) {
        *self.active_endpoint.write().await = url;
    }

    pub async fn set_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.write().await.insert(key.into(), value.into());
    }

    /// Make every lookup fail until set back to `true`
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(GatewayError::Connection(
                "configuration store unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn active_endpoint(&self) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.active_endpoint.read().await.clone())
    }

    async fn setting(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.settings.read().await.get(key).cloned())
    }
}

#[derive(Deserialize)]
struct FallbackFile {
    base_url: Option<String>,
}

/// Resolves the upstream base URL from its priority chain
pub struct UpstreamResolver {
    override_url: Option<String>,
    store: Option<Arc<dyn ConfigStore>>,
    fallback_file: PathBuf,
    default_url: String,
}

impl UpstreamResolver {
    /// Create a resolver from the upstream configuration
    pub fn new(config: &UpstreamConfig, store: Option<Arc<dyn ConfigStore>>) -> Self {
        UpstreamResolver {
            override_url: config.override_url.clone(),
            store,
            fallback_file: PathBuf::from(&config.fallback_file),
            default_url: normalize_base_url(&config.default_url)
                .unwrap_or_else(|| config.default_url.trim_end_matches('/').to_string()),
        }
    }

    /// Resolve the base URL string
    pub async fn resolve_base_url(&self) -> String {
        self.resolve().await.url
    }

    /// Resolve the base URL along with the source that produced it
    pub async fn resolve(&self) -> UpstreamEndpoint {
        if let Some(url) = self.override_url.as_deref().and_then(normalize_base_url) {
            debug!("Upstream resolved from override: {}", url);
            return UpstreamEndpoint::new(url, EndpointSource::Override);
        }

        if let Some(url) = self.from_store().await {
            debug!("Upstream resolved from configuration store: {}", url);
            return UpstreamEndpoint::new(url, EndpointSource::Persisted);
        }

        if let Some(url) = self.from_fallback_file().await {
            debug!("Upstream resolved from fallback file: {}", url);
            return UpstreamEndpoint::new(url, EndpointSource::FallbackFile);
        }

        debug!("Upstream resolved to default: {}", self.default_url);
        UpstreamEndpoint::new(self.default_url.clone(), EndpointSource::Default)
    }

    async fn from_store(&self) -> Option<String> {
        let store = self.store.as_ref()?;
        match tokio::time::timeout(STORE_TIMEOUT, store.active_endpoint()).await {
            Ok(Ok(Some(url))) => {
                let normalized = normalize_base_url(&url);
                if normalized.is_none() {
                    warn!("Ignoring invalid active endpoint from store: {}", url);
                }
                normalized
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!("Configuration store unavailable, falling through: {}", e);
                None
            }
            Err(_) => {
                warn!("Configuration store lookup timed out after {:?}", STORE_TIMEOUT);
                None
            }
        }
    }

    async fn from_fallback_file(&self) -> Option<String> {
        let content = match tokio::fs::read_to_string(&self.fallback_file).await {
            Ok(content) => content,
            Err(e) => {
                debug!(
                    "Could not read fallback file {:?}: {}",
                    self.fallback_file, e
                );
                return None;
            }
        };

        match serde_json::from_str::<FallbackFile>(&content) {
            Ok(file) => file.base_url.as_deref().and_then(normalize_base_url),
            Err(e) => {
                warn!("Invalid fallback file {:?}: {}", self.fallback_file, e);
                None
            }
        }
    }
}

/// Accept an absolute http(s) URL and strip its trailing slash
pub fn normalize_base_url(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    let url = reqwest::Url::parse(candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(candidate.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(override_url: Option<&str>, fallback_file: &str) -> UpstreamConfig {
        UpstreamConfig {
            override_url: override_url.map(str::to_string),
            fallback_file: fallback_file.to_string(),
            ..UpstreamConfig::default()
        }
    }

    fn fallback_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.example.com/v1/"),
            Some("https://api.example.com/v1".to_string())
        );
        assert_eq!(normalize_base_url("ftp://example.com"), None);
        assert_eq!(normalize_base_url("not a url"), None);
        assert_eq!(normalize_base_url(""), None);
    }

    #[tokio::test]
    async fn test_override_wins() {
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .set_active_endpoint(Some("https://db.example.com".to_string()))
            .await;
        let resolver = UpstreamResolver::new(
            &config(Some("https://override.example.com/"), "/nonexistent.json"),
            Some(store),
        );

        let endpoint = resolver.resolve().await;
        assert_eq!(endpoint.url, "https://override.example.com");
        assert_eq!(endpoint.source, EndpointSource::Override);
    }

    #[tokio::test]
    async fn test_store_before_fallback_file() {
        let file = fallback_file(r#"{"base_url": "https://file.example.com"}"#);
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .set_active_endpoint(Some("https://db.example.com/v1".to_string()))
            .await;
        let resolver = UpstreamResolver::new(
            &config(None, file.path().to_str().unwrap()),
            Some(store),
        );

        let endpoint = resolver.resolve().await;
        assert_eq!(endpoint.url, "https://db.example.com/v1");
        assert_eq!(endpoint.source, EndpointSource::Persisted);
    }

    #[tokio::test]
    async fn test_unavailable_store_falls_through_to_file() {
        let file = fallback_file(r#"{"base_url": "https://file.example.com/"}"#);
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .set_active_endpoint(Some("https://db.example.com".to_string()))
            .await;
        store.set_available(false);
        let resolver = UpstreamResolver::new(
            &config(None, file.path().to_str().unwrap()),
            Some(store),
        );

        let endpoint = resolver.resolve().await;
        assert_eq!(endpoint.url, "https://file.example.com");
        assert_eq!(endpoint.source, EndpointSource::FallbackFile);
    }

    #[tokio::test]
    async fn test_invalid_sources_fall_back_to_default() {
        let file = fallback_file(r#"{"base_url": "localhost:3000"}"#);
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .set_active_endpoint(Some("not-a-url".to_string()))
            .await;
        let resolver = UpstreamResolver::new(
            &config(Some("also bad"), file.path().to_str().unwrap()),
            Some(store),
        );

        let endpoint = resolver.resolve().await;
        assert_eq!(endpoint.url, "http://localhost:3000/v1");
        assert_eq!(endpoint.source, EndpointSource::Default);
    }

    #[tokio::test]
    async fn test_missing_file_and_store() {
        let resolver = UpstreamResolver::new(&config(None, "/nonexistent/endpoint.json"), None);
        assert_eq!(resolver.resolve_base_url().await, "http://localhost:3000/v1");
    }

    #[tokio::test]
    async fn test_store_settings() {
        let store = InMemoryConfigStore::new();
        store.set_setting("site_title", "KitaNime").await;
        assert_eq!(
            store.setting("site_title").await.unwrap().as_deref(),
            Some("KitaNime")
        );
        store.set_available(false);
        assert!(store.setting("site_title").await.is_err());
    }
}
