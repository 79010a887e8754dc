//! Resolution of embed references to direct media URLs
//!
//! The scraping strategy sits behind [`StreamResolver`] so it can be replaced
//! without touching the relay in `streaming_proxy`.

use crate::config::StreamConfig;
use crate::error::{GatewayError, Result};
use crate::models::{StreamReference, StreamTarget};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Marker of the inline script holding the player configuration
const CONFIG_MARKER: &str = "VIDEO_CONFIG";
const CONFIG_ASSIGNMENT: &str = "var VIDEO_CONFIG = ";

/// Turns a stream reference into a playable media URL
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// # Returns
    /// * `Err(GatewayError::InvalidUrl)` if the reference is not an http(s) URL
    /// * `Err(GatewayError::SourceNotFound)` if no playable URL could be extracted
    async fn resolve(&self, reference: &StreamReference) -> Result<StreamTarget>;
}

/// Fetches the embed page and reads `streams[0].play_url` from its inline
/// `VIDEO_CONFIG` script
pub struct EmbedPageResolver {
    http_client: Client,
    embed_base_url: String,
    script_pattern: Regex,
}

impl EmbedPageResolver {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_millis(config.resolve_timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let script_pattern = Regex::new(r"(?is)<script\b[^>]*>(.*?)</script>")
            .map_err(|e| GatewayError::InternalError(format!("Invalid script pattern: {}", e)))?;

        Ok(EmbedPageResolver {
            http_client,
            embed_base_url: config.embed_base_url.clone(),
            script_pattern,
        })
    }

    /// Canonical embed page URL of a reference
    pub fn embed_url(&self, reference: &StreamReference) -> Result<Url> {
        match reference {
            StreamReference::EmbedUrl(raw) => {
                let url = Url::parse(raw)
                    .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", raw, e)))?;
                if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                    return Err(GatewayError::InvalidUrl(format!(
                        "{} is not an http(s) URL",
                        raw
                    )));
                }
                Ok(url)
            }
            StreamReference::Token(token) => {
                let mut url = Url::parse(&self.embed_base_url).map_err(|e| {
                    GatewayError::InvalidUrl(format!("{}: {}", self.embed_base_url, e))
                })?;
                url.query_pairs_mut().append_pair("token", token);
                Ok(url)
            }
        }
    }

    /// Content of the last inline script mentioning `VIDEO_CONFIG`
    pub fn extract_config_script<'a>(&self, html: &'a str) -> Option<&'a str> {
        self.script_pattern
            .captures_iter(html)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|content| content.contains(CONFIG_MARKER))
            .last()
    }
}

/// Parse the first playable URL out of a `VIDEO_CONFIG` script
pub fn parse_play_url(script: &str) -> Result<String> {
    let json = script
        .replacen(CONFIG_ASSIGNMENT, "", 1)
        .trim()
        .trim_end_matches(';')
        .to_string();

    let config: Value = serde_json::from_str(&json).map_err(|e| {
        GatewayError::SourceNotFound(format!("VIDEO_CONFIG is not valid JSON: {}", e))
    })?;

    config
        .get("streams")
        .and_then(|streams| streams.get(0))
        .and_then(|stream| stream.get("play_url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::SourceNotFound("VIDEO_CONFIG has no play_url".to_string()))
}

/// Target of a file on a direct download host, `{base}?export=download&id={id}`
///
/// No page is scraped; the id must look like a file id (letters, digits, `-`, `_`).
pub fn direct_download_target(base_url: &str, id: &str) -> Result<StreamTarget> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(GatewayError::InvalidUrl(format!("invalid file id '{}'", id)));
    }

    let mut url = Url::parse(base_url)
        .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", base_url, e)))?;
    url.query_pairs_mut()
        .append_pair("export", "download")
        .append_pair("id", id);
    let referer_host = host_with_port(&url)
        .ok_or_else(|| GatewayError::InvalidUrl(format!("{} has no host", base_url)))?;

    Ok(StreamTarget {
        source_reference: id.to_string(),
        media_url: url.to_string(),
        referer_host,
        requested_range: None,
    })
}

fn host_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

#[async_trait]
impl StreamResolver for EmbedPageResolver {
    async fn resolve(&self, reference: &StreamReference) -> Result<StreamTarget> {
        let embed_url = self.embed_url(reference)?;
        let referer_host = host_with_port(&embed_url)
            .ok_or_else(|| GatewayError::InvalidUrl(format!("{} has no host", embed_url)))?;

        debug!("Fetching embed page {}", embed_url);
        let page = self
            .http_client
            .get(embed_url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| GatewayError::SourceNotFound(format!("embed page unavailable: {}", e)))?
            .text()
            .await
            .map_err(|e| GatewayError::SourceNotFound(format!("embed page unreadable: {}", e)))?;

        let script = self.extract_config_script(&page).ok_or_else(|| {
            warn!("No {} block in {}", CONFIG_MARKER, embed_url);
            GatewayError::SourceNotFound(format!("no {} block", CONFIG_MARKER))
        })?;

        let media_url = parse_play_url(script)?;
        debug!("Resolved {} to {}", embed_url, media_url);

        Ok(StreamTarget {
            source_reference: embed_url.to_string(),
            media_url,
            referer_host,
            requested_range: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <script src="/player.js"></script>
        <script>var analytics = {};</script>
        <script type="text/javascript">
            var VIDEO_CONFIG = {"thumbnail":"t.jpg","streams":[{"play_url":"https://media.example.com/v.mp4","format_id":18}]}
        </script>
    </head></html>"#;

    fn resolver() -> EmbedPageResolver {
        EmbedPageResolver::new(&StreamConfig::default()).unwrap()
    }

    #[test]
    fn test_extract_and_parse() {
        let resolver = resolver();
        let script = resolver.extract_config_script(PAGE).unwrap();
        assert!(script.starts_with("var VIDEO_CONFIG"));
        assert_eq!(
            parse_play_url(script).unwrap(),
            "https://media.example.com/v.mp4"
        );
    }

    #[test]
    fn test_page_without_config() {
        let resolver = resolver();
        assert!(resolver
            .extract_config_script("<script>var x = 1;</script>")
            .is_none());
    }

    #[test]
    fn test_parse_failures_are_source_not_found() {
        assert!(matches!(
            parse_play_url("var VIDEO_CONFIG = {broken"),
            Err(GatewayError::SourceNotFound(_))
        ));
        assert!(matches!(
            parse_play_url(r#"var VIDEO_CONFIG = {"streams":[]}"#),
            Err(GatewayError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_embed_url_from_token() {
        let url = resolver()
            .embed_url(&StreamReference::Token("AD6v5dy".to_string()))
            .unwrap();
        assert_eq!(url.as_str(), "https://www.blogger.com/video.g?token=AD6v5dy");
    }

    #[test]
    fn test_embed_url_rejects_invalid() {
        let resolver = resolver();
        assert!(matches!(
            resolver.embed_url(&StreamReference::EmbedUrl("not a url".to_string())),
            Err(GatewayError::InvalidUrl(_))
        ));
        assert!(matches!(
            resolver.embed_url(&StreamReference::EmbedUrl("ftp://host/file".to_string())),
            Err(GatewayError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_direct_download_target() {
        let target = direct_download_target("https://docs.google.com/uc", "1AbC-d_9").unwrap();
        assert_eq!(
            target.media_url,
            "https://docs.google.com/uc?export=download&id=1AbC-d_9"
        );
        assert_eq!(target.referer(), "https://docs.google.com");
        assert_eq!(target.source_reference, "1AbC-d_9");
        assert!(target.requested_range.is_none());
    }

    #[test]
    fn test_direct_download_target_rejects_bad_ids() {
        for id in ["", "a/b", "x?y=1", "id&export=view", "%2e%2e"] {
            assert!(matches!(
                direct_download_target("https://docs.google.com/uc", id),
                Err(GatewayError::InvalidUrl(_))
            ));
        }
    }

    #[test]
    fn test_host_with_port() {
        let url = Url::parse("http://127.0.0.1:8080/embed").unwrap();
        assert_eq!(host_with_port(&url).unwrap(), "127.0.0.1:8080");
        let url = Url::parse("https://www.blogger.com/video.g").unwrap();
        assert_eq!(host_with_port(&url).unwrap(), "www.blogger.com");
    }
}
