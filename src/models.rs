//! Core data models shared by the gateway and the streaming proxy

use crate::error::{GatewayError, Result};
use http::HeaderValue;
use serde::{Deserialize, Serialize};

/// Where an upstream base URL came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSource {
    /// Operator-supplied override (config file or environment)
    Override,
    /// Active endpoint reported by the configuration store
    Persisted,
    /// `base_url` read from the fallback file shipped with the deployment
    FallbackFile,
    /// Hardcoded default
    Default,
}

impl EndpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointSource::Override => "override",
            EndpointSource::Persisted => "persisted",
            EndpointSource::FallbackFile => "fallback_file",
            EndpointSource::Default => "default",
        }
    }
}

/// A resolved upstream base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamEndpoint {
    /// Absolute base URL without a trailing slash
    pub url: String,
    /// Whether this endpoint is the one requests are currently sent to
    pub is_active: bool,
    /// Which link of the priority chain produced the URL
    pub source: EndpointSource,
}

impl UpstreamEndpoint {
    pub fn new(url: impl Into<String>, source: EndpointSource) -> Self {
        UpstreamEndpoint {
            url: url.into(),
            is_active: true,
            source,
        }
    }
}

/// Indirect reference to a video supplied by a streaming caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamReference {
    /// URL of an embed page
    EmbedUrl(String),
    /// Host token that is turned into a canonical embed URL first
    Token(String),
}

/// A resolved, request-scoped streaming target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// The embed page the media URL was extracted from
    pub source_reference: String,
    /// Direct media URL
    pub media_url: String,
    /// Host sent back in the `Referer` header for hotlink protection
    pub referer_host: String,
    /// Client `Range` header, forwarded verbatim to the media host
    pub requested_range: Option<HeaderValue>,
}

impl StreamTarget {
    /// Attach the client's `Range` header; an empty value counts as absent
    pub fn with_range(mut self, range: Option<&HeaderValue>) -> Self {
        self.requested_range = range.filter(|value| !value.is_empty()).cloned();
        self
    }

    /// Value of the `Referer` header for requests to the media host
    pub fn referer(&self) -> String {
        format!("https://{}", self.referer_host)
    }
}

/// Parsed `Content-Range: bytes start-end/total` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
    /// Full resource size, `None` when the host sent `*`
    pub total: Option<u64>,
}

impl ContentRange {
    /// Create a new ContentRange
    ///
    /// # Returns
    /// * `Ok(ContentRange)` if the range is valid
    /// * `Err(GatewayError)` if start > end or end is beyond the total size
    pub fn new(start: u64, end: u64, total: Option<u64>) -> Result<Self> {
        if start > end {
            return Err(GatewayError::InvalidRange(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        if let Some(total) = total {
            if end >= total {
                return Err(GatewayError::InvalidRange(format!(
                    "end ({}) must be < total ({})",
                    end, total
                )));
            }
        }
        Ok(ContentRange { start, end, total })
    }

    /// Number of bytes covered by this range
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Parse a Content-Range header value (e.g. "bytes 0-1023/10240")
    pub fn from_header(header: &str) -> Result<Self> {
        let header = header.trim();

        let range_part = header.strip_prefix("bytes ").ok_or_else(|| {
            GatewayError::ParseError(format!(
                "Content-Range must start with 'bytes ', got: {}",
                header
            ))
        })?;

        let (range_str, total_str) = range_part.split_once('/').ok_or_else(|| {
            GatewayError::ParseError(format!(
                "Invalid Content-Range format, expected 'start-end/total', got: {}",
                range_part
            ))
        })?;

        let (start_str, end_str) = range_str.split_once('-').ok_or_else(|| {
            GatewayError::ParseError(format!("Invalid range format in Content-Range: {}", range_str))
        })?;

        let start = start_str
            .trim()
            .parse::<u64>()
            .map_err(|e| GatewayError::ParseError(format!("Invalid start value: {}", e)))?;
        let end = end_str
            .trim()
            .parse::<u64>()
            .map_err(|e| GatewayError::ParseError(format!("Invalid end value: {}", e)))?;

        let total = match total_str.trim() {
            "*" => None,
            value => Some(
                value
                    .parse::<u64>()
                    .map_err(|e| GatewayError::ParseError(format!("Invalid total value: {}", e)))?,
            ),
        };

        ContentRange::new(start, end, total)
    }

    /// Convert back to a Content-Range header value
    pub fn to_header(&self) -> String {
        match self.total {
            Some(total) => format!("bytes {}-{}/{}", self.start, self.end, total),
            None => format!("bytes {}-{}/*", self.start, self.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_from_header() {
        let range = ContentRange::from_header("bytes 1000-1999/5000").unwrap();
        assert_eq!(range.start, 1000);
        assert_eq!(range.end, 1999);
        assert_eq!(range.total, Some(5000));
        assert_eq!(range.size(), 1000);
    }

    #[test]
    fn test_content_range_unknown_total() {
        let range = ContentRange::from_header("bytes 0-99/*").unwrap();
        assert_eq!(range.total, None);
        assert_eq!(range.to_header(), "bytes 0-99/*");
    }

    #[test]
    fn test_content_range_invalid() {
        assert!(ContentRange::from_header("invalid").is_err());
        assert!(ContentRange::from_header("bytes 10-5/100").is_err());
        assert!(ContentRange::from_header("bytes 0-100/100").is_err());
    }

    #[test]
    fn test_stream_target_referer() {
        let target = StreamTarget {
            source_reference: "https://www.blogger.com/video.g?token=abc".to_string(),
            media_url: "https://media.example.com/v.mp4".to_string(),
            referer_host: "www.blogger.com".to_string(),
            requested_range: None,
        };
        assert_eq!(target.referer(), "https://www.blogger.com");

        let range = HeaderValue::from_static("bytes=0-99");
        let target = target.with_range(Some(&range));
        assert_eq!(target.requested_range, Some(range));

        let empty = HeaderValue::from_static("");
        assert!(target.with_range(Some(&empty)).requested_range.is_none());
    }
}
