//! Byte-range media streaming proxy
//!
//! Resolves a stream reference through a [`StreamResolver`] and relays the
//! media host's body to the client chunk by chunk. The inbound `Range` header
//! is forwarded verbatim and the host's status and range headers are mirrored.
//!
//! Direct download ids skip resolution and are relayed the same way.
//!
//! Dropping the response body (client gone) drops the upstream byte stream,
//! which closes the outbound connection.

use crate::config::StreamConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::models::{ContentRange, StreamReference, StreamTarget};
use crate::stream_resolver::{direct_download_target, StreamResolver};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame};
use reqwest::Client;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Body type of every response produced by the service
pub type ResponseBody = UnsyncBoxBody<Bytes, GatewayError>;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

const DEFAULT_CONTENT_TYPE: &str = "video/mp4";
const MEDIA_ACCEPT: &str = "video/mp4,video/*,*/*;q=0.9";

/// Headers copied unchanged from the media host
static MIRRORED_HEADERS: [HeaderName; 5] = [
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::ETAG,
];

/// Wrap a complete buffer as a response body
pub fn full_body<T: Into<Bytes>>(chunk: T) -> ResponseBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// JSON response with the given status
pub fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(value.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Add the CORS headers streaming clients rely on
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range, Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Range, Accept-Ranges, Content-Length"),
    );
}

/// Error response of the streaming endpoint
///
/// Only used before any media byte is sent; afterwards the status is fixed.
pub fn stream_error_response(error: &GatewayError) -> Response<ResponseBody> {
    let status =
        StatusCode::from_u16(error.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match error {
        GatewayError::SourceNotFound(_) => serde_json::json!({ "error": "Video source not found" }),
        GatewayError::InvalidUrl(_) => serde_json::json!({ "error": "Invalid URL format" }),
        GatewayError::MissingParameter(_) => {
            serde_json::json!({ "error": "URL parameter is required" })
        }
        other => serde_json::json!({
            "error": "Failed to stream video",
            "message": other.to_string(),
            "status": status.as_u16(),
        }),
    };
    let mut response = json_response(status, &body);
    apply_cors_headers(response.headers_mut());
    response
}

/// Response body relaying the media host's byte stream
///
/// Counts relayed bytes; a body dropped before the host finished is a client
/// disconnect.
struct RelayBody {
    inner: ByteStream,
    media_host: String,
    relayed: u64,
    finished: bool,
    started: Instant,
    metrics: Arc<GatewayMetrics>,
}

impl Body for RelayBody {
    type Data = Bytes;
    type Error = GatewayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, GatewayError>>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let len = chunk.len() as u64;
                this.relayed += len;
                this.metrics.record_bytes_relayed(len);
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                warn!(
                    "Media stream from {} failed after {} bytes: {}",
                    this.media_host, this.relayed, e
                );
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                info!(
                    "Stream from {} completed in {:?} ({} bytes)",
                    this.media_host,
                    this.started.elapsed(),
                    this.relayed
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }
}

impl Drop for RelayBody {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                "Client disconnected from stream after {} bytes, aborting {}",
                self.relayed, self.media_host
            );
            self.metrics.record_client_disconnect();
        }
    }
}

/// Relays media bytes from a resolved target
pub struct MediaStreamer {
    http_client: Client,
    cache_control: HeaderValue,
    direct_download_url: String,
    metrics: Arc<GatewayMetrics>,
}

impl MediaStreamer {
    /// Build the media client
    ///
    /// There is no total timeout, so long streams are never cut; a host that
    /// stays silent for longer than `read_timeout_ms` fails the stream instead.
    pub fn new(config: &StreamConfig, metrics: Arc<GatewayMetrics>) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .read_timeout(Duration::from_millis(config.read_timeout_ms))
            .user_agent(config.user_agent.clone())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let cache_control = HeaderValue::from_str(&config.cache_control).map_err(|e| {
            GatewayError::ConfigError(format!("Invalid stream cache_control: {}", e))
        })?;

        Ok(MediaStreamer {
            http_client,
            cache_control,
            direct_download_url: config.direct_download_url.clone(),
            metrics,
        })
    }

    /// Build the outbound request; `Range` is only set when the client sent one
    pub fn build_request(&self, target: &StreamTarget) -> reqwest::RequestBuilder {
        let mut request = self
            .http_client
            .get(&target.media_url)
            .header(header::ACCEPT, MEDIA_ACCEPT)
            .header(header::ACCEPT_ENCODING, "identity")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::PRAGMA, "no-cache")
            .header(header::REFERER, target.referer());

        if let Some(range) = target
            .requested_range
            .as_ref()
            .filter(|value| !value.is_empty())
        {
            request = request.header(header::RANGE, range.clone());
        }
        request
    }

    /// Open the media stream and build the client response
    ///
    /// # Returns
    /// * `Ok(Response)` with status 200 or 206 and a streaming body
    /// * `Err(GatewayError)` if the host is unreachable or answers with an error status
    pub async fn stream(&self, target: &StreamTarget) -> Result<Response<ResponseBody>> {
        let media_host = reqwest::Url::parse(&target.media_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default();
        info!("Streaming from: {}", media_host);

        let upstream = self.build_request(target).send().await?;
        let status = upstream.status();
        if !status.is_success() {
            return Err(GatewayError::from_http_status(
                status.as_u16(),
                format!("media host {} answered {}", media_host, status),
            ));
        }

        let mut response = Response::new(full_body(Bytes::new()));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for name in MIRRORED_HEADERS.iter() {
            if let Some(value) = upstream.headers().get(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
            );
        }
        if headers.contains_key(header::CONTENT_LENGTH) && !headers.contains_key(header::ACCEPT_RANGES)
        {
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
        headers.insert(header::CACHE_CONTROL, self.cache_control.clone());
        apply_cors_headers(headers);

        if let Some(content_range) = headers
            .get(header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
        {
            match ContentRange::from_header(content_range) {
                Ok(range) => debug!(
                    "Relaying {} bytes ({}) from {}",
                    range.size(),
                    range.to_header(),
                    media_host
                ),
                Err(e) => debug!("Unparsable Content-Range from {}: {}", media_host, e),
            }
        }

        let body = RelayBody {
            inner: Box::pin(upstream.bytes_stream().map_err(GatewayError::from)),
            media_host,
            relayed: 0,
            finished: false,
            started: Instant::now(),
            metrics: Arc::clone(&self.metrics),
        };
        *response.body_mut() = UnsyncBoxBody::new(body);

        Ok(response)
    }
}

/// Resolver and streamer combined behind the `/stream` endpoint
pub struct StreamingProxy {
    resolver: Arc<dyn StreamResolver>,
    streamer: MediaStreamer,
    metrics: Arc<GatewayMetrics>,
}

impl StreamingProxy {
    pub fn new(
        resolver: Arc<dyn StreamResolver>,
        streamer: MediaStreamer,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        StreamingProxy {
            resolver,
            streamer,
            metrics,
        }
    }

    /// Resolve a reference to its streaming target
    pub async fn resolve_stream_target(&self, reference: &StreamReference) -> Result<StreamTarget> {
        self.resolver.resolve(reference).await
    }

    /// Serve a streaming request end to end
    ///
    /// Resolution failures become 404 without contacting any media host.
    pub async fn handle(
        &self,
        reference: &StreamReference,
        range: Option<&HeaderValue>,
    ) -> Response<ResponseBody> {
        self.metrics.record_stream_request();

        let target = match self.resolve_stream_target(reference).await {
            Ok(target) => target.with_range(range),
            Err(e) => {
                if matches!(e, GatewayError::SourceNotFound(_)) {
                    self.metrics.record_resolution_failure();
                }
                warn!("Stream resolution failed for {:?}: {}", reference, e);
                return stream_error_response(&e);
            }
        };

        self.relay(&target).await
    }

    /// Serve a file from the direct download host by its id
    pub async fn handle_direct(
        &self,
        id: &str,
        range: Option<&HeaderValue>,
    ) -> Response<ResponseBody> {
        self.metrics.record_stream_request();

        let target = match direct_download_target(&self.streamer.direct_download_url, id) {
            Ok(target) => target.with_range(range),
            Err(e) => {
                warn!("Rejected direct download id {:?}: {}", id, e);
                return stream_error_response(&e);
            }
        };

        self.relay(&target).await
    }

    async fn relay(&self, target: &StreamTarget) -> Response<ResponseBody> {
        match self.streamer.stream(target).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Stream error for {}: {}", target.media_url, e);
                self.metrics.record_stream_error();
                stream_error_response(&e)
            }
        }
    }
}
