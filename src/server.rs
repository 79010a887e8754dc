//! Inbound HTTP surface
//!
//! Routes:
//! - `GET /stream?url=<embed url>` or `GET /stream?token=<token>` - media relay
//! - `OPTIONS /stream` - CORS preflight
//! - `GET /gdrive/<id>` - media relay of a direct download file
//! - `GET /api/<endpoint>?<params>` - gateway fetch, always 200
//! - `GET /v1/<path>` - raw pass-through to the resolved upstream
//! - `GET /health` - liveness with breaker and cache state
//! - `GET /health/upstream` - upstream connectivity probe
//! - `GET /stats` - cache, breaker and counters as JSON
//! - `GET /metrics` - Prometheus text
//! - `PURGE /<pattern>` - cache invalidation

use crate::circuit_breaker::CircuitState;
use crate::endpoints::LogicalEndpoint;
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::metrics_endpoint::{format_prometheus_metrics, PROMETHEUS_CONTENT_TYPE};
use crate::models::StreamReference;
use crate::purge_handler::PurgeHandler;
use crate::purge_metrics::PurgeMetrics;
use crate::streaming_proxy::{
    apply_cors_headers, full_body, json_response, stream_error_response, ResponseBody,
    StreamingProxy,
};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

/// Health status of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Upstream reachable as far as the breaker knows, cache working
    Healthy,
    /// Breaker open; requests are answered from cache and snapshots
    Degraded,
    /// Cache probe failed
    Unhealthy,
}

impl HealthStatus {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Split a query string into decoded parameters; later duplicates win
pub fn query_params(query: Option<&str>) -> HashMap<String, String> {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return HashMap::new();
    };
    form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

/// Read the stream reference from `/stream` parameters
///
/// `url` and `token` are mutually exclusive.
pub fn stream_reference(params: &HashMap<String, String>) -> Result<StreamReference> {
    let url = params.get("url").filter(|v| !v.is_empty());
    let token = params.get("token").filter(|v| !v.is_empty());
    match (url, token) {
        (Some(_), Some(_)) => Err(GatewayError::ParseError(
            "url and token parameters are mutually exclusive".to_string(),
        )),
        (Some(url), None) => Ok(StreamReference::EmbedUrl(url.clone())),
        (None, Some(token)) => Ok(StreamReference::Token(token.clone())),
        (None, None) => Err(GatewayError::MissingParameter("url")),
    }
}

/// Prefix of the direct download relay
const DIRECT_DOWNLOAD_PREFIX: &str = "/gdrive/";
/// Prefix of the upstream pass-through; stripped before forwarding
const PASSTHROUGH_PREFIX: &str = "/v1";

/// HTTP front end of the gateway and the streaming proxy
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    streaming: StreamingProxy,
    purge: Option<PurgeHandler>,
    purge_metrics: Option<Arc<PurgeMetrics>>,
}

impl GatewayServer {
    pub fn new(gateway: Arc<Gateway>, streaming: StreamingProxy) -> Self {
        GatewayServer {
            gateway,
            streaming,
            purge: None,
            purge_metrics: None,
        }
    }

    /// Enable the PURGE method; its counters are appended to `/metrics`
    pub fn with_purge(mut self, handler: PurgeHandler, metrics: Arc<PurgeMetrics>) -> Self {
        self.purge = Some(handler.with_metrics(Arc::clone(&metrics)));
        self.purge_metrics = Some(metrics);
        self
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Bind `addr` and serve until the listener fails
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`, one task per connection
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("Content gateway listening on http://{}", local_addr);
        info!("  GET  /stream        - Media relay");
        info!("  GET  /gdrive/<id>   - Direct download relay");
        info!("  GET  /api/<name>    - Upstream API");
        info!("  GET  /v1/<path>     - Upstream pass-through");
        info!("  GET  /health        - Health status");
        info!("  GET  /stats         - JSON statistics");
        info!("  GET  /metrics       - Prometheus metrics");
        if self.purge.is_some() {
            info!("  PURGE /<pattern>    - Cache invalidation");
        }

        let server = Arc::new(self);
        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&server);

            tokio::task::spawn(async move {
                let result = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req: Request<Incoming>| {
                            let server = Arc::clone(&server);
                            async move { Ok::<_, Infallible>(server.handle(req).await) }
                        }),
                    )
                    .await;

                if let Err(err) = result {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }

    /// Route one request
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody> {
        debug!("{} {}", req.method(), req.uri());

        if PurgeHandler::is_purge(req.method()) {
            return self.handle_purge(req).await;
        }

        let (parts, _) = req.into_parts();
        match (&parts.method, parts.uri.path()) {
            (&Method::GET, "/stream") => self.handle_stream(&parts).await,
            (&Method::GET, path) if path.starts_with(DIRECT_DOWNLOAD_PREFIX) => {
                self.streaming
                    .handle_direct(
                        &path[DIRECT_DOWNLOAD_PREFIX.len()..],
                        parts.headers.get(header::RANGE),
                    )
                    .await
            }
            (&Method::OPTIONS, path)
                if path == "/stream" || path.starts_with(DIRECT_DOWNLOAD_PREFIX) =>
            {
                let mut response = Response::new(full_body(""));
                *response.status_mut() = StatusCode::NO_CONTENT;
                apply_cors_headers(response.headers_mut());
                response
            }
            (&Method::GET, "/health") => self.handle_health(),
            (&Method::GET, "/health/upstream") => {
                let report = self.gateway.check_connectivity().await;
                let status = if report.ok {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                json_response(status, &json!(report))
            }
            (&Method::GET, "/stats") => self.handle_stats(),
            (&Method::GET, "/metrics") => self.handle_metrics(),
            (&Method::GET, path) if path.starts_with("/api/") => {
                self.handle_api(&path["/api/".len()..], parts.uri.query())
                    .await
            }
            (&Method::GET, path) if path.starts_with("/v1/") => {
                self.handle_passthrough(&parts).await
            }
            _ => json_response(StatusCode::NOT_FOUND, &json!({ "error": "Not found" })),
        }
    }

    async fn handle_stream(&self, parts: &Parts) -> Response<ResponseBody> {
        let params = query_params(parts.uri.query());
        let reference = match stream_reference(&params) {
            Ok(reference) => reference,
            Err(e) => return stream_error_response(&e),
        };
        self.streaming
            .handle(&reference, parts.headers.get(header::RANGE))
            .await
    }

    async fn handle_api(&self, name: &str, query: Option<&str>) -> Response<ResponseBody> {
        let endpoint: LogicalEndpoint = match name.trim_end_matches('/').parse() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                return json_response(StatusCode::BAD_REQUEST, &json!({ "error": e.to_string() }))
            }
        };

        let params = query_params(query);
        let response = self.gateway.fetch(endpoint, &params).await;
        let source = response.source();
        let body = json!({
            "source": source,
            "data": response.into_payload(),
        });
        json_response(StatusCode::OK, &body)
    }

    /// Relay `/v1/<path>` to the upstream; non-2xx answers keep their status
    async fn handle_passthrough(&self, parts: &Parts) -> Response<ResponseBody> {
        let path = &parts.uri.path()[PASSTHROUGH_PREFIX.len()..];
        let accept = parts
            .headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/json");

        match self.gateway.passthrough(path, parts.uri.query(), accept).await {
            Ok(upstream) if upstream.is_success() => {
                let content_type = upstream
                    .content_type
                    .as_deref()
                    .and_then(|value| HeaderValue::from_str(value).ok())
                    .unwrap_or_else(|| HeaderValue::from_static("application/json"));
                let mut response = Response::new(full_body(upstream.body));
                *response.status_mut() =
                    StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, content_type);
                response
            }
            Ok(upstream) => {
                let status =
                    StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
                let message = serde_json::from_slice::<Value>(&upstream.body).unwrap_or_else(
                    |_| Value::String(String::from_utf8_lossy(&upstream.body).into_owned()),
                );
                json_response(
                    status,
                    &json!({
                        "ok": false,
                        "upstream": true,
                        "status": status.as_u16(),
                        "message": message,
                    }),
                )
            }
            Err(e @ GatewayError::InvalidUrl(_)) => {
                json_response(StatusCode::BAD_REQUEST, &json!({ "error": e.to_string() }))
            }
            Err(e) => {
                warn!("Pass-through request for {} failed: {}", path, e);
                json_response(
                    StatusCode::BAD_GATEWAY,
                    &json!({
                        "ok": false,
                        "upstream": true,
                        "status": StatusCode::BAD_GATEWAY.as_u16(),
                        "message": { "error": "Upstream request failed" },
                    }),
                )
            }
        }
    }

    fn health_status(&self) -> (HealthStatus, bool) {
        let cache_ok = self.gateway.cache().health_check();
        let status = if !cache_ok {
            HealthStatus::Unhealthy
        } else if self.gateway.breaker().state() == CircuitState::Open {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        (status, cache_ok)
    }

    fn handle_health(&self) -> Response<ResponseBody> {
        let (status, cache_ok) = self.health_status();
        let body = json!({
            "status": status.as_str(),
            "circuit": self.gateway.breaker().state().as_str(),
            "cache_ok": cache_ok,
        });
        json_response(status.to_status_code(), &body)
    }

    fn handle_stats(&self) -> Response<ResponseBody> {
        let body = json!({
            "cache": self.gateway.cache().stats(),
            "breaker": self.gateway.breaker().snapshot(),
            "metrics": self.gateway.metrics().get_stats(),
        });
        json_response(StatusCode::OK, &body)
    }

    fn handle_metrics(&self) -> Response<ResponseBody> {
        let mut text = format_prometheus_metrics(
            &self.gateway.metrics().get_stats(),
            &self.gateway.cache().stats(),
            &self.gateway.breaker().snapshot(),
        );
        if let Some(purge_metrics) = &self.purge_metrics {
            match purge_metrics.render() {
                Ok(purge_text) => text.push_str(&purge_text),
                Err(e) => error!("Failed to render purge metrics: {}", e),
            }
        }

        let mut response = Response::new(full_body(text));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        );
        response
    }

    async fn handle_purge<B>(&self, req: Request<B>) -> Response<ResponseBody> {
        let Some(handler) = &self.purge else {
            return json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &json!({ "error": "Cache purge is disabled" }),
            );
        };

        match handler.handle_purge(req).await {
            Ok(response) => response.map(|body| body.map_err(|never| match never {}).boxed_unsync()),
            Err(e) => {
                error!("Purge request failed: {}", e);
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "error": e.to_string() }),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_decoding() {
        let params = query_params(Some("keyword=one%20piece&page=2"));
        assert_eq!(params.get("keyword").unwrap(), "one piece");
        assert_eq!(params.get("page").unwrap(), "2");
        assert!(query_params(None).is_empty());
        assert!(query_params(Some("")).is_empty());
    }

    #[test]
    fn test_stream_reference_selection() {
        let mut params = HashMap::new();
        assert!(matches!(
            stream_reference(&params),
            Err(GatewayError::MissingParameter(_))
        ));

        params.insert("token".to_string(), "abc".to_string());
        assert_eq!(
            stream_reference(&params).unwrap(),
            StreamReference::Token("abc".to_string())
        );

        params.insert(
            "url".to_string(),
            "https://www.blogger.com/video.g?token=abc".to_string(),
        );
        assert!(stream_reference(&params).is_err());

        params.remove("token");
        assert!(matches!(
            stream_reference(&params).unwrap(),
            StreamReference::EmbedUrl(_)
        ));
    }

    #[test]
    fn test_health_status_codes() {
        assert_eq!(HealthStatus::Healthy.to_status_code(), StatusCode::OK);
        assert_eq!(HealthStatus::Degraded.to_status_code(), StatusCode::OK);
        assert_eq!(
            HealthStatus::Unhealthy.to_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(HealthStatus::Degraded.as_str(), "degraded");
    }
}
