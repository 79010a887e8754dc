// Integration tests for the media streaming proxy
//
// One wiremock server plays both the embed page host and the media host.

use content_gateway::{
    EmbedPageResolver, GatewayMetrics, MediaStreamer, StreamConfig, StreamReference,
    StreamingProxy,
};
use http::header::{self, HeaderValue};
use http::StatusCode;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{header as header_matcher, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOTAL_SIZE: usize = 5000;

fn embed_page(play_url: &str) -> String {
    format!(
        r#"<html><body>
        <script>var analytics = {{}};</script>
        <script>var VIDEO_CONFIG = {{"streams":[{{"play_url":"{}","format_id":22}}]}};</script>
        </body></html>"#,
        play_url
    )
}

fn media_bytes() -> Vec<u8> {
    (0..TOTAL_SIZE).map(|i| (i % 251) as u8).collect()
}

fn stream_config(server: &MockServer) -> StreamConfig {
    StreamConfig {
        embed_base_url: format!("{}/video.g", server.uri()),
        direct_download_url: format!("{}/uc", server.uri()),
        ..StreamConfig::default()
    }
}

fn build_proxy(server: &MockServer, metrics: Arc<GatewayMetrics>) -> StreamingProxy {
    build_proxy_with(stream_config(server), metrics)
}

fn build_proxy_with(config: StreamConfig, metrics: Arc<GatewayMetrics>) -> StreamingProxy {
    let resolver = EmbedPageResolver::new(&config).unwrap();
    let streamer = MediaStreamer::new(&config, Arc::clone(&metrics)).unwrap();
    StreamingProxy::new(Arc::new(resolver), streamer, metrics)
}

async fn mount_embed_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/video.g"))
        .and(query_param("token", "abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(embed_page(&format!("{}/media/v.mp4", server.uri()))),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_range_request_is_relayed() {
    let server = MockServer::start().await;
    mount_embed_page(&server).await;

    let bytes = media_bytes();
    Mock::given(method("GET"))
        .and(path("/media/v.mp4"))
        .and(header_matcher("range", "bytes=1000-1999"))
        .and(header_matcher(
            "referer",
            format!("https://{}", server.address()).as_str(),
        ))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", format!("bytes 1000-1999/{}", TOTAL_SIZE).as_str())
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(bytes[1000..2000].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(GatewayMetrics::new());
    let proxy = build_proxy(&server, Arc::clone(&metrics));

    let range = HeaderValue::from_static("bytes=1000-1999");
    let response = proxy
        .handle(&StreamReference::Token("abc".to_string()), Some(&range))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 1000-1999/5000"
    );
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), 1000);
    assert_eq!(&body[..], &bytes[1000..2000]);

    let stats = metrics.get_stats();
    assert_eq!(stats.stream_requests, 1);
    assert_eq!(stats.bytes_relayed, 1000);
    assert_eq!(stats.client_disconnects, 0);
}

#[tokio::test]
async fn test_full_request_without_range() {
    let server = MockServer::start().await;
    mount_embed_page(&server).await;

    Mock::given(method("GET"))
        .and(path("/media/v.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(media_bytes()))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = build_proxy(&server, Arc::new(GatewayMetrics::new()));
    let response = proxy
        .handle(&StreamReference::Token("abc".to_string()), None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), TOTAL_SIZE);
}

#[tokio::test]
async fn test_embed_url_reference() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/embed/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(embed_page(&format!("{}/media/other.mp4", server.uri()))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/other.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64]))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = build_proxy(&server, Arc::new(GatewayMetrics::new()));
    let reference = StreamReference::EmbedUrl(format!("{}/embed/page", server.uri()));

    let target = proxy.resolve_stream_target(&reference).await.unwrap();
    assert_eq!(target.media_url, format!("{}/media/other.mp4", server.uri()));
    assert_eq!(target.referer_host, server.address().to_string());

    let response = proxy.handle(&reference, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), 64);
}

#[tokio::test]
async fn test_page_without_config_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/video.g"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><script>var analytics = {};</script></html>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/v.mp4"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let metrics = Arc::new(GatewayMetrics::new());
    let proxy = build_proxy(&server, Arc::clone(&metrics));
    let response = proxy
        .handle(&StreamReference::Token("abc".to_string()), None)
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"], "Video source not found");
    assert_eq!(metrics.get_stats().resolution_failures, 1);
}

#[tokio::test]
async fn test_invalid_embed_url_is_bad_request() {
    let server = MockServer::start().await;
    let proxy = build_proxy(&server, Arc::new(GatewayMetrics::new()));

    let response = proxy
        .handle(&StreamReference::EmbedUrl("not a url".to_string()), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = proxy
        .handle(&StreamReference::EmbedUrl("ftp://example.com/v".to_string()), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_media_host_error_is_mapped() {
    let server = MockServer::start().await;
    mount_embed_page(&server).await;

    Mock::given(method("GET"))
        .and(path("/media/v.mp4"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(GatewayMetrics::new());
    let proxy = build_proxy(&server, Arc::clone(&metrics));
    let response = proxy
        .handle(&StreamReference::Token("abc".to_string()), None)
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"], "Failed to stream video");
    assert_eq!(value["status"], 403);
    assert_eq!(metrics.get_stats().stream_errors, 1);
}

#[tokio::test]
async fn test_dropped_body_counts_as_disconnect() {
    let server = MockServer::start().await;
    mount_embed_page(&server).await;

    Mock::given(method("GET"))
        .and(path("/media/v.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(media_bytes()))
        .mount(&server)
        .await;

    let metrics = Arc::new(GatewayMetrics::new());
    let proxy = build_proxy(&server, Arc::clone(&metrics));
    let response = proxy
        .handle(&StreamReference::Token("abc".to_string()), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    drop(response);
    assert_eq!(metrics.get_stats().client_disconnects, 1);
}

#[tokio::test]
async fn test_silent_media_host_hits_read_timeout() {
    let server = MockServer::start().await;
    mount_embed_page(&server).await;

    let host_delay = Duration::from_secs(3);
    Mock::given(method("GET"))
        .and(path("/media/v.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(media_bytes())
                .set_delay(host_delay),
        )
        .mount(&server)
        .await;

    let metrics = Arc::new(GatewayMetrics::new());
    let config = StreamConfig {
        read_timeout_ms: 200,
        ..stream_config(&server)
    };
    let proxy = build_proxy_with(config, Arc::clone(&metrics));

    let started = Instant::now();
    let response = proxy
        .handle(&StreamReference::Token("abc".to_string()), None)
        .await;

    assert!(started.elapsed() < host_delay);
    assert!(response.status().is_server_error());
    assert_eq!(metrics.get_stats().stream_errors, 1);
}

#[tokio::test]
async fn test_direct_download_range_is_relayed() {
    let server = MockServer::start().await;

    let bytes = media_bytes();
    Mock::given(method("GET"))
        .and(path("/uc"))
        .and(query_param("export", "download"))
        .and(query_param("id", "1AbC-file_9"))
        .and(header_matcher("range", "bytes=0-499"))
        .and(header_matcher(
            "referer",
            format!("https://{}", server.address()).as_str(),
        ))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", format!("bytes 0-499/{}", TOTAL_SIZE).as_str())
                .set_body_bytes(bytes[..500].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(GatewayMetrics::new());
    let proxy = build_proxy(&server, Arc::clone(&metrics));

    let range = HeaderValue::from_static("bytes=0-499");
    let response = proxy.handle_direct("1AbC-file_9", Some(&range)).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-499/5000"
    );
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], &bytes[..500]);

    let stats = metrics.get_stats();
    assert_eq!(stats.stream_requests, 1);
    assert_eq!(stats.resolution_failures, 0);
}

#[tokio::test]
async fn test_direct_download_rejects_malformed_id() {
    let server = MockServer::start().await;
    let proxy = build_proxy(&server, Arc::new(GatewayMetrics::new()));

    let response = proxy.handle_direct("id&export=view", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(server.received_requests().await.unwrap().is_empty());
}
