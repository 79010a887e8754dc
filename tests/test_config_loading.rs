use content_gateway::config::GatewayConfig;
use content_gateway::{Environment, NamespacePolicy};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_bundled_config() {
    let config = GatewayConfig::from_file("gateway.yaml");
    assert!(config.is_ok(), "Failed to load bundled config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.listen_address, "0.0.0.0:3001");
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.backoff_base_ms, 300);
    assert_eq!(config.breaker.open_duration_secs, 30);
    assert_eq!(config.sweep_interval(), Duration::from_secs(120));

    let purge = config.purge.unwrap();
    assert!(purge.enabled);
    assert_eq!(purge.auth_token.as_deref(), Some("change-me"));
}

#[test]
fn test_load_minimal_config() {
    let file = write_config(
        r#"
listen_address: "127.0.0.1:9000"
environment: production
"#,
    );

    let config = assert_ok!(GatewayConfig::from_file(file.path()));
    assert_eq!(config.listen_address, "127.0.0.1:9000");
    assert_eq!(config.environment, Environment::Production);

    // Defaults are applied
    assert_eq!(config.breaker.failure_threshold, 3);
    assert_eq!(config.ttl.reference_secs, 3600);
    assert_eq!(config.stream.cache_control, "public, max-age=3600");
    assert_eq!(config.stream.read_timeout_ms, 45_000);
    assert_eq!(config.stream.direct_download_url, "https://docs.google.com/uc");
    assert_eq!(config.upstream.passthrough_timeout_ms, 10_000);
    assert!(config.purge.is_none());

    let policies = config.namespace_policies();
    assert!(policies.contains(&("user".to_string(), NamespacePolicy::new(3600, 500))));
}

#[test]
fn test_load_invalid_config() {
    let file = write_config(
        r#"
retry:
  max_attempts: 0
"#,
    );

    assert_err!(
        GatewayConfig::from_file(file.path()),
        "Should fail validation for max_attempts = 0"
    );
}

#[test]
fn test_load_zero_sweep_interval() {
    let file = write_config(
        r#"
cache:
  sweep_interval_secs: 0
"#,
    );

    assert_err!(
        GatewayConfig::from_file(file.path()),
        "A zero sweep interval must be rejected before the sweeper starts"
    );
}

#[test]
fn test_load_malformed_yaml() {
    let file = write_config("upstream: [not, a, mapping\n");
    assert_err!(GatewayConfig::from_file(file.path()));
}

#[test]
fn test_load_nonexistent_file() {
    let config = GatewayConfig::from_file("nonexistent.yaml");
    assert!(config.is_err(), "Should fail when file doesn't exist");
}
