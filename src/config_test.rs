//! Tests for configuration loading
//!
//! Environment lookups go through a map instead of the process environment
//! so tests can run in parallel.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

const REQUIRED: [(&str, &str); 2] = [
    ("DEMO_SERVICE_SERVER_CERT", "/certs/tls.crt"),
    ("DEMO_SERVICE_SERVER_KEY", "/certs/tls.key"),
];

fn with_required(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
    let mut pairs = REQUIRED.to_vec();
    pairs.extend_from_slice(extra);
    pairs
}

/// Test: defaults match the documented values
#[test]
fn test_defaults() {
    let config = Config::default();

    assert!(config.debug);
    assert!(!config.log_fmt_json);
    assert_eq!(config.bind_port, 8443);
    assert_eq!(config.port_healthz, 8080);
    assert_eq!(config.worker_sleep, Duration::from_secs(60));
    assert_eq!(config.cert_poll_interval, Duration::from_secs(60));
    assert_eq!(config.shutdown_grace_period, Duration::from_secs(15));
    assert_eq!(config.worker_restart_delay, Duration::ZERO);
    assert!(config.ca_cert.is_none());
    assert_eq!(config.health_addr().to_string(), "0.0.0.0:8080");
}

/// Test: environment alone is enough when the required paths are set
#[test]
fn test_load_from_env_only() {
    let config = Config::load_with(lookup_from(&with_required(&[
        ("DEMO_SERVICE_BIND_PORT", "9443"),
        ("DEMO_SERVICE_DEBUG", "false"),
        ("DEMO_SERVICE_LOG_FMT_JSON", "true"),
        ("DEMO_SERVICE_POD_NAME", "pod-1"),
        ("DEMO_SERVICE_WORKER_SLEEP", "5s"),
        ("DEMO_SERVICE_DEMO_METRICS", "metric-a, metric-b"),
    ])))
    .unwrap();

    assert_eq!(config.server_cert, PathBuf::from("/certs/tls.crt"));
    assert_eq!(config.bind_port, 9443);
    assert!(!config.debug);
    assert!(config.log_fmt_json);
    assert_eq!(config.pod_name, "pod-1");
    assert_eq!(config.worker_sleep, Duration::from_secs(5));
    assert_eq!(config.demo_metrics, vec!["metric-a", "metric-b"]);
    assert!(config.source.is_none());
}

/// Test: missing server certificate path is a startup error
#[test]
fn test_server_cert_required() {
    let result = Config::load_with(lookup_from(&[("DEMO_SERVICE_SERVER_KEY", "/k")]));

    assert!(matches!(result, Err(ConfigError::Missing("server-cert"))));
}

/// Test: health port 0 is rejected
#[test]
fn test_invalid_health_port_zero() {
    let result = Config::load_with(lookup_from(&with_required(&[(
        "DEMO_SERVICE_PORT_HEALTHZ",
        "0",
    )])));

    assert!(matches!(
        result,
        Err(ConfigError::InvalidPort {
            key: "port-healthz",
            port: 0
        })
    ));
}

/// Test: health port above 65535 is rejected
#[test]
fn test_invalid_health_port_out_of_range() {
    let result = Config::load_with(lookup_from(&with_required(&[(
        "DEMO_SERVICE_PORT_HEALTHZ",
        "70000",
    )])));

    match result {
        Err(ConfigError::InvalidValue { key, value, .. }) => {
            assert_eq!(key, "DEMO_SERVICE_PORT_HEALTHZ");
            assert_eq!(value, "70000");
        }
        other => panic!("Expected InvalidValue, got {:?}", other),
    }
}

/// Test: malformed booleans and durations are reported with their variable
#[test]
fn test_invalid_env_values() {
    let bad_bool = Config::load_with(lookup_from(&with_required(&[("DEMO_SERVICE_DEBUG", "maybe")])));
    assert!(matches!(bad_bool, Err(ConfigError::InvalidValue { .. })));

    let bad_duration = Config::load_with(lookup_from(&with_required(&[(
        "DEMO_SERVICE_CERT_POLL_INTERVAL",
        "soon",
    )])));
    assert!(matches!(bad_duration, Err(ConfigError::InvalidValue { .. })));
}

/// Test: zero poll interval is rejected
#[test]
fn test_zero_poll_interval_rejected() {
    let result = Config::load_with(lookup_from(&with_required(&[(
        "DEMO_SERVICE_CERT_POLL_INTERVAL",
        "0",
    )])));

    assert!(matches!(
        result,
        Err(ConfigError::ZeroInterval("cert-poll-interval"))
    ));
}

/// Test: empty CA override disables mutual TLS
#[test]
fn test_empty_ca_cert_disables_mtls() {
    let config = Config::load_with(lookup_from(&with_required(&[(
        "DEMO_SERVICE_CA_CERT",
        "",
    )])))
    .unwrap();

    assert!(config.ca_cert.is_none());
}

/// Test: config file values apply and environment overrides them
#[test]
fn test_file_then_env_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo-service.toml");
    std::fs::write(
        &path,
        r#"
debug = false
bind-port = 7443
port-healthz = 9090
server-cert = "/file/tls.crt"
server-key = "/file/tls.key"
ca-cert = "/file/ca.crt"
worker-sleep = "2m"
demo-metrics = ["metric-a", "metric-b", "metric-c"]
shutdown-grace-period = "500ms"
"#,
    )
    .unwrap();
    let path_str = path.to_str().unwrap().to_string();

    let config = Config::load_with(move |name| match name {
        "DEMO_SERVICE_CONFIG" => Some(path_str.clone()),
        "DEMO_SERVICE_BIND_PORT" => Some("6443".to_string()),
        _ => None,
    })
    .unwrap();

    assert!(!config.debug);
    assert_eq!(config.bind_port, 6443, "Environment wins over file");
    assert_eq!(config.port_healthz, 9090);
    assert_eq!(config.server_cert, PathBuf::from("/file/tls.crt"));
    assert_eq!(config.ca_cert, Some(PathBuf::from("/file/ca.crt")));
    assert_eq!(config.worker_sleep, Duration::from_secs(120));
    assert_eq!(config.demo_metrics.len(), 3);
    assert_eq!(config.shutdown_grace_period, Duration::from_millis(500));
    assert_eq!(config.cert_poll_interval, Duration::from_secs(60), "Unset keys keep defaults");
    assert_eq!(config.source, Some(path));
}

/// Test: an explicit config path that does not exist is an error
#[test]
fn test_explicit_config_path_missing() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml").to_str().unwrap().to_string();

    let result = Config::load_with(lookup_from(&[("DEMO_SERVICE_CONFIG", missing.as_str())]));

    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

/// Test: malformed TOML is an error, not silently ignored
#[test]
fn test_malformed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo-service.toml");
    std::fs::write(&path, "worker-sleep = \"forever\"\n").unwrap();

    let result = Config::load_from_file(&path);

    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

/// Test: duration strings
#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("0"), Some(Duration::ZERO));
    assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
    assert_eq!(parse_duration("60s"), Some(Duration::from_secs(60)));
    assert_eq!(parse_duration(" 5m "), Some(Duration::from_secs(300)));
    assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    assert_eq!(parse_duration("60"), None);
    assert_eq!(parse_duration("s"), None);
    assert_eq!(parse_duration("1.5s"), None);
    assert_eq!(parse_duration("10d"), None);
    assert_eq!(parse_duration(""), None);
}

/// Test: env variable naming
#[test]
fn test_env_key() {
    assert_eq!(env_key("port-healthz"), "DEMO_SERVICE_PORT_HEALTHZ");
    assert_eq!(env_key("log-fmt-json"), "DEMO_SERVICE_LOG_FMT_JSON");
}

/// Test: pod-name takes precedence over hostname detection
#[test]
fn test_resolve_hostname_prefers_pod_name() {
    let config = Config {
        pod_name: "demo-pod".to_string(),
        ..Config::default()
    };

    assert_eq!(config.resolve_hostname().unwrap(), "demo-pod");
}

/// Test: hostname detection yields a non-empty name
#[test]
fn test_resolve_hostname_detects() {
    let detected = Config::default().resolve_hostname().unwrap();

    assert!(!detected.is_empty());
    assert_eq!(detected, hostname::get().unwrap().to_string_lossy());
}
