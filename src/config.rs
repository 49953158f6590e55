//! Service configuration
//!
//! Precedence (highest to lowest):
//! 1. Environment variables: `DEMO_SERVICE_` + key upper-cased with `-` as `_`
//!    (e.g. `DEMO_SERVICE_BIND_PORT`)
//! 2. Config file (`demo-service.toml`)
//! 3. Default values
//!
//! The config file is looked up at `$DEMO_SERVICE_CONFIG`, then
//! `./demo-service.toml`, then `/configmaps/config/demo-service.toml`. A
//! missing file is fine; an unreadable or malformed one is not.
//!
//! Durations are written as `<number><unit>` with unit `ms`, `s`, `m` or `h`
//! (e.g. `"60s"`, `"2m"`).

use serde::{Deserialize, Deserializer};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "DEMO_SERVICE_";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "DEMO_SERVICE_CONFIG";

const CONFIG_FILE_NAME: &str = "demo-service.toml";
const CONFIG_DIRS: [&str; 2] = [".", "/configmaps/config"];

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read error: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid port number for {key}: {port}")]
    InvalidPort { key: &'static str, port: u16 },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Failed to detect hostname: {0}")]
    Hostname(#[source] std::io::Error),
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub debug: bool,
    pub log_fmt_json: bool,

    pub bind_address: IpAddr,
    pub bind_port: u16,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    /// CA bundle for client certificates; enables mutual TLS when set
    pub ca_cert: Option<PathBuf>,

    pub bind_address_healthz: IpAddr,
    pub port_healthz: u16,
    /// Hostname reported by `/healthz`; detected when empty
    pub pod_name: String,

    #[serde(deserialize_with = "de_duration")]
    pub worker_sleep: Duration,
    pub demo_metrics: Vec<String>,

    #[serde(deserialize_with = "de_duration")]
    pub cert_poll_interval: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub shutdown_grace_period: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub worker_restart_delay: Duration,

    /// File the values were read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: true,
            log_fmt_json: false,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 8443,
            server_cert: PathBuf::new(),
            server_key: PathBuf::new(),
            ca_cert: None,
            bind_address_healthz: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_healthz: 8080,
            pod_name: String::new(),
            worker_sleep: Duration::from_secs(60),
            demo_metrics: Vec::new(),
            cert_poll_interval: Duration::from_secs(60),
            shutdown_grace_period: Duration::from_secs(15),
            worker_restart_delay: Duration::ZERO,
            source: None,
        }
    }
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("invalid duration '{}', expected e.g. \"60s\"", raw))
    })
}

/// Parse a duration such as `"500ms"`, `"60s"`, `"5m"` or `"1h"`
///
/// A bare `"0"` is zero. Returns `None` for anything else.
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let duration_str = duration_str.trim();
    if duration_str == "0" {
        return Some(Duration::ZERO);
    }

    let split = duration_str.find(|c: char| !c.is_ascii_digit())?;
    let (number_str, unit) = duration_str.split_at(split);
    let number: u64 = number_str.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(number)),
        "s" => Some(Duration::from_secs(number)),
        "m" => number.checked_mul(60).map(Duration::from_secs),
        "h" => number.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

/// Environment variable name for a config key
pub fn env_key(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key.to_uppercase().replace('-', "_"))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: env_key(key),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_env_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: env_key(key),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_env_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidValue {
        key: env_key(key),
        value: value.to_string(),
        reason: "expected a duration such as 60s".to_string(),
    })
}

impl Config {
    /// Load from the process environment and the first config file found
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` in place of the process environment
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match Self::find_config_file(&lookup) {
            Some(path) => {
                debug!(path = %path.display(), "Loading config file");
                Self::load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file; absent keys keep their defaults
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    fn find_config_file<F>(lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        // An explicit path is used even if missing, so the read error surfaces
        if let Some(path) = lookup(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }

        CONFIG_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(CONFIG_FILE_NAME))
            .find(|path| path.is_file())
    }

    /// Override values from `DEMO_SERVICE_*` variables
    pub fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&env_key(key));

        if let Some(v) = get("debug") {
            self.debug = parse_env_bool("debug", &v)?;
        }
        if let Some(v) = get("log-fmt-json") {
            self.log_fmt_json = parse_env_bool("log-fmt-json", &v)?;
        }
        if let Some(v) = get("bind-address") {
            self.bind_address = parse_env("bind-address", &v)?;
        }
        if let Some(v) = get("bind-port") {
            self.bind_port = parse_env("bind-port", &v)?;
        }
        if let Some(v) = get("server-cert") {
            self.server_cert = PathBuf::from(v);
        }
        if let Some(v) = get("server-key") {
            self.server_key = PathBuf::from(v);
        }
        if let Some(v) = get("ca-cert") {
            self.ca_cert = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = get("bind-address-healthz") {
            self.bind_address_healthz = parse_env("bind-address-healthz", &v)?;
        }
        if let Some(v) = get("port-healthz") {
            self.port_healthz = parse_env("port-healthz", &v)?;
        }
        if let Some(v) = get("pod-name") {
            self.pod_name = v;
        }
        if let Some(v) = get("worker-sleep") {
            self.worker_sleep = parse_env_duration("worker-sleep", &v)?;
        }
        if let Some(v) = get("demo-metrics") {
            self.demo_metrics = v
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("cert-poll-interval") {
            self.cert_poll_interval = parse_env_duration("cert-poll-interval", &v)?;
        }
        if let Some(v) = get("shutdown-grace-period") {
            self.shutdown_grace_period = parse_env_duration("shutdown-grace-period", &v)?;
        }
        if let Some(v) = get("worker-restart-delay") {
            self.worker_restart_delay = parse_env_duration("worker-restart-delay", &v)?;
        }
        Ok(())
    }

    /// Reject settings the service cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_healthz == 0 {
            return Err(ConfigError::InvalidPort {
                key: "port-healthz",
                port: self.port_healthz,
            });
        }
        if self.bind_port == 0 {
            return Err(ConfigError::InvalidPort {
                key: "bind-port",
                port: self.bind_port,
            });
        }
        if self.server_cert.as_os_str().is_empty() {
            return Err(ConfigError::Missing("server-cert"));
        }
        if self.server_key.as_os_str().is_empty() {
            return Err(ConfigError::Missing("server-key"));
        }
        if self.cert_poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("cert-poll-interval"));
        }
        Ok(())
    }

    pub fn tls_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.bind_address, self.bind_port)
    }

    pub fn health_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.bind_address_healthz, self.port_healthz)
    }

    /// `pod-name` if set, otherwise the system hostname
    pub fn resolve_hostname(&self) -> Result<String, ConfigError> {
        if !self.pod_name.is_empty() {
            return Ok(self.pod_name.clone());
        }
        system_hostname().map_err(ConfigError::Hostname)
    }
}

fn system_hostname() -> std::io::Result<String> {
    let name = hostname::get()?.into_string().map_err(|raw| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("hostname is not valid UTF-8: {:?}", raw),
        )
    })?;
    if name.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "empty hostname",
        ));
    }
    Ok(name)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
