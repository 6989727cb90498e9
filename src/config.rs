//! Configuration management for Turnstile.
//!
//! Configuration is layered: serde defaults, then an optional YAML file,
//! then a fixed set of environment variables (see [`ENV_OVERRIDES`]).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Environment variables that override configuration keys.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("REDIS_ADDR", "store.addr"),
    ("STORE_TIMEOUT_MS", "store.call_timeout_ms"),
    ("SERVER_PORT", "server.port"),
    ("LOG_FORMAT", "server.log_format"),
    ("FAILURE_THRESHOLD", "breaker.failure_threshold"),
    ("CB_TIMEOUT", "breaker.cool_down_secs"),
    ("LOCK_TIME", "lock.ttl_secs"),
];

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Distributed lock configuration
    #[serde(default)]
    pub lock: LockConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Socket address to bind the HTTP listener to.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| TurnstileError::Config(format!("invalid listen address: {}", e)))
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store address, either `host:port` or a full `redis://` URL
    #[serde(default = "default_store_addr")]
    pub addr: String,

    /// Upper bound for a single store call in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addr: default_store_addr(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Connection URL for the redis client.
    pub fn url(&self) -> String {
        if self.addr.contains("://") {
            self.addr.clone()
        } else {
            format!("redis://{}", self.addr)
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_store_addr() -> String {
    "localhost:6379".to_string()
}

fn default_call_timeout_ms() -> u64 {
    1000
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures tolerated before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the breaker stays open before probing
    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cool_down_secs: default_cool_down_secs(),
        }
    }
}

impl BreakerConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cool_down_secs() -> u64 {
    5
}

/// Distributed lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock time-to-live in seconds
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_lock_ttl_secs() -> u64 {
    5
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file and the process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_from(path, std::env::vars())
    }

    /// Load configuration from an optional YAML file and the given variables.
    ///
    /// Only the variables named in [`ENV_OVERRIDES`] are consulted.
    pub fn load_from<I>(path: Option<&str>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path).format(config::FileFormat::Yaml),
            );
        }

        for (name, value) in vars {
            if let Some((_, key)) = ENV_OVERRIDES.iter().find(|(var, _)| *var == name) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path, ignoring the environment.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load_from(Some(path), std::iter::empty())
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.store.addr.trim().is_empty() {
            return Err(TurnstileError::Config("store address is empty".to_string()));
        }
        if self.store.call_timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "store call timeout must be positive".to_string(),
            ));
        }
        if self.breaker.cool_down_secs == 0 {
            return Err(TurnstileError::Config(
                "breaker cool-down must be positive".to_string(),
            ));
        }
        if self.lock.ttl_secs == 0 {
            return Err(TurnstileError::Config("lock TTL must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::load_from(None, Vec::new()).unwrap();

        assert_eq!(config.store.addr, "localhost:6379");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cool_down(), Duration::from_secs(5));
        assert_eq!(config.lock.ttl(), Duration::from_secs(5));
        assert_eq!(config.store.call_timeout(), Duration::from_millis(1000));
        assert_eq!(config.server.log_format, LogFormat::Text);
    }

    #[test]
    fn test_environment_overrides() {
        let env = vars(&[
            ("REDIS_ADDR", "redis.internal:6380"),
            ("SERVER_PORT", "9000"),
            ("FAILURE_THRESHOLD", "7"),
            ("CB_TIMEOUT", "12"),
            ("LOCK_TIME", "2"),
            ("LOG_FORMAT", "json"),
            ("PATH", "/usr/bin"),
        ]);

        let config = TurnstileConfig::load_from(None, env).unwrap();

        assert_eq!(config.store.addr, "redis.internal:6380");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.breaker.failure_threshold, 7);
        assert_eq!(config.breaker.cool_down_secs, 12);
        assert_eq!(config.lock.ttl_secs, 2);
        assert_eq!(config.server.log_format, LogFormat::Json);
    }

    #[test]
    fn test_unparseable_environment_value_is_config_error() {
        let env = vars(&[("FAILURE_THRESHOLD", "many")]);
        let result = TurnstileConfig::load_from(None, env);
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_zero_lock_ttl_rejected() {
        let env = vars(&[("LOCK_TIME", "0")]);
        let result = TurnstileConfig::load_from(None, env);
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_file_then_environment() {
        let dir = std::env::temp_dir().join(format!("turnstile-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("turnstile.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "store:\n  addr: file-host:6379\nbreaker:\n  failure_threshold: 10\n"
        )
        .unwrap();

        let path_str = path.to_str().unwrap();
        let from_file = TurnstileConfig::from_file(path_str).unwrap();
        assert_eq!(from_file.store.addr, "file-host:6379");
        assert_eq!(from_file.breaker.failure_threshold, 10);
        assert_eq!(from_file.server.port, 8080);

        let env = vars(&[("FAILURE_THRESHOLD", "4")]);
        let layered = TurnstileConfig::load_from(Some(path_str), env).unwrap();
        assert_eq!(layered.store.addr, "file-host:6379");
        assert_eq!(layered.breaker.failure_threshold, 4);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_store_url() {
        let mut store = StoreConfig::default();
        assert_eq!(store.url(), "redis://localhost:6379");

        store.addr = "rediss://secure:6380/1".to_string();
        assert_eq!(store.url(), "rediss://secure:6380/1");
    }

    #[test]
    fn test_socket_addr() {
        let server = ServerConfig::default();
        assert_eq!(server.socket_addr().unwrap().port(), 8080);
    }
}
