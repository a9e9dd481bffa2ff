//! Gateway configuration with validation.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Browser-facing WebSocket server
    pub browser: BrowserConfig,
    /// Homebase link behavior
    pub homebase: HomebaseConfig,
    /// Request/response correlation limits
    pub requests: RequestConfig,
    /// Reconnect back-off schedule
    pub reconnect: ReconnectConfig,
    /// Reachability probing
    pub probe: ProbeConfig,
    /// Relational store
    pub store: StoreConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            homebase: HomebaseConfig::default(),
            requests: RequestConfig::default(),
            reconnect: ReconnectConfig::default(),
            probe: ProbeConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.browser.browser_port == 0 {
            return Err(ConfigError::Invalid("browser_port cannot be 0".into()));
        }

        if self.requests.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight cannot be 0".into()));
        }

        if self.requests.max_queue == 0 {
            return Err(ConfigError::Invalid("max_queue cannot be 0".into()));
        }

        if self.probe.probe_window == 0 {
            return Err(ConfigError::Invalid("probe_window cannot be 0".into()));
        }

        if self.reconnect.slow_max_backoff_ms < self.reconnect.slow_base_backoff_ms {
            return Err(ConfigError::Invalid(
                "slow_max_backoff_ms below slow_base_backoff_ms".into(),
            ));
        }

        if self.homebase.heartbeat_timeout_ms >= self.homebase.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout_ms must be below heartbeat_interval_ms".into(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Browser server bind address
    pub fn browser_addr(&self) -> SocketAddr {
        SocketAddr::new(self.browser.host, self.browser.browser_port)
    }
}

/// Browser-facing WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub browser_port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            browser_port: 8080,
        }
    }
}

/// Homebase link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomebaseConfig {
    /// Allow-list of homebase addresses; empty means unrestricted
    pub homebase_allowed_ips: Vec<String>,
    /// WebSocket port on each homebase
    pub port: u16,
    /// `every` parameter sent with each subscribe
    pub subscribe_every_default: u32,
    /// Hard cap on a single dial attempt
    pub connect_timeout_ms: u64,
    /// Protocol ping cadence while Open
    pub heartbeat_interval_ms: u64,
    /// Pong deadline after each ping
    pub heartbeat_timeout_ms: u64,
    /// Inbound silence tolerated while Open
    pub stale_ms: u64,
    /// Defensive re-touch of every subscribed key
    pub refresh_interval_ms: u64,
    /// Cadence of the pump voltage / charging eval poll
    pub poll_interval_ms: u64,
}

impl Default for HomebaseConfig {
    fn default() -> Self {
        Self {
            homebase_allowed_ips: Vec::new(),
            port: 2565,
            subscribe_every_default: 1,
            connect_timeout_ms: 8_000,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 5_000,
            stale_ms: 30_000,
            refresh_interval_ms: 60_000,
            poll_interval_ms: 10_000,
        }
    }
}

impl HomebaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Endpoint URL for a homebase address
    pub fn endpoint(&self, addr: &str) -> String {
        format!("ws://{}:{}/ws", addr, self.port)
    }
}

/// Request/response correlation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Default per-request deadline
    pub request_default_timeout_ms: u64,
    /// Outstanding requests per link
    pub max_in_flight: usize,
    /// Waiting requests per link
    pub max_queue: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            request_default_timeout_ms: 10_000,
            max_in_flight: 8,
            max_queue: 200,
        }
    }
}

impl RequestConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.request_default_timeout_ms)
    }
}

/// Two-phase reconnect back-off configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Wall-clock window after first disconnect during which fast retry applies
    pub fast_retry_window_ms: u64,
    /// Base delay during fast retry
    pub fast_retry_base_ms: u64,
    /// Uniform jitter added to fast retries
    pub fast_retry_jitter_ms: u64,
    /// Base delay once in slow back-off
    pub slow_base_backoff_ms: u64,
    /// Ceiling on the slow back-off delay
    pub slow_max_backoff_ms: u64,
    /// Uniform jitter added to slow back-off delays
    pub slow_jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            fast_retry_window_ms: 300_000,
            fast_retry_base_ms: 2_000,
            fast_retry_jitter_ms: 1_000,
            slow_base_backoff_ms: 15_000,
            slow_max_backoff_ms: 120_000,
            slow_jitter_ms: 2_000,
        }
    }
}

/// Reachability probing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probe cycle cadence
    pub probe_interval_ms: u64,
    /// Per-target probe timeout in seconds
    pub probe_timeout_s: f64,
    /// Rolling window of retained probe outcomes per device
    pub probe_window: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 10_000,
            probe_timeout_s: 0.5,
            probe_window: 100,
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout_s)
    }
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection string; `DATABASE_URL` takes precedence when set
    pub database_url: Option<String>,
    /// Write translated statuses to the store instead of logging the upsert
    pub authoritative_status_writes: bool,
    /// Delay before re-establishing a lost LISTEN connection
    pub listener_reconnect_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            authoritative_status_writes: false,
            listener_reconnect_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Resolve the connection string from environment or config.
    pub fn resolved_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.database_url.clone())
    }

    pub fn listener_reconnect(&self) -> Duration {
        Duration::from_millis(self.listener_reconnect_ms)
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("config file error: {0}")]
    Io(String),
    /// Configuration file could not be parsed
    #[error("config parse error: {0}")]
    Parse(String),
    /// Semantically invalid configuration
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.browser.browser_port, 8080);
        assert_eq!(config.homebase.port, 2565);
        assert_eq!(config.requests.max_in_flight, 8);
        assert_eq!(config.requests.max_queue, 200);
        assert_eq!(config.probe.probe_window, 100);
    }

    #[test]
    fn test_endpoint_format() {
        let config = HomebaseConfig::default();
        assert_eq!(config.endpoint("10.0.0.1"), "ws://10.0.0.1:2565/ws");
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let mut config = GatewayConfig::default();
        config.requests.max_in_flight = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = GatewayConfig::default();
        config.reconnect.slow_max_backoff_ms = 1_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_partial_toml() {
        let text = r#"
            [browser]
            browser_port = 9090

            [homebase]
            homebase_allowed_ips = ["10.0.0.1", "10.0.0.2"]
        "#;
        let config: GatewayConfig = toml::from_str(text).unwrap();
        assert_eq!(config.browser.browser_port, 9090);
        assert_eq!(config.homebase.homebase_allowed_ips.len(), 2);
        // Untouched sections keep defaults
        assert_eq!(config.requests.max_queue, 200);
    }

    #[test]
    fn test_probe_timeout_fraction() {
        let config = ProbeConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(500));
    }
}
