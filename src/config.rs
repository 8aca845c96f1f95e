//! Service configuration.
//!
//! One [`Config`] object covers every subsystem. It deserializes from TOML,
//! starts from sensible defaults, and is validated once at startup; the
//! binary layers CLI/environment overrides on top before calling
//! [`Config::validate`].

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{FleetError, Result};

/// Default MQTT topic filter for fleet telemetry.
pub const DEFAULT_SUBSCRIPTION_TOPIC: &str = "fleet/+/telemetry";

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Broker connection settings.
    pub broker: BrokerConfig,
    /// MQTT topic filter to subscribe to.
    pub subscription_topic: String,
    /// HTTP listen port.
    pub http_port: u16,
    /// Maximum number of vehicles held in the cache.
    pub cache_limit: usize,
    /// Cache entry time-to-live in milliseconds; 0 disables expiry.
    pub vehicle_ttl_ms: u64,
    /// Length of the message-rate window in milliseconds.
    pub message_window_ms: u64,
    /// Durable store settings.
    pub telemetry_db: TelemetryDbConfig,
    /// gRPC server settings.
    pub grpc: GrpcConfig,
    /// WebSocket fan-out settings.
    pub websocket: WebSocketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            subscription_topic: DEFAULT_SUBSCRIPTION_TOPIC.to_string(),
            http_port: 8080,
            cache_limit: 1000,
            vehicle_ttl_ms: 60_000,
            message_window_ms: 60_000,
            telemetry_db: TelemetryDbConfig::default(),
            grpc: GrpcConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Broker hostname.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Connect over TLS.
    pub use_tls: bool,
    /// Whether TLS certificate validation failures are fatal.
    pub reject_unauthorized: bool,
    /// Client identifier; a random suffix is generated when absent.
    pub client_id: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            use_tls: false,
            reject_unauthorized: true,
            client_id: None,
        }
    }
}

/// Telemetry store and rollup settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryDbConfig {
    /// SQLite database path.
    pub path: PathBuf,
    /// Base rollup window in seconds.
    pub rollup_window_seconds: u32,
    /// Additional materialised rollup windows in seconds.
    pub rollup_windows: Vec<u32>,
    /// Period of the incremental rollup job in milliseconds.
    pub rollup_interval_ms: u64,
    /// How many already-processed windows each pass recomputes.
    pub rollup_catch_up_windows: u32,
}

impl Default for TelemetryDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fleetstream.db"),
            rollup_window_seconds: 300,
            rollup_windows: Vec::new(),
            rollup_interval_ms: 60_000,
            rollup_catch_up_windows: 1,
        }
    }
}

impl TelemetryDbConfig {
    /// The sorted, deduplicated set of materialised windows, always
    /// including the base window.
    pub fn effective_windows(&self) -> Vec<u32> {
        let mut windows = self.rollup_windows.clone();
        windows.push(self.rollup_window_seconds);
        windows.retain(|&w| w > 0);
        windows.sort_unstable();
        windows.dedup();
        windows
    }
}

/// gRPC server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GrpcConfig {
    /// Whether the gRPC server is started at all.
    pub enabled: bool,
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Poll period of the live snapshot stream in milliseconds.
    pub stream_interval_ms: u64,
    /// Idle period after which a live stream re-emits its snapshot.
    pub stream_heartbeat_ms: u64,
    /// HTTP/2 keepalive ping interval in milliseconds.
    pub keepalive_time_ms: u64,
    /// HTTP/2 keepalive ping timeout in milliseconds.
    pub keepalive_timeout_ms: u64,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 50051,
            stream_interval_ms: 1_000,
            stream_heartbeat_ms: 30_000,
            keepalive_time_ms: 60_000,
            keepalive_timeout_ms: 20_000,
        }
    }
}

/// WebSocket fan-out settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebSocketConfig {
    /// Path of the push channel.
    pub path: String,
    /// Version stamped on every outbound frame.
    pub payload_version: u32,
    /// Outbound-buffer threshold per subscriber in bytes; a subscriber whose
    /// queued bytes exceed this is dropped.
    pub buffer_limit_bytes: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: "/stream".to_string(),
            payload_version: 1,
            buffer_limit_bytes: 512 * 1024,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn from_toml_path(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| FleetError::Config(format!("cannot parse {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Checks cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.http_port == 0 {
            return Err(FleetError::Config("httpPort must be nonzero".into()));
        }
        if self.cache_limit == 0 {
            return Err(FleetError::Config("cacheLimit must be nonzero".into()));
        }
        if self.message_window_ms == 0 {
            return Err(FleetError::Config("messageWindowMs must be nonzero".into()));
        }
        if self.telemetry_db.rollup_window_seconds == 0 {
            return Err(FleetError::Config("rollupWindowSeconds must be nonzero".into()));
        }
        if self.telemetry_db.rollup_interval_ms < 1_000 {
            return Err(FleetError::Config(
                "rollupIntervalMs must be at least 1000".into(),
            ));
        }
        if self.telemetry_db.rollup_windows.contains(&0) {
            return Err(FleetError::Config(
                "rollupWindows must not contain zero".into(),
            ));
        }
        if self.grpc.enabled && self.grpc.port == 0 {
            return Err(FleetError::Config("grpc.port must be nonzero".into()));
        }
        if !self.websocket.path.starts_with('/') {
            return Err(FleetError::Config(
                "websocket.path must start with '/'".into(),
            ));
        }
        Ok(())
    }
}
