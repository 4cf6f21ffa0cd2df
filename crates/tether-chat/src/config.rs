//! Chat client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (TETHER_ENDPOINT, TETHER_TOKEN, TETHER_TOPIC)
//! - TOML configuration file
//! - Command line arguments (`--config <path>`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_client::{PushPolicy, ReconnectPolicy, SocketConfig};

/// Chat client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Socket endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token issued by the server.
    #[serde(default = "default_token")]
    pub token: Option<String>,

    /// Topic to join.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Socket behavior.
    #[serde(default)]
    pub socket: SocketSection,

    /// What to print.
    #[serde(default)]
    pub render: RenderConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Socket behavior.
///
/// Unlike `SocketConfig::new`, which leaves reconnection off, the chat
/// reconnects by default so a network blip does not end the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketSection {
    /// Reply timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Heartbeat interval in milliseconds, unless the server recommends one.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_ms: u64,

    /// Re-establish lost connections. On by default.
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Give up after this many reconnect attempts in a row.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// `buffer` or `reject` pushes made before the join completes.
    #[serde(default = "default_push_policy")]
    pub push_policy: String,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Print the roster after every presence sync.
    #[serde(default = "default_true")]
    pub roster: bool,

    /// Print chat messages.
    #[serde(default = "default_true")]
    pub messages: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_endpoint() -> String {
    std::env::var("TETHER_ENDPOINT").unwrap_or_else(|_| "ws://127.0.0.1:4000/socket".to_string())
}

fn default_token() -> Option<String> {
    std::env::var("TETHER_TOKEN").ok().filter(|t| !t.is_empty())
}

fn default_topic() -> String {
    std::env::var("TETHER_TOPIC").unwrap_or_else(|_| "room:lobby".to_string())
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_push_policy() -> String {
    "buffer".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: default_token(),
            topic: default_topic(),
            socket: SocketSection::default(),
            render: RenderConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SocketSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            heartbeat_ms: default_heartbeat_interval(),
            reconnect: true,
            max_reconnect_attempts: None,
            push_policy: default_push_policy(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            roster: true,
            messages: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, the default paths, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an explicit path does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = [
            "tether.toml",
            "/etc/tether/tether.toml",
            "~/.config/tether/tether.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Build the socket configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown push policy.
    pub fn socket_config(&self) -> Result<SocketConfig> {
        let push_policy = match self.socket.push_policy.as_str() {
            "buffer" => PushPolicy::Buffer,
            "reject" => PushPolicy::Reject,
            other => bail!("Unknown push policy '{other}', expected 'buffer' or 'reject'"),
        };

        let reconnect = if self.socket.reconnect {
            let policy = ReconnectPolicy::enabled();
            match self.socket.max_reconnect_attempts {
                Some(max) => policy.with_max_attempts(max),
                None => policy,
            }
        } else {
            ReconnectPolicy::disabled()
        };

        let mut config = SocketConfig::new(self.endpoint.clone())
            .with_timeout(Duration::from_millis(self.socket.timeout_ms))
            .with_heartbeat_interval(Duration::from_millis(self.socket.heartbeat_ms))
            .with_reconnect(reconnect)
            .with_push_policy(push_policy);
        if let Some(token) = &self.token {
            config = config.with_token(token.clone());
        }
        Ok(config)
    }
}
