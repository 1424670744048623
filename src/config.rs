//! Configuration loading for the RMI driver

use crate::{
    connector::ConnectorSettings,
    vendor, Result, RmiError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SEND_RATE_HZ: f64 = 30.0;
pub const DEFAULT_POLL_RATE_HZ: f64 = 50.0;
pub const DEFAULT_PUB_RATE_HZ: f64 = 50.0;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
}

/// One robot controller
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub host: String,
    /// Action channel port; the query channel is `port + 1`
    pub port: u16,
    #[serde(default = "default_command_set")]
    pub command_set: String,
    #[serde(default)]
    pub joints: Vec<String>,
}

/// Timing and queueing shared by all connectors
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectorConfig {
    pub send_rate_hz: Option<f64>,
    pub poll_rate_hz: Option<f64>,
    /// Query channel reply timeout
    pub read_timeout_ms: Option<u64>,
    /// Action channel reply timeout; waits for every acknowledgement when unset
    pub action_timeout_ms: Option<u64>,
    /// Maximum pending motion commands; unbounded when unset
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PublishingConfig {
    pub pub_rate_hz: Option<f64>,
    pub pretty: Option<bool>,
}

fn default_command_set() -> String {
    "keba".to_string()
}

impl DriverConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| RmiError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: DriverConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the connectors cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connections.is_empty() {
            return Err(RmiError::Config("At least one connection is required".to_string()));
        }

        let mut seen = HashSet::new();
        for conn in &self.connections {
            if conn.host.trim().is_empty() {
                return Err(RmiError::Config("Connection host must not be empty".to_string()));
            }
            if conn.port == u16::MAX {
                return Err(RmiError::Config(format!(
                    "Port {} leaves no room for the query channel at port + 1",
                    conn.port
                )));
            }
            if !seen.insert((conn.host.as_str(), conn.port)) {
                return Err(RmiError::Config(format!(
                    "Duplicate connection {}:{}",
                    conn.host, conn.port
                )));
            }
            if conn.joints.iter().any(|j| j.trim().is_empty()) {
                return Err(RmiError::Config(format!(
                    "Empty joint name for {}:{}",
                    conn.host, conn.port
                )));
            }
            vendor::command_set(&conn.command_set)?;
        }

        for (name, rate) in [
            ("send_rate_hz", self.connector.send_rate_hz()),
            ("poll_rate_hz", self.connector.poll_rate_hz()),
            ("pub_rate_hz", self.publishing.pub_rate_hz()),
        ] {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(RmiError::Config(format!("{} must be positive, got {}", name, rate)));
            }
        }

        if self.connector.queue_capacity == Some(0) {
            return Err(RmiError::Config("queue_capacity must be at least 1".to_string()));
        }

        Ok(())
    }
}

impl ConnectionConfig {
    /// Runtime connector settings for this connection
    pub fn settings(&self, connector: &ConnectorConfig) -> ConnectorSettings {
        ConnectorSettings {
            host: self.host.clone(),
            port: self.port,
            send_period: rate_to_period(connector.send_rate_hz()),
            poll_period: rate_to_period(connector.poll_rate_hz()),
            read_timeout: connector.read_timeout(),
            action_timeout: connector.action_timeout(),
            queue_capacity: connector.queue_capacity,
        }
    }
}

impl ConnectorConfig {
    /// Get sender loop rate with default fallback
    pub fn send_rate_hz(&self) -> f64 {
        self.send_rate_hz.unwrap_or(DEFAULT_SEND_RATE_HZ)
    }

    /// Get poller loop rate with default fallback
    pub fn poll_rate_hz(&self) -> f64 {
        self.poll_rate_hz.unwrap_or(DEFAULT_POLL_RATE_HZ)
    }

    /// Reply timeout; zero disables it
    pub fn read_timeout(&self) -> Option<Duration> {
        match self.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Motion acknowledgement timeout; unset or zero waits indefinitely
    pub fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl PublishingConfig {
    pub fn pub_rate_hz(&self) -> f64 {
        self.pub_rate_hz.unwrap_or(DEFAULT_PUB_RATE_HZ)
    }

    pub fn pretty(&self) -> bool {
        self.pretty.unwrap_or(false)
    }

    pub fn period(&self) -> Duration {
        rate_to_period(self.pub_rate_hz())
    }
}

pub(crate) fn rate_to_period(rate_hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / rate_hz)
}
