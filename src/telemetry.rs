//! Telemetry abstraction for outbound joint state
//!
//! Provides a trait-based interface for publishing joint state to any
//! transport (ROS bridge, MQTT, Zenoh, stdout, ...).

use crate::message::JointStateMessage;
use async_trait::async_trait;

/// Trait for publishing robot telemetry
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    /// Publish one connection's joint state
    async fn publish_joint_state(&self, data: &JointStateMessage) -> anyhow::Result<()>;

    /// Optional: Publish custom telemetry data
    async fn publish_custom(&self, topic: &str, data: &serde_json::Value) -> anyhow::Result<()> {
        let _ = (topic, data);
        Ok(())
    }
}

/// No-operation telemetry publisher
#[derive(Debug, Clone, Default)]
pub struct NoOpTelemetry;

#[async_trait]
impl TelemetryPublisher for NoOpTelemetry {
    async fn publish_joint_state(&self, _data: &JointStateMessage) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Console telemetry publisher
///
/// Prints joint state to stdout as one JSON document per message.
#[derive(Debug, Clone, Default)]
pub struct ConsoleTelemetry {
    pub pretty_print: bool,
}

impl ConsoleTelemetry {
    pub fn new() -> Self {
        Self { pretty_print: false }
    }

    pub fn pretty() -> Self {
        Self { pretty_print: true }
    }

    fn render<T: serde::Serialize>(&self, data: &T) -> serde_json::Result<String> {
        if self.pretty_print {
            serde_json::to_string_pretty(data)
        } else {
            serde_json::to_string(data)
        }
    }
}

#[async_trait]
impl TelemetryPublisher for ConsoleTelemetry {
    async fn publish_joint_state(&self, data: &JointStateMessage) -> anyhow::Result<()> {
        println!("[JOINT_STATE] {}", self.render(data)?);
        Ok(())
    }

    async fn publish_custom(&self, topic: &str, data: &serde_json::Value) -> anyhow::Result<()> {
        println!("[{}] {}", topic, self.render(data)?);
        Ok(())
    }
}
