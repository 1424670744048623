//! Vendor-neutral messages exchanged with the outside world
//!
//! [`MotionCommand`] follows the robot-movement-interface command layout.
//! [`CommandList`] is one inbound batch and [`JointStateMessage`] is the
//! periodic outbound joint state.

use serde::{Deserialize, Serialize};

/// Abstract motion or query instruction received from outside the driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionCommand {
    pub command_type: String,
    pub pose_reference: String,
    pub pose_type: String,
    pub pose: Vec<f64>,
    pub velocity_type: String,
    pub velocity: Vec<f64>,
    pub acceleration_type: String,
    pub acceleration: Vec<f64>,
}

impl MotionCommand {
    pub fn new(command_type: &str) -> Self {
        Self {
            command_type: command_type.to_string(),
            ..Default::default()
        }
    }

    pub fn with_pose(mut self, pose_type: &str, pose: Vec<f64>) -> Self {
        self.pose_type = pose_type.to_string();
        self.pose = pose;
        self
    }

    pub fn with_velocity(mut self, velocity_type: &str, velocity: Vec<f64>) -> Self {
        self.velocity_type = velocity_type.to_string();
        self.velocity = velocity;
        self
    }

    pub fn with_acceleration(mut self, acceleration_type: &str, acceleration: Vec<f64>) -> Self {
        self.acceleration_type = acceleration_type.to_string();
        self.acceleration = acceleration;
        self
    }

    /// Treat `self` as a handler sample and test `candidate` against it
    ///
    /// Empty sample fields are wildcards. Used string fields must be equal,
    /// a used pose must have the same length.
    pub fn matches_sample(&self, candidate: &MotionCommand) -> bool {
        !(used_and_not_equal(&self.command_type, &candidate.command_type)
            || used_and_not_equal(&self.pose_reference, &candidate.pose_reference)
            || used_and_not_equal(&self.pose_type, &candidate.pose_type)
            || used_and_different_len(&self.pose, &candidate.pose)
            || used_and_not_equal(&self.velocity_type, &candidate.velocity_type))
    }
}

fn used_and_not_equal(sample: &str, value: &str) -> bool {
    !sample.is_empty() && sample != value
}

fn used_and_different_len(sample: &[f64], value: &[f64]) -> bool {
    !sample.is_empty() && sample.len() != value.len()
}

/// One inbound batch of abstract commands, processed strictly in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandList {
    /// Target connection id; the first configured connection when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<u32>,
    #[serde(default)]
    pub commands: Vec<MotionCommand>,
}

/// Outbound joint state for one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointStateMessage {
    pub connection: u32,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    /// Unix epoch seconds at publish time
    pub stamp: f64,
}
