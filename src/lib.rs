//! RMI Driver - robot-movement-interface bridge for telnet robot controllers
//!
//! Translates vendor-neutral motion command batches into a controller's
//! line-oriented telnet protocol and republishes the controller's joint
//! state.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rmi_driver::{CommandList, Driver, DriverConfig, MotionCommand, ShutdownSignal};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DriverConfig::load_from_path("config/default_config.yaml")?;
//!     let driver = Driver::from_config(&config, ShutdownSignal::new())?;
//!     driver.connect_all()?;
//!
//!     let batch = CommandList {
//!         connection: None,
//!         commands: vec![MotionCommand::new("PTP").with_pose("JOINTS", vec![0.0; 7])],
//!     };
//!     driver.dispatch(&batch)?;
//!
//!     driver.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Command**: wire command value type and numeric formatting
//! - **CommandHandler / CommandRegister**: sample matching and ordered, first-match dispatch
//! - **vendor**: controller specific command sets (KEBA)
//! - **Connector**: action and query channels, command queue, sender and poller threads
//! - **Driver**: connection map, batch dispatch, joint state publishing
//! - **CommandStream**: JSON-lines batch input
//! - **TelemetryPublisher**: transport-agnostic joint state output

pub mod command;
pub mod config;
pub mod connector;
pub mod driver;
pub mod error;
pub mod handler;
pub mod message;
pub mod shutdown;
pub mod stream;
pub mod telemetry;
pub mod vendor;

#[cfg(test)]
pub(crate) mod test_support;

pub use command::{Command, CommandKind};
pub use config::{ConnectionConfig, ConnectorConfig, DriverConfig, PublishingConfig};
pub use connector::{Connector, ConnectorSettings, ConnectorState, JointState};
pub use driver::Driver;
pub use error::{Result, RmiError};
pub use handler::{CommandHandler, CommandRegister, CommandSet, FnHandler};
pub use message::{CommandList, JointStateMessage, MotionCommand};
pub use shutdown::ShutdownSignal;
pub use stream::{CommandStream, StreamStats};
pub use telemetry::{ConsoleTelemetry, NoOpTelemetry, TelemetryPublisher};
