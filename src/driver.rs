//! Driver - routes command batches to connectors and republishes joint state
//!
//! The driver owns one [`Connector`] and one [`CommandRegister`] per
//! configured controller. Batches are translated command by command and
//! either queued (motion) or sent synchronously (queries). Joint state is
//! republished on its own cadence, independent of the connector pollers.

use crate::{
    command::{CommandKind, ABORT_VERB},
    config::DriverConfig,
    connector::{Connector, ConnectorSettings},
    error::{Result, RmiError},
    handler::CommandRegister,
    message::{CommandList, JointStateMessage, MotionCommand},
    shutdown::ShutdownSignal,
    telemetry::TelemetryPublisher,
    vendor,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

struct Connection {
    connector: Arc<Connector>,
    register: CommandRegister,
}

/// Multi-robot command router
pub struct Driver {
    connections: BTreeMap<u32, Connection>,
    next_id: u32,
    shutdown: ShutdownSignal,
}

impl Driver {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 0,
            shutdown,
        }
    }

    /// Build a driver with every configured connection (not yet connected)
    pub fn from_config(config: &DriverConfig, shutdown: ShutdownSignal) -> Result<Self> {
        let mut driver = Self::new(shutdown);
        for conn in &config.connections {
            let register = CommandRegister::new(vendor::command_set(&conn.command_set)?);
            driver.add_connection(conn.settings(&config.connector), conn.joints.clone(), register);
        }
        Ok(driver)
    }

    /// Register a controller and return its connection id
    pub fn add_connection(
        &mut self,
        settings: ConnectorSettings,
        joint_names: Vec<String>,
        mut register: CommandRegister,
    ) -> u32 {
        register.initialize(&joint_names);

        let id = self.next_id;
        self.next_id += 1;
        info!(
            "Connection {}: {}:{} using '{}' command set ({} handlers)",
            id,
            settings.host,
            settings.port,
            register.command_set_name(),
            register.len()
        );

        let connector = Arc::new(Connector::new(settings, joint_names, self.shutdown.clone()));
        self.connections.insert(id, Connection { connector, register });
        id
    }

    /// Connect every connector, stopping at the first failure
    pub fn connect_all(&self) -> Result<()> {
        for (id, conn) in &self.connections {
            info!("Connecting connection {} to {}:{}", id, conn.connector.host(), conn.connector.port());
            conn.connector.connect()?;
        }
        Ok(())
    }

    pub fn connector(&self, id: u32) -> Result<&Arc<Connector>> {
        self.connections
            .get(&id)
            .map(|c| &c.connector)
            .ok_or(RmiError::UnknownConnection(id))
    }

    pub fn connection_ids(&self) -> Vec<u32> {
        self.connections.keys().copied().collect()
    }

    fn target(&self, list: &CommandList) -> Result<(u32, &Connection)> {
        match list.connection {
            Some(id) => self
                .connections
                .get(&id)
                .map(|c| (id, c))
                .ok_or(RmiError::UnknownConnection(id)),
            None => self
                .connections
                .iter()
                .next()
                .map(|(id, c)| (*id, c))
                .ok_or_else(|| RmiError::Config("No connections configured".to_string())),
        }
    }

    /// Translate and dispatch a batch in order
    ///
    /// Returns the number of commands dispatched. The first failure stops
    /// the batch; commands already queued from it stay queued.
    pub fn dispatch(&self, list: &CommandList) -> Result<usize> {
        let (id, conn) = self.target(list)?;
        debug!("Dispatching {} commands to connection {}", list.commands.len(), id);

        for (index, msg) in list.commands.iter().enumerate() {
            if let Err(source) = Self::dispatch_one(conn, msg) {
                error!("Command {} for connection {} failed: {}", index, id, source);
                return Err(RmiError::Batch {
                    index,
                    dispatched: index,
                    source: Box::new(source),
                });
            }
        }

        Ok(list.commands.len())
    }

    fn dispatch_one(conn: &Connection, msg: &MotionCommand) -> Result<()> {
        let command = conn.register.translate(msg)?;

        match command.kind() {
            CommandKind::Action => {
                conn.connector.add_command(command)?;
            }
            CommandKind::Query => {
                if command.name() == ABORT_VERB {
                    let dropped = conn.connector.clear_commands();
                    if dropped > 0 {
                        info!("Abort dropped {} queued commands", dropped);
                    }
                }
                let reply = conn.connector.send_command(&command)?;
                info!("{} -> {}", command, reply);
            }
        }
        Ok(())
    }

    /// Current joint state of every connection that has been polled at least once
    pub fn joint_states(&self) -> Vec<JointStateMessage> {
        let stamp = Utc::now().timestamp_micros() as f64 / 1e6;
        self.connections
            .iter()
            .filter_map(|(id, conn)| {
                let state = conn.connector.joint_state();
                state.stamp?;
                Some(JointStateMessage {
                    connection: *id,
                    name: state.names.clone(),
                    position: state.positions.clone(),
                    stamp,
                })
            })
            .collect()
    }

    /// Publish one round of joint state, returning how many messages went out
    pub async fn publish_state(&self, telemetry: &dyn TelemetryPublisher) -> anyhow::Result<usize> {
        let states = self.joint_states();
        for state in &states {
            telemetry.publish_joint_state(state).await?;
        }
        Ok(states.len())
    }

    /// Publish joint state every `period` until shutdown
    pub async fn run_publisher(self: Arc<Self>, telemetry: Arc<dyn TelemetryPublisher>, period: Duration) {
        info!("Joint state publisher running every {:?}", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if self.shutdown.is_triggered() {
                break;
            }
            if let Err(e) = self.publish_state(telemetry.as_ref()).await {
                warn!("Failed to publish joint state: {}", e);
            }
        }
        info!("Joint state publisher stopped");
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Signal shutdown and close every connector
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        for conn in self.connections.values() {
            conn.connector.shutdown();
        }
    }
}
