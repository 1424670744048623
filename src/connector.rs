//! Dual-channel telnet connector for one robot controller
//!
//! A connector owns two TCP connections to the controller: motion commands
//! go out on the action channel (`port`), state queries on the query
//! channel (`port + 1`). Every request yields exactly one newline
//! terminated reply line.
//!
//! Two background threads run while connected:
//! - the sender loop drains the action queue in FIFO order
//! - the poller loop queries joint positions and the tool frame and
//!   publishes them as a [`JointState`] snapshot
//!
//! The queue, each channel and the snapshot are guarded separately so
//! enqueuing, sending and reading state never wait on each other.

use crate::{
    command::{parse_values, Command, CommandKind},
    config::{rate_to_period, DEFAULT_POLL_RATE_HZ, DEFAULT_READ_TIMEOUT_MS, DEFAULT_SEND_RATE_HZ},
    error::{Result, RmiError},
    shutdown::ShutdownSignal,
};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Query for the current joint positions
pub const GET_JOINT_POSITION: &str = "get joint position";
/// Query for the current tool frame
pub const GET_TOOL_FRAME: &str = "get tool frame";

/// Connector lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
    Closed,
    /// A background loop lost the controller; fatal until `connect` is called again
    Faulted(String),
}

/// Where and how fast a connector talks to its controller
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub host: String,
    /// Action channel port, the query channel uses `port + 1`
    pub port: u16,
    /// Sender loop idle interval
    pub send_period: Duration,
    /// Poller loop cadence
    pub poll_period: Duration,
    /// Reply timeout on the query channel
    pub read_timeout: Option<Duration>,
    /// Reply timeout on the action channel; motion acknowledgements may
    /// take as long as the motion itself, so `None` waits indefinitely
    pub action_timeout: Option<Duration>,
    pub queue_capacity: Option<usize>,
}

impl ConnectorSettings {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            send_period: rate_to_period(DEFAULT_SEND_RATE_HZ),
            poll_period: rate_to_period(DEFAULT_POLL_RATE_HZ),
            read_timeout: Some(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS)),
            action_timeout: None,
            queue_capacity: None,
        }
    }

    pub fn query_port(&self) -> Result<u16> {
        self.port.checked_add(1).ok_or_else(|| {
            RmiError::Config(format!("No query port available above {}", self.port))
        })
    }
}

/// Latest joint state reported by the controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointState {
    pub names: Vec<String>,
    pub positions: Vec<f64>,
    pub tool_frame: Option<Vec<f64>>,
    /// When the positions were received; `None` until the first poll
    pub stamp: Option<DateTime<Utc>>,
    /// Number of successful polls
    pub updates: u64,
}

/// One line-oriented socket
struct Channel {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Channel {
    fn open(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| RmiError::Connection(format!("Failed to resolve {}:{}: {}", host, port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(RmiError::Connection(format!("No address found for {}:{}", host, port)));
        }

        let stream = TcpStream::connect(&addrs[..])
            .map_err(|e| RmiError::Connection(format!("Failed to connect to {}:{}: {}", host, port, e)))?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        stream.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    /// Write one request line and block until its reply line arrives
    fn exchange(&mut self, request: &str) -> Result<String> {
        self.writer
            .write_all(request.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| RmiError::Connection(format!("Failed to send command: {}", e)))?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                RmiError::Connection("Timed out waiting for controller reply".to_string())
            }
            _ => RmiError::Connection(format!("Failed to read reply: {}", e)),
        })?;

        if read == 0 {
            return Err(RmiError::Connection("Controller closed the connection".to_string()));
        }
        if !reply.ends_with('\n') {
            return Err(RmiError::Protocol(format!("Unterminated reply: {:?}", reply)));
        }

        Ok(reply.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Handle that can hang up the socket without holding the channel
    fn hangup_handle(&self) -> Result<TcpStream> {
        Ok(self.writer.try_clone()?)
    }

    fn close(self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum PollError {
    /// The controller answered with something unusable; retried next cycle
    Parse(RmiError),
    /// The channel is gone
    Transport(RmiError),
}

/// Connection to one controller instance
pub struct Connector {
    settings: ConnectorSettings,
    joint_names: Vec<String>,
    action_channel: Mutex<Option<Channel>>,
    query_channel: Mutex<Option<Channel>>,
    /// Clones of both sockets, used to cut a blocked exchange short
    hangup: Mutex<Vec<TcpStream>>,
    queue: Mutex<VecDeque<Command>>,
    joint_state: ArcSwap<JointState>,
    state: Mutex<ConnectorState>,
    shutdown: ShutdownSignal,
    /// Signal for the loops of the current connection, a child of `shutdown`
    session: Mutex<ShutdownSignal>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connector {
    pub fn new(settings: ConnectorSettings, joint_names: Vec<String>, shutdown: ShutdownSignal) -> Self {
        let initial = JointState {
            names: joint_names.clone(),
            ..Default::default()
        };
        Self {
            settings,
            joint_names,
            action_channel: Mutex::new(None),
            query_channel: Mutex::new(None),
            hangup: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            joint_state: ArcSwap::from_pointee(initial),
            state: Mutex::new(ConnectorState::Disconnected),
            session: Mutex::new(shutdown.child()),
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn host(&self) -> &str {
        &self.settings.host
    }

    pub fn port(&self) -> u16 {
        self.settings.port
    }

    pub fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    pub fn state(&self) -> ConnectorState {
        lock(&self.state).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectorState::Connected
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn set_state(&self, state: ConnectorState) {
        *lock(&self.state) = state;
    }

    /// Open both channels and start the sender and poller loops
    ///
    /// Either channel failing leaves the connector `Disconnected` with
    /// nothing open.
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        let host = self.settings.host.clone();
        let port = self.settings.port;
        let query_port = self.settings.query_port()?;

        {
            let mut state = lock(&self.state);
            if matches!(
                *state,
                ConnectorState::Connecting | ConnectorState::Connected | ConnectorState::ShuttingDown
            ) {
                return Err(RmiError::Connection(format!(
                    "{} is already {:?}",
                    self.endpoint(),
                    *state
                )));
            }
            *state = ConnectorState::Connecting;
        }

        // Loops left over from a faulted connection have already been told to stop
        self.join_workers();

        let action = match Channel::open(&host, port, self.settings.action_timeout) {
            Ok(channel) => channel,
            Err(e) => {
                self.set_state(ConnectorState::Disconnected);
                return Err(e);
            }
        };
        info!("Action connection established to {}:{}", host, port);

        let query = match Channel::open(&host, query_port, self.settings.read_timeout) {
            Ok(channel) => channel,
            Err(e) => {
                action.close();
                self.set_state(ConnectorState::Disconnected);
                return Err(e);
            }
        };
        info!("Query connection established to {}:{}", host, query_port);

        let handles = match (action.hangup_handle(), query.hangup_handle()) {
            (Ok(a), Ok(q)) => vec![a, q],
            (Err(e), _) | (_, Err(e)) => {
                action.close();
                query.close();
                self.set_state(ConnectorState::Disconnected);
                return Err(e);
            }
        };
        *lock(&self.hangup) = handles;
        *lock(&self.action_channel) = Some(action);
        *lock(&self.query_channel) = Some(query);

        let session = self.shutdown.child();
        *lock(&self.session) = session.clone();
        self.set_state(ConnectorState::Connected);

        if let Err(e) = self.spawn_workers(&session) {
            session.trigger();
            self.hang_up();
            self.join_workers();
            self.close_channels();
            self.set_state(ConnectorState::Disconnected);
            return Err(e);
        }

        Ok(())
    }

    fn spawn_workers(self: &Arc<Self>, session: &ShutdownSignal) -> Result<()> {
        let sender = {
            let this = Arc::clone(self);
            let signal = session.clone();
            thread::Builder::new()
                .name(format!("rmi-send-{}", self.settings.port))
                .spawn(move || this.run_sender(signal))?
        };
        lock(&self.workers).push(sender);

        let poller = {
            let this = Arc::clone(self);
            let signal = session.clone();
            thread::Builder::new()
                .name(format!("rmi-poll-{}", self.settings.port))
                .spawn(move || this.run_poller(signal))?
        };
        lock(&self.workers).push(poller);

        Ok(())
    }

    /// Send one command on its channel and return the reply line
    ///
    /// Blocks while another thread uses the same channel and until the
    /// controller answers or the read timeout expires.
    pub fn send_command(&self, command: &Command) -> Result<String> {
        if command.is_empty() {
            return Err(RmiError::Protocol("Refusing to send an empty command".to_string()));
        }

        let (channel, label) = match command.kind() {
            CommandKind::Action => (&self.action_channel, "action"),
            CommandKind::Query => (&self.query_channel, "query"),
        };

        let mut guard = lock(channel);
        let channel = guard.as_mut().ok_or_else(|| {
            RmiError::Connection(format!("{} channel to {} is not connected", label, self.endpoint()))
        })?;
        channel.exchange(&command.to_wire())
    }

    /// Queue a motion command for the sender loop
    ///
    /// Returns `Ok(false)` without queuing for anything but action commands.
    /// With a configured capacity a full queue rejects the new command.
    /// Commands may be queued before `connect`, but a faulted or closed
    /// connector has no sender loop and refuses them.
    pub fn add_command(&self, command: Command) -> Result<bool> {
        if command.kind() != CommandKind::Action {
            debug!("Not queuing {:?} command '{}'", command.kind(), command.name());
            return Ok(false);
        }

        match self.state() {
            ConnectorState::Faulted(reason) => {
                return Err(RmiError::Connection(format!(
                    "{} is faulted: {}",
                    self.endpoint(),
                    reason
                )));
            }
            ConnectorState::ShuttingDown | ConnectorState::Closed => {
                return Err(RmiError::Connection(format!("{} is closed", self.endpoint())));
            }
            _ => {}
        }

        let mut queue = lock(&self.queue);
        if let Some(capacity) = self.settings.queue_capacity {
            if queue.len() >= capacity {
                return Err(RmiError::QueueFull(queue.len()));
            }
        }
        queue.push_back(command);
        Ok(true)
    }

    /// Drop every pending motion command, returning how many were dropped
    pub fn clear_commands(&self) -> usize {
        std::mem::take(&mut *lock(&self.queue)).len()
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Latest joint state snapshot
    pub fn joint_state(&self) -> Arc<JointState> {
        self.joint_state.load_full()
    }

    fn run_sender(self: Arc<Self>, shutdown: ShutdownSignal) {
        info!("Sender loop started for {}", self.endpoint());

        while !shutdown.is_triggered() {
            // The queue lock is released before the send so callers can keep queuing
            let next = lock(&self.queue).pop_front();
            let Some(command) = next else {
                thread::sleep(self.settings.send_period);
                continue;
            };

            info!("Cmd ({}): {}", command.to_wire().len(), command);
            match self.send_command(&command) {
                Ok(response) => info!("Cmd response: {}", response),
                Err(_) if shutdown.is_triggered() => break,
                Err(e) => {
                    error!("Sending '{}' to {} failed: {}", command, self.endpoint(), e);
                    self.fault(&shutdown, e);
                    break;
                }
            }
        }

        info!("Sender loop stopped for {}", self.endpoint());
    }

    fn run_poller(self: Arc<Self>, shutdown: ShutdownSignal) {
        info!("Poller loop started for {}", self.endpoint());

        let get_joint_position = Command::new(CommandKind::Query, GET_JOINT_POSITION);
        let get_tool_frame = Command::new(CommandKind::Query, GET_TOOL_FRAME);
        let period = self.settings.poll_period;
        let mut next_cycle = Instant::now();

        while !shutdown.is_triggered() {
            match self.poll_once(&get_joint_position, &get_tool_frame) {
                Ok(()) => {}
                Err(PollError::Parse(e)) => {
                    warn!("Unable to parse joint positions from {}: {}", self.endpoint(), e);
                }
                Err(PollError::Transport(_)) if shutdown.is_triggered() => break,
                Err(PollError::Transport(e)) => {
                    error!("Polling {} failed: {}", self.endpoint(), e);
                    self.fault(&shutdown, e);
                    break;
                }
            }

            next_cycle += period;
            let now = Instant::now();
            if next_cycle > now {
                thread::sleep(next_cycle - now);
            } else {
                // Fell behind; restart the cadence instead of bursting
                next_cycle = now;
            }
        }

        info!("Poller loop stopped for {}", self.endpoint());
    }

    fn poll_once(&self, get_joint_position: &Command, get_tool_frame: &Command) -> std::result::Result<(), PollError> {
        let response = self.send_command(get_joint_position).map_err(PollError::Transport)?;
        let positions = parse_values(&response).map_err(PollError::Parse)?;
        if !self.joint_names.is_empty() && positions.len() != self.joint_names.len() {
            return Err(PollError::Parse(RmiError::Protocol(format!(
                "Expected {} joint positions, got {}",
                self.joint_names.len(),
                positions.len()
            ))));
        }

        let response = self.send_command(get_tool_frame).map_err(PollError::Transport)?;
        let tool_frame = match parse_values(&response) {
            Ok(values) => Some(values),
            Err(e) => {
                debug!("Ignoring tool frame from {}: {}", self.endpoint(), e);
                None
            }
        };

        let updates = self.joint_state.load().updates + 1;
        self.joint_state.store(Arc::new(JointState {
            names: self.joint_names.clone(),
            positions,
            tool_frame,
            stamp: Some(Utc::now()),
            updates,
        }));
        Ok(())
    }

    /// Mark the connection dead, stop the other loop and hang up both sockets
    fn fault(&self, session: &ShutdownSignal, cause: RmiError) {
        {
            let mut state = lock(&self.state);
            if *state == ConnectorState::Connected {
                *state = ConnectorState::Faulted(cause.to_string());
            }
        }
        session.trigger();
        self.hang_up();
    }

    /// Shut both sockets down, failing any exchange blocked on them
    fn hang_up(&self) {
        for socket in std::mem::take(&mut *lock(&self.hangup)) {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    fn join_workers(&self) {
        let workers = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                error!("Connector thread {} panicked", name);
            }
        }
    }

    fn close_channels(&self) {
        if let Some(channel) = lock(&self.action_channel).take() {
            channel.close();
        }
        if let Some(channel) = lock(&self.query_channel).take() {
            channel.close();
        }
    }

    /// Stop both loops, wait for them and close the sockets
    ///
    /// An exchange in flight is cut off rather than waited for.
    pub fn shutdown(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ConnectorState::Closed {
                return;
            }
            *state = ConnectorState::ShuttingDown;
        }
        info!("Shutting down connector {}", self.endpoint());

        lock(&self.session).trigger();
        self.hang_up();
        self.join_workers();
        self.close_channels();

        self.set_state(ConnectorState::Closed);
        info!("Connector {} closed", self.endpoint());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{hang_up_controller, wait_until, FakeController};

    fn settings(port: u16) -> ConnectorSettings {
        ConnectorSettings {
            send_period: Duration::from_millis(5),
            poll_period: Duration::from_millis(5),
            read_timeout: Some(Duration::from_secs(2)),
            ..ConnectorSettings::new("127.0.0.1", port)
        }
    }

    fn joints(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("a{}", i)).collect()
    }

    fn connected(fake: &FakeController, joint_names: Vec<String>) -> Arc<Connector> {
        let connector = Arc::new(Connector::new(settings(fake.port), joint_names, ShutdownSignal::new()));
        connector.connect().unwrap();
        connector
    }

    #[test]
    fn test_actions_sent_in_enqueue_order() {
        let fake = FakeController::start(vec!["0 0 0 0 0 0 0"]);
        let connector = connected(&fake, joints(7));

        for i in 1..=3 {
            let cmd = Command::with_params(CommandKind::Action, "joint move", format!("{}", i));
            assert!(connector.add_command(cmd).unwrap());
        }

        assert!(wait_until(Duration::from_secs(3), || fake.action_lines().len() >= 3));
        assert_eq!(
            fake.action_lines(),
            vec!["joint move 1", "joint move 2", "joint move 3"]
        );
        assert_eq!(connector.queue_len(), 0);
        connector.shutdown();
    }

    #[test]
    fn test_queue_only_accepts_actions() {
        let connector = Connector::new(settings(1), vec![], ShutdownSignal::new());
        assert!(!connector.add_command(Command::new(CommandKind::Query, "abort")).unwrap());
        assert_eq!(connector.queue_len(), 0);
    }

    #[test]
    fn test_queue_capacity_and_clear() {
        let mut settings = settings(1);
        settings.queue_capacity = Some(2);
        let connector = Connector::new(settings, vec![], ShutdownSignal::new());

        assert!(connector.add_command(Command::new(CommandKind::Action, "a")).unwrap());
        assert!(connector.add_command(Command::new(CommandKind::Action, "b")).unwrap());
        assert!(matches!(
            connector.add_command(Command::new(CommandKind::Action, "c")),
            Err(RmiError::QueueFull(2))
        ));

        assert_eq!(connector.clear_commands(), 2);
        assert_eq!(connector.queue_len(), 0);
    }

    #[test]
    fn test_poller_updates_joint_state() {
        let fake = FakeController::start(vec!["0.1 0.2 0.3 0.4 0.5 0.6 0.7"]);
        let connector = connected(&fake, joints(7));

        assert!(wait_until(Duration::from_secs(3), || connector.joint_state().updates > 0));
        let state = connector.joint_state();
        assert_eq!(state.names, joints(7));
        assert_eq!(state.positions, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
        assert!(state.tool_frame.is_some());
        assert!(state.stamp.is_some());

        let queries = fake.query_lines();
        assert_eq!(queries[0], GET_JOINT_POSITION);
        assert_eq!(queries[1], GET_TOOL_FRAME);
        connector.shutdown();
    }

    #[test]
    fn test_poller_skips_unparsable_reply() {
        let fake = FakeController::start(vec!["not ready", "1 2 3", "1 2 3 4 5 6 7"]);
        let connector = connected(&fake, joints(7));

        assert!(wait_until(Duration::from_secs(3), || connector.joint_state().updates > 0));
        assert_eq!(connector.joint_state().positions, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(connector.is_connected());
        connector.shutdown();
    }

    #[test]
    fn test_query_is_answered_synchronously() {
        let fake = FakeController::start(vec!["0 0 0 0 0 0 0"]);
        let connector = connected(&fake, joints(7));

        let reply = connector.send_command(&Command::new(CommandKind::Query, "abort")).unwrap();
        assert_eq!(reply, "done");
        assert!(fake.query_lines().contains(&"abort".to_string()));
        connector.shutdown();
    }

    #[test]
    fn test_connect_failure_is_reported() {
        let port = FakeController::unused_port();
        let connector = Arc::new(Connector::new(settings(port), vec![], ShutdownSignal::new()));

        assert!(matches!(connector.connect(), Err(RmiError::Connection(_))));
        assert_eq!(connector.state(), ConnectorState::Disconnected);
    }

    #[test]
    fn test_send_without_connection_fails() {
        let connector = Connector::new(settings(1), vec![], ShutdownSignal::new());
        assert!(connector.send_command(&Command::new(CommandKind::Query, "abort")).is_err());
        assert!(connector.send_command(&Command::new(CommandKind::Query, "")).is_err());
    }

    #[test]
    fn test_shutdown_closes_connector() {
        let fake = FakeController::start(vec!["0 0 0 0 0 0 0"]);
        let connector = connected(&fake, joints(7));
        assert!(connector.connect().is_err());

        connector.shutdown();
        assert_eq!(connector.state(), ConnectorState::Closed);
        assert!(connector.send_command(&Command::new(CommandKind::Query, "abort")).is_err());

        // Idempotent
        connector.shutdown();
        assert_eq!(connector.state(), ConnectorState::Closed);
    }

    #[test]
    fn test_peer_hang_up_faults_connector() {
        let connector = Arc::new(Connector::new(
            settings(hang_up_controller()),
            joints(7),
            ShutdownSignal::new(),
        ));
        connector.connect().unwrap();

        assert!(wait_until(Duration::from_secs(3), || matches!(
            connector.state(),
            ConnectorState::Faulted(_)
        )));

        let motion = Command::with_params(CommandKind::Action, "joint move", "0 0 0 0 0 0 0");
        assert!(matches!(connector.add_command(motion.clone()), Err(RmiError::Connection(_))));
        assert_eq!(connector.queue_len(), 0);
        assert!(connector.send_command(&Command::new(CommandKind::Query, "abort")).is_err());

        connector.shutdown();
        assert_eq!(connector.state(), ConnectorState::Closed);
        assert!(matches!(connector.add_command(motion), Err(RmiError::Connection(_))));
    }

    #[test]
    fn test_reconnect_after_fault() {
        let fake = FakeController::start(vec!["0 0 0 0 0 0 0"]);
        let connector = connected(&fake, joints(7));
        connector.fault(&lock(&connector.session).clone(), RmiError::Connection("lost".to_string()));
        assert_eq!(connector.state(), ConnectorState::Faulted("Connection failed: lost".to_string()));

        connector.connect().unwrap();
        assert!(connector.is_connected());
        assert!(connector.add_command(Command::new(CommandKind::Action, "joint move")).unwrap());
        assert!(wait_until(Duration::from_secs(3), || fake.action_lines().contains(&"joint move".to_string())));
        connector.shutdown();
    }

    #[test]
    fn test_global_shutdown_stops_loops() {
        let fake = FakeController::start(vec!["0 0 0 0 0 0 0"]);
        let root = ShutdownSignal::new();
        let connector = Arc::new(Connector::new(settings(fake.port), joints(7), root.clone()));
        connector.connect().unwrap();

        root.trigger();
        connector.shutdown();
        assert_eq!(connector.state(), ConnectorState::Closed);
    }
}
