//! Error types for RMI driver operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RmiError>;

#[derive(Error, Debug)]
pub enum RmiError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Telnet protocol error: {0}")]
    Protocol(String),

    #[error("No handler registered for command: {0}")]
    NoHandler(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Command queue full ({0} pending)")]
    QueueFull(usize),

    #[error("Unknown connection id: {0}")]
    UnknownConnection(u32),

    #[error("Batch failed at command {index} after {dispatched} dispatched: {source}")]
    Batch {
        index: usize,
        dispatched: usize,
        #[source]
        source: Box<RmiError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tokio task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
