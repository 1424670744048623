//! Command batch streaming
//!
//! Reads one JSON [`CommandList`] per line (stdin by default), dispatches
//! each batch through the [`Driver`] and reports the outcome through the
//! telemetry publisher. Ctrl+C aborts motion on every connection.

use crate::{
    driver::Driver,
    error::Result,
    message::{CommandList, MotionCommand},
    telemetry::TelemetryPublisher,
    RmiError,
};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Counters for one stream run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub batches: u64,
    pub commands: u64,
    pub failures: u64,
}

enum StreamEvent {
    Line(std::io::Result<usize>),
    Shutdown,
}

/// Batch processor reading newline-delimited JSON
pub struct CommandStream<R> {
    driver: Arc<Driver>,
    telemetry: Arc<dyn TelemetryPublisher>,
    reader: R,
    stop_at_eof: bool,
    eof_logged: bool,
    stats: StreamStats,
}

impl CommandStream<BufReader<Stdin>> {
    pub fn stdin(driver: Arc<Driver>, telemetry: Arc<dyn TelemetryPublisher>) -> Self {
        Self::new(driver, telemetry, BufReader::new(io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> CommandStream<R> {
    pub fn new(driver: Arc<Driver>, telemetry: Arc<dyn TelemetryPublisher>, reader: R) -> Self {
        Self {
            driver,
            telemetry,
            reader,
            stop_at_eof: false,
            eof_logged: false,
            stats: StreamStats::default(),
        }
    }

    /// Return at end of input instead of waiting for more
    pub fn stop_at_eof(mut self, stop: bool) -> Self {
        self.stop_at_eof = stop;
        self
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Process batches until Ctrl+C / SIGTERM, then abort all motion
    pub async fn run(&mut self) -> Result<StreamStats> {
        self.run_until(shutdown_signal()).await
    }

    /// Process batches until `shutdown` resolves
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<StreamStats> {
        info!("Command streaming active - one JSON command list per line");
        tokio::pin!(shutdown);
        let mut buffer = String::new();

        loop {
            buffer.clear();

            // Shutdown is polled first so a resolved signal is never polled again
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => StreamEvent::Shutdown,
                result = self.reader.read_line(&mut buffer) => StreamEvent::Line(result),
            };

            match event {
                StreamEvent::Line(Ok(0)) => {
                    if self.stop_at_eof {
                        info!("End of input reached");
                        break;
                    }
                    if !self.eof_logged {
                        info!("End of input reached, continuing to wait for more commands...");
                        self.eof_logged = true;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                StreamEvent::Line(Ok(_)) => {
                    self.eof_logged = false;
                    let line = buffer.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let line = line.to_string();
                    self.process_line(&line).await?;
                }
                StreamEvent::Line(Err(e)) => {
                    error!("Failed to read command input: {}", e);
                    return Err(e.into());
                }
                StreamEvent::Shutdown => {
                    info!("Shutdown signal received - aborting motion");
                    self.abort_all().await;
                    break;
                }
            }
        }

        Ok(self.stats.clone())
    }

    async fn process_line(&mut self, line: &str) -> Result<()> {
        let list: CommandList = match serde_json::from_str(line) {
            Ok(list) => list,
            Err(e) => {
                warn!("Ignoring malformed command list: {}", e);
                self.stats.failures += 1;
                return Ok(());
            }
        };
        self.stats.batches += 1;

        let outcome = self.dispatch(list.clone()).await?;
        let report = match &outcome {
            Ok(count) => {
                self.stats.commands += *count as u64;
                serde_json::json!({
                    "connection": list.connection,
                    "success": true,
                    "dispatched": count,
                })
            }
            Err(e) => {
                self.stats.failures += 1;
                let dispatched = match e {
                    RmiError::Batch { dispatched, .. } => *dispatched,
                    _ => 0,
                };
                self.stats.commands += dispatched as u64;
                serde_json::json!({
                    "connection": list.connection,
                    "success": false,
                    "dispatched": dispatched,
                    "error": e.to_string(),
                })
            }
        };

        if let Err(e) = self.telemetry.publish_custom("BATCH", &report).await {
            warn!("Failed to publish batch result: {}", e);
        }
        Ok(())
    }

    /// Dispatch off the async runtime; queries block on the socket
    async fn dispatch(&self, list: CommandList) -> Result<Result<usize>> {
        let driver = Arc::clone(&self.driver);
        Ok(tokio::task::spawn_blocking(move || driver.dispatch(&list)).await?)
    }

    async fn abort_all(&self) {
        for id in self.driver.connection_ids() {
            let list = CommandList {
                connection: Some(id),
                commands: vec![MotionCommand::new("ABORT")],
            };
            match self.dispatch(list).await {
                Ok(Ok(_)) => info!("Abort sent to connection {}", id),
                Ok(Err(e)) => error!("Failed to abort connection {}: {}", id, e),
                Err(e) => error!("Abort task for connection {} failed: {}", id, e),
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
