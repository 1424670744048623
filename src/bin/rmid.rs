//! RMI Driver Daemon
//!
//! Connects to the configured robot controllers, reads command batches as
//! JSON lines from stdin and prints joint state as JSON lines on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use rmi_driver::{CommandStream, ConsoleTelemetry, Driver, DriverConfig, ShutdownSignal, TelemetryPublisher};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rmid")]
#[command(about = "Robot movement interface driver for telnet robot controllers")]
#[command(version)]
struct Args {
    /// Path to the driver configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Exit once stdin is exhausted instead of waiting for more batches
    #[arg(long)]
    exit_on_eof: bool,

    /// Pretty-print joint state JSON
    #[arg(long)]
    pretty: bool,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("DEFAULT_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/default_config.yaml".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.get_config_path();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    info!("RMI Driver");
    info!("{}", "=".repeat(50));
    info!("Using config: {}", config_path);

    let config = DriverConfig::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let shutdown = ShutdownSignal::new();
    let driver = Driver::from_config(&config, shutdown.clone()).context("Failed to create driver")?;

    if let Err(e) = driver.connect_all() {
        error!("Connection failed: {}", e);
        error!("Make sure:");
        error!("   - The robot controller is running with its telnet ports open");
        error!("   - Network connectivity is available");
        error!("   - Host and port in the configuration are correct");
        driver.shutdown();
        return Err(e.into());
    }
    info!("Driver ready for commands!");

    let driver = Arc::new(driver);
    let telemetry: Arc<dyn TelemetryPublisher> = Arc::new(if args.pretty || config.publishing.pretty() {
        ConsoleTelemetry::pretty()
    } else {
        ConsoleTelemetry::new()
    });

    let publisher = tokio::spawn(Arc::clone(&driver).run_publisher(
        Arc::clone(&telemetry),
        config.publishing.period(),
    ));

    let mut stream = CommandStream::stdin(Arc::clone(&driver), telemetry).stop_at_eof(args.exit_on_eof);
    let result = stream.run().await;

    info!("Performing graceful shutdown");
    let closing = Arc::clone(&driver);
    tokio::task::spawn_blocking(move || closing.shutdown())
        .await
        .context("Failed during shutdown")?;
    let _ = publisher.await;

    let stats = result.context("Command stream error")?;
    info!(
        "Shutdown complete ({} batches, {} commands, {} failures)",
        stats.batches, stats.commands, stats.failures
    );
    Ok(())
}
