mod logger;
mod observer;
mod settings;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use iopanel_core::ChannelPanelController;
use iopanel_sdk::{Endpoint, PanelConfig};
use observer::LogObserver;
use settings::{Overrides, Settings, DEFAULT_CONFIG_FILE_NAME};
use std::{env::current_dir, path::PathBuf, sync::Arc};
use tracing::info;

/// iopanel - remote I/O panel over Modbus TCP
///
/// Switches and monitors the discrete output channels of a remote I/O
/// controller whose relays are mapped to holding registers.
#[derive(Parser)]
#[command(name = "iopanel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Remote I/O panel over Modbus TCP", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, 'iopanel.toml' in the current working directory is
    /// used when present.
    #[arg(short, long, env = "IOPANEL_CONFIG")]
    config: Option<PathBuf>,

    /// Device endpoint as host[:port]; a missing port means 502
    #[arg(short, long, conflicts_with_all = ["host", "port"])]
    endpoint: Option<String>,

    /// Device host name or address
    #[arg(long)]
    host: Option<String>,

    /// Device TCP port
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Modbus unit id
    #[arg(short, long)]
    unit_id: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and log channel states until Ctrl-C
    Watch,
    /// Switch one channel and print the states read back from the device
    #[command(group(ArgGroup::new("desired").required(true).args(["on", "off"])))]
    Set {
        /// Channel number as labelled on the panel (CH01 is 1)
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u16).range(1..))]
        channel: u16,
        #[arg(long)]
        on: bool,
        #[arg(long)]
        off: bool,
    },
    /// Read every channel once
    Read,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let (host, port) = match &self.endpoint {
            Some(raw) => {
                let endpoint = Endpoint::parse(raw);
                (Some(endpoint.host), Some(endpoint.port))
            }
            None => (self.host.clone(), self.port),
        };
        Overrides {
            host,
            port,
            unit_id: self.unit_id,
            // one-shot commands never auto-refresh
            poll_interval_ms: match self.command {
                Command::Watch => None,
                Command::Set { .. } | Command::Read => Some(0),
            },
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(p) => p.clone(),
        None => current_dir()
            .context("Failed to get current directory")?
            .join(DEFAULT_CONFIG_FILE_NAME),
    };
    let config_path_str = config_path.to_string_lossy().to_string();

    let settings = Settings::new(&config_path_str, &cli.overrides())
        .with_context(|| format!("Failed to load settings from {config_path_str}"))?;
    logger::init(&settings.log_level)?;
    settings
        .panel
        .validate()
        .context("Invalid panel configuration")?;

    let controller =
        ChannelPanelController::new(settings.panel.clone(), Arc::new(LogObserver::new()))?;
    let endpoint = settings.panel.endpoint();
    info!(
        endpoint = %endpoint,
        unit_id = settings.panel.unit_id,
        channels = settings.panel.channel_count,
        "Starting iopanel"
    );

    match cli.command {
        Command::Watch => watch(&controller, &settings, endpoint).await,
        Command::Set { channel, on, .. } => set(&controller, endpoint, channel - 1, on).await,
        Command::Read => read(&controller, endpoint).await,
    }
}

async fn watch(
    controller: &ChannelPanelController,
    settings: &Settings,
    endpoint: Endpoint,
) -> anyhow::Result<()> {
    controller
        .reconnect(endpoint.clone(), &settings.reconnect)
        .await
        .with_context(|| format!("Failed to connect to {endpoint}"))?;
    if !controller.is_polling() {
        info!("Auto-refresh disabled, showing the initial read only");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    let result = controller.disconnect().await;
    log_diagnostics(controller, &settings.panel);
    result.context("Failed to close the connection")
}

async fn set(
    controller: &ChannelPanelController,
    endpoint: Endpoint,
    index: u16,
    on: bool,
) -> anyhow::Result<()> {
    controller
        .connect_configured()
        .await
        .with_context(|| format!("Failed to connect to {endpoint}"))?;
    let outcome = controller.toggle(index, on).await;
    // best effort, the toggle outcome is what matters
    let _ = controller.disconnect().await;

    let states = outcome.with_context(|| format!("Failed to switch CH{:02}", index + 1))?;
    let confirmed = states.get(usize::from(index)).map(|s| s.is_on);
    println!("{}", LogObserver::render(&states));
    if confirmed != Some(on) {
        anyhow::bail!(
            "CH{:02} reads back {} after the write",
            index + 1,
            if on { "OFF" } else { "ON" }
        );
    }
    Ok(())
}

async fn read(controller: &ChannelPanelController, endpoint: Endpoint) -> anyhow::Result<()> {
    controller
        .connect_configured()
        .await
        .with_context(|| format!("Failed to connect to {endpoint}"))?;
    let outcome = controller.refresh().await;
    let _ = controller.disconnect().await;

    let states = outcome.context("Failed to read channels")?;
    println!("{}", LogObserver::render(&states));
    Ok(())
}

fn log_diagnostics(controller: &ChannelPanelController, config: &PanelConfig) {
    let diag = controller.diagnostics();
    info!(
        channels = config.channel_count,
        total = diag.total_requests,
        failed = diag.failed_requests,
        success_rate = %format!("{:.1}%", diag.success_rate() * 100.0),
        avg_ms = diag.average_response_time.as_millis() as u64,
        last_error = diag.last_error.as_deref().unwrap_or("-"),
        "Session summary"
    );
}
