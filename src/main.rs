//! `vigil`: serve live telemetry over WebSocket.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use vigil_logging::{LogFormat, LoggingConfig, parse_level};
use vigil_server::{ServerConfig, VigilServer};
use vigil_settings::{LoggingSettings, VigilSettings, load_settings, load_settings_from_path};

mod demo;

/// Live telemetry WebSocket server.
#[derive(Debug, Parser)]
#[command(name = "vigil", version, about)]
struct Args {
    /// Settings file (defaults to `~/.vigil/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (`0` picks a free port).
    #[arg(long)]
    port: Option<u16>,
    /// Server name advertised to clients.
    #[arg(long)]
    name: Option<String>,
    /// Publish a demo channel, parameters and services.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    apply_args(&mut settings, &args);

    vigil_logging::init_logging(&logging_config(&settings.logging)?)?;
    let metrics = vigil_server::metrics::install_recorder()?;

    let mut config = ServerConfig::from_settings(&settings.server);
    if args.demo {
        config = demo::configure(config);
    }
    let shutdown_grace = config.shutdown_grace();
    let mut server = VigilServer::new(config).metrics_handle(metrics);
    if args.demo {
        server = demo::register(server);
    }

    let handle = server.start().await?;
    info!(addr = %handle.local_addr(), "vigil server ready");

    if args.demo {
        demo::run(&handle, Duration::from_millis(100), tokio::signal::ctrl_c()).await?;
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl+c")?;
    }

    info!(grace_ms = shutdown_grace.as_millis(), "shutting down");
    handle.stop().await;
    Ok(())
}

/// Command-line flags take priority over file and environment settings.
fn apply_args(settings: &mut VigilSettings, args: &Args) {
    if let Some(host) = &args.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(name) = &args.name {
        settings.server.name.clone_from(name);
    }
}

fn logging_config(settings: &LoggingSettings) -> anyhow::Result<LoggingConfig> {
    let module_levels = settings
        .modules
        .iter()
        .map(|(module, level)| Ok((module.clone(), parse_level(level)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(LoggingConfig {
        level: parse_level(&settings.level)?,
        module_levels,
        format: if settings.json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
    })
}
