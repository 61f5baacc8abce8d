pub mod router;
pub mod server;
pub mod state;
pub mod tracing;

use crate::config::{self, Command, Settings};
use crate::error::LogflowError;
use crate::forwarder::{PING_INTERVAL, UdpLogForwarder};
use crate::pipeline::{Pipeline, PipelineConfig};
use anyhow::Context;
use std::net::{IpAddr, SocketAddr};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

/// Application entry point. Dispatches subcommands, or initializes tracing and
/// runs the ingestion pipeline until SIGINT/SIGTERM.
pub async fn run() -> Result<(), LogflowError> {
    let cli = config::get_configuration()?;

    match cli.command {
        // Probe for Docker healthchecks in the distroless image
        Some(Command::Healthcheck) => {
            match crate::healthcheck_with_port(cli.settings.health_port).await {
                Ok(()) => std::process::exit(0),
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1)
                }
            }
        }
        Some(Command::Tail) => exit_on_error(tail(&cli.settings).await),
        Some(Command::Forward { ip, port }) => {
            tracing::init_tracing();
            exit_on_error(forward(ip, port).await)
        }
        None | Some(Command::Serve) => {
            tracing::init_tracing();
            serve(cli.settings).await
        }
    }
}

fn exit_on_error(result: anyhow::Result<()>) -> Result<(), LogflowError> {
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1)
    }
    Ok(())
}

async fn serve(settings: Settings) -> Result<(), LogflowError> {
    ::tracing::info!(sinks = ?settings.sinks, "Loaded settings");

    let sinks = state::build_sinks(&settings)?;
    let running = Pipeline::new(PipelineConfig::from_settings(&settings)?, sinks)
        .start()
        .await?;

    let token = running.shutdown_token();
    tokio::select! {
        () = server::shutdown_signal() => {}
        () = token.cancelled() => {}
    }

    running.shutdown().await
}

async fn tail(settings: &Settings) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    crate::tail::follow(&settings.tail_socket, &mut stdout)
        .await
        .with_context(|| format!("failed to follow {}", settings.tail_socket.display()))?;
    Ok(())
}

async fn forward(ip: IpAddr, port: u16) -> anyhow::Result<()> {
    let target = SocketAddr::new(ip, port);
    let forwarder = UdpLogForwarder::connect(target)
        .await
        .with_context(|| format!("failed to open UDP socket for {target}"))?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        signal_token.cancel();
    });

    let summary = forwarder
        .forward(BufReader::new(tokio::io::stdin()), PING_INTERVAL, shutdown)
        .await
        .context("failed to read stdin")?;
    ::tracing::info!(sent = summary.sent, failed = summary.failed, "Forwarding finished");
    Ok(())
}
