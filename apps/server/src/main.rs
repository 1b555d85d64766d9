//! Pagecast Server - standalone headless cast server.
//!
//! Renders web pages inside virtual displays, encodes them to HLS and
//! directs FCast receivers to play the stream. This binary hosts the HTTP
//! control plane and runs as a background daemon; everything interesting
//! lives in `pagecast-core`.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pagecast_core::{bootstrap_services, start_server, LocalIpDetector, NetworkContext};
use tokio::signal;

use crate::config::ServerConfig;

/// Pagecast Server - cast interactive web pages to FCast receivers.
#[derive(Parser, Debug)]
#[command(name = "pagecast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PAGECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind address (overrides config file).
    #[arg(short = 'a', long, env = "HOST_ADDR")]
    addr: Option<String>,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "HOST_PORT")]
    port: Option<u16>,

    /// Host name announced to receivers (overrides config file).
    #[arg(long, env = "FC_HOSTNAME_OVERRIDE")]
    hostname_override: Option<String>,

    /// Root directory for session artifacts (overrides config file).
    #[arg(short = 'd', long, env = "SESSIONS_DIR")]
    sessions_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Pagecast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(addr) = args.addr {
        config.bind_addr = addr;
    }
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(host) = args.hostname_override {
        config.hostname_override = Some(host);
    }
    if let Some(dir) = args.sessions_dir {
        config.sessions_dir = dir;
    }

    // Resolve the advertised host: explicit override, or auto-detection
    let network = if let Some(ref host) = config.hostname_override {
        log::info!(
            "Configuration: bind={}:{}, advertise_host={}",
            config.bind_addr,
            config.bind_port,
            host
        );
        NetworkContext::explicit(config.bind_port, host.clone())
    } else {
        log::info!(
            "Configuration: bind={}:{}, advertise_host=auto",
            config.bind_addr,
            config.bind_port
        );
        NetworkContext::auto_detect(config.bind_port, LocalIpDetector::arc()).context(
            "Failed to auto-detect the local IP address. \
             Please specify --hostname-override or set FC_HOSTNAME_OVERRIDE to a host \
             that receivers can reach.",
        )?
    };

    // Bootstrap services
    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config, network)
        .context("Failed to bootstrap services")?;

    log::info!(
        "Services bootstrapped, sessions dir: {}",
        config.sessions_dir.display()
    );

    // Spawn the HTTP server; binding failure is fatal and exits non-zero.
    let app_state = services.app_state();
    let bind_addr = config.bind_addr.clone();
    let bind_port = config.bind_port;
    let (bind_tx, bind_rx) = tokio::sync::oneshot::channel();
    let server_handle = tokio::spawn(async move {
        let result = start_server(app_state, &bind_addr, bind_port).await;
        let _ = bind_tx.send(result);
    });

    // Wait for shutdown signal or early server exit (e.g. bind failure)
    tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
        }
        result = bind_rx => {
            if let Ok(Err(e)) = result {
                services.shutdown().await;
                return Err(e).context("HTTP server failed");
            }
            log::warn!("HTTP server exited unexpectedly");
        }
    }

    // Graceful shutdown: stop and delete every live session
    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
