//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to the orchestrator.
//! It provides router construction and server startup.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::context::NetworkContext;
use crate::sender::Sender;
use crate::session::orchestrator::SessionOrchestrator;

pub mod http;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the configured address.
    #[error("Failed to bind server socket: {0}")]
    Bind(#[from] std::io::Error),

    /// The configured bind address could not be parsed.
    #[error("Invalid bind address '{0}'")]
    InvalidBindAddr(String),
}

/// Shared application state for the API layer.
///
/// A thin wrapper holding references to services; all business logic lives
/// in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Session orchestrator: create/query/stop sessions.
    pub orchestrator: Arc<SessionOrchestrator>,
    /// Receiver command sender (for `/receivers`).
    pub sender: Arc<Sender>,
    /// Network configuration (advertised host, port).
    pub network: NetworkContext,
    /// Root of the per-session directories served under `/cast`.
    pub sessions_dir: PathBuf,
}

impl AppState {
    /// Creates the application state.
    #[must_use]
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        sender: Arc<Sender>,
        network: NetworkContext,
        sessions_dir: PathBuf,
    ) -> Self {
        Self {
            orchestrator,
            sender,
            network,
            sessions_dir,
        }
    }
}

/// Starts the HTTP server on the configured bind address.
///
/// Binding failure is fatal and reported to the caller; the server binary
/// exits non-zero on it.
pub async fn start_server(state: AppState, bind_addr: &str, port: u16) -> Result<(), ServerError> {
    let ip: IpAddr = bind_addr
        .parse()
        .map_err(|_| ServerError::InvalidBindAddr(bind_addr.to_string()))?;
    let listener = tokio::net::TcpListener::bind(SocketAddr::new(ip, port)).await?;

    // With port 0 the kernel picked one; publish it for media URLs.
    let actual = listener.local_addr()?.port();
    state.network.set_port(actual);

    log::info!("Server listening on http://{bind_addr}:{actual}");
    let app = http::create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
