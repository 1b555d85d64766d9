//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together, so dependency
//! relationships stay visible and tests can swap implementations.

use std::sync::Arc;
use std::time::Duration;

use crate::api::AppState;
use crate::context::NetworkContext;
use crate::error::{PagecastError, PagecastResult};
use crate::sender::Sender;
use crate::session::orchestrator::{CastPipeline, ProcessPipeline, SessionOrchestrator};
use crate::session::store::{ReceiverBindings, SessionStore};
use crate::state::Config;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Session orchestrator.
    pub orchestrator: Arc<SessionOrchestrator>,
    /// Session registry (shared with the orchestrator).
    pub store: Arc<SessionStore>,
    /// Receiver binding registry.
    pub bindings: Arc<ReceiverBindings>,
    /// Receiver command sender.
    pub sender: Arc<Sender>,
    /// Network configuration.
    pub network: NetworkContext,
    /// The validated configuration services were built from.
    pub config: Config,
}

impl BootstrappedServices {
    /// Builds the application state for the HTTP server.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.sender),
            self.network.clone(),
            self.config.sessions_dir.clone(),
        )
    }

    /// Initiates graceful shutdown: stops and deletes every live session.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        let stopped = self.orchestrator.stop_all().await;
        log::info!("[Bootstrap] Stopped {stopped} session(s)");
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order follows the dependency graph: registries first, then the
/// sender (mDNS is best-effort), then the orchestrator over the production
/// subprocess pipeline.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the sessions
/// directory cannot be created.
pub fn bootstrap_services(
    config: &Config,
    network: NetworkContext,
) -> PagecastResult<BootstrappedServices> {
    config
        .validate()
        .map_err(PagecastError::Configuration)?;

    std::fs::create_dir_all(&config.sessions_dir).map_err(|e| {
        PagecastError::Configuration(format!(
            "cannot create sessions dir {}: {e}",
            config.sessions_dir.display()
        ))
    })?;

    let store = Arc::new(SessionStore::new(&config.sessions_dir));
    let bindings = Arc::new(ReceiverBindings::new());
    let sender = Arc::new(Sender::with_mdns(Duration::from_millis(
        config.mdns_browse_timeout_ms,
    )));
    let pipeline: Arc<dyn CastPipeline> = Arc::new(ProcessPipeline::new());

    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&bindings),
        Arc::clone(&sender),
        pipeline,
        network.clone(),
        config.timing.clone(),
        config.display_base,
    ));

    Ok(BootstrappedServices {
        orchestrator,
        store,
        bindings,
        sender,
        network,
        config: config.clone(),
    })
}
