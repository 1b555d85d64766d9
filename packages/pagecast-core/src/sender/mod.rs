//! Receiver command layer.
//!
//! [`Sender`] fronts two capabilities: a [`ReceiverDirectory`] that resolves
//! receiver names to addresses (mDNS in production, absent when the local
//! responder is unavailable) and a [`CastTransport`] that delivers play/stop
//! commands. Command results are booleans: an unresolvable receiver or a
//! missing capability is a soft failure the caller may retry, never an error
//! that tears down a session.

pub mod discovery;
pub mod fcast;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub use discovery::{MdnsReceiverDirectory, ReceiverDirectory};
pub use fcast::{CastTransport, FcastTcpTransport, SenderError};

/// A discovered receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receiver {
    /// Human-readable instance name (what users address sessions to).
    pub name: String,
    /// Resolved `host:port` address commands are sent to.
    pub id: String,
}

/// Sends play/stop commands to FCast receivers.
pub struct Sender {
    directory: Option<Arc<dyn ReceiverDirectory>>,
    transport: Arc<dyn CastTransport>,
}

impl Sender {
    /// Creates a sender with an optional directory and the given transport.
    ///
    /// Pass `directory: None` when discovery is unavailable; play/stop then
    /// work only for directly addressed receivers.
    #[must_use]
    pub fn new(
        directory: Option<Arc<dyn ReceiverDirectory>>,
        transport: Arc<dyn CastTransport>,
    ) -> Self {
        if directory.is_none() {
            log::warn!("[Sender] No receiver directory; discovery disabled, direct host only");
        }
        Self {
            directory,
            transport,
        }
    }

    /// Creates the production sender: mDNS directory (best-effort) + TCP transport.
    #[must_use]
    pub fn with_mdns(browse_timeout: Duration) -> Self {
        let directory: Option<Arc<dyn ReceiverDirectory>> =
            match MdnsReceiverDirectory::create_daemon() {
                Ok(daemon) => Some(Arc::new(MdnsReceiverDirectory::new(
                    Arc::new(daemon),
                    browse_timeout,
                ))),
                Err(e) => {
                    log::warn!("[Sender] mDNS unavailable: {e}");
                    None
                }
            };
        Self::new(directory, Arc::new(FcastTcpTransport::new()))
    }

    /// Lists currently visible receivers. Empty when discovery is unavailable.
    pub async fn discover(&self) -> Vec<Receiver> {
        match &self.directory {
            Some(directory) => directory.discover().await,
            None => Vec::new(),
        }
    }

    /// Asks a receiver to play `media_url`.
    ///
    /// With `host` set, the receiver is addressed directly at `host:port`.
    /// Otherwise the name is resolved through the directory. Returns `false`
    /// when the receiver cannot be resolved or no client path is available.
    pub async fn play(
        &self,
        receiver_name: &str,
        media_url: &str,
        title: &str,
        host: Option<&str>,
        port: u16,
    ) -> bool {
        let Some(addr) = self.resolve(receiver_name, host, port).await else {
            return false;
        };
        match self.transport.play(&addr, media_url, title).await {
            Ok(()) => {
                log::info!("[Sender] play sent: receiver={receiver_name}, addr={addr}");
                true
            }
            Err(e) => {
                log::error!("[Sender] play failed for {receiver_name} at {addr}: {e}");
                false
            }
        }
    }

    /// Asks a receiver to stop playback. Symmetric with [`Sender::play`].
    pub async fn stop(&self, receiver_name: &str, host: Option<&str>, port: u16) -> bool {
        let Some(addr) = self.resolve(receiver_name, host, port).await else {
            return false;
        };
        match self.transport.stop(&addr).await {
            Ok(()) => {
                log::info!("[Sender] stop sent: receiver={receiver_name}, addr={addr}");
                true
            }
            Err(e) => {
                log::warn!("[Sender] stop failed for {receiver_name} at {addr}: {e}");
                false
            }
        }
    }

    /// Resolves a receiver to a dialable address.
    async fn resolve(&self, receiver_name: &str, host: Option<&str>, port: u16) -> Option<String> {
        if let Some(host) = host {
            return Some(format!("{host}:{port}"));
        }
        let Some(directory) = &self.directory else {
            log::warn!("[Sender] cannot resolve '{receiver_name}': no directory and no host");
            return None;
        };
        let receivers = directory.discover().await;
        match receivers.into_iter().find(|r| r.name == receiver_name) {
            Some(receiver) => Some(receiver.id),
            None => {
                log::error!("[Sender] receiver '{receiver_name}' not found");
                None
            }
        }
    }
}
