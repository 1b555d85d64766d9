//! mDNS/DNS-SD discovery of FCast receivers.
//!
//! Browses for `_fcast._tcp.local.` services and resolves each instance to
//! a `host:port` address. Discovery is best-effort: a missing or blocked
//! mDNS responder yields an empty list, never an error surfaced to clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ResolvedService, ScopedIp, ServiceDaemon, ServiceEvent};
use tokio::time::timeout;

use crate::protocol_constants::FCAST_SERVICE_TYPE;
use crate::sender::Receiver;

/// Directory of reachable receivers.
///
/// The production implementation browses mDNS; tests substitute a fixed list.
#[async_trait]
pub trait ReceiverDirectory: Send + Sync {
    /// Returns the currently visible receivers. Empty is not an error.
    async fn discover(&self) -> Vec<Receiver>;
}

/// mDNS-backed receiver directory.
pub struct MdnsReceiverDirectory {
    daemon: Arc<ServiceDaemon>,
    browse_timeout: Duration,
}

impl MdnsReceiverDirectory {
    /// Creates a directory around a shared mDNS daemon.
    ///
    /// The daemon spawns a background thread; create it once and reuse it.
    #[must_use]
    pub fn new(daemon: Arc<ServiceDaemon>, browse_timeout: Duration) -> Self {
        Self {
            daemon,
            browse_timeout,
        }
    }

    /// Creates the shared mDNS daemon.
    ///
    /// Failure means mDNS is unavailable on this system; the caller degrades
    /// the sender to direct addressing only.
    pub fn create_daemon() -> Result<ServiceDaemon, mdns_sd::Error> {
        ServiceDaemon::new()
    }
}

#[async_trait]
impl ReceiverDirectory for MdnsReceiverDirectory {
    async fn discover(&self) -> Vec<Receiver> {
        let browse_rx = match self.daemon.browse(FCAST_SERVICE_TYPE) {
            Ok(rx) => rx,
            Err(e) => {
                log::warn!("[Discovery] mDNS browse failed: {e}");
                return Vec::new();
            }
        };

        let mut discovered: HashMap<String, Receiver> = HashMap::new();
        let start = std::time::Instant::now();
        while start.elapsed() < self.browse_timeout {
            let remaining = self.browse_timeout.saturating_sub(start.elapsed());
            match timeout(remaining, browse_rx.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    if let Some(receiver) = parse_service(&info) {
                        log::debug!(
                            "[Discovery] Found receiver: name={}, id={}",
                            receiver.name,
                            receiver.id
                        );
                        discovered.insert(receiver.name.clone(), receiver);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    log::debug!("[Discovery] Receiver channel closed: {e:?}");
                    break;
                }
                Err(_) => break, // browse timeout, normal termination
            }
        }

        if let Err(e) = self.daemon.stop_browse(FCAST_SERVICE_TYPE) {
            log::warn!("[Discovery] Failed to stop browse: {e:?}");
        }

        let receivers: Vec<_> = discovered.into_values().collect();
        log::debug!("[Discovery] Browse complete: {} receiver(s)", receivers.len());
        receivers
    }
}

/// Parses a resolved mDNS service into a receiver record.
///
/// Uses resolved record data (IP from SRV/A answers), preferring IPv4 for
/// receiver compatibility.
fn parse_service(info: &ResolvedService) -> Option<Receiver> {
    let ip = info.addresses.iter().find_map(|addr| match addr {
        ScopedIp::V4(v4) => Some(v4.addr().to_string()),
        _ => None,
    })?;
    Some(Receiver {
        name: instance_name(&info.fullname),
        id: format!("{}:{}", ip, info.port),
    })
}

/// Extracts the instance name from an mDNS fullname.
///
/// `Living Room._fcast._tcp.local.` becomes `Living Room`.
fn instance_name(fullname: &str) -> String {
    fullname
        .split_once("._")
        .map(|(instance, _)| instance.to_string())
        .unwrap_or_else(|| fullname.to_string())
}
