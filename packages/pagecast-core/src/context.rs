//! Network configuration context for the cast server.
//!
//! This module provides [`NetworkContext`] which bundles the bind port and
//! the externally reachable host name used when announcing media URLs to
//! receivers. It supports both explicit configuration (`FC_HOSTNAME_OVERRIDE`
//! or a configured advertise address) and auto-detection of the local IP.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::protocol_constants::MASTER_PLAYLIST_NAME;

/// Network configuration shared across services.
///
/// The server binds to a local address (often `0.0.0.0`), but `0.0.0.0` is
/// not a host a receiver can fetch from. The context therefore tracks a
/// separate *advertised host* - an IP or DNS name receivers can reach -
/// used by [`UrlBuilder`] when constructing media URLs.
#[derive(Clone)]
pub struct NetworkContext {
    /// Server port (set once the listener is bound when auto-assigned).
    port: Arc<RwLock<u16>>,
    /// Host name or IP that receivers can reach us at.
    advertise_host: Arc<RwLock<String>>,
}

impl NetworkContext {
    /// Creates a `NetworkContext` with an explicit advertised host.
    ///
    /// Use this when `FC_HOSTNAME_OVERRIDE` or a configured advertise
    /// address is known ahead of time. The host may be a DNS name.
    #[must_use]
    pub fn explicit(port: u16, advertise_host: impl Into<String>) -> Self {
        Self {
            port: Arc::new(RwLock::new(port)),
            advertise_host: Arc::new(RwLock::new(advertise_host.into())),
        }
    }

    /// Creates a `NetworkContext` by auto-detecting the local IP address.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable local IP can be detected. In that
    /// case the operator must configure the advertised host explicitly.
    pub fn auto_detect(port: u16, detector: Arc<dyn IpDetector>) -> Result<Self, NetworkError> {
        let host = detector.detect()?;
        Ok(Self::explicit(port, host))
    }

    /// Returns the current port value.
    #[must_use]
    pub fn get_port(&self) -> u16 {
        *self.port.read()
    }

    /// Returns the currently advertised host.
    #[must_use]
    pub fn get_advertise_host(&self) -> String {
        self.advertise_host.read().clone()
    }

    /// Sets the port once the listener is bound.
    pub fn set_port(&self, port: u16) {
        *self.port.write() = port;
    }

    /// Returns a `UrlBuilder` for the current network configuration.
    #[must_use]
    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder::new(self.get_advertise_host(), self.get_port())
    }

    /// Returns the media URL announced to receivers for a session.
    #[must_use]
    pub fn media_url(&self, session_id: &str) -> String {
        self.url_builder().playlist_url(session_id)
    }
}

/// Trait for detecting the local IP address.
///
/// Different environments may need different detection strategies.
/// This trait allows injecting the appropriate detector.
pub trait IpDetector: Send + Sync {
    /// Detects the local IP address.
    fn detect(&self) -> Result<String, NetworkError>;
}

/// Default IP detector using the system's network interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalIpDetector;

impl LocalIpDetector {
    /// Creates a new `LocalIpDetector`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Creates a new `LocalIpDetector` wrapped in an Arc.
    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self::new())
    }
}

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<String, NetworkError> {
        local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

/// Errors that can occur during network configuration.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Could not detect local IP address.
    #[error("Failed to detect local IP: {0}")]
    Detection(String),
}

/// Builder for constructing URLs for the cast server.
pub struct UrlBuilder {
    host: String,
    port: u16,
}

impl UrlBuilder {
    /// Creates a new `UrlBuilder` for the given server address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the base URL for the server (e.g., `http://192.168.1.100:8080`).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Returns the server-relative path of a session's master playlist.
    #[must_use]
    pub fn playlist_path(session_id: &str) -> String {
        format!("/cast/{session_id}/{MASTER_PLAYLIST_NAME}")
    }

    /// Returns the absolute master-playlist URL for a session.
    #[must_use]
    pub fn playlist_url(&self, session_id: &str) -> String {
        format!("{}{}", self.base_url(), Self::playlist_path(session_id))
    }
}
