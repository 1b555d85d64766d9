//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    /// Override: `HOST_ADDR`
    pub bind_addr: String,

    /// Port to bind the HTTP server to.
    /// Override: `HOST_PORT`
    pub bind_port: u16,

    /// Host name or IP announced to receivers in media URLs.
    /// The bind address is often `0.0.0.0`, which receivers cannot fetch
    /// from; this must be a host they can reach. If not specified,
    /// auto-detection of the local IP is attempted.
    /// Override: `FC_HOSTNAME_OVERRIDE`
    pub hostname_override: Option<String>,

    /// Root directory for per-session artifact directories.
    /// Override: `SESSIONS_DIR`
    pub sessions_dir: PathBuf,

    /// First display number handed out to sessions.
    pub display_base: u32,

    /// mDNS browse timeout when discovering receivers (milliseconds).
    pub mdns_browse_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 8080,
            hostname_override: None,
            sessions_dir: PathBuf::from("./sessions"),
            display_base: 99,
            mdns_browse_timeout_ms: 2000,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOST_ADDR") {
            if !val.is_empty() {
                self.bind_addr = val;
            }
        }

        if let Ok(val) = std::env::var("HOST_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("FC_HOSTNAME_OVERRIDE") {
            if !val.is_empty() {
                self.hostname_override = Some(val);
            }
        }

        if let Ok(val) = std::env::var("SESSIONS_DIR") {
            if !val.is_empty() {
                self.sessions_dir = PathBuf::from(val);
            }
        }
    }

    /// Converts to pagecast-core's Config type.
    pub fn to_core_config(&self) -> pagecast_core::Config {
        pagecast_core::Config {
            sessions_dir: self.sessions_dir.clone(),
            display_base: self.display_base,
            mdns_browse_timeout_ms: self.mdns_browse_timeout_ms,
            ..Default::default()
        }
    }
}
