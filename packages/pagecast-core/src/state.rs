//! Core application configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Timing knobs for the session orchestrator.
///
/// Defaults match the documented lifecycle: 15s warmup deadline polled at
/// 500ms, a 1s watchdog tick, and a 10s join timeout when stopping a
/// session from the control plane. Tests shrink these to keep runtimes low.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrchestratorTiming {
    /// Deadline for the encoder to produce a fresh playlist after start (ms).
    pub warmup_deadline_ms: u64,

    /// Interval between warmup freshness polls (ms).
    pub warmup_poll_ms: u64,

    /// Interval between watchdog freshness checks (ms).
    pub watchdog_tick_ms: u64,

    /// How long the stop path waits for the orchestration task to finish (ms).
    pub join_timeout_ms: u64,
}

impl OrchestratorTiming {
    /// Validates the timing values.
    pub fn validate(&self) -> Result<(), String> {
        if self.warmup_poll_ms == 0 {
            return Err("warmup_poll_ms must be >= 1".to_string());
        }
        if self.watchdog_tick_ms == 0 {
            return Err("watchdog_tick_ms must be >= 1".to_string());
        }
        if self.warmup_deadline_ms < self.warmup_poll_ms {
            return Err("warmup_deadline_ms must be >= warmup_poll_ms".to_string());
        }
        Ok(())
    }
}

impl Default for OrchestratorTiming {
    fn default() -> Self {
        Self {
            warmup_deadline_ms: 15_000,
            warmup_poll_ms: 500,
            watchdog_tick_ms: 1_000,
            join_timeout_ms: 10_000,
        }
    }
}

/// Configuration for the Pagecast core services.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Root directory for per-session artifact directories.
    pub sessions_dir: PathBuf,

    /// First display number handed out by the display allocator (`:99`, `:100`, ...).
    pub display_base: u32,

    /// mDNS browse timeout when discovering receivers (milliseconds).
    pub mdns_browse_timeout_ms: u64,

    /// Orchestrator timing knobs.
    #[serde(default)]
    pub timing: OrchestratorTiming,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.sessions_dir.as_os_str().is_empty() {
            return Err("sessions_dir must not be empty".to_string());
        }
        if self.mdns_browse_timeout_ms == 0 {
            return Err("mdns_browse_timeout_ms must be >= 1".to_string());
        }
        self.timing.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("./sessions"),
            display_base: 99,
            mdns_browse_timeout_ms: 2000,
            timing: OrchestratorTiming::default(),
        }
    }
}
