//! Virtual framebuffer display management.
//!
//! Each session owns one Xvfb instance bound to a distinct display number.
//! Display identity is passed explicitly to every child that needs it (the
//! browser via a child-scoped `DISPLAY` variable, the encoder via its grab
//! input), never through the server's own environment, so concurrent
//! sessions can coexist.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Grace period between SIGTERM and SIGKILL when stopping the display.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// How long to wait after spawn before checking for an immediate exit.
const SPAWN_PROBE_DELAY: Duration = Duration::from_millis(250);

/// Color depth requested from the framebuffer.
const COLOR_DEPTH: u32 = 24;

/// Errors produced by the virtual display handle.
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    /// The display server binary is missing or exited immediately.
    #[error("Failed to spawn display server: {0}")]
    Spawn(String),

    /// No free display number is available.
    #[error("No free display number available")]
    Exhausted,
}

/// Seam between the orchestrator and the concrete display process.
#[async_trait]
pub trait DisplayHandle: Send {
    /// Starts the display server. Idempotent: a second call while alive is a no-op.
    async fn start(&mut self) -> Result<(), DisplayError>;

    /// Stops the display server: soft-terminate, bounded wait, hard kill. Idempotent.
    async fn stop(&mut self);

    /// Liveness by non-blocking reap.
    fn is_running(&mut self) -> bool;

    /// The display identifier this handle owns (e.g. `:99`).
    fn display(&self) -> &str;
}

/// Handle owning one spawned Xvfb process.
pub struct VirtualDisplay {
    display: String,
    width: u32,
    height: u32,
    child: Option<Child>,
}

impl VirtualDisplay {
    /// Creates a handle for the given display identifier and geometry.
    ///
    /// Nothing is spawned until [`DisplayHandle::start`] is called.
    #[must_use]
    pub fn new(display: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            display: display.into(),
            width,
            height,
            child: None,
        }
    }
}

#[async_trait]
impl DisplayHandle for VirtualDisplay {
    async fn start(&mut self) -> Result<(), DisplayError> {
        if self.is_running() {
            debug!(display = %self.display, "display already running, start is a no-op");
            return Ok(());
        }

        let screen = format!("{}x{}x{}", self.width, self.height, COLOR_DEPTH);
        let mut child = Command::new("Xvfb")
            .arg(&self.display)
            .arg("-screen")
            .arg("0")
            .arg(&screen)
            .arg("-nolisten")
            .arg("tcp")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DisplayError::Spawn(format!("Xvfb on {}: {e}", self.display)))?;

        // Give Xvfb a moment to grab the display, then check it did not bail
        // out immediately (display already taken, bad geometry, ...).
        tokio::time::sleep(SPAWN_PROBE_DELAY).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(DisplayError::Spawn(format!(
                    "Xvfb exited immediately with {status} on {}",
                    self.display
                )));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(display = %self.display, "could not probe Xvfb status: {e}");
            }
        }

        info!(display = %self.display, pid = child.id(), "virtual display started");
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        soft_terminate(&mut child, STOP_GRACE, &self.display, "Xvfb").await;
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn display(&self) -> &str {
        &self.display
    }
}

/// Sends SIGTERM, waits up to `grace`, then SIGKILLs a child process.
///
/// Shared by the display and encoder handles; tolerates a child that has
/// already exited.
pub(crate) async fn soft_terminate(child: &mut Child, grace: Duration, scope: &str, name: &str) {
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(_) => return,
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {
            debug!(scope, name, "process exited after soft terminate");
        }
        Err(_) => {
            warn!(scope, name, "process ignored soft terminate, killing");
            let _ = child.kill().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Display Allocation
// ─────────────────────────────────────────────────────────────────────────────

/// Hands out distinct display numbers to live sessions.
///
/// A number is leased on [`DisplayAllocator::allocate`] and must not be
/// handed out again until [`DisplayAllocator::release`] - which the
/// orchestrator calls only after the owning display handle has stopped.
pub struct DisplayAllocator {
    base: u32,
    limit: u32,
    leased: Mutex<HashSet<u32>>,
}

impl DisplayAllocator {
    /// Creates an allocator starting at `:base`.
    #[must_use]
    pub fn new(base: u32) -> Self {
        Self {
            base,
            limit: 1024,
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Leases the lowest free display number, as a `:N` identifier.
    pub fn allocate(&self) -> Result<String, DisplayError> {
        let mut leased = self.leased.lock();
        let number = (self.base..self.base + self.limit)
            .find(|n| !leased.contains(n))
            .ok_or(DisplayError::Exhausted)?;
        leased.insert(number);
        Ok(format!(":{number}"))
    }

    /// Releases a previously leased display identifier.
    ///
    /// Unknown identifiers are ignored.
    pub fn release(&self, display: &str) {
        if let Some(number) = display.strip_prefix(':').and_then(|n| n.parse::<u32>().ok()) {
            self.leased.lock().remove(&number);
        }
    }
}
