//! Session lifecycle types.
//!
//! A session is one logical cast: one display, one browser page, one
//! encoder, one receiver. The record here is shared between the registry
//! (read) and the orchestration task (read + write of the mutable fields);
//! the collaborator process handles are owned exclusively by the
//! orchestration task and never appear on the record.

pub mod orchestrator;
pub mod store;

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::capture::SessionFreshness;
use crate::context::UrlBuilder;
use crate::protocol_constants::{FCAST_DEFAULT_PORT, MASTER_PLAYLIST_NAME};
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// State Machine
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Collaborators are being started; the session is not yet streaming.
    Starting,
    /// Encoder output is fresh and the receiver has been addressed.
    Playing,
    /// An external stop was requested; teardown is in progress.
    Stopping,
    /// Teardown completed. Terminal.
    Stopped,
    /// Startup failed or the watchdog detected stale output. Terminal.
    Error,
}

impl SessionState {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether `self -> to` is a legal edge of the lifecycle.
    ///
    /// There is no edge into `Starting` after creation, and the terminal
    /// states admit nothing.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Starting, Playing)
                | (Starting, Error)
                | (Starting, Stopping)
                | (Starting, Stopped)
                | (Playing, Stopping)
                | (Playing, Error)
                | (Playing, Stopped)
                | (Stopping, Stopped)
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Start Request
// ─────────────────────────────────────────────────────────────────────────────

fn default_receiver_port() -> u16 {
    FCAST_DEFAULT_PORT
}
fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}
fn default_fps() -> u32 {
    15
}
fn default_video_bitrate() -> String {
    "3500k".to_string()
}
fn default_true() -> bool {
    true
}
fn default_stale_after_ms() -> u64 {
    8000
}

/// Parameters of a session start, as accepted on the control plane.
///
/// Imprinted onto the session record at creation and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Page to cast. Must be an absolute http(s) URL.
    pub url: String,
    /// Receiver the stream is addressed to.
    pub receiver_name: String,
    /// Direct receiver address, bypassing discovery.
    #[serde(default)]
    pub receiver_host: Option<String>,
    /// Receiver port.
    #[serde(default = "default_receiver_port")]
    pub receiver_port: u16,
    /// Capture width.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Capture height.
    #[serde(default = "default_height")]
    pub height: u32,
    /// Capture framerate.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Video bitrate target, e.g. `3500k`.
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,
    /// Whether to capture audio.
    #[serde(default)]
    pub audio: bool,
    /// Audio source identifier.
    #[serde(default)]
    pub audio_device: Option<String>,
    /// Path to a JSON cookies file injected before navigation.
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,
    /// Browser profile directory for persistent sessions.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
    /// Media title shown on the receiver.
    #[serde(default)]
    pub title: Option<String>,
    /// Hide browser chrome in the capture.
    #[serde(default = "default_true")]
    pub hide_browser_ui: bool,
    /// Freshness threshold for warmup and the watchdog (ms).
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Record
// ─────────────────────────────────────────────────────────────────────────────

/// One capture/streaming session.
pub struct Session {
    /// Opaque URL-safe token, unique across the process lifetime.
    pub id: String,
    /// Directory owned exclusively by this session.
    pub dir: PathBuf,
    /// Display identifier leased to this session (e.g. `:99`).
    pub display: String,
    /// Creation time, unix millis.
    pub started_at_ms: u64,
    /// Request parameters, immutable after creation.
    pub request: StartRequest,

    state: RwLock<SessionState>,
    last_ok_ms: RwLock<Option<u64>>,
}

impl Session {
    /// Creates a session record in the `Starting` state.
    #[must_use]
    pub fn new(id: String, dir: PathBuf, display: String, request: StartRequest) -> Self {
        Self {
            id,
            dir,
            display,
            started_at_ms: now_millis(),
            request,
            state: RwLock::new(SessionState::Starting),
            last_ok_ms: RwLock::new(None),
        }
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Attempts a state transition, enforcing the lifecycle edge table.
    ///
    /// Returns whether the transition was applied. A rejected transition is
    /// logged and leaves the state unchanged, which is what resolves races
    /// such as a watchdog failure landing after an external stop.
    pub fn transition(&self, to: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == to {
            return true;
        }
        if state.can_transition(to) {
            log::debug!("[Session] {}: {:?} -> {:?}", self.id, *state, to);
            *state = to;
            true
        } else {
            log::debug!(
                "[Session] {}: rejected transition {:?} -> {:?}",
                self.id,
                *state,
                to
            );
            false
        }
    }

    /// Records a successful freshness probe. Monotonically non-decreasing.
    pub fn mark_ok(&self) {
        let now = now_millis();
        let mut last = self.last_ok_ms.write();
        if last.map_or(true, |prev| now >= prev) {
            *last = Some(now);
        }
    }

    /// Time of the most recent successful freshness probe, unix millis.
    #[must_use]
    pub fn last_ok_ms(&self) -> Option<u64> {
        *self.last_ok_ms.read()
    }

    /// Path of the master playlist inside the session directory.
    #[must_use]
    pub fn hls_path(&self) -> PathBuf {
        self.dir.join(MASTER_PLAYLIST_NAME)
    }

    /// Server-relative URL of the master playlist.
    #[must_use]
    pub fn hls_url_path(&self) -> String {
        UrlBuilder::playlist_path(&self.id)
    }

    /// Builds a status snapshot, probing output freshness.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let freshness =
            SessionFreshness::new(&self.dir, self.request.stale_after_ms).evaluate();
        SessionStatus {
            id: self.id.clone(),
            state: self.state(),
            hls_url: self.hls_path().exists().then(|| self.hls_url_path()),
            last_segment_age_ms: freshness.last_segment_age_ms,
            dir: self.dir.display().to_string(),
            display: self.display.clone(),
            started_at_ms: self.started_at_ms,
            last_ok_ms: self.last_ok_ms(),
            source_url: self.request.url.clone(),
            receiver_name: self.request.receiver_name.clone(),
            receiver_host: self.request.receiver_host.clone(),
            receiver_port: self.request.receiver_port,
            width: self.request.width,
            height: self.request.height,
        }
    }

    /// Removes all generated artifacts for the session.
    ///
    /// Idempotent, and tolerates files still being written while the encoder
    /// shuts down: whatever cannot be removed now is left for a later
    /// attempt.
    pub fn cleanup(&self) {
        cleanup_dir(&self.dir);
    }
}

/// Best-effort recursive removal of a session directory.
fn cleanup_dir(dir: &Path) {
    if !dir.exists() {
        return;
    }
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let _ = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
        }
    }
    // May still contain files being written; leave the directory in place
    // and let a subsequent cleanup attempt finish the job.
    let _ = std::fs::remove_dir(dir);
}

/// Serialized session snapshot returned by the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Session identifier.
    pub id: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Server-relative playlist URL; `None` until the playlist exists.
    pub hls_url: Option<String>,
    /// Age of the newest segment, if any.
    pub last_segment_age_ms: Option<u64>,
    /// Session directory.
    pub dir: String,
    /// Leased display identifier.
    pub display: String,
    /// Creation time, unix millis.
    pub started_at_ms: u64,
    /// Most recent successful freshness probe, unix millis.
    pub last_ok_ms: Option<u64>,
    /// Page being cast.
    pub source_url: String,
    /// Receiver the stream is addressed to.
    pub receiver_name: String,
    /// Direct receiver address, if given.
    pub receiver_host: Option<String>,
    /// Receiver port.
    pub receiver_port: u16,
    /// Capture width.
    pub width: u32,
    /// Capture height.
    pub height: u32,
}

#[cfg(test)]
pub(crate) fn test_request(receiver_name: &str) -> StartRequest {
    serde_json::from_value(serde_json::json!({
        "url": "http://example.com",
        "receiver_name": receiver_name,
    }))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─────────────────────────────────────────────────────────────────────────
    // State Machine Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn lifecycle_edges_match_the_table() {
        use SessionState::*;
        let allowed = [
            (Starting, Playing),
            (Starting, Error),
            (Starting, Stopping),
            (Starting, Stopped),
            (Playing, Stopping),
            (Playing, Error),
            (Playing, Stopped),
            (Stopping, Stopped),
        ];
        let all = [Starting, Playing, Stopping, Stopped, Error];
        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition(to),
                    expected,
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn no_edge_leads_back_into_starting() {
        use SessionState::*;
        for from in [Starting, Playing, Stopping, Stopped, Error] {
            assert!(!from.can_transition(Starting));
        }
    }

    #[test]
    fn terminal_states_admit_nothing() {
        use SessionState::*;
        for to in [Starting, Playing, Stopping, Stopped, Error] {
            assert!(!Stopped.can_transition(to));
            assert!(!Error.can_transition(to));
        }
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::Starting).unwrap(),
            "\"starting\""
        );
        assert_eq!(
            serde_json::to_string(&SessionState::Error).unwrap(),
            "\"error\""
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session Record Tests
    // ─────────────────────────────────────────────────────────────────────────

    fn make_session(dir: &Path) -> Session {
        Session::new(
            "abc123".to_string(),
            dir.to_path_buf(),
            ":99".to_string(),
            test_request("Dummy"),
        )
    }

    #[test]
    fn transition_rejects_illegal_edges() {
        let tmp = tempfile::tempdir().unwrap();
        let session = make_session(tmp.path());

        assert_eq!(session.state(), SessionState::Starting);
        assert!(session.transition(SessionState::Playing));
        // Watchdog failure after an external stop must not clobber Stopping.
        assert!(session.transition(SessionState::Stopping));
        assert!(!session.transition(SessionState::Error));
        assert_eq!(session.state(), SessionState::Stopping);
        assert!(session.transition(SessionState::Stopped));
        assert!(session.state().is_terminal());
    }

    #[test]
    fn transition_to_current_state_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let session = make_session(tmp.path());
        assert!(session.transition(SessionState::Stopping));
        assert!(session.transition(SessionState::Stopping));
        assert_eq!(session.state(), SessionState::Stopping);
    }

    #[test]
    fn mark_ok_is_monotonic() {
        let tmp = tempfile::tempdir().unwrap();
        let session = make_session(tmp.path());
        assert_eq!(session.last_ok_ms(), None);
        session.mark_ok();
        let first = session.last_ok_ms().unwrap();
        session.mark_ok();
        assert!(session.last_ok_ms().unwrap() >= first);
    }

    #[test]
    fn hls_paths_derive_from_id_and_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let session = make_session(tmp.path());
        assert_eq!(session.hls_path(), tmp.path().join("index.m3u8"));
        assert_eq!(session.hls_url_path(), "/cast/abc123/index.m3u8");
    }

    #[test]
    fn status_reports_no_hls_url_until_playlist_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let session = make_session(tmp.path());
        assert_eq!(session.status().hls_url, None);

        std::fs::write(session.hls_path(), "#EXTM3U\n").unwrap();
        assert_eq!(
            session.status().hls_url,
            Some("/cast/abc123/index.m3u8".to_string())
        );
    }

    #[test]
    fn cleanup_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("s1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(dir.join("segment.ts"), b"data").unwrap();

        let session = Session::new(
            "s1".to_string(),
            dir.clone(),
            ":99".to_string(),
            test_request("Dummy"),
        );
        session.cleanup();
        assert!(!dir.exists());
        session.cleanup();
        assert!(!dir.exists());
    }

    #[test]
    fn start_request_defaults_apply() {
        let request: StartRequest = serde_json::from_value(serde_json::json!({
            "url": "http://example.com",
            "receiver_name": "Dummy",
        }))
        .unwrap();

        assert_eq!(request.receiver_port, 46899);
        assert_eq!(request.width, 1920);
        assert_eq!(request.height, 1080);
        assert_eq!(request.fps, 15);
        assert_eq!(request.video_bitrate, "3500k");
        assert!(!request.audio);
        assert!(request.hide_browser_ui);
        assert_eq!(request.stale_after_ms, 8000);
    }
}
