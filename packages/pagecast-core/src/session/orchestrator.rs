//! Session orchestration: start protocol, watchdog, teardown.
//!
//! Each session runs one background task that starts the collaborators in
//! order (display, browser, encoder), waits for the encoder to warm up,
//! addresses the receiver, then watches output freshness until the session
//! is stopped or goes stale. Teardown always runs, on every exit path, as
//! independent best-effort steps: a failing step is logged and never stops
//! the following ones.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserController, BrowserHandle, LaunchOptions};
use crate::capture::{EncoderHandle, HlsEncoder, HlsProfile, SessionFreshness};
use crate::context::NetworkContext;
use crate::display::{DisplayAllocator, DisplayHandle, VirtualDisplay};
use crate::error::{PagecastError, PagecastResult};
use crate::protocol_constants::APP_NAME;
use crate::sender::Sender;
use crate::session::store::{ReceiverBindings, SessionStore};
use crate::session::{Session, SessionState, SessionStatus, StartRequest};
use crate::state::OrchestratorTiming;
use crate::utils::validate_source_url;

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Constructs the three per-session collaborator handles.
///
/// The orchestrator never names concrete processes; tests inject stub
/// handles through this seam.
pub trait CastPipeline: Send + Sync {
    /// Creates the virtual display handle for a leased display identifier.
    fn display(&self, display: &str, width: u32, height: u32) -> Box<dyn DisplayHandle>;

    /// Creates the browser controller.
    fn browser(&self) -> Box<dyn BrowserHandle>;

    /// Creates the encoder handle writing into `out_dir`.
    fn encoder(&self, display: &str, out_dir: &Path, profile: HlsProfile)
        -> Box<dyn EncoderHandle>;
}

/// Production pipeline: Xvfb, Chromium over CDP, ffmpeg.
#[derive(Default)]
pub struct ProcessPipeline;

impl ProcessPipeline {
    /// Creates the production pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CastPipeline for ProcessPipeline {
    fn display(&self, display: &str, width: u32, height: u32) -> Box<dyn DisplayHandle> {
        Box::new(VirtualDisplay::new(display, width, height))
    }

    fn browser(&self) -> Box<dyn BrowserHandle> {
        Box::new(BrowserController::new())
    }

    fn encoder(
        &self,
        display: &str,
        out_dir: &Path,
        profile: HlsProfile,
    ) -> Box<dyn EncoderHandle> {
        Box::new(HlsEncoder::new(display, out_dir, profile))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Receiver-binding parameters cached for teardown.
///
/// Captured at play time because the session record may already be deleted
/// when the binding has to be released.
#[derive(Debug, Clone)]
struct BoundReceiver {
    name: String,
    host: Option<String>,
    port: u16,
}

/// Ephemeral per-session state owned by the orchestrator.
struct SessionRuntime {
    /// Latching stop signal; checked at every warmup and watchdog tick.
    cancel: CancellationToken,
    /// Handle of the background orchestration task.
    task: Mutex<Option<JoinHandle<()>>>,
    /// Receiver binding held by this session, if playback was commanded.
    binding: Mutex<Option<BoundReceiver>>,
}

impl SessionRuntime {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            binding: Mutex::new(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Owns session identity, the lifecycle state machine, and the per-session
/// background tasks.
pub struct SessionOrchestrator {
    store: Arc<SessionStore>,
    bindings: Arc<ReceiverBindings>,
    sender: Arc<Sender>,
    pipeline: Arc<dyn CastPipeline>,
    network: NetworkContext,
    displays: DisplayAllocator,
    timing: OrchestratorTiming,
    runtimes: DashMap<String, Arc<SessionRuntime>>,
}

impl SessionOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Arguments
    /// * `store` - session registry (shared with the control plane)
    /// * `bindings` - receiver binding registry
    /// * `sender` - receiver command sender
    /// * `pipeline` - collaborator factory
    /// * `network` - advertised host/port for media URLs
    /// * `timing` - warmup/watchdog/join knobs
    /// * `display_base` - first display number handed to sessions
    pub fn new(
        store: Arc<SessionStore>,
        bindings: Arc<ReceiverBindings>,
        sender: Arc<Sender>,
        pipeline: Arc<dyn CastPipeline>,
        network: NetworkContext,
        timing: OrchestratorTiming,
        display_base: u32,
    ) -> Self {
        Self {
            store,
            bindings,
            sender,
            pipeline,
            network,
            displays: DisplayAllocator::new(display_base),
            timing,
            runtimes: DashMap::new(),
        }
    }

    /// Validates a start request before any resource is allocated.
    fn validate(request: &StartRequest) -> PagecastResult<()> {
        validate_source_url(&request.url)?;
        if request.receiver_name.trim().is_empty() {
            return Err(PagecastError::InvalidRequest(
                "receiver_name must not be empty".to_string(),
            ));
        }
        if request.width == 0 || request.height == 0 {
            return Err(PagecastError::InvalidRequest(
                "width and height must be positive".to_string(),
            ));
        }
        if request.fps == 0 {
            return Err(PagecastError::InvalidRequest(
                "fps must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates a session and dispatches its orchestration task.
    ///
    /// Returns immediately with the record in `Starting`; the start protocol
    /// runs on the background task, never on the request path.
    pub fn start_session(self: &Arc<Self>, request: StartRequest) -> PagecastResult<Arc<Session>> {
        Self::validate(&request)?;

        let display = self.displays.allocate()?;
        let session = self
            .store
            .create(display, request)
            .map_err(|e| PagecastError::Internal(format!("create session dir: {e}")))?;

        let runtime = Arc::new(SessionRuntime::new());
        self.runtimes
            .insert(session.id.clone(), Arc::clone(&runtime));

        log::info!(
            "[Orchestrator] session {} created: url={}, receiver={}, display={}",
            session.id,
            session.request.url,
            session.request.receiver_name,
            session.display
        );

        let task = tokio::spawn(Self::run_session(
            Arc::clone(self),
            Arc::clone(&session),
            Arc::clone(&runtime),
        ));
        *runtime.task.lock() = Some(task);

        Ok(session)
    }

    /// Status snapshot for one session.
    pub fn status(&self, id: &str) -> PagecastResult<SessionStatus> {
        self.store
            .get(id)
            .map(|s| s.status())
            .ok_or_else(|| PagecastError::SessionNotFound(id.to_string()))
    }

    /// Status snapshots for all live sessions.
    #[must_use]
    pub fn list(&self) -> Vec<SessionStatus> {
        self.store.all().iter().map(|s| s.status()).collect()
    }

    /// Stops a session and deletes its record and directory.
    ///
    /// The stop signal wakes the orchestration task within one tick; the
    /// task is joined with a bounded wait and left to finish teardown on its
    /// own if it exceeds it.
    pub async fn stop_session(&self, id: &str) -> PagecastResult<()> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| PagecastError::SessionNotFound(id.to_string()))?;

        session.transition(SessionState::Stopping);

        // Eager receiver stop: unblocks the receiver even if the
        // orchestration task is wedged.
        let request = &session.request;
        self.sender
            .stop(
                &request.receiver_name,
                request.receiver_host.as_deref(),
                request.receiver_port,
            )
            .await;

        let runtime = self.runtimes.get(id).map(|r| Arc::clone(r.value()));
        if let Some(runtime) = runtime {
            runtime.cancel.cancel();
            let task = runtime.task.lock().take();
            if let Some(task) = task {
                let join_timeout = Duration::from_millis(self.timing.join_timeout_ms);
                if tokio::time::timeout(join_timeout, task).await.is_err() {
                    log::warn!(
                        "[Orchestrator] session {id}: orchestration task did not finish within \
                         {}ms, proceeding with delete",
                        self.timing.join_timeout_ms
                    );
                }
            }
        }

        self.store.remove(id);
        log::info!("[Orchestrator] session {id} stopped and deleted");
        Ok(())
    }

    /// Stops every live session. Used for graceful shutdown.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<String> = self.store.all().iter().map(|s| s.id.clone()).collect();
        let mut stopped = 0;
        for id in ids {
            if self.stop_session(&id).await.is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Background Task
    // ─────────────────────────────────────────────────────────────────────────

    /// The per-session background task: start protocol, watchdog, teardown.
    async fn run_session(
        orchestrator: Arc<Self>,
        session: Arc<Session>,
        runtime: Arc<SessionRuntime>,
    ) {
        let request = &session.request;
        let profile = HlsProfile {
            width: request.width,
            height: request.height,
            fps: request.fps,
            video_bitrate: request.video_bitrate.clone(),
            audio: request.audio,
            audio_device: request
                .audio_device
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            stale_after_ms: request.stale_after_ms,
            ..HlsProfile::default()
        };

        let mut display = orchestrator
            .pipeline
            .display(&session.display, request.width, request.height);
        let mut browser = orchestrator.pipeline.browser();
        let mut encoder = orchestrator
            .pipeline
            .encoder(&session.display, &session.dir, profile);

        let outcome = orchestrator
            .drive(&session, &runtime, &mut *display, &mut *browser, &mut *encoder)
            .await;

        if let Err(e) = outcome {
            log::error!("[Orchestrator] session {} failed: {e}", session.id);
            session.transition(SessionState::Error);
        }

        // Teardown: always runs, each step swallows its own failure.
        encoder.stop().await;
        browser.close().await;
        display.stop().await;

        let binding = runtime.binding.lock().take();
        if let Some(binding) = binding {
            if orchestrator.bindings.release_if(&binding.name, &session.id) {
                orchestrator
                    .sender
                    .stop(&binding.name, binding.host.as_deref(), binding.port)
                    .await;
            }
        }

        if !session.state().is_terminal() {
            session.transition(SessionState::Stopped);
        }

        orchestrator.runtimes.remove(&session.id);
        orchestrator.displays.release(&session.display);
        log::info!(
            "[Orchestrator] session {} finished in state {:?}",
            session.id,
            session.state()
        );
    }

    /// Start protocol and watchdog. Returns `Ok` on cooperative stop and
    /// `Err` on any startup or steady-state failure.
    async fn drive(
        &self,
        session: &Arc<Session>,
        runtime: &Arc<SessionRuntime>,
        display: &mut dyn DisplayHandle,
        browser: &mut dyn BrowserHandle,
        encoder: &mut dyn EncoderHandle,
    ) -> PagecastResult<()> {
        let request = &session.request;

        display.start().await?;

        let mut launch = LaunchOptions::new(
            request.url.clone(),
            request.width,
            request.height,
            session.display.clone(),
        );
        launch.cookies_path = request.cookies_path.clone();
        launch.user_data_dir = request.user_data_dir.clone();
        launch.hide_browser_ui = request.hide_browser_ui;
        browser.launch(&launch).await?;

        encoder.start().await?;

        if !self.warm_up(session, runtime).await? {
            // Stop signal fired during warmup: abort without error.
            return Ok(());
        }

        self.announce_to_receiver(session, runtime).await;
        session.transition(SessionState::Playing);

        self.watch(session, runtime).await
    }

    /// Polls the session directory until output is fresh or the deadline
    /// passes. Returns `Ok(false)` when the stop signal fired.
    async fn warm_up(
        &self,
        session: &Arc<Session>,
        runtime: &Arc<SessionRuntime>,
    ) -> PagecastResult<bool> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.timing.warmup_deadline_ms);
        let poll = Duration::from_millis(self.timing.warmup_poll_ms);

        loop {
            if runtime.cancel.is_cancelled() {
                return Ok(false);
            }

            let report =
                SessionFreshness::new(&session.dir, session.request.stale_after_ms).evaluate();
            if !report.stale {
                log::info!(
                    "[Orchestrator] session {} warmed up, age={:?}ms",
                    session.id,
                    report.last_segment_age_ms
                );
                return Ok(true);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(PagecastError::WarmupTimeout(self.timing.warmup_deadline_ms));
            }

            tokio::select! {
                _ = runtime.cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Reserves the receiver binding and commands playback.
    ///
    /// The binding is reserved before the play command goes out so a second
    /// session can never evict a receiver another session holds; a failed
    /// play releases the reservation. Failure here is soft: the session
    /// keeps streaming locally and the operator may retry via the receiver.
    async fn announce_to_receiver(&self, session: &Arc<Session>, runtime: &Arc<SessionRuntime>) {
        let request = &session.request;
        if !self.bindings.try_bind(&request.receiver_name, &session.id) {
            log::warn!(
                "[Orchestrator] receiver '{}' is bound to another session; \
                 session {} streams without receiver playback",
                request.receiver_name,
                session.id
            );
            return;
        }

        let media_url = self.network.media_url(&session.id);
        let title = request
            .title
            .clone()
            .unwrap_or_else(|| APP_NAME.to_string());
        let played = self
            .sender
            .play(
                &request.receiver_name,
                &media_url,
                &title,
                request.receiver_host.as_deref(),
                request.receiver_port,
            )
            .await;

        if played {
            *runtime.binding.lock() = Some(BoundReceiver {
                name: request.receiver_name.clone(),
                host: request.receiver_host.clone(),
                port: request.receiver_port,
            });
        } else {
            self.bindings
                .release_if(&request.receiver_name, &session.id);
            log::warn!(
                "[Orchestrator] receiver '{}' did not accept playback; \
                 session {} continues streaming locally",
                request.receiver_name,
                session.id
            );
        }
    }

    /// Watchdog loop: periodic freshness checks until stop or staleness.
    async fn watch(&self, session: &Arc<Session>, runtime: &Arc<SessionRuntime>) -> PagecastResult<()> {
        let tick = Duration::from_millis(self.timing.watchdog_tick_ms);
        let threshold = session.request.stale_after_ms;

        loop {
            tokio::select! {
                _ = runtime.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(tick) => {}
            }

            let report = SessionFreshness::new(&session.dir, threshold).evaluate();
            match report.last_segment_age_ms {
                Some(age) if age > threshold => {
                    return Err(PagecastError::StaleOutput {
                        age_ms: age,
                        threshold_ms: threshold,
                    });
                }
                Some(_) => session.mark_ok(),
                // Unknown age mid-playing is tolerated; only measured
                // staleness fails the session.
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::browser::BrowserError;
    use crate::display::DisplayError;
    use crate::capture::encoder::EncoderError;
    use crate::sender::{CastTransport, SenderError};

    // ─────────────────────────────────────────────────────────────────────────
    // Stub Collaborators
    // ─────────────────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct StubState {
        events: Mutex<Vec<String>>,
        display_running: AtomicBool,
        browser_running: AtomicBool,
        encoder_running: AtomicBool,
    }

    impl StubState {
        fn push(&self, event: &str) {
            self.events.lock().push(event.to_string());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        fn all_stopped(&self) -> bool {
            !self.display_running.load(Ordering::SeqCst)
                && !self.browser_running.load(Ordering::SeqCst)
                && !self.encoder_running.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum EncoderMode {
        /// Writes a playlist and one segment on start.
        Writes,
        /// Never produces output.
        Silent,
    }

    struct StubPipeline {
        state: Arc<StubState>,
        encoder_mode: EncoderMode,
        browser_fails: bool,
    }

    impl StubPipeline {
        fn new(encoder_mode: EncoderMode) -> (Arc<Self>, Arc<StubState>) {
            let state = Arc::new(StubState::default());
            let pipeline = Arc::new(Self {
                state: Arc::clone(&state),
                encoder_mode,
                browser_fails: false,
            });
            (pipeline, state)
        }

        fn failing_browser() -> (Arc<Self>, Arc<StubState>) {
            let state = Arc::new(StubState::default());
            let pipeline = Arc::new(Self {
                state: Arc::clone(&state),
                encoder_mode: EncoderMode::Writes,
                browser_fails: true,
            });
            (pipeline, state)
        }
    }

    struct StubDisplay {
        state: Arc<StubState>,
    }

    #[async_trait]
    impl DisplayHandle for StubDisplay {
        async fn start(&mut self) -> Result<(), DisplayError> {
            self.state.push("display.start");
            self.state.display_running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) {
            self.state.push("display.stop");
            self.state.display_running.store(false, Ordering::SeqCst);
        }

        fn is_running(&mut self) -> bool {
            self.state.display_running.load(Ordering::SeqCst)
        }

        fn display(&self) -> &str {
            ":0"
        }
    }

    struct StubBrowser {
        state: Arc<StubState>,
        fail: bool,
    }

    #[async_trait]
    impl BrowserHandle for StubBrowser {
        async fn launch(&mut self, _opts: &LaunchOptions) -> Result<(), BrowserError> {
            if self.fail {
                return Err(BrowserError::Launch("stub launch failure".to_string()));
            }
            self.state.push("browser.launch");
            self.state.browser_running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) {
            self.state.push("browser.close");
            self.state.browser_running.store(false, Ordering::SeqCst);
        }

        fn is_running(&self) -> bool {
            self.state.browser_running.load(Ordering::SeqCst)
        }
    }

    struct StubEncoder {
        state: Arc<StubState>,
        mode: EncoderMode,
        out_dir: std::path::PathBuf,
    }

    #[async_trait]
    impl EncoderHandle for StubEncoder {
        async fn start(&mut self) -> Result<(), EncoderError> {
            self.state.push("encoder.start");
            self.state.encoder_running.store(true, Ordering::SeqCst);
            if self.mode == EncoderMode::Writes {
                std::fs::create_dir_all(&self.out_dir).unwrap();
                std::fs::write(self.out_dir.join("index.m3u8"), "#EXTM3U\n").unwrap();
                std::fs::write(self.out_dir.join("seg-0.ts"), b"data").unwrap();
            }
            Ok(())
        }

        async fn stop(&mut self) {
            self.state.push("encoder.stop");
            self.state.encoder_running.store(false, Ordering::SeqCst);
        }

        fn freshness_ms(&self) -> Option<u64> {
            SessionFreshness::new(&self.out_dir, 8000)
                .evaluate()
                .last_segment_age_ms
        }
    }

    impl CastPipeline for StubPipeline {
        fn display(&self, _display: &str, _w: u32, _h: u32) -> Box<dyn DisplayHandle> {
            Box::new(StubDisplay {
                state: Arc::clone(&self.state),
            })
        }

        fn browser(&self) -> Box<dyn BrowserHandle> {
            Box::new(StubBrowser {
                state: Arc::clone(&self.state),
                fail: self.browser_fails,
            })
        }

        fn encoder(
            &self,
            _display: &str,
            out_dir: &Path,
            _profile: HlsProfile,
        ) -> Box<dyn EncoderHandle> {
            Box::new(StubEncoder {
                state: Arc::clone(&self.state),
                mode: self.encoder_mode,
                out_dir: out_dir.to_path_buf(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        plays: Mutex<Vec<(String, String, String)>>,
        stops: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CastTransport for RecordingTransport {
        async fn play(&self, addr: &str, media_url: &str, title: &str) -> Result<(), SenderError> {
            self.plays
                .lock()
                .push((addr.to_string(), media_url.to_string(), title.to_string()));
            Ok(())
        }

        async fn stop(&self, addr: &str) -> Result<(), SenderError> {
            self.stops.lock().push(addr.to_string());
            Ok(())
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fixture
    // ─────────────────────────────────────────────────────────────────────────

    struct Fixture {
        orchestrator: Arc<SessionOrchestrator>,
        transport: Arc<RecordingTransport>,
        state: Arc<StubState>,
        _root: tempfile::TempDir,
    }

    fn fixture(pipeline: Arc<StubPipeline>, state: Arc<StubState>) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let sender = Arc::new(Sender::new(
            None,
            Arc::clone(&transport) as Arc<dyn CastTransport>,
        ));
        let timing = OrchestratorTiming {
            warmup_deadline_ms: 400,
            warmup_poll_ms: 20,
            watchdog_tick_ms: 20,
            join_timeout_ms: 2000,
        };
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::new(SessionStore::new(root.path())),
            Arc::new(ReceiverBindings::new()),
            sender,
            pipeline,
            NetworkContext::explicit(8080, "10.0.0.2"),
            timing,
            99,
        ));
        Fixture {
            orchestrator,
            transport,
            state,
            _root: root,
        }
    }

    fn request(receiver_name: &str, host: Option<&str>) -> StartRequest {
        serde_json::from_value(json!({
            "url": "http://example.com",
            "receiver_name": receiver_name,
            "receiver_host": host,
            "stale_after_ms": 8000u64,
        }))
        .unwrap()
    }

    async fn wait_for_state(session: &Arc<Session>, wanted: SessionState) {
        for _ in 0..300 {
            if session.state() == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "session never reached {wanted:?}, stuck in {:?}",
            session.state()
        );
    }

    /// Polls until `cond` holds; the state flips before teardown finishes,
    /// so checks on collaborator shutdown must wait for it.
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scenarios
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn warmup_success_transitions_to_playing() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);

        let session = f
            .orchestrator
            .start_session(request("Dummy", Some("192.0.2.10")))
            .unwrap();
        assert_eq!(session.state(), SessionState::Starting);

        wait_for_state(&session, SessionState::Playing).await;

        let status = f.orchestrator.status(&session.id).unwrap();
        assert!(status.last_segment_age_ms.unwrap() < 8000);
        assert_eq!(
            status.hls_url.as_deref(),
            Some(format!("/cast/{}/index.m3u8", session.id).as_str())
        );

        // Startup order: display before browser before encoder.
        let events = f.state.events();
        assert_eq!(
            events,
            vec!["display.start", "browser.launch", "encoder.start"]
        );

        f.orchestrator.stop_session(&session.id).await.unwrap();
    }

    #[tokio::test]
    async fn media_url_uses_advertised_host() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);

        let session = f
            .orchestrator
            .start_session(request("Dummy", Some("192.0.2.10")))
            .unwrap();
        wait_for_state(&session, SessionState::Playing).await;

        let plays = f.transport.plays.lock().clone();
        assert_eq!(plays.len(), 1);
        assert_eq!(
            plays[0].1,
            format!("http://10.0.0.2:8080/cast/{}/index.m3u8", session.id)
        );
        assert_eq!(plays[0].2, "Pagecast");

        f.orchestrator.stop_session(&session.id).await.unwrap();
    }

    #[tokio::test]
    async fn direct_host_send_uses_requested_address() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);

        let session = f
            .orchestrator
            .start_session(request("Dummy", Some("192.0.2.10")))
            .unwrap();
        wait_for_state(&session, SessionState::Playing).await;

        assert_eq!(f.transport.plays.lock()[0].0, "192.0.2.10:46899");

        f.orchestrator.stop_session(&session.id).await.unwrap();
    }

    #[tokio::test]
    async fn warmup_timeout_transitions_to_error_and_delete_still_works() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Silent);
        let f = fixture(pipeline, state);

        let session = f
            .orchestrator
            .start_session(request("Dummy", Some("192.0.2.10")))
            .unwrap();
        wait_for_state(&session, SessionState::Error).await;

        // No receiver playback was ever commanded.
        assert!(f.transport.plays.lock().is_empty());
        // Teardown ran.
        let state = Arc::clone(&f.state);
        wait_until(move || state.all_stopped()).await;

        // The record stays queryable until explicit delete.
        assert_eq!(
            f.orchestrator.status(&session.id).unwrap().state,
            SessionState::Error
        );
        f.orchestrator.stop_session(&session.id).await.unwrap();
        assert!(matches!(
            f.orchestrator.status(&session.id),
            Err(PagecastError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn browser_crash_during_startup_lands_in_error() {
        let (pipeline, state) = StubPipeline::failing_browser();
        let f = fixture(pipeline, state);

        let session = f
            .orchestrator
            .start_session(request("Dummy", Some("192.0.2.10")))
            .unwrap();
        wait_for_state(&session, SessionState::Error).await;
        let state = Arc::clone(&f.state);
        wait_until(move || state.all_stopped()).await;

        let events = f.state.events();
        // Encoder never started, display was torn down anyway.
        assert!(!events.contains(&"encoder.start".to_string()));
        assert!(events.contains(&"display.stop".to_string()));
    }

    #[tokio::test]
    async fn stale_output_transitions_playing_to_error() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);

        let mut req = request("Dummy", Some("192.0.2.10"));
        req.stale_after_ms = 150;
        let session = f.orchestrator.start_session(req).unwrap();

        wait_for_state(&session, SessionState::Playing).await;
        // The stub wrote one segment and never writes again; its age crosses
        // the threshold and the watchdog must fail the session.
        wait_for_state(&session, SessionState::Error).await;
        let state = Arc::clone(&f.state);
        wait_until(move || state.all_stopped()).await;
    }

    #[tokio::test]
    async fn stop_session_tears_down_in_reverse_order() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);

        let session = f
            .orchestrator
            .start_session(request("Dummy", Some("192.0.2.10")))
            .unwrap();
        wait_for_state(&session, SessionState::Playing).await;

        f.orchestrator.stop_session(&session.id).await.unwrap();

        let events = f.state.events();
        let pos = |name: &str| events.iter().position(|e| e == name).unwrap();
        assert!(pos("encoder.stop") < pos("browser.close"));
        assert!(pos("browser.close") < pos("display.stop"));
        assert!(f.state.all_stopped());

        // Binding released, receiver stopped with the captured address.
        assert!(f
            .transport
            .stops
            .lock()
            .iter()
            .all(|addr| addr == "192.0.2.10:46899"));
        assert!(!f.transport.stops.lock().is_empty());

        // Record and directory gone.
        assert!(matches!(
            f.orchestrator.status(&session.id),
            Err(PagecastError::SessionNotFound(_))
        ));
        assert!(!session.dir.exists());
    }

    #[tokio::test]
    async fn receiver_exclusivity_only_first_session_binds() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);

        let first = f
            .orchestrator
            .start_session(request("A", Some("192.0.2.1")))
            .unwrap();
        wait_for_state(&first, SessionState::Playing).await;

        let second = f
            .orchestrator
            .start_session(request("A", Some("192.0.2.2")))
            .unwrap();
        wait_for_state(&second, SessionState::Playing).await;

        // Only the first session commanded playback.
        let plays = f.transport.plays.lock().clone();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].0, "192.0.2.1:46899");

        // First session's teardown stops the receiver at its own address.
        f.orchestrator.stop_session(&first.id).await.unwrap();
        assert!(f
            .transport
            .stops
            .lock()
            .iter()
            .any(|addr| addr == "192.0.2.1:46899"));

        f.orchestrator.stop_session(&second.id).await.unwrap();
    }

    #[tokio::test]
    async fn soft_play_failure_keeps_session_playing_without_binding() {
        struct RefusingTransport;

        #[async_trait]
        impl CastTransport for RefusingTransport {
            async fn play(&self, addr: &str, _url: &str, _t: &str) -> Result<(), SenderError> {
                Err(SenderError::Connect {
                    addr: addr.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                })
            }

            async fn stop(&self, _addr: &str) -> Result<(), SenderError> {
                Ok(())
            }
        }

        let (pipeline, _state) = StubPipeline::new(EncoderMode::Writes);
        let root = tempfile::tempdir().unwrap();
        let bindings = Arc::new(ReceiverBindings::new());
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::new(SessionStore::new(root.path())),
            Arc::clone(&bindings),
            Arc::new(Sender::new(None, Arc::new(RefusingTransport))),
            pipeline,
            NetworkContext::explicit(8080, "10.0.0.2"),
            OrchestratorTiming {
                warmup_deadline_ms: 400,
                warmup_poll_ms: 20,
                watchdog_tick_ms: 20,
                join_timeout_ms: 2000,
            },
            99,
        ));

        let session = orchestrator
            .start_session(request("Dummy", Some("192.0.2.10")))
            .unwrap();
        wait_for_state(&session, SessionState::Playing).await;

        // Refused playback is a soft failure: playing, but no binding held.
        assert_eq!(bindings.holder("Dummy"), None);

        orchestrator.stop_session(&session.id).await.unwrap();
    }

    #[tokio::test]
    async fn display_is_reused_after_release() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);

        let first = f
            .orchestrator
            .start_session(request("A", Some("192.0.2.1")))
            .unwrap();
        assert_eq!(first.display, ":99");
        wait_for_state(&first, SessionState::Playing).await;

        let second = f
            .orchestrator
            .start_session(request("B", Some("192.0.2.2")))
            .unwrap();
        assert_eq!(second.display, ":100");

        f.orchestrator.stop_session(&first.id).await.unwrap();
        f.orchestrator.stop_session(&second.id).await.unwrap();

        let third = f
            .orchestrator
            .start_session(request("C", Some("192.0.2.3")))
            .unwrap();
        assert_eq!(third.display, ":99");
        f.orchestrator.stop_session(&third.id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_unknown_session_is_not_found() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);
        assert!(matches!(
            f.orchestrator.stop_session("nope").await,
            Err(PagecastError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_session_validates_request() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Writes);
        let f = fixture(pipeline, state);

        let mut bad_url = request("Dummy", None);
        bad_url.url = "not a url".to_string();
        assert!(matches!(
            f.orchestrator.start_session(bad_url),
            Err(PagecastError::InvalidRequest(_))
        ));

        let mut empty_receiver = request("", None);
        empty_receiver.receiver_name = "  ".to_string();
        assert!(matches!(
            f.orchestrator.start_session(empty_receiver),
            Err(PagecastError::InvalidRequest(_))
        ));

        let mut zero_fps = request("Dummy", None);
        zero_fps.fps = 0;
        assert!(matches!(
            f.orchestrator.start_session(zero_fps),
            Err(PagecastError::InvalidRequest(_))
        ));

        // Nothing was allocated for rejected requests.
        assert!(f.orchestrator.list().is_empty());
    }

    #[tokio::test]
    async fn stop_during_warmup_aborts_without_error() {
        let (pipeline, state) = StubPipeline::new(EncoderMode::Silent);
        let f = fixture(pipeline, state);

        let session = f
            .orchestrator
            .start_session(request("Dummy", Some("192.0.2.10")))
            .unwrap();

        // Give the task a moment to enter warmup, then stop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.orchestrator.stop_session(&session.id).await.unwrap();

        assert_eq!(session.state(), SessionState::Stopped);
        assert!(f.state.all_stopped());
        assert!(f.transport.plays.lock().is_empty());
    }
}
