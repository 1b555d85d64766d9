//! Browser control for rendering the cast source page.
//!
//! Drives a Chromium instance over CDP, launched *headed* into the
//! session's virtual display (a headless browser would produce no pixels
//! for the screen grabber). Supports an ephemeral context or a persistent
//! profile directory so authenticated sessions survive restarts; both
//! converge on the same page interface.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventLifecycleEvent, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keeps backgrounded pages painting: some sites stop producing frames when
/// `document.hidden` flips, which starves the encoder.
const KEEPALIVE_SCRIPT: &str = "\
Object.defineProperty(document, 'hidden', { get() { return false; } });\n\
document.addEventListener('visibilitychange', () => {\n\
  window.requestAnimationFrame(() => {});\n\
});\n";

/// Errors produced by the browser controller.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// Both inline cookies and a cookies file were supplied.
    #[error("cookies and cookies_path are mutually exclusive")]
    CookieSourceConflict,

    /// The cookies file could not be read or parsed.
    #[error("Failed to load cookies file: {0}")]
    CookieFile(String),

    /// Browser bootstrap or navigation failed.
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// The page did not reach the requested wait condition in time.
    #[error("Navigation did not reach '{0}' before the timeout")]
    NavigationTimeout(&'static str),
}

/// Navigation wait condition for [`BrowserHandle::launch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    /// Wait for the window load event.
    Load,
    /// Wait for DOMContentLoaded.
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    /// Wait until the network has been idle for a moment.
    #[default]
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

impl WaitUntil {
    /// The CDP lifecycle event name this condition corresponds to.
    fn lifecycle_event(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::NetworkIdle => "networkIdle",
        }
    }
}

/// Options for one browser launch.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Page to render.
    pub url: String,
    /// Viewport width (matches the display geometry).
    pub width: u32,
    /// Viewport height (matches the display geometry).
    pub height: u32,
    /// Display identifier the browser should render into (e.g. `:99`).
    pub display: String,
    /// Inline cookies to inject before navigation.
    pub cookies: Option<Vec<CookieParam>>,
    /// Path to a JSON file holding an array of cookies to inject.
    pub cookies_path: Option<PathBuf>,
    /// Profile directory for persistent (authenticated) sessions.
    pub user_data_dir: Option<PathBuf>,
    /// Additional HTTP headers applied to every request.
    pub extra_headers: Option<HashMap<String, String>>,
    /// Navigation wait condition.
    pub wait_until: WaitUntil,
    /// Upper bound on navigation time (ms).
    pub timeout_ms: u64,
    /// Hide browser chrome so only page content is captured.
    pub hide_browser_ui: bool,
}

impl LaunchOptions {
    /// Creates options with the defaults used by the orchestrator.
    #[must_use]
    pub fn new(url: impl Into<String>, width: u32, height: u32, display: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            display: display.into(),
            cookies: None,
            cookies_path: None,
            user_data_dir: None,
            extra_headers: None,
            wait_until: WaitUntil::default(),
            timeout_ms: 25_000,
            hide_browser_ui: true,
        }
    }

    /// Rejects option combinations that must never reach a spawned process.
    fn validate(&self) -> Result<(), BrowserError> {
        if self.cookies.is_some() && self.cookies_path.is_some() {
            return Err(BrowserError::CookieSourceConflict);
        }
        Ok(())
    }
}

/// Seam between the orchestrator and the concrete browser process.
#[async_trait]
pub trait BrowserHandle: Send {
    /// Launches the browser and navigates to the configured URL.
    async fn launch(&mut self, opts: &LaunchOptions) -> Result<(), BrowserError>;

    /// Tears down page, browser and CDP handler; each step tolerates
    /// failure and moves on. Double-close is safe.
    async fn close(&mut self);

    /// Whether a browser process is currently attached.
    fn is_running(&self) -> bool;
}

/// Chromium controller speaking CDP via chromiumoxide.
#[derive(Default)]
pub struct BrowserController {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
}

impl BrowserController {
    /// Creates a controller with no attached browser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn build_config(opts: &LaunchOptions) -> Result<BrowserConfig, BrowserError> {
        let viewport = Viewport {
            width: opts.width,
            height: opts.height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: opts.width >= opts.height,
            has_touch: false,
        };

        let mut builder = BrowserConfig::builder()
            // Headed into the virtual display; headless would leave the
            // framebuffer blank.
            .headless_mode(HeadlessMode::False)
            .env("DISPLAY", &opts.display)
            .window_size(opts.width, opts.height)
            .viewport(viewport)
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--autoplay-policy=no-user-gesture-required")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-renderer-backgrounding");

        if opts.hide_browser_ui {
            builder = builder.arg("--kiosk");
        }
        if let Some(ref dir) = opts.user_data_dir {
            builder = builder.user_data_dir(dir);
        }

        builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("browser config: {e}")))
    }

    async fn load_cookies(opts: &LaunchOptions) -> Result<Option<Vec<CookieParam>>, BrowserError> {
        if let Some(ref cookies) = opts.cookies {
            return Ok(Some(cookies.clone()));
        }
        let Some(ref path) = opts.cookies_path else {
            return Ok(None);
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BrowserError::CookieFile(format!("{}: {e}", path.display())))?;
        let cookies: Vec<CookieParam> = serde_json::from_str(&raw)
            .map_err(|e| BrowserError::CookieFile(format!("{}: {e}", path.display())))?;
        Ok(Some(cookies))
    }

    /// Waits for the requested lifecycle event, bounded by the launch timeout.
    async fn await_wait_condition(
        page: &Page,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let wanted = wait_until.lifecycle_event();
        let mut events = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(|e| BrowserError::Launch(format!("lifecycle listener: {e}")))?;

        let wait = async {
            while let Some(event) = events.next().await {
                if event.name == wanted {
                    return true;
                }
            }
            false
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(BrowserError::Launch(
                "lifecycle event stream ended before the wait condition".to_string(),
            )),
            Err(_) => Err(BrowserError::NavigationTimeout(wanted)),
        }
    }
}

#[async_trait]
impl BrowserHandle for BrowserController {
    async fn launch(&mut self, opts: &LaunchOptions) -> Result<(), BrowserError> {
        opts.validate()?;
        let cookies = Self::load_cookies(opts).await?;
        let config = Self::build_config(opts)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The CDP handler must be polled for the connection to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(item) = handler.next().await {
                if item.is_err() {
                    break;
                }
            }
        });
        self.handler_task = Some(handler_task);

        let result = async {
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| BrowserError::Launch(format!("create page: {e}")))?;

            page.execute(SetLifecycleEventsEnabledParams::new(true))
                .await
                .map_err(|e| BrowserError::Launch(format!("lifecycle events: {e}")))?;

            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
                KEEPALIVE_SCRIPT,
            ))
            .await
            .map_err(|e| BrowserError::Launch(format!("keepalive script: {e}")))?;

            if let Some(ref headers) = opts.extra_headers {
                let map: serde_json::Value = serde_json::to_value(headers)
                    .map_err(|e| BrowserError::Launch(format!("extra headers: {e}")))?;
                page.execute(SetExtraHttpHeadersParams::new(Headers::new(map)))
                    .await
                    .map_err(|e| BrowserError::Launch(format!("extra headers: {e}")))?;
            }

            if let Some(cookies) = cookies {
                page.set_cookies(cookies)
                    .await
                    .map_err(|e| BrowserError::Launch(format!("set cookies: {e}")))?;
            }

            let timeout = Duration::from_millis(opts.timeout_ms);
            let lifecycle = Self::await_wait_condition(&page, opts.wait_until, timeout);
            let navigate = async {
                page.goto(opts.url.as_str())
                    .await
                    .map(|_| ())
                    .map_err(|e| BrowserError::Launch(format!("goto {}: {e}", opts.url)))
            };
            let (nav, lifecycle) = tokio::join!(navigate, lifecycle);
            nav?;
            lifecycle?;

            info!(url = %opts.url, display = %opts.display, "page loaded");
            Ok(page)
        }
        .await;

        match result {
            Ok(page) => {
                self.page = Some(page);
                self.browser = Some(browser);
                Ok(())
            }
            Err(e) => {
                // Bootstrap failed partway: reap the spawned process before
                // reporting, so no browser outlives a failed launch.
                let mut browser = browser;
                let _ = browser.close().await;
                let _ = browser.wait().await;
                if let Some(task) = self.handler_task.take() {
                    task.abort();
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            // Dropping the page detaches it; explicit target close is left to
            // the browser shutdown below.
            drop(page);
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("failed to close browser cleanly: {e}");
            }
            if let Err(e) = browser.wait().await {
                warn!("failed to wait for browser process: {e}");
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
            debug!("CDP handler task stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.browser.is_some()
    }
}
