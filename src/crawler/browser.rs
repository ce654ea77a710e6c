//! Browser session management over CDP (chromiumoxide).
//!
//! One [`BrowserSession`] per orchestrator run. Pages are opened with a
//! realistic user agent, stealth init scripts and a stream-URL
//! interceptor installed before any page JS runs; heavy HLS `.ts`
//! segment requests are blocked at the network layer so the crawler
//! never pulls multi-megabyte media while discovering.
//!
//! Network-response capture is scoped to one page-fetch operation:
//! [`ResponseCapture::attach`] opens a CDP event stream on the page and
//! [`ResponseCapture::detach`] tears it down deterministically, returning
//! everything collected.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, SetBlockedUrLsParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use rand::seq::SliceRandom;
use regex::Regex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::extract::VIDEO_INTERCEPT_INIT_JS;

/// Common Chrome executable paths to check before consulting PATH.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

/// Recent Chrome versions rotated through for the user agent.
const UA_VERSIONS: &[&str] = &["131.0.0.0", "130.0.0.0", "129.0.0.0", "128.0.0.0"];

/// Heavy HLS segment requests blocked during discovery. Only `.ts`
/// media segments - blocking images/fonts/CSS is itself a detection
/// signal.
const BLOCKED_URL_PATTERNS: &[&str] = &["*/segment*.ts", "*.ts?*"];

/// Stealth patches evaluated before page scripts run.
const STEALTH_JS: &str = r"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    if (!window.chrome) window.chrome = {};
    if (!window.chrome.runtime) window.chrome.runtime = {};
    const origQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (params) =>
        params.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : origQuery(params);
    const getParam = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(param) {
        if (param === 37445) return 'Intel Inc.';
        if (param === 37446) return 'Intel Iris OpenGL Engine';
        return getParam.call(this, param);
    };
";

/// Errors from browser-level page fetching.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No Chrome/Chromium binary could be located.
    #[error("Chrome/Chromium not found; install it or add it to PATH")]
    ChromeNotFound,

    /// Browser configuration was rejected.
    #[error("browser config error: {0}")]
    Config(String),

    /// Browser launch or CDP command failed.
    #[error("browser error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// Navigation did not complete within the timeout.
    #[error("timeout loading {url}")]
    Timeout {
        /// The page URL.
        url: String,
    },
}

/// One launched browser shared by the orchestrator loop.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    user_agent: String,
}

impl BrowserSession {
    /// Launches a browser with stealth-friendly arguments.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ChromeNotFound`] when no binary exists and
    /// [`FetchError::Cdp`] on launch failure.
    #[instrument]
    pub async fn launch(headless: bool) -> Result<Self, FetchError> {
        let chrome = find_chrome().ok_or(FetchError::ChromeNotFound)?;
        info!(chrome = %chrome, headless, "launching browser");

        let ua_version = UA_VERSIONS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(UA_VERSIONS[0]);
        let user_agent = format!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/{ua_version} Safari/537.36"
        );

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome)
            .window_size(1440, 900)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--lang=en-US");
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(FetchError::Config)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
            user_agent,
        })
    }

    /// Opens a fresh page with user agent, stealth patches, the stream
    /// interceptor and segment blocking applied.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cdp`] on CDP failure.
    pub async fn open_page(&self) -> Result<Page, FetchError> {
        let page = self.browser.new_page("about:blank").await?;
        page.execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await?;
        // Init scripts must land before any navigation
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_JS.to_string(),
        ))
        .await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            VIDEO_INTERCEPT_INIT_JS.to_string(),
        ))
        .await?;
        page.execute(SetBlockedUrLsParams::new(
            BLOCKED_URL_PATTERNS.iter().map(ToString::to_string).collect::<Vec<_>>(),
        ))
        .await?;
        Ok(page)
    }

    /// Navigates a page with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Timeout`] when the load outruns `timeout`
    /// and [`FetchError::Cdp`] on navigation failure.
    #[instrument(skip(self, page), fields(url = %url))]
    pub async fn navigate(&self, page: &Page, url: &str, timeout: Duration) -> Result<(), FetchError> {
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => {
                // Aborted navigations still often leave a usable document
                if page_has_title(page).await {
                    debug!(%error, "navigation errored but page rendered");
                    Ok(())
                } else {
                    Err(error.into())
                }
            }
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
        }
    }

    /// Closes the browser and its handler task.
    pub async fn close(mut self) {
        if let Err(error) = self.browser.close().await {
            warn!(%error, "browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

/// Evaluates a script expecting a JSON-deserializable value; a failed
/// evaluation yields the default.
pub async fn eval_or_default<T>(page: &Page, script: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    match page.evaluate(script.to_string()).await {
        Ok(result) => result.into_value().unwrap_or_default(),
        Err(error) => {
            debug!(%error, "page evaluation failed");
            T::default()
        }
    }
}

/// Reads the page title, empty on failure.
pub async fn page_title(page: &Page) -> String {
    match page.get_title().await {
        Ok(title) => title.unwrap_or_default(),
        Err(_) => String::new(),
    }
}

async fn page_has_title(page: &Page) -> bool {
    !page_title(page).await.is_empty()
}

/// Finds a Chrome/Chromium executable.
fn find_chrome() -> Option<String> {
    for path in CHROME_PATHS {
        if std::path::Path::new(path).exists() {
            return Some((*path).to_string());
        }
    }
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(found) = which::which(name) {
            return Some(found.to_string_lossy().into_owned());
        }
    }
    None
}

/// A network-response listener scoped to one page-fetch operation.
///
/// Collects response URLs matching the profile's stream pattern for the
/// lifetime of the fetch; [`ResponseCapture::detach`] is the
/// deterministic teardown.
pub struct ResponseCapture {
    urls: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl ResponseCapture {
    /// Attaches a listener to the page's response events.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cdp`] if the event stream cannot be opened.
    pub async fn attach(page: &Page, pattern: Regex) -> Result<Self, FetchError> {
        let mut events = page.event_listener::<EventResponseReceived>().await?;
        let urls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&urls);
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let url = event.response.url.clone();
                if pattern.is_match(&url) {
                    let mut collected = sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    if !collected.contains(&url) {
                        collected.push(url);
                    }
                }
            }
        });
        Ok(Self { urls, task })
    }

    /// Stops listening and returns everything captured.
    #[must_use]
    pub fn detach(self) -> Vec<String> {
        self.task.abort();
        let mut collected = self
            .urls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(&mut *collected)
    }
}
