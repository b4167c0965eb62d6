//! Chromium-backed browser session using chromiumoxide.
//!
//! Timeline responses are captured by a background task that follows the Network
//! domain: a relevant `ResponseReceived` is remembered until its `LoadingFinished`
//! arrives, then the body is fetched and queued. Waiting for a response is a bounded
//! receive on that queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, CookieParam, ErrorReason, EventLoadingFailed, EventLoadingFinished,
    EventResponseReceived, GetResponseBodyParams, RequestId, SetUserAgentOverrideParams,
};
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserError, BrowserSession, CapturedResponse};
use crate::constants::{
    AUTH_COOKIE_DOMAIN, AUTH_COOKIE_NAME, BROWSER_USER_AGENT, RELEVANT_URL_MARKERS,
};
use crate::harvest::classify::matches_any;

/// Default viewport width in pixels.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1240;

/// Default viewport height in pixels.
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;

/// Default browser request timeout in seconds.
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 60;

/// Captured responses waiting to be consumed by the harvest loop.
const CAPTURE_BUFFER: usize = 64;

/// How long `fill_and_submit` waits for its element to appear.
const ELEMENT_WAIT: Duration = Duration::from_secs(15);
const ELEMENT_POLL: Duration = Duration::from_millis(250);

/// Pause between partial scroll-up steps.
const SCROLL_STEP_PAUSE: Duration = Duration::from_millis(120);

const SCROLL_TO_BOTTOM_JS: &str =
    "window.scrollTo({top: document.body.scrollHeight, behavior: 'smooth'})";

/// Rendered photos are not needed; dropping them keeps the DOM small on long feeds.
const STRIP_PHOTOS_JS: &str = r#"
document.querySelectorAll("div[data-testid='tweetPhoto']").forEach(el => el.remove());
document.querySelectorAll("a div[aria-label='Image']").forEach(el => el.remove());
"#;

const CLICK_RETRY_JS: &str = r#"
(() => {
    const el = Array.from(document.querySelectorAll("button, [role='button']"))
        .find(b => b.innerText && b.innerText.trim() === 'Retry');
    if (el) { el.click(); return true; }
    return false;
})()
"#;

/// Observer for passively captured responses: `(url, status)`.
pub type ResponseObserver = Arc<dyn Fn(&str, u16) + Send + Sync>;

/// Browser launch configuration.
#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    pub headless: bool,
    /// Path to Chrome/Chromium executable (None for auto-detection).
    pub chrome_path: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub page_timeout: Duration,
    /// Session credential injected as the `auth_token` cookie.
    pub auth_token: String,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            page_timeout: Duration::from_secs(DEFAULT_PAGE_TIMEOUT_SECS),
            auth_token: String::new(),
        }
    }
}

/// One browser with one page, owned by a single harvest.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    captured: mpsc::Receiver<CapturedResponse>,
    /// Drives the CDP connection; must outlive every other task.
    handler: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromiumSession {
    /// Launch the browser, open a page with the auth cookie set and start capturing
    /// timeline responses.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser cannot be launched or the page cannot be prepared.
    pub async fn launch(config: &ChromiumConfig) -> Result<Self> {
        info!(headless = config.headless, "Launching browser");

        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .request_timeout(config.page_timeout)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--lang=en-US,en");

        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(ref chrome_path) = config.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to create new page")?;

        page.execute(SetUserAgentOverrideParams::new(BROWSER_USER_AGENT))
            .await
            .context("Failed to set user agent")?;
        page.execute(network::EnableParams::default())
            .await
            .context("Failed to enable Network domain")?;

        let cookie = CookieParam::builder()
            .name(AUTH_COOKIE_NAME)
            .value(config.auth_token.clone())
            .domain(AUTH_COOKIE_DOMAIN)
            .path("/")
            .secure(true)
            .http_only(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build auth cookie: {e}"))?;
        page.set_cookies(vec![cookie])
            .await
            .context("Failed to set auth cookie")?;

        let (tx, captured) = mpsc::channel(CAPTURE_BUFFER);
        let capture_task = spawn_capture(page.clone(), tx)
            .await
            .context("Failed to subscribe to network events")?;

        info!("Browser ready");

        Ok(Self {
            browser,
            page,
            captured,
            handler: handler_task,
            tasks: vec![capture_task],
        })
    }

    /// Abort every request whose URL satisfies `predicate` (used for media assets).
    ///
    /// # Errors
    ///
    /// Returns an error if request interception cannot be enabled.
    pub async fn install_request_filter<F>(&mut self, predicate: F) -> Result<(), BrowserError>
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        let mut paused = self.page.event_listener::<EventRequestPaused>().await?;
        self.page
            .execute(
                fetch::EnableParams::builder()
                    .pattern(RequestPattern::builder().url_pattern("*").build())
                    .build(),
            )
            .await?;

        let page = self.page.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let outcome = if predicate(&event.request.url) {
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(drop)
                } else {
                    page.execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(drop)
                };
                if let Err(e) = outcome {
                    debug!(url = %event.request.url, "Failed to resolve paused request: {e}");
                }
            }
        }));

        Ok(())
    }

    /// Invoke `observer` for every response whose URL contains one of `url_substrings`.
    ///
    /// Runs alongside the harvest loop's own capture and never consumes its responses.
    ///
    /// # Errors
    ///
    /// Returns an error if the event subscription fails.
    pub async fn install_response_filter(
        &mut self,
        url_substrings: Vec<String>,
        observer: ResponseObserver,
    ) -> Result<(), BrowserError> {
        let mut responses = self.page.event_listener::<EventResponseReceived>().await?;
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let url = &event.response.url;
                if url_substrings.iter().any(|s| url.contains(s.as_str())) {
                    observer(url, status_code(event.response.status));
                }
            }
        }));
        Ok(())
    }

    async fn wait_for_element(&self, selector: &str) -> Result<chromiumoxide::Element, BrowserError> {
        let deadline = tokio::time::Instant::now() + ELEMENT_WAIT;
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(e) if tokio::time::Instant::now() >= deadline => {
                    debug!(selector, "Giving up waiting for element: {e}");
                    return Err(BrowserError::ElementNotFound(selector.to_string()));
                }
                Err(_) => tokio::time::sleep(ELEMENT_POLL).await,
            }
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!(url, "Navigating");
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn wait_for_relevant_response(
        &mut self,
        url_substrings: &[&str],
        timeout: Duration,
    ) -> Result<Option<CapturedResponse>, BrowserError> {
        let captured = &mut self.captured;
        let next = async {
            while let Some(response) = captured.recv().await {
                if matches_any(response.url(), url_substrings) {
                    return Ok(response);
                }
            }
            Err(BrowserError::Closed)
        };
        match tokio::time::timeout(timeout, next).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), BrowserError> {
        self.page.evaluate(SCROLL_TO_BOTTOM_JS).await?;
        self.page.evaluate(STRIP_PHOTOS_JS).await?;
        Ok(())
    }

    async fn scroll_up_partial(&mut self, steps: u32, fraction: f64) -> Result<(), BrowserError> {
        let script = format!("window.scrollBy(0, -Math.round(window.innerHeight * {fraction}))");
        for _ in 0..steps {
            self.page.evaluate(script.as_str()).await?;
            tokio::time::sleep(SCROLL_STEP_PAUSE).await;
        }
        Ok(())
    }

    async fn fill_and_submit(&mut self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self.wait_for_element(selector).await?;
        element.click().await?;
        element.type_str(text).await?;
        element.press_key("Enter").await?;
        Ok(())
    }

    async fn click_retry(&mut self) -> Result<bool, BrowserError> {
        let result = self.page.evaluate(CLICK_RETRY_JS).await?;
        result
            .into_value::<bool>()
            .map_err(|e| BrowserError::Command(format!("unexpected retry click result: {e}")))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Err(e) = self.page.clone().close().await {
            warn!("Failed to close page: {e}");
        }
        let closed = self.browser.close().await;
        self.handler.abort();
        closed?;
        info!("Browser shutdown complete");
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.handler.abort();
    }
}

/// Follow network events and queue the bodies of relevant responses.
async fn spawn_capture(
    page: Page,
    tx: mpsc::Sender<CapturedResponse>,
) -> Result<JoinHandle<()>, BrowserError> {
    let mut responses = page.event_listener::<EventResponseReceived>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;

    Ok(tokio::spawn(async move {
        let mut pending: HashMap<String, (String, u16)> = HashMap::new();
        loop {
            tokio::select! {
                Some(event) = responses.next() => {
                    if matches_any(&event.response.url, RELEVANT_URL_MARKERS) {
                        pending.insert(
                            event.request_id.inner().clone(),
                            (event.response.url.clone(), status_code(event.response.status)),
                        );
                    }
                }
                Some(event) = finished.next() => {
                    let Some((url, status)) = pending.remove(event.request_id.inner()) else {
                        continue;
                    };
                    match response_body(&page, event.request_id.clone()).await {
                        Ok(body) => {
                            debug!(url = %url, status, bytes = body.len(), "Captured timeline response");
                            if tx.send(CapturedResponse::new(url, status, body)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(url = %url, "Failed to read response body: {e}"),
                    }
                }
                Some(event) = failed.next() => {
                    pending.remove(event.request_id.inner());
                }
                else => break,
            }
        }
    }))
}

async fn response_body(page: &Page, request_id: RequestId) -> Result<String, BrowserError> {
    let returns = page
        .execute(GetResponseBodyParams::new(request_id))
        .await?
        .result;
    if returns.base64_encoded {
        let bytes = BASE64_STANDARD
            .decode(returns.body.as_bytes())
            .map_err(|e| BrowserError::Command(format!("invalid base64 body: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Ok(returns.body)
    }
}

fn status_code(status: i64) -> u16 {
    u16::try_from(status).unwrap_or_default()
}
