//! Browser session abstraction consumed by the harvest loop.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod chromium;

pub use chromium::{ChromiumConfig, ChromiumSession};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser session closed")]
    Closed,
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("browser command failed: {0}")]
    Command(String),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        use chromiumoxide::error::CdpError;
        match err {
            CdpError::ChannelSendError(_) | CdpError::NoResponse => Self::Closed,
            other => Self::Command(other.to_string()),
        }
    }
}

/// A network response captured from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    url: String,
    status: u16,
    body: String,
}

impl CapturedResponse {
    #[must_use]
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn as_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    #[must_use]
    pub fn as_text(&self) -> &str {
        &self.body
    }
}

/// The page operations the harvest loop needs.
///
/// The loop owns the session exclusively, hence `&mut self` throughout.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate the page and wait for the load to finish.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// URL the page is currently showing (after redirects).
    async fn current_url(&mut self) -> Result<String, BrowserError>;

    /// Wait up to `timeout` for the next response whose URL contains one of
    /// `url_substrings`.
    ///
    /// Returns `Ok(None)` when the timeout elapses first. Implementations must release
    /// their response listeners on both paths.
    async fn wait_for_relevant_response(
        &mut self,
        url_substrings: &[&str],
        timeout: Duration,
    ) -> Result<Option<CapturedResponse>, BrowserError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), BrowserError>;

    /// Scroll up `steps` times by `fraction` of the viewport height.
    async fn scroll_up_partial(&mut self, steps: u32, fraction: f64) -> Result<(), BrowserError>;

    /// Focus the element at `selector`, type `text` and press Enter.
    async fn fill_and_submit(&mut self, selector: &str, text: &str) -> Result<(), BrowserError>;

    /// Click the page's "Retry" affordance, if one is shown.
    ///
    /// Returns whether anything was clicked.
    async fn click_retry(&mut self) -> Result<bool, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Detect a rate-limit answer from its status and raw body.
#[must_use]
pub fn is_rate_limited(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests")
}
