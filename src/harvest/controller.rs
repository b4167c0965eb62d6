//! The pagination loop.
//!
//! Each iteration waits (bounded) for the next timeline response, then either nudges
//! the feed after a timeout, backs off after a rate limit, or extracts and persists the
//! response's records. The loop ends when the target is reached, the feed stays silent
//! for `timeout_ceiling` consecutive waits, or the session becomes unusable. Whatever
//! was accumulated is always returned.

use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::classify::{classify, Classification, ExtractMode};
use super::extract;
use super::query::{compose_search_query, QueryError, SearchTab};
use super::record::NormalizedRecord;
use crate::browser::{is_rate_limited, BrowserError, BrowserSession};
use crate::constants::{LOGIN_URL_MARKER, RELEVANT_URL_MARKERS, SEARCH_INPUT_SELECTOR};
use crate::sink::{RecordSink, SinkOutput};

/// Settings for one harvest run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    /// Consecutive empty waits before the feed is considered exhausted.
    pub timeout_ceiling: u32,
    /// How long to wait for a timeline response per iteration.
    pub response_wait: Duration,
    /// Pause after scrolling past a processed response.
    pub settle_delay: Duration,
    /// Records per throttle point.
    pub throttle_every: usize,
    pub throttle_delay: Duration,
    pub backoff: BackoffPolicy,
    pub scroll_up_steps: u32,
    /// Fraction of the viewport height per scroll-up step.
    pub scroll_up_fraction: f64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            timeout_ceiling: 20,
            response_wait: Duration::from_millis(1500),
            settle_delay: Duration::from_millis(750),
            throttle_every: 20,
            throttle_delay: Duration::from_secs(3),
            backoff: BackoffPolicy::fixed(),
            scroll_up_steps: 3,
            scroll_up_fraction: 0.5,
        }
    }
}

/// What to harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestTarget {
    /// Keyword search; `query` already carries any date qualifiers.
    Search { query: String, tab: SearchTab },
    /// A single conversation.
    Thread { url: String },
}

impl HarvestTarget {
    /// Build a search target from raw keywords and `dd-mm-yyyy` dates.
    ///
    /// # Errors
    ///
    /// Returns an error if a date does not parse.
    pub fn search(
        keywords: &str,
        from_date: Option<&str>,
        to_date: Option<&str>,
        tab: SearchTab,
    ) -> Result<Self, QueryError> {
        Ok(Self::Search {
            query: compose_search_query(keywords, from_date, to_date)?,
            tab,
        })
    }

    #[must_use]
    pub fn thread(url: impl Into<String>) -> Self {
        Self::Thread { url: url.into() }
    }

    #[must_use]
    pub const fn mode(&self) -> ExtractMode {
        match self {
            Self::Search { .. } => ExtractMode::Search,
            Self::Thread { .. } => ExtractMode::Detail,
        }
    }

    #[must_use]
    pub fn start_url(&self) -> &str {
        match self {
            Self::Search { tab, .. } => tab.url(),
            Self::Thread { url } => url,
        }
    }
}

/// Why a harvest stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    /// The timeout ceiling was hit; the feed is assumed to have no more items.
    FeedExhausted,
    /// A response could not be decoded and was not a rate-limit notice.
    DecodeFailed { url: String, status: u16 },
    /// The page bounced to the login flow.
    AuthFailed,
    /// The browser or page stopped responding.
    SessionLost(String),
    Cancelled,
}

impl StopReason {
    /// Whether the stop was caused by a failure rather than normal completion.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::DecodeFailed { .. } | Self::AuthFailed | Self::SessionLost(_)
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetReached => write!(f, "target count reached"),
            Self::FeedExhausted => write!(f, "feed exhausted"),
            Self::DecodeFailed { url, status } => {
                write!(f, "undecodable response (status {status}) from {url}")
            }
            Self::AuthFailed => write!(f, "auth token rejected (redirected to login)"),
            Self::SessionLost(message) => write!(f, "browser session lost: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of a harvest. Always produced, even when the run stopped early.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub records: Vec<NormalizedRecord>,
    pub stop: StopReason,
    /// Timeline responses received.
    pub responses: usize,
    pub timeouts: usize,
    pub rate_limit_hits: usize,
    /// Sink writes that failed (their records are still in `records`).
    pub sink_errors: usize,
    pub output: Option<SinkOutput>,
}

impl HarvestReport {
    fn new(stop: StopReason) -> Self {
        Self {
            records: Vec::new(),
            stop,
            responses: 0,
            timeouts: 0,
            rate_limit_hits: 0,
            sink_errors: 0,
            output: None,
        }
    }
}

/// Per-run loop state.
struct CrawlState {
    target_count: usize,
    records: Vec<NormalizedRecord>,
    consecutive_timeouts: u32,
    rate_limit_attempt: u32,
    since_throttle: usize,
    responses: usize,
    timeouts: usize,
    rate_limit_hits: usize,
    sink_errors: usize,
}

impl CrawlState {
    const fn new(target_count: usize) -> Self {
        Self {
            target_count,
            records: Vec::new(),
            consecutive_timeouts: 0,
            rate_limit_attempt: 0,
            since_throttle: 0,
            responses: 0,
            timeouts: 0,
            rate_limit_hits: 0,
            sink_errors: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.target_count.saturating_sub(self.records.len())
    }

    fn into_report(self, stop: StopReason) -> HarvestReport {
        HarvestReport {
            records: self.records,
            stop,
            responses: self.responses,
            timeouts: self.timeouts,
            rate_limit_hits: self.rate_limit_hits,
            sink_errors: self.sink_errors,
            output: None,
        }
    }
}

fn lost(err: &BrowserError) -> StopReason {
    StopReason::SessionLost(err.to_string())
}

/// Drives a browser session through a timeline and collects its records.
#[derive(Debug, Clone)]
pub struct Harvester {
    config: HarvestConfig,
    cancel: CancellationToken,
}

impl Harvester {
    #[must_use]
    pub fn new(config: HarvestConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop at the next iteration (or pause) once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Open `target`, harvest up to `target_count` records into `sink`, and finish the
    /// sink.
    pub async fn run<S, K>(
        &self,
        session: &mut S,
        sink: &mut K,
        target: &HarvestTarget,
        target_count: usize,
    ) -> HarvestReport
    where
        S: BrowserSession + ?Sized,
        K: RecordSink + ?Sized,
    {
        let mut report = match self.open(session, target).await {
            Ok(()) => self.paginate(session, sink, target.mode(), target_count).await,
            Err(stop) => HarvestReport::new(stop),
        };

        match sink.finish().await {
            Ok(output) => report.output = Some(output),
            Err(e) => {
                error!("Failed to finish output: {e}");
                report.sink_errors += 1;
            }
        }

        report
    }

    /// Navigate to the start page, check the session is authenticated and submit the
    /// search if there is one.
    async fn open<S>(&self, session: &mut S, target: &HarvestTarget) -> Result<(), StopReason>
    where
        S: BrowserSession + ?Sized,
    {
        let start_url = target.start_url();
        info!(url = %start_url, mode = target.mode().as_str(), "Opening timeline");

        session.navigate(start_url).await.map_err(|e| {
            error!(url = %start_url, "Navigation failed: {e}");
            lost(&e)
        })?;

        let current = session.current_url().await.map_err(|e| lost(&e))?;
        if current.contains(LOGIN_URL_MARKER) {
            error!(url = %current, "Invalid auth token: redirected to login");
            return Err(StopReason::AuthFailed);
        }

        if let HarvestTarget::Search { query, .. } = target {
            info!(query = %query, "Submitting search");
            session
                .fill_and_submit(SEARCH_INPUT_SELECTOR, query)
                .await
                .map_err(|e| {
                    error!("Failed to submit search: {e}");
                    lost(&e)
                })?;
        }

        Ok(())
    }

    /// Run the pagination loop on an already opened page.
    pub async fn paginate<S, K>(
        &self,
        session: &mut S,
        sink: &mut K,
        mode: ExtractMode,
        target_count: usize,
    ) -> HarvestReport
    where
        S: BrowserSession + ?Sized,
        K: RecordSink + ?Sized,
    {
        let mut state = CrawlState::new(target_count);

        let stop = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if state.remaining() == 0 {
                break StopReason::TargetReached;
            }
            if state.consecutive_timeouts >= self.config.timeout_ceiling {
                break StopReason::FeedExhausted;
            }
            if let ControlFlow::Break(stop) = self.step(session, sink, &mut state, mode).await {
                break stop;
            }
        };

        match &stop {
            StopReason::TargetReached | StopReason::FeedExhausted => {
                info!(records = state.records.len(), reason = %stop, "Harvest finished");
            }
            StopReason::Cancelled | StopReason::SessionLost(_) => {
                warn!(records = state.records.len(), reason = %stop, "Harvest stopped early");
            }
            StopReason::DecodeFailed { .. } | StopReason::AuthFailed => {
                error!(records = state.records.len(), reason = %stop, "Harvest aborted");
            }
        }

        state.into_report(stop)
    }

    async fn step<S, K>(
        &self,
        session: &mut S,
        sink: &mut K,
        state: &mut CrawlState,
        default_mode: ExtractMode,
    ) -> ControlFlow<StopReason>
    where
        S: BrowserSession + ?Sized,
        K: RecordSink + ?Sized,
    {
        let waited = session
            .wait_for_relevant_response(RELEVANT_URL_MARKERS, self.config.response_wait)
            .await;
        let response = match waited {
            Ok(Some(response)) => response,
            Ok(None) => {
                state.consecutive_timeouts += 1;
                state.timeouts += 1;
                debug!(
                    consecutive = state.consecutive_timeouts,
                    ceiling = self.config.timeout_ceiling,
                    "No timeline response within wait budget"
                );
                if state.consecutive_timeouts >= self.config.timeout_ceiling {
                    return ControlFlow::Break(StopReason::FeedExhausted);
                }
                return self.nudge(session).await;
            }
            Err(e) => return ControlFlow::Break(lost(&e)),
        };

        state.consecutive_timeouts = 0;
        state.responses += 1;

        let payload = match response.as_json() {
            Ok(payload) => payload,
            Err(e) if is_rate_limited(response.status(), response.as_text()) => {
                let delay = self.config.backoff.delay(state.rate_limit_attempt);
                warn!(
                    attempt = state.rate_limit_attempt,
                    delay_secs = delay.as_secs(),
                    "Rate limited, backing off: {e}"
                );
                state.rate_limit_attempt += 1;
                state.rate_limit_hits += 1;
                self.pause(delay).await;
                return match session.click_retry().await {
                    Ok(clicked) => {
                        debug!(clicked, "Retry affordance");
                        ControlFlow::Continue(())
                    }
                    Err(e) => ControlFlow::Break(lost(&e)),
                };
            }
            Err(e) => {
                error!(
                    url = %response.url(),
                    status = response.status(),
                    "Failed to decode timeline response: {e}"
                );
                return ControlFlow::Break(StopReason::DecodeFailed {
                    url: response.url().to_string(),
                    status: response.status(),
                });
            }
        };

        state.rate_limit_attempt = 0;

        let mode = match classify(response.url()) {
            Classification::Relevant(mode) => mode,
            Classification::Irrelevant => default_mode,
        };
        let batch: Vec<NormalizedRecord> = extract::records(&payload, mode)
            .take(state.remaining())
            .collect();
        drop(payload);

        info!(
            new = batch.len(),
            total = state.records.len() + batch.len(),
            target = state.target_count,
            "Processed timeline response"
        );

        if let Err(e) = sink.write(&batch).await {
            error!("Failed to persist records: {e}");
            state.sink_errors += 1;
        }
        state.since_throttle += batch.len();
        state.records.extend(batch);

        self.nudge(session).await?;
        self.pause(self.config.settle_delay).await;

        if state.since_throttle >= self.config.throttle_every {
            debug!(
                delay_ms = self.config.throttle_delay.as_millis(),
                "Throttling"
            );
            self.pause(self.config.throttle_delay).await;
            state.since_throttle = 0;
        }

        ControlFlow::Continue(())
    }

    /// Scroll up a little and back to the bottom to make the feed load its next page.
    async fn nudge<S>(&self, session: &mut S) -> ControlFlow<StopReason>
    where
        S: BrowserSession + ?Sized,
    {
        let scrolled = async {
            session
                .scroll_up_partial(self.config.scroll_up_steps, self.config.scroll_up_fraction)
                .await?;
            session.scroll_to_bottom().await
        }
        .await;
        match scrolled {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => ControlFlow::Break(lost(&e)),
        }
    }

    /// Sleep, waking early on cancellation.
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = self.cancel.cancelled() => {}
        }
    }
}
