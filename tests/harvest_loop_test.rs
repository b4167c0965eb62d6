//! Integration tests for the pagination loop, driven by a scripted browser session.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tweet_harvest::browser::{BrowserError, BrowserSession, CapturedResponse};
use tweet_harvest::harvest::record::COLUMNS;
use tweet_harvest::harvest::{
    BackoffPolicy, HarvestConfig, HarvestTarget, Harvester, NormalizedRecord, SearchTab,
    StopReason,
};
use tweet_harvest::sink::{CsvBufferSink, CsvFileSink, RecordSink, SinkError, SinkOutput};

const SEARCH_URL: &str = "https://x.com/i/api/graphql/abc/SearchTimeline?variables=%7B%7D";
const DETAIL_URL: &str = "https://x.com/i/api/graphql/def/TweetDetail?variables=%7B%7D";

/// What the page does on the next wait.
enum Step {
    Respond(CapturedResponse),
    Timeout,
    Crash,
}

/// In-memory session replaying a fixed script of responses.
///
/// Once the script runs out every wait times out.
struct ScriptedSession {
    script: VecDeque<Step>,
    redirect_to: Option<String>,
    current_url: String,
    events: Vec<&'static str>,
    submitted: Vec<String>,
}

impl ScriptedSession {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            redirect_to: None,
            current_url: "about:blank".to_string(),
            events: Vec::new(),
            submitted: Vec::new(),
        }
    }

    fn redirecting_to(mut self, url: &str) -> Self {
        self.redirect_to = Some(url.to_string());
        self
    }

    fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| **e == event).count()
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.events.push("navigate");
        self.current_url = self.redirect_to.clone().unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.current_url.clone())
    }

    async fn wait_for_relevant_response(
        &mut self,
        _url_substrings: &[&str],
        timeout: Duration,
    ) -> Result<Option<CapturedResponse>, BrowserError> {
        self.events.push("wait");
        match self.script.pop_front() {
            Some(Step::Respond(response)) => Ok(Some(response)),
            Some(Step::Crash) => Err(BrowserError::Closed),
            Some(Step::Timeout) | None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), BrowserError> {
        self.events.push("scroll_bottom");
        Ok(())
    }

    async fn scroll_up_partial(&mut self, _steps: u32, _fraction: f64) -> Result<(), BrowserError> {
        self.events.push("scroll_up");
        Ok(())
    }

    async fn fill_and_submit(&mut self, _selector: &str, text: &str) -> Result<(), BrowserError> {
        self.events.push("submit");
        self.submitted.push(text.to_string());
        Ok(())
    }

    async fn click_retry(&mut self) -> Result<bool, BrowserError> {
        self.events.push("retry");
        Ok(true)
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.events.push("close");
        Ok(())
    }
}

/// Sink whose writes always fail.
#[derive(Default)]
struct BrokenSink {
    attempts: usize,
}

#[async_trait]
impl RecordSink for BrokenSink {
    async fn write(&mut self, _records: &[NormalizedRecord]) -> Result<(), SinkError> {
        self.attempts += 1;
        Err(SinkError::Io {
            path: "/nonexistent/out.csv".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        })
    }

    async fn finish(&mut self) -> Result<SinkOutput, SinkError> {
        Ok(SinkOutput::Buffer(String::new()))
    }
}

fn tweet_result(id: &str, handle: &str) -> Value {
    json!({
        "rest_id": id,
        "core": {"user_results": {"result": {"core": {"screen_name": handle}}}},
        "legacy": {"id_str": id, "full_text": format!("post {id}"), "favorite_count": 1}
    })
}

fn search_response(ids: &[&str]) -> Step {
    search_response_with(ids.iter().map(|id| tweet_result(id, "alice")).collect())
}

fn search_response_with(results: Vec<Value>) -> Step {
    let entries: Vec<Value> = results
        .into_iter()
        .enumerate()
        .map(|(i, result)| {
            json!({
                "entryId": format!("tweet-{i}"),
                "content": {"itemContent": {"tweet_results": {"result": result}}}
            })
        })
        .collect();
    let payload = json!({"data": {"search_by_raw_query": {"search_timeline": {"timeline": {
        "instructions": [{"type": "TimelineAddEntries", "entries": entries}]
    }}}}});
    Step::Respond(CapturedResponse::new(SEARCH_URL, 200, payload.to_string()))
}

fn search_target() -> HarvestTarget {
    HarvestTarget::search("rust", None, None, SearchTab::Top).unwrap()
}

fn harvester(ceiling: u32) -> Harvester {
    Harvester::new(HarvestConfig {
        timeout_ceiling: ceiling,
        ..HarvestConfig::default()
    })
}

fn ids(records: &[NormalizedRecord]) -> Vec<&str> {
    records.iter().filter_map(NormalizedRecord::id).collect()
}

#[tokio::test(start_paused = true)]
async fn test_single_response_reaches_target() {
    let mut session = ScriptedSession::new(vec![search_response(&["123"])]);
    let mut sink = CsvBufferSink::new();

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 1)
        .await;

    assert_eq!(report.stop, StopReason::TargetReached);
    assert_eq!(report.records.len(), 1);
    assert_eq!(
        report.records[0].permalink(),
        Some("https://x.com/alice/status/123")
    );
    assert_eq!(session.submitted, vec!["rust".to_string()]);

    let Some(SinkOutput::Buffer(csv)) = report.output else {
        panic!("expected buffered output");
    };
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains("https://x.com/alice/status/123"));
}

#[tokio::test(start_paused = true)]
async fn test_target_caps_records_within_one_payload() {
    let mut session = ScriptedSession::new(vec![search_response(&["1", "2", "3", "4", "5"])]);
    let mut sink = CsvBufferSink::new();

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 3)
        .await;

    assert_eq!(report.stop, StopReason::TargetReached);
    assert_eq!(ids(&report.records), vec!["1", "2", "3"]);
    assert_eq!(sink.records().len(), 3);
    assert_eq!(report.responses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_backs_off_and_retries() {
    let rate_limited = Step::Respond(CapturedResponse::new(
        SEARCH_URL,
        429,
        "Rate limit exceeded",
    ));
    let mut session = ScriptedSession::new(vec![rate_limited, search_response(&["7"])]);
    let mut sink = CsvBufferSink::new();
    let started = tokio::time::Instant::now();

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 1)
        .await;

    assert!(started.elapsed() >= BackoffPolicy::fixed().delay(0));
    assert_eq!(report.rate_limit_hits, 1);
    assert_eq!(ids(&report.records), vec!["7"]);
    assert_eq!(
        session.events,
        vec![
            "navigate",
            "submit",
            "wait",
            "retry",
            "wait",
            "scroll_up",
            "scroll_bottom"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_with_no_records_appended() {
    let rate_limited = Step::Respond(CapturedResponse::new(
        SEARCH_URL,
        200,
        "Rate limit exceeded. Try again later.",
    ));
    let mut session = ScriptedSession::new(vec![rate_limited]);
    let mut sink = CsvBufferSink::new();

    let report = harvester(2)
        .run(&mut session, &mut sink, &search_target(), 5)
        .await;

    assert_eq!(report.rate_limit_hits, 1);
    assert!(report.records.is_empty());
    assert_eq!(report.stop, StopReason::FeedExhausted);
    assert_eq!(session.count("retry"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_ceiling_keeps_prior_records() {
    let mut script = vec![search_response(&["1", "2"])];
    script.extend((0..10).map(|_| Step::Timeout));
    let mut session = ScriptedSession::new(script);
    let mut sink = CsvBufferSink::new();

    let report = harvester(10)
        .run(&mut session, &mut sink, &search_target(), 50)
        .await;

    assert_eq!(report.stop, StopReason::FeedExhausted);
    assert!(!report.stop.is_failure());
    assert_eq!(ids(&report.records), vec!["1", "2"]);
    assert_eq!(report.timeouts, 10);
    assert_eq!(session.count("wait"), 11);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_reset_after_response() {
    let mut script: Vec<Step> = (0..2).map(|_| Step::Timeout).collect();
    script.push(search_response(&["1"]));
    script.extend((0..2).map(|_| Step::Timeout));
    script.push(search_response(&["2"]));
    let mut session = ScriptedSession::new(script);
    let mut sink = CsvBufferSink::new();

    let report = harvester(3)
        .run(&mut session, &mut sink, &search_target(), 2)
        .await;

    assert_eq!(report.stop, StopReason::TargetReached);
    assert_eq!(ids(&report.records), vec!["1", "2"]);
    assert_eq!(report.timeouts, 4);
}

#[tokio::test(start_paused = true)]
async fn test_thread_skips_entries_without_items() {
    let payload = json!({"data": {"threaded_conversation_with_injections_v2": {
        "instructions": [{"type": "TimelineAddEntries", "entries": [
            {"entryId": "conversationthread-0", "content": {"items": []}},
            {"entryId": "conversationthread-1", "content": {"items": [
                {"item": {"itemContent": {"tweet_results": {"result": tweet_result("11", "bob")}}}}
            ]}}
        ]}]
    }}});
    let mut session = ScriptedSession::new(vec![Step::Respond(CapturedResponse::new(
        DETAIL_URL,
        200,
        payload.to_string(),
    ))]);
    let mut sink = CsvBufferSink::new();
    let target = HarvestTarget::thread("https://x.com/bob/status/10");

    let report = harvester(2).run(&mut session, &mut sink, &target, 5).await;

    assert_eq!(report.stop, StopReason::FeedExhausted);
    assert_eq!(ids(&report.records), vec!["11"]);
    assert!(session.submitted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_login_redirect_aborts() {
    let mut session =
        ScriptedSession::new(vec![search_response(&["1"])]).redirecting_to("https://x.com/i/flow/login");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.csv");
    let mut sink = CsvFileSink::new(&path);

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 5)
        .await;

    assert_eq!(report.stop, StopReason::AuthFailed);
    assert!(report.records.is_empty());
    assert_eq!(session.count("wait"), 0);
    assert!(!path.exists());
    assert_eq!(report.output, Some(SinkOutput::File { path, rows: 0 }));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_decode_failure_terminates() {
    let broken = Step::Respond(CapturedResponse::new(
        SEARCH_URL,
        200,
        "<html>Something went wrong</html>",
    ));
    let mut session = ScriptedSession::new(vec![search_response(&["1"]), broken, search_response(&["2"])]);
    let mut sink = CsvBufferSink::new();

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 5)
        .await;

    assert!(matches!(report.stop, StopReason::DecodeFailed { status: 200, .. }));
    assert!(report.stop.is_failure());
    assert_eq!(ids(&report.records), vec!["1"]);
    assert_eq!(session.count("retry"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_keeps_records() {
    let mut session = ScriptedSession::new(vec![search_response(&["1"]), Step::Crash]);
    let mut sink = CsvBufferSink::new();

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 5)
        .await;

    assert!(matches!(report.stop, StopReason::SessionLost(_)));
    assert_eq!(ids(&report.records), vec!["1"]);
    assert!(matches!(report.output, Some(SinkOutput::Buffer(ref csv)) if csv.lines().count() == 2));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_first_wait() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut session = ScriptedSession::new(vec![search_response(&["1"])]);
    let mut sink = CsvBufferSink::new();

    let report = harvester(20)
        .with_cancellation(cancel)
        .run(&mut session, &mut sink, &search_target(), 5)
        .await;

    assert_eq!(report.stop, StopReason::Cancelled);
    assert!(report.records.is_empty());
    assert_eq!(session.count("wait"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_does_not_stop_harvest() {
    let mut session = ScriptedSession::new(vec![search_response(&["1"]), search_response(&["2"])]);
    let mut sink = BrokenSink::default();

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 2)
        .await;

    assert_eq!(report.stop, StopReason::TargetReached);
    assert_eq!(ids(&report.records), vec!["1", "2"]);
    assert_eq!(sink.attempts, 2);
    assert_eq!(report.sink_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn test_file_sink_gets_header_once() {
    let mut session = ScriptedSession::new(vec![
        search_response(&["1", "2"]),
        search_response(&[]),
        search_response(&["3"]),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let mut sink = CsvFileSink::new(&path);

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 3)
        .await;

    assert_eq!(report.stop, StopReason::TargetReached);
    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].contains("tweet_url"));
    assert_eq!(contents.matches("tweet_url").count(), 1);
    assert_eq!(report.output, Some(SinkOutput::File { path, rows: 3 }));
}

#[tokio::test(start_paused = true)]
async fn test_throttle_pauses_after_batch() {
    let config = HarvestConfig {
        throttle_every: 2,
        throttle_delay: Duration::from_secs(30),
        ..HarvestConfig::default()
    };
    let mut session = ScriptedSession::new(vec![search_response(&["1", "2"])]);
    let mut sink = CsvBufferSink::new();
    let started = tokio::time::Instant::now();

    let report = Harvester::new(config)
        .run(&mut session, &mut sink, &search_target(), 2)
        .await;

    assert_eq!(report.records.len(), 2);
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_resets_after_success() {
    let rate_limited = || {
        Step::Respond(CapturedResponse::new(
            SEARCH_URL,
            429,
            "Too Many Requests",
        ))
    };
    let mut session = ScriptedSession::new(vec![
        rate_limited(),
        search_response(&["1"]),
        rate_limited(),
        search_response(&["2"]),
    ]);
    let mut sink = CsvBufferSink::new();
    let policy = BackoffPolicy::exponential();
    let config = HarvestConfig {
        backoff: policy,
        ..HarvestConfig::default()
    };
    let started = tokio::time::Instant::now();

    let report = Harvester::new(config)
        .run(&mut session, &mut sink, &search_target(), 2)
        .await;

    let elapsed = started.elapsed();
    assert_eq!(report.rate_limit_hits, 2);
    assert_eq!(ids(&report.records), vec!["1", "2"]);
    assert!(elapsed >= policy.delay(0) * 2);
    assert!(elapsed < policy.delay(0) + policy.delay(1));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_nudges_feed() {
    let mut session = ScriptedSession::new(vec![Step::Timeout, search_response(&["1"])]);
    let mut sink = CsvBufferSink::new();

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 1)
        .await;

    assert_eq!(report.stop, StopReason::TargetReached);
    assert_eq!(report.timeouts, 1);
    assert_eq!(
        session.events,
        vec![
            "navigate",
            "submit",
            "wait",
            "scroll_up",
            "scroll_bottom",
            "wait",
            "scroll_up",
            "scroll_bottom"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_output_keeps_columns_absent_from_first_record() {
    let sparse = json!({
        "rest_id": "1",
        "core": {"user_results": {"result": {"core": {"screen_name": "a"}}}},
        "legacy": {"id_str": "1"}
    });
    let full = json!({
        "rest_id": "2",
        "core": {"user_results": {"result": {"core": {"screen_name": "b"}}}},
        "legacy": {"id_str": "2", "full_text": "hello world", "lang": "en", "favorite_count": 4}
    });
    let mut session = ScriptedSession::new(vec![
        search_response_with(vec![sparse]),
        search_response_with(vec![full]),
    ]);
    let mut sink = CsvBufferSink::new();

    let report = harvester(20)
        .run(&mut session, &mut sink, &search_target(), 2)
        .await;

    let Some(SinkOutput::Buffer(csv)) = report.output else {
        panic!("expected buffered output");
    };
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], COLUMNS.join(","));
    assert!(lines[2].contains("hello world"));
    assert!(lines[2].contains(",4,en,"));
}
