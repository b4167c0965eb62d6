//! Output file naming.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, TimeZone};
use regex::Regex;

/// Timestamp appended to default file names.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H-%M-%S";

const CSV_EXTENSION: &str = ".csv";

/// Status id in a conversation URL.
static STATUS_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/status/(\d+)").expect("Invalid regex"));

/// Extract the status id from a conversation URL.
///
/// ```
/// # use tweet_harvest::output::status_id;
/// assert_eq!(status_id("https://x.com/alice/status/123?s=20"), Some("123"));
/// assert_eq!(status_id("https://x.com/alice"), None);
/// ```
#[must_use]
pub fn status_id(url: &str) -> Option<&str> {
    STATUS_ID_PATTERN
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Default file stem: `<label> <timestamp>`.
#[must_use]
pub fn default_stem<Tz>(label: &str, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{label} {}", now.format(TIMESTAMP_FORMAT))
}

/// Label used for a thread harvest without an explicit output name.
#[must_use]
pub fn thread_label(url: &str) -> String {
    status_id(url).map_or_else(|| "thread".to_string(), |id| format!("thread_{id}"))
}

/// Turn a user-supplied or default name into a file name.
///
/// Surrounding whitespace and any `.csv` are dropped before the extension is appended.
/// Spaces become `_`; `:` and path separators become `-`.
#[must_use]
pub fn file_name(name: &str) -> String {
    let stem = name.trim().replace(CSV_EXTENSION, "");
    let sanitized: String = stem
        .chars()
        .map(|c| match c {
            ' ' => '_',
            ':' | '/' | '\\' => '-',
            c => c,
        })
        .collect();
    format!("{sanitized}{CSV_EXTENSION}")
}

/// Full path of the CSV file inside `dir`.
#[must_use]
pub fn output_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(file_name(name))
}

/// Create `dir` if it doesn't exist.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}
