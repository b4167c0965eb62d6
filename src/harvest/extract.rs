//! Record extraction from timeline GraphQL payloads.
//!
//! Both payload shapes end in the same `tweet_results.result` node; they only differ in
//! where the entry list lives and how an entry wraps its item content. Every lookup is
//! an `Option` step, and any `None` means "skip this entry".

use serde_json::Value;
use tracing::trace;

use super::classify::ExtractMode;
use super::record::{
    permalink, NormalizedRecord, IMAGE_URL, IN_REPLY_TO, LEGACY_FIELDS, LOCATION, TWEET_URL,
    USERNAME,
};
use crate::constants::PERMALINK_BASE;

/// Extract every resolvable record from a payload, in entry order.
#[must_use]
pub fn extract(payload: &Value, mode: ExtractMode) -> Vec<NormalizedRecord> {
    records(payload, mode).collect()
}

/// Lazily extract records so the caller can stop as soon as its quota is met.
pub fn records(payload: &Value, mode: ExtractMode) -> impl Iterator<Item = NormalizedRecord> + '_ {
    entries(payload).iter().filter_map(move |entry| {
        let record = item_content(entry, mode).and_then(record_from_item);
        if record.is_none() {
            let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");
            trace!(
                entry_id,
                mode = mode.as_str(),
                "Skipping entry without a resolvable tweet"
            );
        }
        record
    })
}

/// Entry list of the first instruction, or an empty slice if the payload has none.
#[must_use]
pub fn entries(payload: &Value) -> &[Value] {
    locate_entries(payload).map_or(&[], Vec::as_slice)
}

fn locate_entries(payload: &Value) -> Option<&Vec<Value>> {
    let data = present(payload, "data")?;
    let timeline = match present(data, "threaded_conversation_with_injections_v2") {
        Some(thread) => thread,
        None => present(data, "search_by_raw_query")
            .and_then(|q| present(q, "search_timeline"))
            .and_then(|t| present(t, "timeline"))?,
    };
    present(timeline, "instructions")?
        .get(0)
        .and_then(|instruction| present(instruction, "entries"))?
        .as_array()
}

fn item_content(entry: &Value, mode: ExtractMode) -> Option<&Value> {
    let content = present(entry, "content")?;
    match mode {
        ExtractMode::Search => present(content, "itemContent")
            .or_else(|| present(content, "item").and_then(|item| present(item, "itemContent"))),
        ExtractMode::Detail => {
            let first = present(content, "items")?.as_array()?.first()?;
            present(first, "item").and_then(|item| present(item, "itemContent"))
        }
    }
}

fn record_from_item(item: &Value) -> Option<NormalizedRecord> {
    let result = present(item, "tweet_results").and_then(|r| present(r, "result"))?;
    let (tweet, legacy) = tweet_and_legacy(result)?;
    let user = author(tweet).or_else(|| author(result))?;
    let handle = screen_name(user)?;

    let mut record = NormalizedRecord::new();
    for &name in LEGACY_FIELDS {
        if let Some(value) = legacy.get(name).and_then(scalar) {
            record.insert(name, value);
        }
    }

    let id = present(legacy, "id_str")
        .or_else(|| present(tweet, "rest_id"))
        .and_then(scalar)
        .unwrap_or_default();

    record.insert(USERNAME, handle);
    record.insert(TWEET_URL, permalink(PERMALINK_BASE, handle, &id));
    record.insert(IMAGE_URL, first_media_url(legacy).unwrap_or_default());
    record.insert(LOCATION, location(user).unwrap_or_default());
    record.insert(
        IN_REPLY_TO,
        text(legacy, "in_reply_to_screen_name").unwrap_or_default(),
    );

    Some(record)
}

/// The node carrying the post, and its legacy block.
///
/// Visibility-wrapped results (`TweetWithVisibilityResults`) nest the real tweet under
/// `tweet`.
fn tweet_and_legacy(result: &Value) -> Option<(&Value, &Value)> {
    if let Some(legacy) = object(result, "legacy") {
        return Some((result, legacy));
    }
    let tweet = object(result, "tweet")?;
    object(tweet, "legacy").map(|legacy| (tweet, legacy))
}

/// Author user result, if it carries an identity block.
fn author(tweet: &Value) -> Option<&Value> {
    let user = present(tweet, "core")
        .and_then(|c| present(c, "user_results"))
        .and_then(|r| present(r, "result"))?;
    (object(user, "core").is_some() || object(user, "legacy").is_some()).then_some(user)
}

/// Handle from the `core` block, falling back to the older `legacy` block.
fn screen_name(user: &Value) -> Option<&str> {
    object(user, "core")
        .and_then(|core| text(core, "screen_name"))
        .or_else(|| object(user, "legacy").and_then(|legacy| text(legacy, "screen_name")))
}

fn location(user: &Value) -> Option<&str> {
    object(user, "location")
        .and_then(|loc| text(loc, "location"))
        .or_else(|| object(user, "legacy").and_then(|legacy| text(legacy, "location")))
}

fn first_media_url(legacy: &Value) -> Option<&str> {
    let media = present(legacy, "entities")
        .and_then(|e| present(e, "media"))?
        .as_array()?;
    media.first().and_then(|m| text(m, "media_url_https"))
}

/// Non-null child.
fn present<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| !v.is_null())
}

fn object<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| v.is_object())
}

/// Non-empty string child.
fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Render a scalar the way it appears in the payload.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
