//! Tweet harvesting library.
//!
//! Drives an authenticated Chromium page through a search timeline or a conversation
//! thread, captures the timeline API responses the page makes while scrolling, and
//! turns them into flat CSV rows.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod browser;
pub mod cli;
pub mod config;
pub mod constants;
pub mod harvest;
pub mod output;
pub mod sink;
