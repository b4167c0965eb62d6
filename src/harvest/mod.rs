//! Timeline harvesting: response classification, record extraction, rate-limit
//! backoff and the pagination loop that ties them to a browser session.

pub mod backoff;
pub mod classify;
pub mod controller;
pub mod extract;
pub mod query;
pub mod record;

pub use backoff::{BackoffMode, BackoffPolicy};
pub use classify::{classify, Classification, ExtractMode};
pub use controller::{HarvestConfig, HarvestReport, HarvestTarget, Harvester, StopReason};
pub use extract::extract;
pub use query::{compose_search_query, QueryError, SearchTab};
pub use record::NormalizedRecord;
