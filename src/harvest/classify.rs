use crate::constants::{SEARCH_TIMELINE_MARKER, TWEET_DETAIL_MARKER};

/// Shape of a timeline payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Search timeline entries.
    Search,
    /// Thread detail (conversation) entries.
    Detail,
}

impl ExtractMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Detail => "detail",
        }
    }
}

/// Outcome of classifying a captured response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Relevant(ExtractMode),
    Irrelevant,
}

impl Classification {
    #[must_use]
    pub const fn is_relevant(self) -> bool {
        matches!(self, Self::Relevant(_))
    }
}

/// Decide from the URL alone whether a response carries a timeline payload.
///
/// Matching is a case-sensitive substring test against the GraphQL operation name.
#[must_use]
pub fn classify(url: &str) -> Classification {
    if url.contains(SEARCH_TIMELINE_MARKER) {
        Classification::Relevant(ExtractMode::Search)
    } else if url.contains(TWEET_DETAIL_MARKER) {
        Classification::Relevant(ExtractMode::Detail)
    } else {
        Classification::Irrelevant
    }
}

/// True if `url` contains any of `markers`.
#[must_use]
pub fn matches_any(url: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| url.contains(m))
}
