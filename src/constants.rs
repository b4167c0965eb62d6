//! Shared constants used across the application.

/// Base URL used when building permalinks.
pub const PERMALINK_BASE: &str = "https://x.com";

/// Cookie domain for the injected session credential.
pub const AUTH_COOKIE_DOMAIN: &str = ".x.com";

/// Name of the session cookie carrying the auth token.
pub const AUTH_COOKIE_NAME: &str = "auth_token";

/// Advanced search page, "Top" tab.
pub const SEARCH_ADVANCED_URL_TOP: &str = "https://x.com/search-advanced";

/// Advanced search page, "Latest" tab.
pub const SEARCH_ADVANCED_URL_LATEST: &str = "https://x.com/search-advanced?f=live";

/// Selector of the "all of these words" field on the advanced search form.
pub const SEARCH_INPUT_SELECTOR: &str = r#"input[name="allOfTheseWords"]"#;

/// Marker in the page URL after the site bounced us to its login flow.
pub const LOGIN_URL_MARKER: &str = "/login";

/// URL substring of the search timeline GraphQL call.
pub const SEARCH_TIMELINE_MARKER: &str = "SearchTimeline";

/// URL substring of the thread detail GraphQL call.
pub const TWEET_DETAIL_MARKER: &str = "TweetDetail";

/// Both relevant endpoint markers, in classification order.
pub const RELEVANT_URL_MARKERS: &[&str] = &[SEARCH_TIMELINE_MARKER, TWEET_DETAIL_MARKER];

/// URL fragments of media assets that are blocked to save bandwidth.
pub const BLOCKED_MEDIA_MARKERS: &[&str] = &[".jpg", ".png", ".mp4", "format=jpg"];

/// Default output folder for CSV files.
pub const DEFAULT_OUTPUT_DIR: &str = "./tweets-data";

/// User agent string presented by the automated browser.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
