/// Columns copied verbatim from a tweet's legacy block when present.
pub const LEGACY_FIELDS: &[&str] = &[
    "created_at",
    "id_str",
    "full_text",
    "quote_count",
    "reply_count",
    "retweet_count",
    "favorite_count",
    "lang",
    "user_id_str",
    "conversation_id_str",
];

pub const USERNAME: &str = "username";
pub const TWEET_URL: &str = "tweet_url";
pub const IMAGE_URL: &str = "image_url";
pub const LOCATION: &str = "location";
pub const IN_REPLY_TO: &str = "in_reply_to_screen_name";

/// Full output column order.
pub const COLUMNS: &[&str] = &[
    "created_at",
    "id_str",
    "full_text",
    "quote_count",
    "reply_count",
    "retweet_count",
    "favorite_count",
    "lang",
    "user_id_str",
    "conversation_id_str",
    USERNAME,
    TWEET_URL,
    IMAGE_URL,
    LOCATION,
    IN_REPLY_TO,
];

/// One harvested post, flattened to string columns.
///
/// Fields keep insertion order, which the extractor always drives in [`COLUMNS`]
/// order. Legacy fields absent from the payload are simply missing from the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedRecord {
    fields: Vec<(&'static str, String)>,
}

impl NormalizedRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing any previous value.
    pub fn insert(&mut self, name: &'static str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Column names in this record's order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(k, _)| *k)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.get("id_str")
    }

    #[must_use]
    pub fn author_handle(&self) -> Option<&str> {
        self.get(USERNAME)
    }

    #[must_use]
    pub fn permalink(&self) -> Option<&str> {
        self.get(TWEET_URL)
    }

    #[must_use]
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.get(IMAGE_URL)
    }

    #[must_use]
    pub fn author_location(&self) -> Option<&str> {
        self.get(LOCATION)
    }

    #[must_use]
    pub fn reply_target_handle(&self) -> Option<&str> {
        self.get(IN_REPLY_TO)
    }
}

/// Build the permalink of a post.
#[must_use]
pub fn permalink(base: &str, handle: &str, id: &str) -> String {
    format!("{}/{handle}/status/{id}", base.trim_end_matches('/'))
}
