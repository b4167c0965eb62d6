use chrono::NaiveDate;
use thiserror::Error;

use crate::constants::{SEARCH_ADVANCED_URL_LATEST, SEARCH_ADVANCED_URL_TOP};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid {field} date '{value}': expected dd-mm-yyyy")]
    InvalidDate { field: &'static str, value: String },
}

/// Which search results tab to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum SearchTab {
    #[default]
    Top,
    Latest,
}

impl SearchTab {
    #[must_use]
    pub const fn url(self) -> &'static str {
        match self {
            Self::Top => SEARCH_ADVANCED_URL_TOP,
            Self::Latest => SEARCH_ADVANCED_URL_LATEST,
        }
    }
}

/// Compose the text typed into the advanced search box.
///
/// Dates come in as `dd-mm-yyyy` (anything after the first space is ignored) and are
/// appended as `since:`/`until:` qualifiers in `yyyy-mm-dd` form.
///
/// # Errors
///
/// Returns an error if either date does not parse.
pub fn compose_search_query(
    keywords: &str,
    from_date: Option<&str>,
    to_date: Option<&str>,
) -> Result<String, QueryError> {
    let mut query = keywords.to_string();
    if let Some(from) = from_date {
        let date = parse_input_date("from", from)?;
        query.push_str(&format!(" since:{}", date.format("%Y-%m-%d")));
    }
    if let Some(to) = to_date {
        let date = parse_input_date("to", to)?;
        query.push_str(&format!(" until:{}", date.format("%Y-%m-%d")));
    }
    Ok(query)
}

fn parse_input_date(field: &'static str, value: &str) -> Result<NaiveDate, QueryError> {
    let day_part = value.trim().split(' ').next().unwrap_or_default();
    NaiveDate::parse_from_str(day_part, "%d-%m-%Y").map_err(|_| QueryError::InvalidDate {
        field,
        value: value.to_string(),
    })
}
