//! CLI argument definitions.

use chrono::Local;
use clap::{ArgGroup, Parser};
use thiserror::Error;
use url::Url;

use crate::harvest::{HarvestTarget, QueryError, SearchTab};
use crate::output;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("not a status URL (expected .../status/<id>): {0}")]
    InvalidThreadUrl(String),
    #[error("--limit must be at least 1")]
    ZeroLimit,
}

/// Harvest posts from a search timeline or a conversation thread into CSV.
#[derive(Parser, Debug)]
#[command(name = "tweet-harvest")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["search_keyword", "thread"])))]
pub struct Cli {
    /// Auth token cookie value (falls back to DEV_ACCESS_TOKEN)
    #[arg(short, long)]
    pub token: Option<String>,

    /// Search keywords
    #[arg(short, long)]
    pub search_keyword: Option<String>,

    /// Oldest post date (dd-mm-yyyy)
    #[arg(short, long)]
    pub from: Option<String>,

    /// Newest post date (dd-mm-yyyy)
    #[arg(long)]
    pub to: Option<String>,

    /// Harvest the replies of a conversation instead of a search
    #[arg(long, conflicts_with_all = ["search_keyword", "from", "to"])]
    pub thread: Option<String>,

    /// Number of posts to collect
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Output file name (written under OUTPUT_DIR)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Search results tab
    #[arg(long, value_enum, default_value_t = SearchTab::Top, ignore_case = true)]
    pub tab: SearchTab,

    /// Print the CSV to stdout instead of writing a file
    #[arg(long)]
    pub stdout: bool,
}

impl Cli {
    /// What to harvest, validated before anything is launched.
    ///
    /// # Errors
    ///
    /// Returns an error for unparseable dates, a thread URL without a status id or a
    /// zero limit.
    pub fn target(&self) -> Result<HarvestTarget, CliError> {
        if self.limit == 0 {
            return Err(CliError::ZeroLimit);
        }
        if let Some(url) = &self.thread {
            let is_web_url = Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"));
            if !is_web_url || output::status_id(url).is_none() {
                return Err(CliError::InvalidThreadUrl(url.clone()));
            }
            return Ok(HarvestTarget::thread(url.as_str()));
        }
        let keywords = self.search_keyword.as_deref().unwrap_or_default();
        Ok(HarvestTarget::search(
            keywords,
            self.from.as_deref(),
            self.to.as_deref(),
            self.tab,
        )?)
    }

    /// Output name: `--output`, or a label plus the current local time.
    #[must_use]
    pub fn output_name(&self) -> String {
        if let Some(name) = &self.output {
            return name.clone();
        }
        let label = match &self.thread {
            Some(url) => output::thread_label(url),
            None => self.search_keyword.clone().unwrap_or_default(),
        };
        output::default_stem(&label, &Local::now())
    }
}
