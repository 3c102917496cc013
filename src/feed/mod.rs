//! Feed retrieval: the fetch collaborator and the bounded-concurrency pool.
//!
//! - [`parser`] turns RSS/Atom/JSON Feed bytes into a [`FeedDocument`] using `feed-rs`
//! - [`fetcher`] implements [`FeedSource`] over HTTP with `reqwest`
//! - [`pool`] runs up to `N` fetches at once and yields results as they complete
//!
//! The pool only depends on the [`FeedSource`] trait, so tests drive it with
//! in-memory documents instead of a network.

mod fetcher;
mod parser;
pub mod pool;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use fetcher::HttpFeedSource;
pub use parser::parse_feed;
pub use pool::{spawn_fetch_pool, FetchPool};

/// Errors that can occur while fetching a single feed.
///
/// Fetch errors never abort a sync run. The feed is logged, reported and
/// skipped until the next run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// A fetched and parsed feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDocument {
    pub title: Option<String>,
    /// Items in document order
    pub items: Vec<FetchedItem>,
}

/// One entry of a feed document, as the parser found it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedItem {
    /// Publisher-assigned id; empty when the feed gave none
    pub guid: String,
    pub link: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

impl FetchedItem {
    /// The key this item is deduplicated under.
    ///
    /// The trimmed GUID when there is one, otherwise the link. An item
    /// with neither has no stable identity and returns `None`.
    pub fn identity(&self) -> Option<&str> {
        let guid = self.guid.trim();
        if !guid.is_empty() {
            return Some(guid);
        }
        self.link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
    }
}

/// Outcome of fetching one feed, tagged with the feed it belongs to.
#[derive(Debug)]
pub struct FetchResult {
    pub feed_url: String,
    pub outcome: Result<FeedDocument, FetchError>,
}

/// Something that can retrieve a feed document by URL.
#[async_trait]
pub trait FeedSource: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<FeedDocument, FetchError>;
}
