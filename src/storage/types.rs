use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the delivery store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `open` was pointed at a path with no database
    #[error("Database does not exist (path: {})", .0.display())]
    NotFound(PathBuf),

    /// `create` was pointed at a path that is already taken
    #[error("Database already exists (path: {})", .0.display())]
    AlreadyExists(PathBuf),

    /// The write lock could not be taken before the configured timeout
    #[error("Timed out waiting for the database lock. Is another run in progress?")]
    Timeout,

    /// A stored item record could not be parsed back
    #[error("Could not decode stored item record (feed: {feed_url}, item: {guid}): {reason}")]
    Decode {
        feed_url: String,
        guid: String,
        reason: String,
    },

    /// Stored state contradicts what the caller was entitled to assume
    #[error("Database invariant violated: {0}")]
    Invariant(String),

    #[error("Feed already exists in database: {0}")]
    FeedExists(String),

    #[error("Feed does not exist in database: {0}")]
    FeedNotFound(String),

    #[error("Invalid feed URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to access database file (path: {}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(sqlx::Error),
}

impl StoreError {
    /// Classify a sqlx error, folding lock contention into [`StoreError::Timeout`].
    ///
    /// SQLite reports a writer that gave up waiting as SQLITE_BUSY (5) or
    /// SQLITE_LOCKED (6), possibly as an extended code. The pool reports an
    /// in-process writer that gave up waiting as `PoolTimedOut`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::PoolTimedOut = err {
            return StoreError::Timeout;
        }

        if let sqlx::Error::Database(db_err) = &err {
            let busy_code = db_err
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| matches!(c & 0xff, 5 | 6))
                .unwrap_or(false);
            let message = db_err.message().to_lowercase();
            if busy_code
                || message.contains("database is locked")
                || message.contains("database table is locked")
            {
                return StoreError::Timeout;
            }
        }

        StoreError::Other(err)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for the feed listing query
pub(crate) type FeedRow = (i64, String, String, Option<String>, String, i64);

pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    /// Identity of the feed; the URL it is fetched from
    pub url: String,
    /// Canonical link, set to the subscription URL when added
    pub link: String,
    /// Informational only, never touched by a sync run
    pub last_build_date: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    /// Number of item records currently held for this feed
    pub delivered_count: i64,
}

/// Record of one item that has been handed to the notifier successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredItem {
    pub guid: String,
    pub published_at: DateTime<Utc>,
    pub delivered_at: DateTime<Utc>,
}
