use chrono::{SubsecRound, Utc};
use url::Url;

use super::schema::Database;
use super::types::{decode_timestamp, encode_timestamp, Feed, FeedRow, StoreError};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed.
    ///
    /// The URL must parse and use the http or https scheme. The feed's
    /// canonical link starts out as the subscription URL.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidUrl`] - the URL is malformed or not http(s)
    /// * [`StoreError::FeedExists`] - the feed is already subscribed
    pub async fn add_feed(&self, url: &str) -> Result<Feed, StoreError> {
        validate_feed_url(url)?;

        // Stored at second precision
        let now = Utc::now().trunc_subsecs(0);
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(StoreError::FeedExists(url.to_string()));
        }

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO feeds (url, link, added_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(url)
        .bind(url)
        .bind(encode_timestamp(now))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(feed = %url, id = id, "Added feed");

        Ok(Feed {
            id,
            url: url.to_string(),
            link: url.to_string(),
            last_build_date: None,
            added_at: now,
            delivered_count: 0,
        })
    }

    /// Unsubscribe from a feed, dropping its delivered item records with it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FeedNotFound`] if the feed is not subscribed.
    pub async fn remove_feed(&self, url: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::FeedNotFound(url.to_string()));
        }

        tracing::info!(feed = %url, "Removed feed");
        Ok(())
    }

    /// All subscribed feeds in insertion order, with their record counts.
    pub async fn feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
                SELECT
                    f.id, f.url, f.link, f.last_build_date, f.added_at,
                    COUNT(i.guid) as delivered_count
                FROM feeds f
                LEFT JOIN items i ON f.id = i.feed_id
                GROUP BY f.id
                ORDER BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(id, url, link, last_build_date, added_at, delivered_count)| {
                    let last_build_date = last_build_date
                        .as_deref()
                        .map(decode_timestamp)
                        .transpose()
                        .map_err(|e| {
                            StoreError::Invariant(format!(
                                "unreadable last_build_date for feed {url}: {e}"
                            ))
                        })?;
                    let added_at = decode_timestamp(&added_at).map_err(|e| {
                        StoreError::Invariant(format!("unreadable added_at for feed {url}: {e}"))
                    })?;
                    Ok(Feed {
                        id,
                        url,
                        link,
                        last_build_date,
                        added_at,
                        delivered_count,
                    })
                },
            )
            .collect()
    }
}

fn validate_feed_url(raw: &str) -> Result<(), StoreError> {
    let invalid = |reason: String| StoreError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(invalid(format!(
            "unsupported scheme {scheme} (only http/https allowed)"
        ))),
    }
}
