use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use std::collections::{HashMap, HashSet};

use super::schema::Database;
use super::types::{decode_timestamp, encode_timestamp, DeliveredItem, StoreError};

/// The single write transaction a sync run executes in.
///
/// Every read that decides delivery and every record written by the run
/// goes through this transaction, so the run sees one consistent snapshot
/// and no other writer can interleave with it. Dropping it without calling
/// [`SyncTransaction::commit`] rolls the run back.
pub struct SyncTransaction {
    tx: Transaction<'static, Sqlite>,
    run_id: i64,
    feed_ids: HashMap<String, i64>,
    delivered: i64,
}

impl Database {
    /// Begin the write transaction for a sync run.
    ///
    /// The first statement is a write, so SQLite's write lock is taken here
    /// rather than at the first delivery. A competing run waits for the lock
    /// up to the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if another writer holds the database
    /// for longer than the timeout.
    pub async fn begin_sync(&self) -> Result<SyncTransaction, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (run_id,): (i64,) =
            sqlx::query_as("INSERT INTO sync_runs (started_at) VALUES (?) RETURNING id")
                .bind(encode_timestamp(Utc::now()))
                .fetch_one(&mut *tx)
                .await?;

        tracing::debug!(run_id = run_id, "Began sync transaction");

        Ok(SyncTransaction {
            tx,
            run_id,
            feed_ids: HashMap::new(),
            delivered: 0,
        })
    }

    /// Delivered item records for one feed, oldest delivery first.
    pub async fn delivered_items(&self, feed_url: &str) -> Result<Vec<DeliveredItem>, StoreError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT i.guid, i.published_at, i.delivered_at
            FROM items i
            JOIN feeds f ON f.id = i.feed_id
            WHERE f.url = ?
            ORDER BY i.delivered_at, i.rowid
        "#,
        )
        .bind(feed_url)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(guid, published_at, delivered_at)| {
                let decode = |raw: &str| {
                    decode_timestamp(raw).map_err(|e| StoreError::Decode {
                        feed_url: feed_url.to_string(),
                        guid: guid.clone(),
                        reason: e.to_string(),
                    })
                };
                Ok(DeliveredItem {
                    published_at: decode(&published_at)?,
                    delivered_at: decode(&delivered_at)?,
                    guid,
                })
            })
            .collect()
    }

    /// Delete item records published before `cutoff`.
    ///
    /// Only feeds in `fetched_feeds` are swept. A feed that failed or was
    /// left out of the run has no current document to compare against, so
    /// its records are kept whatever their age. Within a swept feed, records
    /// whose `(feed_url, guid)` pair appears in `observed` are kept too: the
    /// item is still in its feed, and forgetting it would make the next run
    /// deliver it again. Runs in its own transaction, separate from the sync
    /// run. Returns the number of records deleted.
    pub async fn reap_delivered(
        &self,
        cutoff: DateTime<Utc>,
        fetched_feeds: &HashSet<String>,
        observed: &HashSet<(String, String)>,
    ) -> Result<u64, StoreError> {
        if fetched_feeds.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
            r#"
            SELECT i.feed_id, f.url, i.guid, i.published_at
            FROM items i
            JOIN feeds f ON f.id = i.feed_id
        "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut reaped = 0u64;
        for (feed_id, feed_url, guid, published_at) in rows {
            if !fetched_feeds.contains(&feed_url) {
                continue;
            }
            let published_at = decode_timestamp(&published_at).map_err(|e| StoreError::Decode {
                feed_url: feed_url.clone(),
                guid: guid.clone(),
                reason: e.to_string(),
            })?;

            if published_at >= cutoff {
                continue;
            }
            // Tuple lookup needs owned keys; the set is keyed (feed, guid)
            let key = (feed_url, guid);
            if observed.contains(&key) {
                continue;
            }

            sqlx::query("DELETE FROM items WHERE feed_id = ? AND guid = ?")
                .bind(feed_id)
                .bind(&key.1)
                .execute(&mut *tx)
                .await?;
            tracing::debug!(feed = %key.0, guid = %key.1, "Reaped item record");
            reaped += 1;
        }

        tx.commit().await?;
        Ok(reaped)
    }
}

impl SyncTransaction {
    /// Subscribed feed URLs in insertion order.
    pub async fn list_feeds(&mut self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, url FROM feeds ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, url)| {
                self.feed_ids.insert(url.clone(), id);
                url
            })
            .collect())
    }

    /// Resolve a feed URL to its row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invariant`] if the feed is not in the database.
    pub async fn feed_id(&mut self, feed_url: &str) -> Result<i64, StoreError> {
        if let Some(id) = self.feed_ids.get(feed_url) {
            return Ok(*id);
        }

        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(feed_url)
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some((id,)) => {
                self.feed_ids.insert(feed_url.to_string(), id);
                Ok(id)
            }
            None => Err(StoreError::Invariant(format!(
                "feed does not exist in database: {feed_url}"
            ))),
        }
    }

    /// Whether `guid` has already been delivered for `feed_url`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Invariant`] - the feed is not in the database
    /// * [`StoreError::Decode`] - the stored record is unreadable
    pub async fn is_delivered(&mut self, feed_url: &str, guid: &str) -> Result<bool, StoreError> {
        let feed_id = self.feed_id(feed_url).await?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT published_at FROM items WHERE feed_id = ? AND guid = ?")
                .bind(feed_id)
                .bind(guid)
                .fetch_optional(&mut *self.tx)
                .await?;

        match row {
            None => Ok(false),
            Some((published_at,)) => {
                decode_timestamp(&published_at).map_err(|e| StoreError::Decode {
                    feed_url: feed_url.to_string(),
                    guid: guid.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(true)
            }
        }
    }

    /// Record that `guid` was delivered for `feed_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invariant`] if the feed is not in the database.
    pub async fn mark_delivered(
        &mut self,
        feed_url: &str,
        guid: &str,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let feed_id = self.feed_id(feed_url).await?;

        sqlx::query(
            "INSERT INTO items (feed_id, guid, published_at, delivered_at) VALUES (?, ?, ?, ?)",
        )
        .bind(feed_id)
        .bind(guid)
        .bind(encode_timestamp(published_at))
        .bind(encode_timestamp(Utc::now()))
        .execute(&mut *self.tx)
        .await?;

        self.delivered += 1;
        Ok(())
    }

    /// Number of records written by this run so far.
    pub fn delivered(&self) -> i64 {
        self.delivered
    }

    /// Finish the run's bookkeeping and commit every record it wrote.
    pub async fn commit(mut self) -> Result<(), StoreError> {
        sqlx::query("UPDATE sync_runs SET finished_at = ?, delivered = ? WHERE id = ?")
            .bind(encode_timestamp(Utc::now()))
            .bind(self.delivered)
            .bind(self.run_id)
            .execute(&mut *self.tx)
            .await?;

        self.tx.commit().await?;

        tracing::debug!(
            run_id = self.run_id,
            delivered = self.delivered,
            "Committed sync transaction"
        );
        Ok(())
    }
}
