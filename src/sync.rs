//! One synchronization run: fetch every feed, deliver each new item exactly
//! once, and record what was delivered.
//!
//! Fetching happens in parallel in the [`crate::feed::pool`]; everything
//! after it (dedup, rendering, sending, recording) happens here, on one task,
//! one result at a time.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

use crate::feed::{spawn_fetch_pool, FeedSource, FetchPool, FetchResult};
use crate::notify::{render_notification, Notifier, NotifyError, Session};
use crate::storage::{Database, StoreError, SyncTransaction};

/// Errors that abort a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub fetch_concurrency: usize,
    /// Address every notification goes to
    pub recipient: String,
    /// Restrict the run to these feed URLs. Empty means every feed.
    pub feed_filter: Vec<String>,
}

/// What a completed run did.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Feeds whose document was fetched and parsed
    pub feeds_fetched: usize,
    /// Items sent and recorded in this run
    pub delivered: usize,
    /// Items skipped because an earlier run delivered them
    pub already_delivered: usize,
    /// `(feed_url, error)` for every feed that could not be fetched
    pub failed_feeds: Vec<(String, String)>,
    /// URLs of the feeds counted in `feeds_fetched`
    pub fetched_feeds: HashSet<String>,
    /// Every `(feed_url, identity)` pair seen in a fetched document
    pub observed: HashSet<(String, String)>,
}

/// Run one synchronization.
///
/// Takes the store's write lock for the whole run, so a concurrent run
/// fails with [`StoreError::Timeout`] before anything is sent. A failed
/// fetch only skips its feed. A failed send aborts the run; items already
/// sent stay recorded and the failed item is retried on the next run.
pub async fn run_sync<S, N>(
    db: &Database,
    source: Arc<S>,
    notifier: &N,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    S: FeedSource,
    N: Notifier,
{
    sync_feeds(db, source, notifier, options)
        .instrument(tracing::info_span!("sync_run"))
        .await
}

async fn sync_feeds<S, N>(
    db: &Database,
    source: Arc<S>,
    notifier: &N,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    S: FeedSource,
    N: Notifier,
{
    let mut tx = db.begin_sync().await?;

    let mut feeds = tx.list_feeds().await?;
    if !options.feed_filter.is_empty() {
        for wanted in &options.feed_filter {
            if !feeds.contains(wanted) {
                tracing::warn!(feed = %wanted, "Not subscribed to feed, ignoring");
            }
        }
        feeds.retain(|url| options.feed_filter.contains(url));
    }
    tracing::info!(feeds = feeds.len(), "Starting sync");

    // On failure the transaction is dropped and nothing is recorded
    let mut session = notifier.connect().await?;

    let mut pool = spawn_fetch_pool(source, feeds, options.fetch_concurrency);
    let mut report = SyncReport::default();

    let outcome = deliver_all(
        &mut tx,
        &mut session,
        &mut pool,
        &options.recipient,
        &mut report,
    )
    .await;

    drop(pool);
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Failed to close notifier session");
    }

    match outcome {
        Ok(()) => {
            tx.commit().await?;
            tracing::info!(
                feeds_fetched = report.feeds_fetched,
                delivered = report.delivered,
                already_delivered = report.already_delivered,
                failed = report.failed_feeds.len(),
                "Sync finished"
            );
            Ok(report)
        }
        Err(e) => {
            // Every record written so far matches a send that succeeded
            let kept = tx.delivered();
            if let Err(commit_err) = tx.commit().await {
                tracing::error!(error = %commit_err, "Failed to commit delivered items");
            }
            tracing::error!(error = %e, delivered = kept, "Sync aborted");
            Err(e)
        }
    }
}

async fn deliver_all<T: Session>(
    tx: &mut SyncTransaction,
    session: &mut T,
    pool: &mut FetchPool,
    recipient: &str,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    while let Some(FetchResult { feed_url, outcome }) = pool.next().await {
        let doc = match outcome {
            Ok(doc) => doc,
            Err(e) => {
                report.failed_feeds.push((feed_url, e.to_string()));
                continue;
            }
        };
        report.feeds_fetched += 1;
        report.fetched_feeds.insert(feed_url.clone());

        if doc.items.is_empty() {
            tracing::info!(feed = %feed_url, "Feed has no items");
            continue;
        }

        for item in &doc.items {
            let Some(guid) = item.identity() else {
                tracing::warn!(
                    feed = %feed_url,
                    title = ?item.title,
                    "Item has neither guid nor link, skipping"
                );
                continue;
            };
            report.observed.insert((feed_url.clone(), guid.to_string()));

            if tx.is_delivered(&feed_url, guid).await? {
                tracing::debug!(feed = %feed_url, guid = %guid, "Already delivered");
                report.already_delivered += 1;
                continue;
            }

            let notification = render_notification(doc.title.as_deref(), &feed_url, item);
            session.send(&notification, recipient).await?;

            let published_at = item.published.unwrap_or_else(Utc::now);
            tx.mark_delivered(&feed_url, guid, published_at).await?;

            tracing::info!(
                feed = %feed_url,
                guid = %guid,
                subject = %notification.subject,
                "Delivered item"
            );
            report.delivered += 1;
        }
    }

    Ok(())
}
