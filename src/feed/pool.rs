//! Bounded-concurrency fetching.
//!
//! A producer feeds URLs into a bounded work queue; `N` workers share the
//! queue and push every outcome into a results channel. The results channel
//! closes when the last worker exits, which is how the consumer learns the
//! pool is done.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{FeedSource, FetchResult};

/// Worker count used when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Handle to a running fetch pool.
///
/// Dropping the handle aborts any fetch still in flight.
pub struct FetchPool {
    results: mpsc::Receiver<FetchResult>,
    tasks: Vec<JoinHandle<()>>,
}

impl FetchPool {
    /// Next completed fetch, or `None` once every URL has been fetched.
    pub async fn next(&mut self) -> Option<FetchResult> {
        self.results.recv().await
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Start fetching `urls` with at most `workers` fetches in flight.
///
/// Results arrive in completion order. A `workers` of zero is treated as one.
pub fn spawn_fetch_pool<S: FeedSource>(
    source: Arc<S>,
    urls: Vec<String>,
    workers: usize,
) -> FetchPool {
    let workers = workers.max(1);

    let (work_tx, work_rx) = mpsc::channel::<String>(workers);
    let (result_tx, result_rx) = mpsc::channel::<FetchResult>(workers.saturating_mul(2));
    let work_rx = Arc::new(Mutex::new(work_rx));

    let mut tasks = Vec::with_capacity(workers + 1);

    tasks.push(tokio::spawn(async move {
        for url in urls {
            if work_tx.send(url).await.is_err() {
                // Every worker is gone
                break;
            }
        }
    }));

    for worker in 0..workers {
        let source = Arc::clone(&source);
        let work_rx = Arc::clone(&work_rx);
        let result_tx = result_tx.clone();

        tasks.push(tokio::spawn(async move {
            loop {
                let next = work_rx.lock().await.recv().await;
                let Some(feed_url) = next else {
                    break;
                };

                tracing::info!(feed = %feed_url, worker = worker, "Fetching feed");
                let outcome = source.fetch(&feed_url).await;
                if let Err(e) = &outcome {
                    tracing::warn!(feed = %feed_url, error = %e, "Feed fetch failed");
                }

                if result_tx.send(FetchResult { feed_url, outcome }).await.is_err() {
                    // Consumer went away
                    break;
                }
            }
        }));
    }

    // Workers hold the only senders now
    drop(result_tx);

    FetchPool {
        results: result_rx,
        tasks,
    }
}
