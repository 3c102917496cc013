//! Integration tests for the delivery store across handles and reopen:
//! create, subscribe, record, reopen, sweep.

use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use feedmail::storage::{Database, StoreError};

const TIMEOUT: Duration = Duration::from_secs(1);

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("feedmail.db")
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let db = Database::create(&path, TIMEOUT).await.unwrap();
    db.add_feed("https://example.com/rss").await.unwrap();
    let mut tx = db.begin_sync().await.unwrap();
    tx.mark_delivered("https://example.com/rss", "guid-1", Utc::now())
        .await
        .unwrap();
    tx.commit().await.unwrap();
    db.close().await;

    let db = Database::open(&path, TIMEOUT).await.unwrap();
    let mut tx = db.begin_sync().await.unwrap();
    assert_eq!(tx.list_feeds().await.unwrap(), vec!["https://example.com/rss"]);
    assert!(tx
        .is_delivered("https://example.com/rss", "guid-1")
        .await
        .unwrap());
    assert!(!tx
        .is_delivered("https://example.com/rss", "guid-2")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_open_before_create_fails() {
    let dir = TempDir::new().unwrap();
    let result = Database::open(db_path(&dir), TIMEOUT).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(db_path(&dir), TIMEOUT).await.unwrap();

    db.add_feed("https://a.example.com/rss").await.unwrap();
    db.add_feed("https://b.example.com/rss").await.unwrap();
    assert!(matches!(
        db.add_feed("https://a.example.com/rss").await,
        Err(StoreError::FeedExists(_))
    ));

    db.remove_feed("https://a.example.com/rss").await.unwrap();
    assert!(matches!(
        db.remove_feed("https://a.example.com/rss").await,
        Err(StoreError::FeedNotFound(_))
    ));

    let urls: Vec<String> = db.feeds().await.unwrap().into_iter().map(|f| f.url).collect();
    assert_eq!(urls, vec!["https://b.example.com/rss"]);
}

#[tokio::test]
async fn test_sweep_keeps_items_still_in_feed() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(db_path(&dir), TIMEOUT).await.unwrap();
    let feed = "https://example.com/rss";
    db.add_feed(feed).await.unwrap();

    let ancient = Utc::now() - ChronoDuration::days(3650);
    let mut tx = db.begin_sync().await.unwrap();
    for guid in ["evergreen", "dropped-1", "dropped-2"] {
        tx.mark_delivered(feed, guid, ancient).await.unwrap();
    }
    tx.commit().await.unwrap();

    let observed: HashSet<(String, String)> = [(feed.to_string(), "evergreen".to_string())]
        .into_iter()
        .collect();
    let fetched: HashSet<String> = [feed.to_string()].into_iter().collect();
    let reaped = db
        .reap_delivered(Utc::now() - ChronoDuration::days(365), &fetched, &observed)
        .await
        .unwrap();
    assert_eq!(reaped, 2);

    let remaining: Vec<String> = db
        .delivered_items(feed)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.guid)
        .collect();
    assert_eq!(remaining, vec!["evergreen"]);
    assert_eq!(db.feeds().await.unwrap()[0].delivered_count, 1);
}
