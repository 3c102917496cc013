use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the delivery store.
///
/// The pool holds a single connection. A sync run keeps that connection for
/// its whole write transaction, so any other use of the same handle waits
/// for the run to finish (or for `timeout` to elapse). Other processes are
/// held off by SQLite's own write lock, waited on for the same `timeout`.
#[derive(Clone, Debug)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open an existing database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no file exists at `path`, and
    /// `StoreError::Invariant` if the file exists but holds no feed table.
    pub async fn open(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();

        match std::fs::metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_path_buf()));
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }

        let db = Self::connect(path, timeout).await?;

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('feeds', 'items', 'sync_runs')",
        )
        .fetch_one(&db.pool)
        .await?;
        if tables.0 != 3 {
            db.pool.close().await;
            return Err(StoreError::Invariant(format!(
                "{} is not a feedmail database (missing tables)",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), "Opened database");
        Ok(db)
    }

    /// Create a new, empty database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if anything exists at `path`.
    pub async fn create(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();

        // Pre-create the file with create_new so an existing path is never
        // reused, and with user-only permissions from the start on Unix.
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(path) {
            Ok(_file) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(path.to_path_buf()));
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }

        let db = match Self::connect(path, timeout).await {
            Ok(db) => db,
            Err(e) => {
                let _ = std::fs::remove_file(path);
                return Err(e);
            }
        };

        if let Err(e) = db.migrate().await {
            db.pool.close().await;
            let _ = std::fs::remove_file(path);
            return Err(match e {
                StoreError::Other(inner) => StoreError::Migration(inner.to_string()),
                other => other,
            });
        }

        tracing::info!(path = %path.display(), "Created database");
        Ok(db)
    }

    async fn connect(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .foreign_keys(true)
            .busy_timeout(timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Close the pool, waiting for the connection to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create the schema atomically within a transaction.
    async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT UNIQUE NOT NULL,
                link TEXT NOT NULL,
                last_build_date TEXT,
                added_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                published_at TEXT NOT NULL,
                delivered_at TEXT NOT NULL,
                PRIMARY KEY (feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Retention sweeps scan by age
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_at)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                id INTEGER PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                delivered INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
