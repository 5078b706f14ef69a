//! Database module for request and library snapshot persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! Provides async operations for:
//! - Request CRUD and compare-and-set status transitions ([`RequestStore`])
//! - Atomic replacement of the cached media library snapshot
//!
//! # Example
//!
//! ```ignore
//! use riparr::db::{init_db, RequestStore};
//!
//! let pool = init_db("sqlite:riparr.db").await?;
//! let store = RequestStore::new(pool);
//! let pending = store.list_by_status(RequestStatus::Pending).await?;
//! ```

mod library;
mod requests;

pub use library::{LibrarySyncInfo, load_library_snapshot, replace_library_snapshot};
pub use requests::{RequestStore, TransitionUpdate};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::{Error, Result};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "riparr.db";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file (and its directory) if it doesn't exist,
/// establishes a connection pool with up to 5 connections, and runs all
/// pending migrations.
pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    if let Some(parent) = db_url
        .strip_prefix("sqlite:")
        .map(std::path::Path::new)
        .and_then(|p| p.parent())
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }

    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(sqlx::Error::from)?;

    Ok(pool)
}

/// Fixed-width RFC 3339 (microseconds, `Z`), so stored timestamps compare
/// correctly as text.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_text() -> String {
    format_timestamp(Utc::now())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::corrupt(format!("bad timestamp {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("data").join("test.db");
        let db_url = format!("sqlite:{}", db_path.display());

        let pool = init_db(&db_url).await.expect("Failed to init db");
        assert!(db_path.exists());

        let store = RequestStore::new(pool);
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_db_url_default() {
        assert_eq!(db_url(None), "sqlite:riparr.db");
        assert_eq!(
            db_url(Some(std::path::Path::new("/data/r.db"))),
            "sqlite:/data/r.db"
        );
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let text = now_text();
        let parsed = parse_timestamp(&text).unwrap();
        assert_eq!(format_timestamp(parsed), text);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_timestamps_order_as_text() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = early + chrono::Duration::milliseconds(500);

        let (early, later) = (format_timestamp(early), format_timestamp(later));
        assert_eq!(early.len(), later.len());
        assert!(early < later);
    }
}
