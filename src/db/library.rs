//! Persistence for the cached media library snapshot.

use sqlx::sqlite::SqlitePool;

use super::{now_text, parse_timestamp};
use crate::error::{Error, Result};
use crate::model::LibraryEntry;

/// When the stored snapshot was last replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct LibrarySyncInfo {
    pub synced_at: chrono::DateTime<chrono::Utc>,
    pub entry_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct LibraryRow {
    library_id: String,
    content_type: String,
    title: String,
    artist: Option<String>,
    album: Option<String>,
    path: Option<String>,
}

impl TryFrom<LibraryRow> for LibraryEntry {
    type Error = Error;

    fn try_from(row: LibraryRow) -> Result<Self> {
        Ok(LibraryEntry {
            library_id: row.library_id,
            content_type: row.content_type.parse().map_err(Error::corrupt)?,
            title: row.title,
            artist: row.artist,
            album: row.album,
            path: row.path,
        })
    }
}

/// Replace the stored snapshot with `entries` in a single transaction.
///
/// Readers see either the old snapshot or the new one, never a mix.
pub async fn replace_library_snapshot(
    pool: &SqlitePool,
    entries: &[LibraryEntry],
) -> Result<LibrarySyncInfo> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM library_entries")
        .execute(&mut *tx)
        .await?;

    for entry in entries {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO library_entries
                (library_id, content_type, title, artist, album, path)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.library_id)
        .bind(entry.content_type.as_str())
        .bind(&entry.title)
        .bind(&entry.artist)
        .bind(&entry.album)
        .bind(&entry.path)
        .execute(&mut *tx)
        .await?;
    }

    let synced_at = now_text();
    let entry_count = entries.len() as i64;
    sqlx::query(
        r#"
        INSERT INTO library_sync (id, synced_at, entry_count) VALUES (1, ?, ?)
        ON CONFLICT(id) DO UPDATE SET synced_at = excluded.synced_at,
                                      entry_count = excluded.entry_count
        "#,
    )
    .bind(&synced_at)
    .bind(entry_count)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(LibrarySyncInfo {
        synced_at: parse_timestamp(&synced_at)?,
        entry_count,
    })
}

/// Load the last committed snapshot, if a sync ever succeeded.
pub async fn load_library_snapshot(
    pool: &SqlitePool,
) -> Result<Option<(LibrarySyncInfo, Vec<LibraryEntry>)>> {
    let info: Option<(String, i64)> =
        sqlx::query_as("SELECT synced_at, entry_count FROM library_sync WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    let Some((synced_at, entry_count)) = info else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<_, LibraryRow>(
        "SELECT library_id, content_type, title, artist, album, path FROM library_entries",
    )
    .fetch_all(pool)
    .await?;
    let entries = rows
        .into_iter()
        .map(LibraryEntry::try_from)
        .collect::<Result<Vec<_>>>()?;

    Ok(Some((
        LibrarySyncInfo {
            synced_at: parse_timestamp(&synced_at)?,
            entry_count,
        },
        entries,
    )))
}
