//! Cached snapshot of the existing media library.
//!
//! [`LibraryIndex`] answers "is this already in the library?" from an
//! in-memory snapshot that is replaced wholesale by [`LibraryIndex::refresh`].
//! Readers always see the last fully committed snapshot: a new snapshot is
//! built off to the side, persisted in one transaction, and only then swapped
//! in behind the lock.

pub mod jellyfin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::SqlitePool;

use crate::db;
use crate::model::{ContentType, LibraryEntry};

/// Upper bound on [`LibraryIndex::search`] results.
pub const SEARCH_LIMIT: usize = 50;

/// Errors from the library index and its source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LibraryError {
    /// Refresh could not complete; the previous snapshot is still in place.
    #[error("library sync failed: {0}")]
    SyncFailed(String),

    #[error("a library refresh is already running")]
    RefreshInProgress,

    #[error("media library is not configured")]
    NotConfigured,

    /// The media library service could not be reached or answered badly.
    #[error("media library unreachable: {0}")]
    Unreachable(String),
}

/// Media library service the index is filled from. Read-only.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn list_all(&self) -> Result<Vec<LibraryEntry>, LibraryError>;
}

/// Outcome of [`LibraryIndex::find_match`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    /// An authoritative match exists
    pub found: bool,
    /// The authoritative match
    pub entry: Option<LibraryEntry>,
    /// A partial hit; informational only, never means "available"
    pub advisory: Option<LibraryEntry>,
}

/// Summary of a successful refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSummary {
    pub entries: usize,
    /// Rows dropped because their (title, artist) pair was already present
    pub duplicates: usize,
    pub synced_at: DateTime<Utc>,
}

/// Lowercase, fold diacritics, drop punctuation, collapse whitespace.
///
/// `"Beyoncé – Halo!"` becomes `"beyonce halo"`.
pub fn normalize(value: &str) -> String {
    let folded = deunicode::deunicode(value);
    let mut normalized = String::with_capacity(folded.len());
    for ch in folded.chars() {
        if ch.is_ascii_alphanumeric() {
            normalized.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii_whitespace() || ch == '-' || ch == '_' || ch == '/' {
            normalized.push(' ');
        }
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

type MatchKey = (String, String);

fn match_key(title: &str, artist: Option<&str>) -> MatchKey {
    (normalize(title), normalize(artist.unwrap_or_default()))
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: Vec<LibraryEntry>,
    /// Normalized (title, artist, album) per entry, same order as `entries`
    normalized: Vec<(String, String, String)>,
    by_key: HashMap<MatchKey, usize>,
    synced_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Build a snapshot, keeping the first entry for each (title, artist) pair.
    fn build(raw: Vec<LibraryEntry>, synced_at: Option<DateTime<Utc>>) -> (Self, usize) {
        let mut snapshot = Snapshot {
            synced_at,
            ..Default::default()
        };
        let mut duplicates = 0;

        for entry in raw {
            let key = match_key(&entry.title, entry.artist.as_deref());
            if key.0.is_empty() || snapshot.by_key.contains_key(&key) {
                duplicates += 1;
                continue;
            }
            let album = normalize(entry.album.as_deref().unwrap_or_default());
            snapshot.by_key.insert(key.clone(), snapshot.entries.len());
            snapshot.normalized.push((key.0, key.1, album));
            snapshot.entries.push(entry);
        }

        (snapshot, duplicates)
    }

    fn find_match(&self, title: &str, artist: Option<&str>, album: Option<&str>) -> MatchResult {
        let key = match_key(title, artist);
        if key.0.is_empty() {
            return MatchResult::default();
        }

        if let Some(&idx) = self.by_key.get(&key) {
            return MatchResult {
                found: true,
                entry: Some(self.entries[idx].clone()),
                advisory: None,
            };
        }

        let album = normalize(album.unwrap_or_default());
        let advisory = self
            .normalized
            .iter()
            .position(|(t, a, al)| {
                t.contains(&key.0)
                    && (key.1.is_empty() || a.contains(&key.1))
                    && (album.is_empty() || al.contains(&album))
            })
            .map(|idx| self.entries[idx].clone());

        MatchResult {
            found: false,
            entry: None,
            advisory,
        }
    }

    fn search(&self, text: &str, content_type: Option<ContentType>) -> Vec<LibraryEntry> {
        let needle = normalize(text);
        if needle.is_empty() {
            return Vec::new();
        }

        self.entries
            .iter()
            .zip(&self.normalized)
            .filter(|(entry, _)| content_type.is_none_or(|ct| entry.content_type == ct))
            .filter(|(_, (t, a, al))| {
                t.contains(&needle) || a.contains(&needle) || al.contains(&needle)
            })
            .map(|(entry, _)| entry.clone())
            .take(SEARCH_LIMIT)
            .collect()
    }
}

/// Locally cached, atomically refreshed view of the media library.
pub struct LibraryIndex {
    pool: SqlitePool,
    source: Option<Arc<dyn MediaLibrary>>,
    snapshot: RwLock<Arc<Snapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl LibraryIndex {
    /// An index with an empty snapshot.
    pub fn new(pool: SqlitePool, source: Option<Arc<dyn MediaLibrary>>) -> Self {
        Self {
            pool,
            source,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// An index primed with the last snapshot persisted to the database.
    pub async fn load(
        pool: SqlitePool,
        source: Option<Arc<dyn MediaLibrary>>,
    ) -> crate::error::Result<Self> {
        let index = Self::new(pool, source);
        if let Some((info, entries)) = db::load_library_snapshot(&index.pool).await? {
            let (snapshot, _) = Snapshot::build(entries, Some(info.synced_at));
            tracing::info!(
                entries = snapshot.entries.len(),
                synced_at = %info.synced_at,
                "Loaded library snapshot"
            );
            *index.snapshot.write() = Arc::new(snapshot);
        }
        Ok(index)
    }

    /// Replace the snapshot with a fresh listing from the media library.
    ///
    /// Only one refresh runs at a time; a concurrent call is rejected with
    /// [`LibraryError::RefreshInProgress`]. On any failure the current
    /// snapshot stays exactly as it was.
    pub async fn refresh(&self) -> Result<RefreshSummary, LibraryError> {
        let _guard = self
            .refresh_lock
            .try_lock()
            .map_err(|_| LibraryError::RefreshInProgress)?;

        let source = self.source.as_ref().ok_or(LibraryError::NotConfigured)?;

        tracing::info!("Refreshing library snapshot");
        let raw = source.list_all().await.map_err(|e| {
            tracing::warn!(error = %e, "Library listing failed, keeping previous snapshot");
            match e {
                LibraryError::SyncFailed(_) => e,
                other => LibraryError::SyncFailed(other.to_string()),
            }
        })?;

        let (snapshot, duplicates) = Snapshot::build(raw, None);

        let info = db::replace_library_snapshot(&self.pool, &snapshot.entries)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Persisting library snapshot failed");
                LibraryError::SyncFailed(format!("persist: {e}"))
            })?;

        let snapshot = Snapshot {
            synced_at: Some(info.synced_at),
            ..snapshot
        };
        let summary = RefreshSummary {
            entries: snapshot.entries.len(),
            duplicates,
            synced_at: info.synced_at,
        };

        *self.snapshot.write() = Arc::new(snapshot);

        tracing::info!(
            entries = summary.entries,
            duplicates = summary.duplicates,
            "Library snapshot replaced"
        );
        Ok(summary)
    }

    /// Look for `title`/`artist`/`album` in the current snapshot.
    ///
    /// An exact normalized (title, artist) hit is authoritative. Otherwise a
    /// substring hit on title (with artist/album also contained, when given)
    /// is returned as advisory only.
    pub fn find_match(&self, title: &str, artist: Option<&str>, album: Option<&str>) -> MatchResult {
        self.current().find_match(title, artist, album)
    }

    /// Substring search across title, artist and album.
    pub fn search(&self, text: &str, content_type: Option<ContentType>) -> Vec<LibraryEntry> {
        self.current().search(text, content_type)
    }

    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.current().synced_at
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }
}
