//! Test utilities and fixtures for riparr tests.
//!
//! This module provides common test helpers, mock collaborators and
//! database utilities to reduce boilerplate in tests.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{temp_db, new_song_request};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     let request = new_song_request("Test Song", "Test Artist");
//!     // ... test logic
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::fulfillment::{PostProcessError, PostProcessor, StatusChanged, StatusSink};
use crate::library::{LibraryError, MediaLibrary};
use crate::metadata::{MetadataCatalog, MetadataError, MetadataQuery};
use crate::model::{
    CanonicalMetadata, ContentType, LibraryEntry, NewRequest, RequestStatus, SourceCandidate,
    StreamingServiceKind,
};
use crate::organizer::{self, FiledAsset};
use crate::sources::{DownloadError, ServiceError, StreamingService};

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically.
///
/// Keep the TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_url = crate::db::db_url(Some(&dir.path().join("test.db")));

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// A song request owned by "alice".
pub fn new_song_request(title: &str, artist: &str) -> NewRequest {
    NewRequest {
        owner: "alice".to_string(),
        content_type: Some(ContentType::Song),
        title: title.to_string(),
        artist: Some(artist.to_string()),
        album: None,
        external_id: None,
    }
}

/// A song in the media library.
pub fn library_entry(id: &str, title: &str, artist: &str) -> LibraryEntry {
    LibraryEntry {
        library_id: id.to_string(),
        content_type: ContentType::Song,
        title: title.to_string(),
        artist: Some(artist.to_string()),
        album: None,
        path: Some(format!("/media/music/{artist}/{title}.flac")),
    }
}

/// A catalog record with a plausible score.
pub fn canonical(external_id: &str, title: &str, artist: &str) -> CanonicalMetadata {
    CanonicalMetadata {
        external_id: Some(external_id.to_string()),
        title: title.to_string(),
        artist: Some(artist.to_string()),
        album: None,
        year: Some(2001),
        score: 90,
        ..Default::default()
    }
}

/// A streaming search hit.
pub fn candidate(
    service: StreamingServiceKind,
    source_id: &str,
    title: &str,
    artist: &str,
    quality: u8,
) -> SourceCandidate {
    SourceCandidate {
        service,
        source_id: source_id.to_string(),
        title: title.to_string(),
        artist: Some(artist.to_string()),
        album: None,
        quality,
        duration: None,
        cover_url: None,
    }
}

// ============================================================================
// Gate
// ============================================================================

/// Holds a mock call open until the test releases it.
///
/// The mock calls [`Gate::pass`]; the test awaits [`Gate::wait_entered`],
/// does its checks, then calls [`Gate::release`].
#[derive(Debug, Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
}

impl Gate {
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }
}

// ============================================================================
// MockCatalog
// ============================================================================

/// In-memory [`MetadataCatalog`].
///
/// `search` returns every record; `lookup` finds one by external id.
#[derive(Default)]
pub struct MockCatalog {
    records: Vec<CanonicalMetadata>,
    error: Option<MetadataError>,
    search_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl MockCatalog {
    pub fn with_results(records: Vec<CanonicalMetadata>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn with_error(error: MetadataError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataCatalog for MockCatalog {
    async fn search(
        &self,
        _query: &MetadataQuery,
        _kind: ContentType,
    ) -> Result<Vec<CanonicalMetadata>, MetadataError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.records.clone()),
        }
    }

    async fn lookup(&self, id: &str, _kind: ContentType) -> Result<CanonicalMetadata, MetadataError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        self.records
            .iter()
            .find(|r| r.external_id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(id.to_string()))
    }
}

// ============================================================================
// MockLibrary
// ============================================================================

/// In-memory [`MediaLibrary`] with switchable failure.
#[derive(Default)]
pub struct MockLibrary {
    entries: Mutex<Vec<LibraryEntry>>,
    error: Mutex<Option<LibraryError>>,
    gate: Mutex<Option<Arc<Gate>>>,
    list_calls: AtomicUsize,
}

impl MockLibrary {
    pub fn with_entries(entries: Vec<LibraryEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            ..Default::default()
        }
    }

    pub fn set_entries(&self, entries: Vec<LibraryEntry>) {
        *self.entries.lock() = entries;
    }

    pub fn fail_with(&self, error: LibraryError) {
        *self.error.lock() = Some(error);
    }

    /// Block the next `list_all` until released.
    pub fn gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaLibrary for MockLibrary {
    async fn list_all(&self) -> Result<Vec<LibraryEntry>, LibraryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if let Some(e) = self.error.lock().clone() {
            return Err(e);
        }
        Ok(self.entries.lock().clone())
    }
}

// ============================================================================
// MockService
// ============================================================================

/// What `fetch` does.
#[derive(Debug, Clone, Default)]
enum FetchBehavior {
    /// Write one `<source_id>.flac` into the destination
    #[default]
    WriteFile,
    /// Succeed without producing any file
    Empty,
    Fail(String),
}

/// In-memory [`StreamingService`].
///
/// Search results are keyed by the queried title.
pub struct MockService {
    kind: StreamingServiceKind,
    responses: Mutex<HashMap<String, Vec<SourceCandidate>>>,
    search_error: Mutex<Option<String>>,
    fetch_behavior: Mutex<FetchBehavior>,
    fetch_gate: Mutex<Option<Arc<Gate>>>,
    queries: Mutex<Vec<String>>,
    search_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockService {
    pub fn new(kind: StreamingServiceKind) -> Self {
        Self {
            kind,
            responses: Mutex::new(HashMap::new()),
            search_error: Mutex::new(None),
            fetch_behavior: Mutex::new(FetchBehavior::default()),
            fetch_gate: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
            search_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn respond(&self, title: &str, candidates: Vec<SourceCandidate>) {
        self.responses.lock().insert(title.to_string(), candidates);
    }

    pub fn fail_searches(&self, message: &str) {
        *self.search_error.lock() = Some(message.to_string());
    }

    pub fn fail_fetches(&self, message: &str) {
        *self.fetch_behavior.lock() = FetchBehavior::Fail(message.to_string());
    }

    pub fn fetch_nothing(&self) {
        *self.fetch_behavior.lock() = FetchBehavior::Empty;
    }

    pub fn fetch_normally(&self) {
        *self.fetch_behavior.lock() = FetchBehavior::WriteFile;
    }

    /// Block the next `fetch` until released.
    pub fn gate_fetch(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.fetch_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Titles queried, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl StreamingService for MockService {
    fn kind(&self) -> StreamingServiceKind {
        self.kind
    }

    async fn search(
        &self,
        title: &str,
        _artist: Option<&str>,
        _kind: ContentType,
    ) -> Result<Vec<SourceCandidate>, ServiceError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(title.to_string());

        if let Some(message) = self.search_error.lock().clone() {
            return Err(ServiceError::new(self.kind, message));
        }
        Ok(self.responses.lock().get(title).cloned().unwrap_or_default())
    }

    async fn fetch(
        &self,
        candidate: &SourceCandidate,
        _kind: ContentType,
        _quality: u8,
        dest_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.fetch_gate.lock().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let behavior = self.fetch_behavior.lock().clone();
        match behavior {
            FetchBehavior::Fail(message) => Err(DownloadError::Failed(message)),
            FetchBehavior::Empty => {
                tokio::fs::create_dir_all(dest_dir).await?;
                Ok(dest_dir.to_path_buf())
            }
            FetchBehavior::WriteFile => {
                tokio::fs::create_dir_all(dest_dir).await?;
                let file = dest_dir.join(format!("{}.flac", candidate.source_id));
                tokio::fs::write(&file, b"fLaC mock audio").await?;
                Ok(dest_dir.to_path_buf())
            }
        }
    }
}

// ============================================================================
// MockPostProcessor
// ============================================================================

/// [`PostProcessor`] that skips real tagging but really moves files.
#[derive(Default)]
pub struct MockPostProcessor {
    fail_moves: Mutex<Option<String>>,
    tag_calls: AtomicUsize,
    move_calls: AtomicUsize,
}

impl MockPostProcessor {
    pub fn fail_moves(&self, message: &str) {
        *self.fail_moves.lock() = Some(message.to_string());
    }

    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }

    pub fn move_calls(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostProcessor for MockPostProcessor {
    async fn apply_tags(
        &self,
        artifact: &Path,
        _metadata: &CanonicalMetadata,
        _kind: ContentType,
    ) -> Result<usize, PostProcessError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        Ok(crate::scanner::audio_files(artifact).len())
    }

    async fn move_to(
        &self,
        artifact: &Path,
        dest_base: &Path,
    ) -> Result<FiledAsset, PostProcessError> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_moves.lock().clone() {
            return Err(PostProcessError::Move {
                path: artifact.to_path_buf(),
                message,
            });
        }
        organizer::file_download(artifact, dest_base).map_err(|e| PostProcessError::Move {
            path: artifact.to_path_buf(),
            message: e.to_string(),
        })
    }
}

// ============================================================================
// RecordingSink
// ============================================================================

/// [`StatusSink`] that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusChanged>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<StatusChanged> {
        self.events.lock().clone()
    }

    /// `(from, to)` pairs for one request, in emit order.
    pub fn transitions(&self, request_id: i64) -> Vec<(RequestStatus, RequestStatus)> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.request_id == request_id)
            .map(|e| (e.from, e.to))
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn emit(&self, event: StatusChanged) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;

        let store = crate::db::RequestStore::new(pool);
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_new_song_request_defaults() {
        let request = new_song_request("Test Song", "Test Artist");
        assert_eq!(request.owner, "alice");
        assert_eq!(request.content_type, Some(ContentType::Song));
        assert_eq!(request.artist.as_deref(), Some("Test Artist"));
    }

    #[tokio::test]
    async fn test_mock_service_fetch_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = MockService::new(StreamingServiceKind::Qobuz);
        let hit = candidate(StreamingServiceKind::Qobuz, "q1", "Song", "Artist", 2);

        let path = service
            .fetch(&hit, ContentType::Song, 3, &dir.path().join("out"))
            .await
            .unwrap();

        assert!(path.join("q1.flac").exists());
        assert_eq!(service.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_gate_release_before_pass() {
        let gate = Gate::default();
        gate.release();
        gate.pass().await;
        gate.wait_entered().await;
    }
}
