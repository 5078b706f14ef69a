//! Core data models for music requests.
//!
//! Defines the primary entities: [`Request`], [`LibraryEntry`] and the
//! ephemeral [`SourceCandidate`], plus the closed [`RequestStatus`] enum and
//! its allowed-transition table.
//!
//! # Database Schema
//!
//! The persisted models map to the following tables:
//! - `requests` - User requests and their fulfillment state
//! - `library_entries` - The last committed media library snapshot

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Song,
    Album,
    Artist,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Song => "song",
            Self::Album => "album",
            Self::Artist => "artist",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "song" | "track" => Ok(Self::Song),
            "album" => Ok(Self::Album),
            "artist" => Ok(Self::Artist),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Fulfillment status of a request.
///
/// ```text
/// pending -> searching -> downloading -> processing -> completed
///    |          |             |              |
///    |          +-------------+--------------+--> failed --(retry)--> pending
///    +--> available
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Searching,
    Downloading,
    Processing,
    Completed,
    Failed,
    Available,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 7] = [
        Self::Pending,
        Self::Searching,
        Self::Downloading,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Available,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Available => "available",
        }
    }

    /// Allowed-transition table. Anything not listed here is rejected.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Searching)
                | (Pending, Available)
                | (Searching, Downloading)
                | (Searching, Failed)
                | (Downloading, Processing)
                | (Downloading, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }

    /// `completed` and `available` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Available)
    }

    /// States owned by a running fulfillment attempt.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Searching | Self::Downloading | Self::Processing)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown request status: {s}"))
    }
}

/// Streaming services the download engine can pull from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingServiceKind {
    Qobuz,
    Deezer,
    Tidal,
    SoundCloud,
}

impl StreamingServiceKind {
    pub const ALL: [StreamingServiceKind; 4] =
        [Self::Qobuz, Self::Deezer, Self::Tidal, Self::SoundCloud];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qobuz => "qobuz",
            Self::Deezer => "deezer",
            Self::Tidal => "tidal",
            Self::SoundCloud => "soundcloud",
        }
    }
}

impl fmt::Display for StreamingServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamingServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown streaming service: {s}"))
    }
}

/// A music request as persisted in the request store.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Who asked for it
    pub owner: String,
    pub content_type: ContentType,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// MusicBrainz ID picked during search-select
    pub external_id: Option<String>,
    /// Service bound to this request once a source was located
    pub source_service: Option<StreamingServiceKind>,
    /// Service-native id of the chosen source
    pub source_id: Option<String>,
    pub status: RequestStatus,
    /// Why the last attempt failed (verbatim for download errors)
    pub failure_reason: Option<String>,
    /// Whether re-issuing `process` may succeed without operator changes
    pub retryable: bool,
    /// Temp artifact while downloading, final location once completed
    pub download_path: Option<String>,
    /// Total size in bytes of the filed asset
    pub file_size: Option<i64>,
    /// Engine instance holding the running attempt, if any
    pub claimed_by: Option<String>,
    /// Last sign of life from the claim holder
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for creating a request (search-select or quick entry).
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub owner: String,
    pub content_type: Option<ContentType>,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub external_id: Option<String>,
}

/// A row of the cached media library snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// ID of the item in the media library service
    pub library_id: String,
    pub content_type: ContentType,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub path: Option<String>,
}

/// Authoritative title/artist/album/year resolved from the metadata catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalMetadata {
    /// Stable catalog identifier (MusicBrainz ID)
    pub external_id: Option<String>,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i32>,
    /// Catalog relevance score (0-100)
    pub score: u8,
    /// Streaming links found in the catalog, keyed by service name
    pub streaming_links: BTreeMap<String, String>,
}

impl CanonicalMetadata {
    /// Canonical metadata built from what the user typed.
    pub fn from_request(request: &Request) -> Self {
        Self {
            external_id: request.external_id.clone(),
            title: request.title.clone(),
            artist: request.artist.clone(),
            album: request.album.clone(),
            ..Default::default()
        }
    }
}

/// A single streaming-service search hit. Never persisted or cached.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCandidate {
    pub service: StreamingServiceKind,
    /// Service-native id
    pub source_id: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Declared quality tier (0 = lowest, 4 = hi-res)
    pub quality: u8,
    pub duration: Option<Duration>,
    pub cover_url: Option<String>,
}
