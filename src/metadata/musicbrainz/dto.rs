//! MusicBrainz API Data Transfer Objects
//!
//! These types match EXACTLY what the MusicBrainz API returns.
//! DO NOT add fields that aren't in the API response.
//! DO NOT use these types outside the musicbrainz module - convert to domain types.
//!
//! API Reference: https://musicbrainz.org/doc/MusicBrainz_API
//!
//! Three entity kinds are used: recordings (songs), release groups (albums)
//! and artists, each through both `/search` and `/{entity}/{mbid}` lookups.

use serde::{Deserialize, Serialize};

/// `GET /recording?query=...`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingSearchResponse {
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

/// `GET /release-group?query=...`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReleaseGroupSearchResponse {
    #[serde(default, rename = "release-groups")]
    pub release_groups: Vec<ReleaseGroup>,
}

/// `GET /artist?query=...`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtistSearchResponse {
    #[serde(default)]
    pub artists: Vec<Artist>,
}

/// Recording, from search or `/recording/{mbid}?inc=artists+releases+url-rels`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Recording {
    /// MusicBrainz recording ID
    pub id: String,
    pub title: String,
    /// Search relevance (0-100), absent on lookups
    pub score: Option<u8>,
    /// Duration in milliseconds
    pub length: Option<u64>,
    pub disambiguation: Option<String>,
    #[serde(default)]
    pub artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    pub releases: Vec<Release>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// Artist credit (can be multiple for collaborations)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtistCredit {
    pub artist: ArtistRef,
    /// How this artist is credited (may differ from official name)
    pub name: Option<String>,
    /// Join phrase (e.g., " & ", " feat. ")
    pub joinphrase: Option<String>,
}

/// Artist as embedded in a credit
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

/// Release (album/single/EP edition)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Release {
    pub id: String,
    pub title: String,
    /// Official, Bootleg, etc.
    pub status: Option<String>,
    /// YYYY, YYYY-MM, or YYYY-MM-DD
    pub date: Option<String>,
    pub release_group: Option<ReleaseGroupRef>,
}

/// Release group as embedded in a release
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReleaseGroupRef {
    pub id: String,
    pub primary_type: Option<String>,
}

/// Release group, from search or `/release-group/{mbid}?inc=artists+url-rels`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReleaseGroup {
    pub id: String,
    pub title: String,
    pub score: Option<u8>,
    /// Album, Single, EP, etc.
    pub primary_type: Option<String>,
    pub first_release_date: Option<String>,
    #[serde(default)]
    pub artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// Artist, from search or `/artist/{mbid}?inc=url-rels`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub score: Option<u8>,
    /// Sort name (e.g., "Beatles, The")
    pub sort_name: Option<String>,
    /// Person, Group, etc.
    #[serde(rename = "type")]
    pub artist_type: Option<String>,
    pub life_span: Option<LifeSpan>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifeSpan {
    pub begin: Option<String>,
    pub end: Option<String>,
}

/// Relationship; only URL relations are requested
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Relation {
    /// e.g. "free streaming", "streaming", "purchase for download"
    #[serde(rename = "type")]
    pub relation_type: Option<String>,
    pub url: Option<UrlResource>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UrlResource {
    pub id: Option<String>,
    pub resource: String,
}

/// Error response from MusicBrainz API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    pub error: String,
    pub help: Option<String>,
}

// ============================================================================
// CONTRACT TESTS
// These verify our DTOs match what the real API returns.
// If these fail, the API has changed and we need to update our DTOs.
// ============================================================================
