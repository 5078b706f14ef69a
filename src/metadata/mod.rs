//! Metadata resolution against an external music catalog.
//!
//! [`MetadataResolver`] turns user-typed text (or a catalog id picked during
//! search-select) into [`CanonicalMetadata`]. The catalog itself sits behind
//! the [`MetadataCatalog`] trait; production uses
//! [`musicbrainz::MusicBrainzClient`], tests use a mock.
//!
//! Resolution is a pure query: nothing here writes state.

pub mod musicbrainz;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{CanonicalMetadata, ContentType};

/// Errors from the metadata catalog.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetadataError {
    /// Catalog unreachable, rate limited, or returned something unparseable.
    /// Safe to retry.
    #[error("metadata catalog unavailable: {0}")]
    Unavailable(String),

    #[error("not found in metadata catalog: {0}")]
    NotFound(String),
}

impl MetadataError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// What to search for. The catalog searches `text` on the field for the
/// requested kind (recording, release group or artist name); `artist` adds
/// an artist clause except on artist searches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataQuery {
    pub text: String,
    pub artist: Option<String>,
}

impl MetadataQuery {
    /// Free-text query.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            artist: None,
        }
    }

    /// Title plus optional artist, as carried by a request.
    pub fn fielded(title: impl Into<String>, artist: Option<&str>) -> Self {
        Self {
            text: title.into(),
            artist: artist
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from),
        }
    }
}

/// External metadata catalog.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    /// Search the catalog. Results are in catalog order.
    async fn search(
        &self,
        query: &MetadataQuery,
        kind: ContentType,
    ) -> Result<Vec<CanonicalMetadata>, MetadataError>;

    /// Look up a single record by its catalog id.
    async fn lookup(&self, id: &str, kind: ContentType)
    -> Result<CanonicalMetadata, MetadataError>;
}

/// Normalizing front of a [`MetadataCatalog`].
#[derive(Clone)]
pub struct MetadataResolver {
    catalog: Arc<dyn MetadataCatalog>,
}

impl MetadataResolver {
    pub fn new(catalog: Arc<dyn MetadataCatalog>) -> Self {
        Self { catalog }
    }

    /// Candidate records for a query, best first.
    pub async fn resolve(
        &self,
        query: &MetadataQuery,
        kind: ContentType,
    ) -> Result<Vec<CanonicalMetadata>, MetadataError> {
        tracing::debug!(query = %query.text, artist = ?query.artist, %kind, "Resolving metadata");
        let records = self.catalog.search(query, kind).await?;
        let normalized = normalize_records(records);
        tracing::debug!(count = normalized.len(), "Metadata candidates");
        Ok(normalized)
    }

    /// A single record by catalog id.
    pub async fn resolve_by_id(
        &self,
        external_id: &str,
        kind: ContentType,
    ) -> Result<CanonicalMetadata, MetadataError> {
        let record = self.catalog.lookup(external_id.trim(), kind).await?;
        normalize_records(vec![record])
            .into_iter()
            .next()
            .ok_or_else(|| MetadataError::NotFound(external_id.to_string()))
    }
}

/// Trim fields, drop untitled records, dedupe by id and order by score.
fn normalize_records(records: Vec<CanonicalMetadata>) -> Vec<CanonicalMetadata> {
    let mut seen = HashSet::new();
    let mut out: Vec<CanonicalMetadata> = records
        .into_iter()
        .filter_map(|mut record| {
            record.title = record.title.trim().to_string();
            if record.title.is_empty() {
                return None;
            }
            record.artist = trim_optional(record.artist);
            record.album = trim_optional(record.album);
            Some(record)
        })
        .filter(|record| match &record.external_id {
            Some(id) => seen.insert(id.clone()),
            None => true,
        })
        .collect();

    // stable: equal scores keep catalog order
    out.sort_by(|a, b| b.score.cmp(&a.score));
    out
}

fn trim_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
