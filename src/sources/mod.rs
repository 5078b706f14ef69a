//! Streaming-service source location.
//!
//! [`SourceLocator`] walks the configured services in order (primary first,
//! then fallbacks). Against each service it tries the exact canonical
//! title/artist, then once more with a [smart query](query::smart_query),
//! and stops at the first service that returns anything. Results from
//! different services are never merged.

pub mod query;
pub mod streamrip;

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::library::normalize;
use crate::model::{CanonicalMetadata, ContentType, SourceCandidate, StreamingServiceKind};

/// Outcome of a locate that produced no candidate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Every service and query variant was tried; nothing matched.
    #[error("no source available on any configured service")]
    NoSourceFound,

    /// Nothing matched and at least one service failed at the transport
    /// level, so a retry may succeed.
    #[error("streaming service unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Transport or credential failure from a single catalog search.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{service}: {message}")]
pub struct ServiceError {
    pub service: StreamingServiceKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(service: StreamingServiceKind, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

/// Failure while fetching a chosen candidate. The message is kept verbatim
/// on the request.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0}")]
    Failed(String),

    #[error("download produced no files")]
    NoFiles,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One streaming catalog plus its download path.
#[async_trait]
pub trait StreamingService: Send + Sync {
    fn kind(&self) -> StreamingServiceKind;

    async fn search(
        &self,
        title: &str,
        artist: Option<&str>,
        kind: ContentType,
    ) -> Result<Vec<SourceCandidate>, ServiceError>;

    /// Download `candidate` into `dest_dir`, returning the directory that
    /// holds the downloaded files.
    async fn fetch(
        &self,
        candidate: &SourceCandidate,
        kind: ContentType,
        quality: u8,
        dest_dir: &Path,
    ) -> Result<PathBuf, DownloadError>;
}

/// Per-service result of [`SourceLocator::search_all`].
#[derive(Debug)]
pub struct ServiceSearch {
    pub service: StreamingServiceKind,
    pub result: Result<Vec<SourceCandidate>, ServiceError>,
}

/// Ordered set of streaming services.
#[derive(Clone)]
pub struct SourceLocator {
    services: Vec<Arc<dyn StreamingService>>,
}

impl SourceLocator {
    /// `services` in priority order: primary first.
    pub fn new(services: Vec<Arc<dyn StreamingService>>) -> Self {
        Self { services }
    }

    pub fn service_order(&self) -> Vec<StreamingServiceKind> {
        self.services.iter().map(|s| s.kind()).collect()
    }

    pub fn service(&self, kind: StreamingServiceKind) -> Option<Arc<dyn StreamingService>> {
        self.services.iter().find(|s| s.kind() == kind).cloned()
    }

    /// Candidates from the first service that has any, best match first.
    pub async fn locate(
        &self,
        metadata: &CanonicalMetadata,
        kind: ContentType,
    ) -> Result<Vec<SourceCandidate>, SourceError> {
        let attempts = query_variants(metadata, kind);
        let mut last_error: Option<ServiceError> = None;

        for service in &self.services {
            for (variant, (title, artist)) in attempts.iter().enumerate() {
                tracing::info!(
                    service = %service.kind(),
                    title = %title,
                    artist = ?artist,
                    smart = variant > 0,
                    "Searching streaming catalog"
                );

                match service.search(title, artist.as_deref(), kind).await {
                    Ok(candidates) if !candidates.is_empty() => {
                        tracing::info!(
                            service = %service.kind(),
                            count = candidates.len(),
                            "Source candidates found"
                        );
                        return Ok(rank(candidates, metadata));
                    }
                    Ok(_) => {
                        tracing::debug!(service = %service.kind(), "No results");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Streaming catalog search failed");
                        last_error = Some(e);
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(SourceError::Unavailable(e.to_string())),
            None => Err(SourceError::NoSourceFound),
        }
    }

    /// Search every service concurrently with a free-text query.
    ///
    /// Per-service errors are reported alongside the other results.
    pub async fn search_all(&self, query: &str, kind: ContentType) -> Vec<ServiceSearch> {
        let searches = self.services.iter().map(|service| async move {
            ServiceSearch {
                service: service.kind(),
                result: service.search(query, None, kind).await,
            }
        });
        futures::future::join_all(searches).await
    }
}

/// Exact canonical query, then the smart variant if it differs.
fn query_variants(
    metadata: &CanonicalMetadata,
    kind: ContentType,
) -> Vec<(String, Option<String>)> {
    let title = metadata.title.trim().to_string();
    let artist = match kind {
        ContentType::Artist => None,
        _ => metadata
            .artist
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from),
    };

    let smart_title = query::smart_query(&title);
    let smart_artist = artist.as_deref().map(query::smart_query);

    let mut variants = vec![(title, artist)];
    let smart = (smart_title, smart_artist);
    if !smart.0.is_empty() && smart != variants[0] {
        variants.push(smart);
    }
    variants
}

/// Exact title+artist matches first, then higher quality. Stable otherwise.
fn rank(mut candidates: Vec<SourceCandidate>, metadata: &CanonicalMetadata) -> Vec<SourceCandidate> {
    let titles = [
        normalize(&metadata.title),
        normalize(&query::smart_query(&metadata.title)),
    ];
    let artist = normalize(metadata.artist.as_deref().unwrap_or_default());

    let is_exact = |c: &SourceCandidate| {
        let title = normalize(&c.title);
        titles.contains(&title)
            && (artist.is_empty() || normalize(c.artist.as_deref().unwrap_or_default()) == artist)
    };

    candidates.sort_by_key(|c| (Reverse(is_exact(c)), Reverse(c.quality)));
    candidates
}
