//! MusicBrainz HTTP client
//!
//! Handles communication with the MusicBrainz web service.
//! See: https://musicbrainz.org/doc/MusicBrainz_API
//!
//! IMPORTANT: MusicBrainz requires a User-Agent header and rate limits to 1 req/sec.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{adapter, dto};
use crate::config::MusicBrainzConfig;
use crate::metadata::{MetadataCatalog, MetadataError, MetadataQuery};
use crate::model::{CanonicalMetadata, ContentType};

/// Spacing between requests
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1100);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// MusicBrainz API client
pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    base_url: String,
    search_limit: u32,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

fn user_agent(contact: &str) -> String {
    format!("Riparr/{} ( {} )", env!("CARGO_PKG_VERSION"), contact)
}

impl MusicBrainzClient {
    /// Create a new client from configuration
    pub fn new(config: &MusicBrainzConfig) -> Result<Self, MetadataError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent(&config.contact))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MetadataError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_limit: config.search_limit,
            last_request: tokio::sync::Mutex::new(None),
        })
    }

    /// Search recordings, release groups or artists depending on `kind`
    pub async fn search_kind(
        &self,
        query: &MetadataQuery,
        kind: ContentType,
    ) -> Result<Vec<CanonicalMetadata>, MetadataError> {
        let url = format!(
            "{}/{}?query={}&limit={}&fmt=json",
            self.base_url,
            entity(kind),
            urlencoding::encode(&lucene_query(query, kind)),
            self.search_limit
        );

        let records = match kind {
            ContentType::Song => self
                .get_json::<dto::RecordingSearchResponse>(&url, &query.text)
                .await?
                .recordings
                .into_iter()
                .map(adapter::recording_to_metadata)
                .collect(),
            ContentType::Album => self
                .get_json::<dto::ReleaseGroupSearchResponse>(&url, &query.text)
                .await?
                .release_groups
                .into_iter()
                .map(adapter::release_group_to_metadata)
                .collect(),
            ContentType::Artist => self
                .get_json::<dto::ArtistSearchResponse>(&url, &query.text)
                .await?
                .artists
                .into_iter()
                .map(adapter::artist_to_metadata)
                .collect(),
        };

        Ok(records)
    }

    /// Look up a single entity by MBID
    pub async fn lookup_kind(
        &self,
        id: &str,
        kind: ContentType,
    ) -> Result<CanonicalMetadata, MetadataError> {
        let includes = match kind {
            ContentType::Song => "artists+releases+url-rels",
            ContentType::Album => "artists+url-rels",
            ContentType::Artist => "url-rels",
        };
        let url = format!(
            "{}/{}/{}?inc={}&fmt=json",
            self.base_url,
            entity(kind),
            urlencoding::encode(id),
            includes
        );

        Ok(match kind {
            ContentType::Song => {
                adapter::recording_to_metadata(self.get_json::<dto::Recording>(&url, id).await?)
            }
            ContentType::Album => adapter::release_group_to_metadata(
                self.get_json::<dto::ReleaseGroup>(&url, id).await?,
            ),
            ContentType::Artist => {
                adapter::artist_to_metadata(self.get_json::<dto::Artist>(&url, id).await?)
            }
        })
    }

    /// Wait out the rate limit window
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Send the HTTP request and parse the response
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        subject: &str,
    ) -> Result<T, MetadataError> {
        self.throttle().await;
        tracing::debug!(url, "MusicBrainz request");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| MetadataError::Unavailable(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound(subject.to_string()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MetadataError::Unavailable("rate limited".to_string()));
        }

        if !status.is_success() {
            if let Ok(error) = response.json::<dto::ApiError>().await {
                return Err(MetadataError::Unavailable(error.error));
            }
            return Err(MetadataError::Unavailable(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MetadataError::Unavailable(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl MetadataCatalog for MusicBrainzClient {
    async fn search(
        &self,
        query: &MetadataQuery,
        kind: ContentType,
    ) -> Result<Vec<CanonicalMetadata>, MetadataError> {
        self.search_kind(query, kind).await
    }

    async fn lookup(
        &self,
        id: &str,
        kind: ContentType,
    ) -> Result<CanonicalMetadata, MetadataError> {
        self.lookup_kind(id, kind).await
    }
}

fn entity(kind: ContentType) -> &'static str {
    match kind {
        ContentType::Song => "recording",
        ContentType::Album => "release-group",
        ContentType::Artist => "artist",
    }
}

/// Fielded Lucene query, e.g. `recording:"Song" AND artist:"Artist"`
fn lucene_query(query: &MetadataQuery, kind: ContentType) -> String {
    let field = match kind {
        ContentType::Song => "recording",
        ContentType::Album => "releasegroup",
        ContentType::Artist => "artist",
    };

    let mut parts = vec![format!("{field}:\"{}\"", escape_phrase(&query.text))];
    if kind != ContentType::Artist
        && let Some(artist) = &query.artist
    {
        parts.push(format!("artist:\"{}\"", escape_phrase(artist)));
    }
    parts.join(" AND ")
}

fn escape_phrase(value: &str) -> String {
    value.trim().replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = MusicBrainzClient::new(&MusicBrainzConfig::default()).unwrap();
        assert_eq!(client.base_url, "https://musicbrainz.org/ws/2");
        assert_eq!(client.search_limit, 10);
    }

    #[test]
    fn test_custom_base_url_trailing_slash() {
        let config = MusicBrainzConfig {
            base_url: "http://localhost:8080/ws/2/".to_string(),
            ..Default::default()
        };
        let client = MusicBrainzClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/ws/2");
    }

    #[test]
    fn test_user_agent_format() {
        let agent = user_agent("ops@example.com");
        assert!(agent.starts_with("Riparr/"));
        assert!(agent.ends_with("( ops@example.com )"));
    }

    #[test]
    fn test_lucene_query_song_with_artist() {
        let query = MetadataQuery::fielded("Bohemian Rhapsody", Some("Queen"));
        assert_eq!(
            lucene_query(&query, ContentType::Song),
            r#"recording:"Bohemian Rhapsody" AND artist:"Queen""#
        );
        assert_eq!(
            lucene_query(&query, ContentType::Album),
            r#"releasegroup:"Bohemian Rhapsody" AND artist:"Queen""#
        );
    }

    #[test]
    fn test_lucene_query_bare_text_is_fielded() {
        let query = MetadataQuery::text("Bohemian Rhapsody");
        assert_eq!(
            lucene_query(&query, ContentType::Song),
            r#"recording:"Bohemian Rhapsody""#
        );
    }

    #[test]
    fn test_lucene_query_artist_ignores_artist_field() {
        let query = MetadataQuery::fielded("Queen", Some("Queen"));
        assert_eq!(lucene_query(&query, ContentType::Artist), r#"artist:"Queen""#);
    }

    #[test]
    fn test_lucene_query_escapes_quotes() {
        let query = MetadataQuery::text(r#"The "Hits""#);
        assert_eq!(
            lucene_query(&query, ContentType::Album),
            r#"releasegroup:"The \"Hits\"""#
        );
    }
}
