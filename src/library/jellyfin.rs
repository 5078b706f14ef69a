//! Jellyfin media server client.
//!
//! Lists music items (tracks, albums, artists) for the library snapshot and
//! checks connectivity. Authenticates with an API key sent as `X-Emby-Token`.

use std::time::Duration;

use async_trait::async_trait;

use super::{LibraryError, MediaLibrary};
use crate::config::JellyfinConfig;
use crate::model::{ContentType, LibraryEntry};

const ITEMS_TIMEOUT: Duration = Duration::from_secs(30);
const INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// Server identity from `/System/Info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_name: Option<String>,
    pub version: Option<String>,
}

pub struct JellyfinClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl JellyfinClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, LibraryError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| LibraryError::Unreachable(format!("HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Client for the configured server, or [`LibraryError::NotConfigured`].
    pub fn from_config(config: &JellyfinConfig) -> Result<Self, LibraryError> {
        match (config.url.as_deref(), config.api_key.as_deref()) {
            (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                Self::new(url.trim(), key.trim())
            }
            _ => Err(LibraryError::NotConfigured),
        }
    }

    /// Check that the server answers and the key is accepted.
    pub async fn test_connection(&self) -> Result<ServerInfo, LibraryError> {
        let info: dto::SystemInfo = self.get_json("/System/Info", &[], INFO_TIMEOUT).await?;
        Ok(ServerInfo {
            server_name: info.server_name,
            version: info.version,
        })
    }

    /// Every music item on the server, mapped to library entries.
    pub async fn fetch_items(&self) -> Result<Vec<LibraryEntry>, LibraryError> {
        let response: dto::ItemsResponse = self
            .get_json(
                "/Items",
                &[
                    ("IncludeItemTypes", "Audio,MusicAlbum,MusicArtist"),
                    ("Recursive", "true"),
                    ("Fields", "Path,Artists,Album"),
                ],
                ITEMS_TIMEOUT,
            )
            .await?;

        let total = response.items.len();
        let entries: Vec<LibraryEntry> = response
            .items
            .into_iter()
            .filter_map(item_to_entry)
            .collect();
        tracing::debug!(total, kept = entries.len(), "Fetched Jellyfin items");
        Ok(entries)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<T, LibraryError> {
        let response = self
            .http_client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Emby-Token", &self.api_key)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| LibraryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LibraryError::Unreachable(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LibraryError::Unreachable(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl MediaLibrary for JellyfinClient {
    async fn list_all(&self) -> Result<Vec<LibraryEntry>, LibraryError> {
        self.fetch_items().await
    }
}

fn map_item_type(item_type: &str) -> Option<ContentType> {
    match item_type {
        "Audio" => Some(ContentType::Song),
        "MusicAlbum" => Some(ContentType::Album),
        "MusicArtist" => Some(ContentType::Artist),
        _ => None,
    }
}

/// Convert an item; unknown item types are skipped.
fn item_to_entry(item: dto::Item) -> Option<LibraryEntry> {
    let content_type = item.item_type.as_deref().and_then(map_item_type)?;
    let artist = (!item.artists.is_empty()).then(|| item.artists.join(", "));

    Some(LibraryEntry {
        library_id: item.id,
        content_type,
        title: item.name.unwrap_or_default(),
        artist,
        album: item.album,
        path: item.path,
    })
}

/// Jellyfin response shapes.
mod dto {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct SystemInfo {
        pub server_name: Option<String>,
        pub version: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ItemsResponse {
        #[serde(default)]
        pub items: Vec<Item>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Item {
        pub id: String,
        pub name: Option<String>,
        #[serde(rename = "Type")]
        pub item_type: Option<String>,
        #[serde(default)]
        pub artists: Vec<String>,
        pub album: Option<String>,
        pub path: Option<String>,
    }
}
