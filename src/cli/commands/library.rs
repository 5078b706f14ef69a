//! Library cache commands.

use tokio::runtime::Runtime;

use super::{library_source, open_db};
use crate::config::Config;
use crate::library::jellyfin::JellyfinClient;
use crate::library::{LibraryIndex, SEARCH_LIMIT};
use crate::model::ContentType;

/// Refresh the library cache from Jellyfin
pub fn cmd_sync_library(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let source = library_source(config)?
            .ok_or_else(|| anyhow::anyhow!("Jellyfin is not configured (set JELLYFIN_URL and JELLYFIN_API_KEY)"))?;
        let index = LibraryIndex::load(open_db(config).await?, Some(source)).await?;

        println!("Syncing library...");
        let summary = index.refresh().await?;
        println!(
            "Library synced: {} entries ({} duplicates skipped) at {}",
            summary.entries,
            summary.duplicates,
            summary.synced_at.to_rfc3339()
        );
        Ok(())
    })
}

/// Check the Jellyfin connection
pub fn cmd_test_jellyfin(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let client = JellyfinClient::from_config(&config.jellyfin)?;
        let info = client.test_connection().await?;
        println!(
            "Connected to {} (Jellyfin {})",
            info.server_name.as_deref().unwrap_or("unnamed server"),
            info.version.as_deref().unwrap_or("unknown version")
        );
        Ok(())
    })
}

/// Search the cached library snapshot
pub fn cmd_search_library(
    rt: &Runtime,
    config: &Config,
    query: &str,
    kind: Option<ContentType>,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let index = LibraryIndex::load(open_db(config).await?, None).await?;
        match index.synced_at() {
            Some(at) => println!("Library snapshot from {} ({} entries)", at.to_rfc3339(), index.len()),
            None => println!("Library has never been synced; run sync-library first."),
        }

        let hits = index.search(query, kind);
        if hits.is_empty() {
            println!("No matches.");
        }
        for entry in &hits {
            println!(
                "  [{}] {} - {}{}",
                entry.content_type,
                entry.artist.as_deref().unwrap_or("Unknown Artist"),
                entry.title,
                entry
                    .album
                    .as_deref()
                    .map(|a| format!(" ({a})"))
                    .unwrap_or_default()
            );
        }
        if hits.len() == SEARCH_LIMIT {
            println!("  ... showing the first {} matches", SEARCH_LIMIT);
        }
        Ok(())
    })
}
