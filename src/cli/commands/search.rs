//! Metadata and streaming catalog search commands.

use tokio::runtime::Runtime;

use super::{metadata_resolver, source_locator};
use crate::config::Config;
use crate::metadata::MetadataQuery;
use crate::model::ContentType;

/// Search MusicBrainz and print candidates best first
pub fn cmd_search_metadata(
    rt: &Runtime,
    config: &Config,
    query: &str,
    artist: Option<&str>,
    kind: ContentType,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let resolver = metadata_resolver(config)?;
        let query = match artist {
            Some(_) => MetadataQuery::fielded(query, artist),
            None => MetadataQuery::text(query),
        };
        let records = resolver.resolve(&query, kind).await?;

        if records.is_empty() {
            println!("No matches.");
            return Ok(());
        }
        for record in &records {
            let year = record.year.map(|y| format!(" [{y}]")).unwrap_or_default();
            let album = record
                .album
                .as_deref()
                .map(|a| format!(" ({a})"))
                .unwrap_or_default();
            println!(
                "{:>3}  {} - {}{}{}",
                record.score,
                record.artist.as_deref().unwrap_or("Unknown Artist"),
                record.title,
                album,
                year
            );
            if let Some(id) = &record.external_id {
                println!("     id: {}", id);
            }
            for (service, url) in &record.streaming_links {
                println!("     {}: {}", service, url);
            }
        }
        Ok(())
    })
}

/// Search every configured streaming service concurrently
pub fn cmd_search_streaming(
    rt: &Runtime,
    config: &Config,
    query: &str,
    kind: ContentType,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let locator = source_locator(config);
        for search in locator.search_all(query, kind).await {
            match search.result {
                Ok(candidates) => {
                    println!("{} ({} results)", search.service, candidates.len());
                    for candidate in candidates {
                        println!(
                            "  {:<12} {}{}",
                            candidate.source_id,
                            candidate.title,
                            candidate
                                .artist
                                .as_deref()
                                .map(|a| format!(" - {a}"))
                                .unwrap_or_default()
                        );
                    }
                }
                Err(e) => println!("{}: error: {}", search.service, e.message),
            }
        }
        Ok(())
    })
}
