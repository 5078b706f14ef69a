//! Adapter layer: Convert MusicBrainz DTOs to domain models
//!
//! This is the ONLY place where DTO types are converted to domain types.
//! This isolates API changes - if MusicBrainz changes their response format,
//! only this file and dto.rs need to change.

use std::collections::BTreeMap;

use super::dto;
use crate::model::CanonicalMetadata;

/// Lookups by id are exact matches.
const LOOKUP_SCORE: u8 = 100;

/// Hosts recognised as streaming links, checked in order.
const STREAMING_HOSTS: &[(&str, &[&str])] = &[
    ("qobuz", &["qobuz.com"]),
    ("deezer", &["deezer.com"]),
    ("tidal", &["tidal.com"]),
    ("spotify", &["spotify.com"]),
    ("youtube", &["youtube.com", "youtu.be"]),
    ("soundcloud", &["soundcloud.com"]),
];

/// Convert a recording (song) to canonical metadata
pub fn recording_to_metadata(recording: dto::Recording) -> CanonicalMetadata {
    let release = preferred_release(&recording.releases);
    let album = release.map(|r| r.title.clone());
    let year = release.and_then(|r| r.date.as_deref()).and_then(year_from_date);

    CanonicalMetadata {
        artist: build_artist_string(&recording.artist_credit),
        external_id: Some(recording.id),
        title: recording.title,
        album,
        year,
        score: recording.score.unwrap_or(LOOKUP_SCORE),
        streaming_links: streaming_links(&recording.relations),
    }
}

/// Convert a release group (album) to canonical metadata
pub fn release_group_to_metadata(group: dto::ReleaseGroup) -> CanonicalMetadata {
    CanonicalMetadata {
        artist: build_artist_string(&group.artist_credit),
        year: group.first_release_date.as_deref().and_then(year_from_date),
        album: Some(group.title.clone()),
        external_id: Some(group.id),
        title: group.title,
        score: group.score.unwrap_or(LOOKUP_SCORE),
        streaming_links: streaming_links(&group.relations),
    }
}

/// Convert an artist to canonical metadata; the name doubles as title
pub fn artist_to_metadata(artist: dto::Artist) -> CanonicalMetadata {
    CanonicalMetadata {
        year: artist
            .life_span
            .as_ref()
            .and_then(|span| span.begin.as_deref())
            .and_then(year_from_date),
        artist: Some(artist.name.clone()),
        external_id: Some(artist.id),
        title: artist.name,
        album: None,
        score: artist.score.unwrap_or(LOOKUP_SCORE),
        streaming_links: streaming_links(&artist.relations),
    }
}

/// Build a combined artist string from artist credits
fn build_artist_string(credits: &[dto::ArtistCredit]) -> Option<String> {
    if credits.is_empty() {
        return None;
    }

    let mut result = String::new();
    for credit in credits {
        // Use credited name if available, otherwise official name
        let name = credit.name.as_ref().unwrap_or(&credit.artist.name);
        result.push_str(name);

        if let Some(ref join) = credit.joinphrase {
            result.push_str(join);
        }
    }

    Some(result)
}

/// Prefer official album releases over singles/bootlegs
fn preferred_release(releases: &[dto::Release]) -> Option<&dto::Release> {
    releases
        .iter()
        .find(|r| {
            r.status.as_deref() == Some("Official")
                && r.release_group
                    .as_ref()
                    .and_then(|rg| rg.primary_type.as_deref())
                    == Some("Album")
        })
        .or_else(|| {
            releases
                .iter()
                .find(|r| r.status.as_deref() == Some("Official"))
        })
        .or_else(|| releases.first())
}

/// Parse year from YYYY, YYYY-MM, or YYYY-MM-DD
fn year_from_date(date: &str) -> Option<i32> {
    date.split('-').next().and_then(|y| y.parse().ok())
}

/// Streaming service links among URL relations, keyed by service name
fn streaming_links(relations: &[dto::Relation]) -> BTreeMap<String, String> {
    let mut links = BTreeMap::new();

    for url in relations.iter().filter_map(|r| r.url.as_ref()) {
        let lower = url.resource.to_lowercase();
        if let Some((service, _)) = STREAMING_HOSTS
            .iter()
            .find(|(_, hosts)| hosts.iter().any(|host| lower.contains(host)))
        {
            links.insert(service.to_string(), url.resource.clone());
        }
    }

    links
}
