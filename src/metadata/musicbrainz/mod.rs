//! MusicBrainz API integration
//!
//! Implements [`MetadataCatalog`](crate::metadata::MetadataCatalog) over the
//! MusicBrainz web service: searches and lookups for recordings, release
//! groups and artists.
//!
//! API docs: https://musicbrainz.org/doc/MusicBrainz_API

pub mod dto;
mod adapter;
mod client;

pub use client::MusicBrainzClient;
