//! Tag writing for downloaded audio.
//!
//! Uses the lofty crate for format-independent tag access. Canonical
//! metadata is written into every audio file of a download: per-track
//! fields for songs, release-level fields for albums and artists.

use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt};

use crate::model::{CanonicalMetadata, ContentType};
use crate::scanner;

#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("cannot read tags from {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("cannot write tags to {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Write canonical metadata into one audio file.
///
/// Returns the number of fields written.
pub fn apply_tags(
    path: &Path,
    metadata: &CanonicalMetadata,
    kind: ContentType,
) -> Result<usize, TagError> {
    let read_err = |message: String| TagError::Read {
        path: path.to_path_buf(),
        message,
    };

    let mut tagged_file = Probe::open(path)
        .map_err(|e| read_err(e.to_string()))?
        .read()
        .map_err(|e| read_err(e.to_string()))?;

    // Get the primary tag type for this format, or create one
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| read_err(format!("no {tag_type:?} tag available")))?;

    let mut fields = 0;

    // Albums and artists span many tracks; keep each track's own title
    if kind == ContentType::Song {
        tag.set_title(metadata.title.clone());
        fields += 1;
    }

    if let Some(ref artist) = metadata.artist {
        tag.set_artist(artist.clone());
        fields += 1;
    }

    if let Some(ref album) = metadata.album {
        tag.set_album(album.clone());
        fields += 1;
    }

    if let Some(year) = metadata.year.and_then(|y| u32::try_from(y).ok()) {
        tag.set_year(year);
        fields += 1;
    }

    if let Some(ref id) = metadata.external_id {
        let key = match kind {
            ContentType::Song => ItemKey::MusicBrainzRecordingId,
            ContentType::Album => ItemKey::MusicBrainzReleaseGroupId,
            ContentType::Artist => ItemKey::MusicBrainzArtistId,
        };
        if tag.insert_text(key, id.clone()) {
            fields += 1;
        }
    }

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| TagError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(fields)
}

/// Tag every audio file at `path` (a single file or a download directory).
///
/// Returns how many files were tagged. Stops at the first failure.
pub fn apply_tags_all(
    path: &Path,
    metadata: &CanonicalMetadata,
    kind: ContentType,
) -> Result<usize, TagError> {
    let files = if path.is_dir() {
        scanner::audio_files(path)
    } else {
        vec![path.to_path_buf()]
    };

    for file in &files {
        let fields = apply_tags(file, metadata, kind)?;
        tracing::debug!(file = %file.display(), fields, "Tagged");
    }

    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Minimal 16-bit mono PCM WAV.
    fn write_wav(path: &Path) {
        let samples = 800u32;
        let data_len = samples * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&8000u32.to_le_bytes());
        bytes.extend_from_slice(&16000u32.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(bytes.len() + data_len as usize, 0);
        std::fs::write(path, bytes).unwrap();
    }

    fn metadata() -> CanonicalMetadata {
        CanonicalMetadata {
            external_id: Some("rec-123".to_string()),
            title: "Test Song".to_string(),
            artist: Some("Test Artist".to_string()),
            album: Some("Test Album".to_string()),
            year: Some(1999),
            ..Default::default()
        }
    }

    #[test]
    fn test_non_audio_file_returns_error() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "This is just some text, not music.").expect("Failed to write");

        let result = apply_tags(file.path(), &metadata(), ContentType::Song);
        assert!(matches!(result, Err(TagError::Read { .. })));
    }

    #[test]
    fn test_song_tags_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        write_wav(&path);

        let fields = apply_tags(&path, &metadata(), ContentType::Song).unwrap();
        assert!(fields >= 4);

        let tagged = Probe::open(&path).unwrap().read().unwrap();
        let tag = tagged.primary_tag().unwrap();
        assert_eq!(tag.title().as_deref(), Some("Test Song"));
        assert_eq!(tag.artist().as_deref(), Some("Test Artist"));
        assert_eq!(tag.album().as_deref(), Some("Test Album"));
    }

    #[test]
    fn test_album_keeps_track_titles() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("01.wav"));
        write_wav(&dir.path().join("02.wav"));
        std::fs::write(dir.path().join("cover.jpg"), b"not audio").unwrap();

        let tagged = apply_tags_all(dir.path(), &metadata(), ContentType::Album).unwrap();
        assert_eq!(tagged, 2);

        let file = Probe::open(dir.path().join("01.wav")).unwrap().read().unwrap();
        let tag = file.primary_tag().unwrap();
        assert!(tag.title().is_none());
        assert_eq!(tag.album().as_deref(), Some("Test Album"));
    }
}
