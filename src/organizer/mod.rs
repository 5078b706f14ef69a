//! File organization for finished downloads.
//!
//! Builds a destination under the output root from a naming pattern like
//! `{artist}/{album}/{title}` and moves a download there.
//!
//! # Features
//! - Pattern placeholders: `{artist}`, `{title}`, `{album}`
//! - Every value sanitized into a single safe path component
//! - Single-file downloads keep their extension; multi-file downloads move
//!   as a directory
//! - Cross-device moves fall back to copy + delete

use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result, ResultExt};
use crate::model::CanonicalMetadata;
use crate::scanner;

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNTITLED: &str = "Untitled";

/// Where a download ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiledAsset {
    pub path: PathBuf,
    /// Total bytes (sum over all files for a directory)
    pub size: u64,
}

/// Destination for `metadata` under `output_root`, without extension.
///
/// Missing artist becomes "Unknown Artist", missing album an empty string.
/// Empty segments and `.`/`..` are dropped so the result always stays
/// under `output_root`.
pub fn build_destination(pattern: &str, metadata: &CanonicalMetadata, output_root: &Path) -> PathBuf {
    let artist = metadata
        .artist
        .as_deref()
        .map(sanitize_component)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album = metadata.album.as_deref().map(sanitize_component).unwrap_or_default();
    let title = Some(sanitize_component(&metadata.title))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let relative = pattern
        .replace("{artist}", &artist)
        .replace("{album}", &album)
        .replace("{title}", &title);

    let mut dest = output_root.to_path_buf();
    let mut pushed = false;
    for segment in relative.split(['/', '\\']) {
        let segment = segment.trim_matches(|c: char| c == ' ' || c == '.');
        if segment.is_empty() {
            continue;
        }
        // A segment with a drive prefix or root would escape output_root
        if !matches!(Path::new(segment).components().next(), Some(Component::Normal(_))) {
            continue;
        }
        dest.push(segment);
        pushed = true;
    }
    if !pushed {
        dest.push(title);
    }
    dest
}

/// Turn a metadata value into a single safe path component.
///
/// Drops `<>:"|?*` and control characters, replaces path separators with
/// `_`, trims spaces and dots from both ends.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') && !c.is_control())
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    cleaned.trim_matches(|c: char| c == ' ' || c == '.').to_string()
}

/// Move a download artifact to `dest_base`.
///
/// If `artifact` holds exactly one audio file, that file moves to
/// `dest_base` plus its extension; otherwise the whole artifact moves as a
/// directory. Existing destinations are never overwritten: a ` (n)` suffix
/// is added instead.
pub fn file_download(artifact: &Path, dest_base: &Path) -> Result<FiledAsset> {
    let audio = scanner::audio_files(artifact);
    if audio.is_empty() {
        return Err(Error::invalid_input(format!(
            "no audio files in {}",
            artifact.display()
        )));
    }

    let (source, ext) = if audio.len() == 1 {
        let source = audio[0].clone();
        let ext = source.extension().map(|e| e.to_os_string());
        (source, ext)
    } else {
        (artifact.to_path_buf(), None)
    };

    let destination = unique_path(dest_base, ext.as_deref());
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).with_context(format!("creating {}", parent.display()))?;
    }

    move_path(&source, &destination)?;

    let size = scanner::total_size(&destination);
    tracing::info!(
        from = %source.display(),
        to = %destination.display(),
        size,
        "Filed download"
    );
    Ok(FiledAsset {
        path: destination,
        size,
    })
}

/// `base.ext`, or `base (2).ext`, `base (3).ext`, ... whichever does not
/// exist yet.
fn unique_path(base: &Path, ext: Option<&OsStr>) -> PathBuf {
    let candidate = |suffix: &str| {
        let mut name = base.as_os_str().to_os_string();
        name.push(suffix);
        if let Some(ext) = ext {
            name.push(".");
            name.push(ext);
        }
        PathBuf::from(name)
    };

    let first = candidate("");
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| candidate(&format!(" ({n})")))
        .find(|path| !path.exists())
        .unwrap_or(first)
}

/// Rename, falling back to copy + delete (cross-device).
fn move_path(source: &Path, destination: &Path) -> Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    if source.is_dir() {
        copy_dir(source, destination)?;
        fs::remove_dir_all(source)
            .with_context(format!("removing {}", source.display()))?;
    } else {
        fs::copy(source, destination)
            .with_context(format!("copying to {}", destination.display()))?;
        fs::remove_file(source).with_context(format!("removing {}", source.display()))?;
    }
    Ok(())
}

fn copy_dir(source: &Path, destination: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::invalid_input(e.to_string()))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(format!("creating {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(format!("copying to {}", target.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn metadata(title: &str, artist: Option<&str>, album: Option<&str>) -> CanonicalMetadata {
        CanonicalMetadata {
            title: title.to_string(),
            artist: artist.map(String::from),
            album: album.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("AC/DC"), "AC_DC");
        assert_eq!(sanitize_component("Track: Title"), "Track Title");
        assert_eq!(sanitize_component("What?"), "What");
        assert_eq!(sanitize_component("a<b>c"), "abc");
        assert_eq!(sanitize_component(" ...Dots... "), "Dots");
        assert_eq!(sanitize_component("Valid Name"), "Valid Name");
    }

    #[test]
    fn test_default_pattern() {
        let dest = build_destination(
            "{artist}/{artist} - {title}",
            &metadata("Test Song", Some("Test Artist"), None),
            Path::new("/music"),
        );
        assert_eq!(dest, PathBuf::from("/music/Test Artist/Test Artist - Test Song"));
    }

    #[test]
    fn test_missing_artist_and_album() {
        let dest = build_destination(
            "{artist}/{album}/{title}",
            &metadata("Song", None, None),
            Path::new("/music"),
        );
        assert_eq!(dest, PathBuf::from("/music/Unknown Artist/Song"));
    }

    #[test]
    fn test_traversal_in_values_stays_under_root() {
        let dest = build_destination(
            "{artist}/{title}",
            &metadata("../../etc/passwd", Some(".."), None),
            Path::new("/music"),
        );
        assert!(dest.starts_with("/music"));
        assert!(!dest.components().any(|c| c == Component::ParentDir));
    }

    #[test]
    fn test_single_file_keeps_extension() {
        let temp = tempdir().unwrap();
        let artifact = temp.path().join("request_1");
        fs::create_dir_all(artifact.join("Some Album")).unwrap();
        fs::write(artifact.join("Some Album").join("01. Song.flac"), b"flac data").unwrap();
        fs::write(artifact.join("cover.jpg"), b"jpg").unwrap();

        let dest_base = temp.path().join("out").join("Artist").join("Artist - Song");
        let filed = file_download(&artifact, &dest_base).unwrap();

        assert_eq!(filed.path, temp.path().join("out/Artist/Artist - Song.flac"));
        assert_eq!(fs::read(&filed.path).unwrap(), b"flac data");
        assert_eq!(filed.size, 9);
        assert!(!artifact.join("Some Album").join("01. Song.flac").exists());
    }

    #[test]
    fn test_dotted_name_keeps_full_base() {
        let temp = tempdir().unwrap();
        let base = temp.path().join("Mr. Brightside");
        assert_eq!(
            unique_path(&base, Some(OsStr::new("mp3"))),
            temp.path().join("Mr. Brightside.mp3")
        );

        fs::write(temp.path().join("Mr. Brightside.mp3"), b"x").unwrap();
        assert_eq!(
            unique_path(&base, Some(OsStr::new("mp3"))),
            temp.path().join("Mr. Brightside (2).mp3")
        );
    }

    #[test]
    fn test_multi_file_moves_directory() {
        let temp = tempdir().unwrap();
        let artifact = temp.path().join("request_2");
        fs::create_dir_all(&artifact).unwrap();
        fs::write(artifact.join("01.flac"), b"one").unwrap();
        fs::write(artifact.join("02.flac"), b"two").unwrap();

        let dest_base = temp.path().join("out").join("Artist").join("Album");
        let filed = file_download(&artifact, &dest_base).unwrap();

        assert_eq!(filed.path, dest_base);
        assert!(dest_base.join("01.flac").exists());
        assert!(dest_base.join("02.flac").exists());
        assert_eq!(filed.size, 6);
        assert!(!artifact.exists());
    }

    #[test]
    fn test_existing_destination_not_overwritten() {
        let temp = tempdir().unwrap();
        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("Song.mp3"), b"old").unwrap();

        let artifact = temp.path().join("request_3");
        fs::create_dir_all(&artifact).unwrap();
        fs::write(artifact.join("track.mp3"), b"new").unwrap();

        let filed = file_download(&artifact, &out.join("Song")).unwrap();

        assert_eq!(filed.path, out.join("Song (2).mp3"));
        assert_eq!(fs::read(out.join("Song.mp3")).unwrap(), b"old");
    }

    #[test]
    fn test_empty_artifact_is_error() {
        let temp = tempdir().unwrap();
        let result = file_download(temp.path(), &temp.path().join("dest"));
        assert!(result.is_err());
    }

    #[test]
    fn test_copy_dir_fallback() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("src");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("nested").join("a.flac"), b"a").unwrap();

        let dest = temp.path().join("copy");
        copy_dir(&source, &dest).unwrap();

        assert_eq!(fs::read(dest.join("nested").join("a.flac")).unwrap(), b"a");
    }
}
