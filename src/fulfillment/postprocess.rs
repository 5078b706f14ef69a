//! Tag + move step run on a finished download.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::model::{CanonicalMetadata, ContentType};
use crate::organizer::{self, FiledAsset};
use crate::tagging::{self, TagError};

#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error(transparent)]
    Tagging(#[from] TagError),

    #[error("cannot move {path}: {message}")]
    Move { path: PathBuf, message: String },

    #[error("post-processing task aborted: {0}")]
    Aborted(String),
}

/// Tagging and file-move capability used by the engine.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Write canonical metadata into every audio file of `artifact`.
    /// Returns how many files were tagged.
    async fn apply_tags(
        &self,
        artifact: &Path,
        metadata: &CanonicalMetadata,
        kind: ContentType,
    ) -> Result<usize, PostProcessError>;

    /// Move `artifact` to `dest_base` (extension added for single files).
    async fn move_to(&self, artifact: &Path, dest_base: &Path)
    -> Result<FiledAsset, PostProcessError>;
}

/// [`PostProcessor`] on the local filesystem: lofty tags + organizer moves.
///
/// Both steps are blocking file I/O and run on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPostProcessor;

#[async_trait]
impl PostProcessor for LocalPostProcessor {
    async fn apply_tags(
        &self,
        artifact: &Path,
        metadata: &CanonicalMetadata,
        kind: ContentType,
    ) -> Result<usize, PostProcessError> {
        let artifact = artifact.to_path_buf();
        let metadata = metadata.clone();
        let tagged = tokio::task::spawn_blocking(move || {
            tagging::apply_tags_all(&artifact, &metadata, kind)
        })
        .await
        .map_err(|e| PostProcessError::Aborted(e.to_string()))??;
        Ok(tagged)
    }

    async fn move_to(
        &self,
        artifact: &Path,
        dest_base: &Path,
    ) -> Result<FiledAsset, PostProcessError> {
        let source = artifact.to_path_buf();
        let dest_base = dest_base.to_path_buf();
        tokio::task::spawn_blocking(move || {
            organizer::file_download(&source, &dest_base).map_err(|e| PostProcessError::Move {
                path: source.clone(),
                message: e.to_string(),
            })
        })
        .await
        .map_err(|e| PostProcessError::Aborted(e.to_string()))?
    }
}
