//! [`StreamingService`] backed by the streamrip `rip` command line tool.
//!
//! One instance per service (qobuz, deezer, ...). Credentials live in the
//! streamrip config file; this module only passes its path along.
//!
//! - search: `rip search --output-file <json> <service> <media> <query>`
//! - fetch: `rip --folder <dir> --quality <q> --no-db id <service> <media> <id>`

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{DownloadError, ServiceError, StreamingService};
use crate::config::StreamingConfig;
use crate::model::{ContentType, SourceCandidate, StreamingServiceKind};

static SEARCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Longest stderr excerpt kept in an error message.
const STDERR_TAIL: usize = 500;

pub struct StreamripService {
    kind: StreamingServiceKind,
    binary: String,
    config_path: Option<PathBuf>,
    search_limit: u32,
    scratch_dir: PathBuf,
}

impl StreamripService {
    /// `scratch_dir` holds short-lived search result files.
    pub fn new(kind: StreamingServiceKind, config: &StreamingConfig, scratch_dir: &Path) -> Self {
        Self {
            kind,
            binary: config.rip_binary.clone(),
            config_path: config.streamrip_config.clone(),
            search_limit: config.search_limit,
            scratch_dir: scratch_dir.to_path_buf(),
        }
    }

    /// One service per entry of `config.service_order`.
    pub fn from_config(config: &StreamingConfig, scratch_dir: &Path) -> Vec<Self> {
        config
            .service_order
            .iter()
            .map(|kind| Self::new(*kind, config, scratch_dir))
            .collect()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(config_path) = &self.config_path {
            cmd.arg("--config-path").arg(config_path);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn search_args(&self, output: &Path, kind: ContentType, query: &str) -> Vec<OsString> {
        vec![
            "search".into(),
            "--output-file".into(),
            output.into(),
            "--num-results".into(),
            self.search_limit.to_string().into(),
            self.kind.as_str().into(),
            media_type(kind).into(),
            query.into(),
        ]
    }

    fn fetch_args(&self, dest_dir: &Path, quality: u8, kind: ContentType, id: &str) -> Vec<OsString> {
        vec![
            "--folder".into(),
            dest_dir.into(),
            "--quality".into(),
            quality.to_string().into(),
            "--no-db".into(),
            "id".into(),
            self.kind.as_str().into(),
            media_type(kind).into(),
            id.into(),
        ]
    }
}

#[async_trait]
impl StreamingService for StreamripService {
    fn kind(&self) -> StreamingServiceKind {
        self.kind
    }

    async fn search(
        &self,
        title: &str,
        artist: Option<&str>,
        kind: ContentType,
    ) -> Result<Vec<SourceCandidate>, ServiceError> {
        let query = match artist {
            Some(artist) => format!("{title} {artist}"),
            None => title.to_string(),
        };

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| ServiceError::new(self.kind, format!("scratch dir: {e}")))?;
        let output_file = self.scratch_dir.join(format!(
            "search-{}-{}-{}.json",
            self.kind,
            std::process::id(),
            SEARCH_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let output = self
            .command()
            .args(self.search_args(&output_file, kind, &query))
            .output()
            .await
            .map_err(|e| ServiceError::new(self.kind, format!("failed to start {}: {e}", self.binary)))?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&output_file).await;
            return Err(ServiceError::new(
                self.kind,
                failure_message(&output.status, &output.stderr),
            ));
        }

        // rip writes nothing when there are no results
        let json = match tokio::fs::read_to_string(&output_file).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ServiceError::new(self.kind, e.to_string())),
        };
        let _ = tokio::fs::remove_file(&output_file).await;

        let mut candidates = parse_search_results(self.kind, &json)
            .map_err(|e| ServiceError::new(self.kind, format!("malformed search output: {e}")))?;
        candidates.truncate(self.search_limit as usize);
        tracing::debug!(service = %self.kind, %query, count = candidates.len(), "rip search");
        Ok(candidates)
    }

    async fn fetch(
        &self,
        candidate: &SourceCandidate,
        kind: ContentType,
        quality: u8,
        dest_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(dest_dir).await?;

        tracing::info!(
            service = %self.kind,
            source_id = %candidate.source_id,
            quality,
            dest = %dest_dir.display(),
            "Starting download"
        );

        let output = self
            .command()
            .args(self.fetch_args(dest_dir, quality, kind, &candidate.source_id))
            .output()
            .await
            .map_err(|e| DownloadError::Failed(format!("failed to start {}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(DownloadError::Failed(failure_message(
                &output.status,
                &output.stderr,
            )));
        }

        Ok(dest_dir.to_path_buf())
    }
}

fn media_type(kind: ContentType) -> &'static str {
    match kind {
        ContentType::Song => "track",
        ContentType::Album => "album",
        ContentType::Artist => "artist",
    }
}

/// Exit status plus the tail of stderr.
fn failure_message(status: &std::process::ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return format!("rip exited with {status}");
    }
    let start = stderr
        .char_indices()
        .rev()
        .nth(STDERR_TAIL - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!("rip exited with {status}: {}", &stderr[start..])
}

/// One entry of `rip search --output-file`.
#[derive(Debug, Deserialize)]
struct SearchHit {
    id: serde_json::Value,
    desc: Option<String>,
}

fn parse_search_results(
    service: StreamingServiceKind,
    json: &str,
) -> Result<Vec<SourceCandidate>, serde_json::Error> {
    let hits: Vec<SearchHit> = serde_json::from_str(json)?;

    Ok(hits
        .into_iter()
        .filter_map(|hit| {
            let source_id = match hit.id {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let (title, artist) = split_description(hit.desc.as_deref().unwrap_or_default());
            Some(SourceCandidate {
                service,
                source_id,
                title,
                artist,
                album: None,
                quality: 0,
                duration: None,
                cover_url: None,
            })
        })
        .collect())
}

/// `"Title by Artist"` into its parts.
fn split_description(desc: &str) -> (String, Option<String>) {
    match desc.rsplit_once(" by ") {
        Some((title, artist)) if !artist.trim().is_empty() => {
            (title.trim().to_string(), Some(artist.trim().to_string()))
        }
        _ => (desc.trim().to_string(), None),
    }
}
