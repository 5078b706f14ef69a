//! Request fulfillment state machine.
//!
//! [`FulfillmentEngine::process`] drives one request through
//! `pending -> searching -> downloading -> processing -> completed`,
//! committing each status to the [`RequestStore`] before starting the next
//! step. Step failures never escape as `Err`: they land on the request as a
//! `failed` status with a reason and a retryable flag. Only persistence
//! errors and unknown ids are returned to the caller.
//!
//! The `pending -> searching` step takes a claim in the store, so two
//! engines (say, two CLI invocations) never run the same request at once.
//! [`FulfillmentEngine::recover_interrupted`] only fails requests whose
//! claim stopped heartbeating for longer than the lease.

mod guard;
pub mod notify;
pub mod postprocess;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub use guard::{Heartbeat, InFlight, InFlightGuard, instance_id};
pub use notify::{BroadcastSink, FanOut, StatusChanged, StatusSink, TracingSink};
pub use postprocess::{LocalPostProcessor, PostProcessError, PostProcessor};

use crate::config::Config;
use crate::db::{RequestStore, TransitionUpdate};
use crate::error::{Error, Result};
use crate::library::LibraryIndex;
use crate::metadata::{MetadataError, MetadataQuery, MetadataResolver};
use crate::model::{
    CanonicalMetadata, ContentType, LibraryEntry, NewRequest, Request, RequestStatus,
    SourceCandidate,
};
use crate::organizer;
use crate::scanner;
use crate::sources::{DownloadError, SourceLocator, StreamingService};

const INTERRUPTED_REASON: &str = "interrupted before completion";
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// Engine knobs taken from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub quality: u8,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub path_pattern: String,
    pub tag_files: bool,
    /// How long a claim survives without a heartbeat
    pub claim_lease: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            quality: config.streaming.quality,
            temp_dir: config.paths.temp_dir.clone(),
            output_dir: config.paths.output_dir.clone(),
            path_pattern: config.paths.path_pattern.clone(),
            tag_files: config.processing.tag_files,
            claim_lease: Duration::from_secs(config.processing.claim_lease_secs),
        }
    }

    /// Scratch directory for one request's download.
    pub fn artifact_dir(&self, request_id: i64) -> PathBuf {
        self.temp_dir.join(format!("request_{request_id}"))
    }

    fn heartbeat_period(&self) -> Duration {
        (self.claim_lease / 3).max(MIN_HEARTBEAT)
    }

    /// Claims that last heartbeated before this are considered abandoned.
    fn stale_cutoff(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.claim_lease)
            .ok()
            .and_then(|lease| Utc::now().checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Result of a `process` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Already in the library; no streaming service was contacted.
    Available(LibraryEntry),
    Completed(Request),
    /// The attempt ended in `failed`; reason and retryable flag are on the request.
    Failed(Request),
    /// Another attempt holds this request.
    AlreadyInProgress,
    /// Terminal request, left untouched.
    NoOp(RequestStatus),
    /// This attempt lost its claim midway (lease expired and the request
    /// was recovered); it stopped without writing anything further.
    Superseded(RequestStatus),
}

/// A freshly created request, plus the library entry if it was already there.
#[derive(Debug, Clone)]
pub struct CreatedRequest {
    pub request: Request,
    pub library_match: Option<LibraryEntry>,
}

/// Source chosen for a download, plus the service that will fetch it.
struct BoundSource {
    service: Arc<dyn StreamingService>,
    candidate: SourceCandidate,
}

pub struct FulfillmentEngine {
    store: RequestStore,
    library: Arc<LibraryIndex>,
    resolver: MetadataResolver,
    locator: SourceLocator,
    post: Arc<dyn PostProcessor>,
    sink: Arc<dyn StatusSink>,
    settings: EngineSettings,
    in_flight: InFlight,
    instance: String,
}

impl FulfillmentEngine {
    pub fn new(
        store: RequestStore,
        library: Arc<LibraryIndex>,
        resolver: MetadataResolver,
        locator: SourceLocator,
        post: Arc<dyn PostProcessor>,
        sink: Arc<dyn StatusSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            library,
            resolver,
            locator,
            post,
            sink,
            settings,
            in_flight: InFlight::new(),
            instance: instance_id(),
        }
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    pub fn library(&self) -> &LibraryIndex {
        &self.library
    }

    pub fn locator(&self) -> &SourceLocator {
        &self.locator
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Identifier this engine writes into its claims.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Validate and store a new request.
    ///
    /// If the library already has it (authoritative match), the request goes
    /// straight to `available`.
    pub async fn create_request(&self, new: NewRequest) -> Result<CreatedRequest> {
        let new = validate_new_request(new)?;
        let content_type = new.content_type.unwrap_or(ContentType::Song);

        let request = self.store.insert(&new, content_type).await?;
        tracing::info!(
            request_id = request.id,
            owner = %request.owner,
            %content_type,
            title = %request.title,
            artist = ?request.artist,
            "Request created"
        );

        match self.check_library(&request) {
            Some(entry) => {
                let request = self
                    .transition(&request, RequestStatus::Available, TransitionUpdate::default())
                    .await?;
                Ok(CreatedRequest {
                    request,
                    library_match: Some(entry),
                })
            }
            None => Ok(CreatedRequest {
                request,
                library_match: None,
            }),
        }
    }

    pub async fn get_request(&self, id: i64) -> Result<Request> {
        self.store.get(id).await?.ok_or(Error::RequestNotFound(id))
    }

    /// Run one fulfillment attempt for `id`.
    ///
    /// A terminal request is left alone; a request with a running attempt
    /// (here or in another process) reports
    /// [`ProcessOutcome::AlreadyInProgress`]. A `failed` request is retried
    /// (`failed -> pending`) before the normal flow.
    pub async fn process(&self, id: i64) -> Result<ProcessOutcome> {
        let Some(_guard) = self.in_flight.try_acquire(id) else {
            tracing::info!(request_id = id, "Fulfillment already in progress");
            return Ok(ProcessOutcome::AlreadyInProgress);
        };

        let mut request = self.get_request(id).await?;

        if request.status.is_terminal() {
            tracing::debug!(request_id = id, status = %request.status, "Nothing to do");
            return Ok(ProcessOutcome::NoOp(request.status));
        }
        if request.status.is_in_progress() {
            tracing::info!(
                request_id = id,
                status = %request.status,
                holder = ?request.claimed_by,
                "Request is claimed by another attempt"
            );
            return Ok(ProcessOutcome::AlreadyInProgress);
        }
        if request.status == RequestStatus::Failed {
            tracing::info!(request_id = id, reason = ?request.failure_reason, "Retrying request");
            request = match self
                .transition(&request, RequestStatus::Pending, TransitionUpdate::default())
                .await
            {
                Ok(request) => request,
                Err(Error::InvalidTransition { .. }) => return self.lost_race(id).await,
                Err(e) => return Err(e),
            };
        }

        if let Some(entry) = self.check_library(&request) {
            return match self
                .transition(&request, RequestStatus::Available, TransitionUpdate::default())
                .await
            {
                Ok(_) => Ok(ProcessOutcome::Available(entry)),
                Err(Error::InvalidTransition { .. }) => self.lost_race(id).await,
                Err(e) => Err(e),
            };
        }

        let Some(claimed) = self.store.claim(id, &self.instance).await? else {
            return self.lost_race(id).await;
        };
        self.sink.emit(StatusChanged::new(request.status, &claimed));
        let _heartbeat = Heartbeat::start(
            self.store.clone(),
            id,
            self.instance.clone(),
            self.settings.heartbeat_period(),
        );

        match self.run_pipeline(claimed).await {
            Err(Error::InvalidTransition { from, .. }) => {
                tracing::warn!(request_id = id, status = %from, "Claim lost, attempt abandoned");
                Ok(ProcessOutcome::Superseded(from))
            }
            other => other,
        }
    }

    /// Outcome for a request another writer got to first.
    async fn lost_race(&self, id: i64) -> Result<ProcessOutcome> {
        let current = self.get_request(id).await?;
        tracing::info!(request_id = id, status = %current.status, "Request taken by another attempt");
        if current.status.is_terminal() {
            Ok(ProcessOutcome::NoOp(current.status))
        } else {
            Ok(ProcessOutcome::AlreadyInProgress)
        }
    }

    /// Process every `pending` request, oldest first.
    pub async fn process_pending(&self) -> Result<Vec<(i64, ProcessOutcome)>> {
        let pending = self.store.list_by_status(RequestStatus::Pending).await?;
        tracing::info!(count = pending.len(), "Processing pending requests");

        let mut outcomes = Vec::with_capacity(pending.len());
        for request in pending {
            let outcome = self.process(request.id).await?;
            outcomes.push((request.id, outcome));
        }
        Ok(outcomes)
    }

    /// Fail every `searching`/`downloading`/`processing` request whose
    /// claim went quiet for longer than the lease, so it can be
    /// re-triggered.
    ///
    /// Requests held by a live attempt (in this process or another one) are
    /// left alone.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let cutoff = self.settings.stale_cutoff();
        let mut recovered = 0;
        for status in [
            RequestStatus::Searching,
            RequestStatus::Downloading,
            RequestStatus::Processing,
        ] {
            for request in self.store.list_by_status(status).await? {
                if self.in_flight.contains(request.id) {
                    continue;
                }
                match self
                    .store
                    .fail_stale_claim(request.id, status, cutoff, INTERRUPTED_REASON)
                    .await?
                {
                    Some(updated) => {
                        self.sink.emit(StatusChanged::new(status, &updated));
                        recovered += 1;
                    }
                    None => tracing::debug!(
                        request_id = request.id,
                        holder = ?request.claimed_by,
                        "Claim still live"
                    ),
                }
            }
        }
        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered interrupted requests");
        }
        Ok(recovered)
    }

    /// `pending -> searching -> downloading -> processing -> completed`.
    async fn run_pipeline(&self, request: Request) -> Result<ProcessOutcome> {
        let kind = request.content_type;

        let metadata = match self.canonical_metadata(&request).await {
            Ok(metadata) => metadata,
            Err(e) => {
                return self
                    .fail(&request, format!("metadata lookup failed: {e}"), e.is_retryable())
                    .await;
            }
        };

        let bound = match self.bind_source(&request, &metadata).await {
            Ok(bound) => bound,
            Err((reason, retryable)) => return self.fail(&request, reason, retryable).await,
        };

        let request = self
            .transition(
                &request,
                RequestStatus::Downloading,
                TransitionUpdate {
                    source: Some((bound.candidate.service, bound.candidate.source_id.clone())),
                    ..Default::default()
                },
            )
            .await?;

        let artifact_dir = self.settings.artifact_dir(request.id);
        let artifact = match self.download(&bound, kind, &artifact_dir).await {
            Ok(artifact) => artifact,
            Err(e) => {
                return self
                    .fail(&request, format!("download failed: {e}"), false)
                    .await;
            }
        };

        let request = self
            .transition(
                &request,
                RequestStatus::Processing,
                TransitionUpdate {
                    download_path: Some(artifact.display().to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let filed = match self.post_process(&artifact, &metadata, kind).await {
            Ok(filed) => filed,
            Err(e) => {
                tracing::warn!(
                    request_id = request.id,
                    artifact = %artifact.display(),
                    "Download kept in temp area"
                );
                return self
                    .fail(&request, format!("post-processing failed: {e}"), false)
                    .await;
            }
        };

        let request = self
            .transition(
                &request,
                RequestStatus::Completed,
                TransitionUpdate {
                    download_path: Some(filed.path.display().to_string()),
                    file_size: Some(i64::try_from(filed.size).unwrap_or(i64::MAX)),
                    completed: true,
                    ..Default::default()
                },
            )
            .await?;

        if artifact_dir.exists()
            && let Err(e) = tokio::fs::remove_dir_all(&artifact_dir).await
        {
            tracing::debug!(error = %e, dir = %artifact_dir.display(), "Temp cleanup failed");
        }

        Ok(ProcessOutcome::Completed(request))
    }

    /// Authoritative library hit for a request, if any.
    ///
    /// Artist requests match on the name alone: library artist entries
    /// carry no artist field of their own.
    fn check_library(&self, request: &Request) -> Option<LibraryEntry> {
        let artist = match request.content_type {
            ContentType::Artist => None,
            _ => request.artist.as_deref(),
        };
        let result = self
            .library
            .find_match(&request.title, artist, request.album.as_deref());
        if result.found {
            tracing::info!(request_id = request.id, "Already in library");
            return result.entry;
        }
        if let Some(advisory) = result.advisory {
            tracing::debug!(
                request_id = request.id,
                library_id = %advisory.library_id,
                "Partial library hit ignored"
            );
        }
        None
    }

    /// Catalog record for a request, falling back to what the user typed
    /// when the catalog knows nothing.
    async fn canonical_metadata(
        &self,
        request: &Request,
    ) -> std::result::Result<CanonicalMetadata, MetadataError> {
        let kind = request.content_type;
        let resolved = match request.external_id.as_deref() {
            Some(id) => match self.resolver.resolve_by_id(id, kind).await {
                Ok(record) => Some(record),
                Err(MetadataError::NotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => {
                let query = MetadataQuery::fielded(request.title.clone(), request.artist.as_deref());
                self.resolver.resolve(&query, kind).await?.into_iter().next()
            }
        };

        Ok(resolved.unwrap_or_else(|| {
            tracing::warn!(
                request_id = request.id,
                "No catalog match, using request fields as metadata"
            );
            CanonicalMetadata::from_request(request)
        }))
    }

    /// Pick the source to download.
    ///
    /// A request that already has a bound source (an earlier download
    /// failed) reuses it; otherwise the locator walks the service order.
    async fn bind_source(
        &self,
        request: &Request,
        metadata: &CanonicalMetadata,
    ) -> std::result::Result<BoundSource, (String, bool)> {
        if let (Some(service_kind), Some(source_id)) =
            (request.source_service, request.source_id.as_deref())
        {
            let Some(service) = self.locator.service(service_kind) else {
                return Err((
                    format!("bound service {service_kind} is no longer configured"),
                    false,
                ));
            };
            tracing::info!(
                request_id = request.id,
                service = %service_kind,
                source_id,
                "Reusing bound source"
            );
            return Ok(BoundSource {
                service,
                candidate: SourceCandidate {
                    service: service_kind,
                    source_id: source_id.to_string(),
                    title: metadata.title.clone(),
                    artist: metadata.artist.clone(),
                    album: metadata.album.clone(),
                    quality: self.settings.quality,
                    duration: None,
                    cover_url: None,
                },
            });
        }

        let candidates = self
            .locator
            .locate(metadata, request.content_type)
            .await
            .map_err(|e| (e.to_string(), e.is_retryable()))?;

        let Some(candidate) = candidates.into_iter().next() else {
            return Err(("no source available on any configured service".to_string(), false));
        };
        let service = self.locator.service(candidate.service).ok_or_else(|| {
            (
                format!("service {} disappeared during search", candidate.service),
                false,
            )
        })?;

        tracing::info!(
            request_id = request.id,
            service = %candidate.service,
            source_id = %candidate.source_id,
            title = %candidate.title,
            "Source selected"
        );
        Ok(BoundSource { service, candidate })
    }

    /// Fetch into a clean scratch directory and check files actually arrived.
    async fn download(
        &self,
        bound: &BoundSource,
        kind: ContentType,
        artifact_dir: &std::path::Path,
    ) -> std::result::Result<PathBuf, DownloadError> {
        if artifact_dir.exists() {
            tracing::warn!(dir = %artifact_dir.display(), "Removing stale download directory");
            tokio::fs::remove_dir_all(artifact_dir).await?;
        }

        let artifact = bound
            .service
            .fetch(&bound.candidate, kind, self.settings.quality, artifact_dir)
            .await?;

        let scan_root = artifact.clone();
        let files = tokio::task::spawn_blocking(move || scanner::audio_files(&scan_root))
            .await
            .map_err(|e| DownloadError::Failed(e.to_string()))?;
        if files.is_empty() {
            return Err(DownloadError::NoFiles);
        }

        tracing::info!(files = files.len(), path = %artifact.display(), "Download finished");
        Ok(artifact)
    }

    async fn post_process(
        &self,
        artifact: &std::path::Path,
        metadata: &CanonicalMetadata,
        kind: ContentType,
    ) -> std::result::Result<organizer::FiledAsset, PostProcessError> {
        if self.settings.tag_files {
            let tagged = self.post.apply_tags(artifact, metadata, kind).await?;
            tracing::debug!(files = tagged, "Tags written");
        }

        let dest_base = organizer::build_destination(
            &self.settings.path_pattern,
            metadata,
            &self.settings.output_dir,
        );
        self.post.move_to(artifact, &dest_base).await
    }

    async fn fail(
        &self,
        request: &Request,
        reason: String,
        retryable: bool,
    ) -> Result<ProcessOutcome> {
        let request = self
            .transition(
                request,
                RequestStatus::Failed,
                TransitionUpdate::failed(reason, retryable),
            )
            .await?;
        Ok(ProcessOutcome::Failed(request))
    }

    /// Commit a status change under the claim `request` carries, and notify.
    async fn transition(
        &self,
        request: &Request,
        to: RequestStatus,
        update: TransitionUpdate,
    ) -> Result<Request> {
        let from = request.status;
        let update = TransitionUpdate {
            claim: request.claimed_by.clone(),
            ..update
        };
        let updated = self.store.transition(request.id, from, to, update).await?;
        self.sink.emit(StatusChanged::new(from, &updated));
        Ok(updated)
    }
}

/// Trim fields and reject requests without a title or owner.
fn validate_new_request(mut new: NewRequest) -> Result<NewRequest> {
    new.title = new.title.trim().to_string();
    new.owner = new.owner.trim().to_string();
    if new.title.is_empty() {
        return Err(Error::invalid_input("title is required"));
    }
    if new.owner.is_empty() {
        return Err(Error::invalid_input("owner is required"));
    }
    let trim = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    new.artist = trim(new.artist);
    new.album = trim(new.album);
    new.external_id = trim(new.external_id);
    Ok(new)
}
