//! Request persistence.
//!
//! Every status change goes through [`RequestStore::transition`], which
//! checks the allowed-transition table and writes with
//! `WHERE id = ? AND status = ? AND claimed_by IS ?` so a stale writer can
//! never overwrite a newer state.
//!
//! A running attempt holds a claim (`claimed_by` + `heartbeat_at`) taken by
//! [`RequestStore::claim`] and kept alive with [`RequestStore::heartbeat`].
//! The claim is dropped as soon as the request leaves the in-progress states.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use super::{format_timestamp, now_text, parse_timestamp};
use crate::error::{Error, Result};
use crate::model::{ContentType, NewRequest, Request, RequestStatus, StreamingServiceKind};

const SELECT_COLUMNS: &str = "SELECT id, owner, content_type, title, artist, album, external_id, \
     source_service, source_id, status, failure_reason, retryable, download_path, file_size, \
     claimed_by, heartbeat_at, created_at, updated_at, completed_at FROM requests";

/// Raw row as stored in SQLite.
#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: i64,
    owner: String,
    content_type: String,
    title: String,
    artist: Option<String>,
    album: Option<String>,
    external_id: Option<String>,
    source_service: Option<String>,
    source_id: Option<String>,
    status: String,
    failure_reason: Option<String>,
    retryable: bool,
    download_path: Option<String>,
    file_size: Option<i64>,
    claimed_by: Option<String>,
    heartbeat_at: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<RequestRow> for Request {
    type Error = Error;

    fn try_from(row: RequestRow) -> Result<Self> {
        let content_type: ContentType = row.content_type.parse().map_err(Error::corrupt)?;
        let status: RequestStatus = row.status.parse().map_err(Error::corrupt)?;
        let source_service = row
            .source_service
            .as_deref()
            .map(str::parse::<StreamingServiceKind>)
            .transpose()
            .map_err(Error::corrupt)?;

        Ok(Request {
            id: row.id,
            owner: row.owner,
            content_type,
            title: row.title,
            artist: row.artist,
            album: row.album,
            external_id: row.external_id,
            source_service,
            source_id: row.source_id,
            status,
            failure_reason: row.failure_reason,
            retryable: row.retryable,
            download_path: row.download_path,
            file_size: row.file_size,
            claimed_by: row.claimed_by,
            heartbeat_at: row.heartbeat_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// Extra fields written together with a status change.
///
/// `None` leaves the stored value untouched, except for the failure reason
/// which always reflects the new state.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    /// Claim the writer must hold; `None` expects an unclaimed request
    pub claim: Option<String>,
    pub failure_reason: Option<String>,
    pub retryable: bool,
    pub source: Option<(StreamingServiceKind, String)>,
    pub download_path: Option<String>,
    pub file_size: Option<i64>,
    pub completed: bool,
}

impl TransitionUpdate {
    pub fn failed(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            retryable,
            ..Default::default()
        }
    }
}

/// Durable record of requests.
#[derive(Debug, Clone)]
pub struct RequestStore {
    pool: SqlitePool,
}

impl RequestStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new request in `pending`.
    pub async fn insert(&self, new: &NewRequest, content_type: ContentType) -> Result<Request> {
        let now = now_text();
        let id = sqlx::query(
            r#"
            INSERT INTO requests (owner, content_type, title, artist, album, external_id,
                                  status, retryable, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)
            "#,
        )
        .bind(&new.owner)
        .bind(content_type.as_str())
        .bind(&new.title)
        .bind(&new.artist)
        .bind(&new.album)
        .bind(&new.external_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get(id).await?.ok_or(Error::RequestNotFound(id))
    }

    /// Get a request by its database ID.
    pub async fn get(&self, id: i64) -> Result<Option<Request>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Request::try_from).transpose()
    }

    /// All requests, newest first.
    pub async fn list_all(&self) -> Result<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!("{SELECT_COLUMNS} ORDER BY id DESC"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Request::try_from).collect()
    }

    /// Requests created by one owner, newest first.
    pub async fn list_by_owner(&self, owner: &str) -> Result<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "{SELECT_COLUMNS} WHERE owner = ? ORDER BY id DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Request::try_from).collect()
    }

    /// Requests in a given status, oldest first (processing order).
    pub async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "{SELECT_COLUMNS} WHERE status = ? ORDER BY id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Request::try_from).collect()
    }

    /// Claim a `pending` request for an attempt, moving it to `searching`.
    ///
    /// Returns `None` when the request is no longer pending (someone else
    /// claimed it, or it finished).
    pub async fn claim(&self, id: i64, claimant: &str) -> Result<Option<Request>> {
        let now = now_text();
        let result = sqlx::query(
            r#"
            UPDATE requests SET
                status = 'searching',
                failure_reason = NULL,
                retryable = 0,
                claimed_by = ?,
                heartbeat_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(claimant)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        let request = self.get(id).await?.ok_or(Error::RequestNotFound(id))?;
        if result.rows_affected() == 0 {
            tracing::debug!(request_id = id, status = %request.status, "Claim lost");
            return Ok(None);
        }
        Ok(Some(request))
    }

    /// Refresh the heartbeat of a claim. `false` if the claim is gone.
    pub async fn heartbeat(&self, id: i64, claimant: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE requests SET heartbeat_at = ? WHERE id = ? AND claimed_by = ?",
        )
        .bind(now_text())
        .bind(id)
        .bind(claimant)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail an in-progress request whose claim went quiet before `cutoff`
    /// (or that has no claim at all).
    ///
    /// Returns `None` when the request moved on or its holder is still
    /// alive.
    pub async fn fail_stale_claim(
        &self,
        id: i64,
        from: RequestStatus,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<Request>> {
        if !from.is_in_progress() {
            return Err(Error::InvalidTransition {
                id,
                from,
                to: RequestStatus::Failed,
            });
        }

        let now = now_text();
        let result = sqlx::query(
            r#"
            UPDATE requests SET
                status = 'failed',
                failure_reason = ?,
                retryable = 1,
                claimed_by = NULL,
                heartbeat_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = ?
              AND (claimed_by IS NULL OR heartbeat_at IS NULL OR heartbeat_at < ?)
            "#,
        )
        .bind(reason)
        .bind(&now)
        .bind(id)
        .bind(from.as_str())
        .bind(format_timestamp(cutoff))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// Move a request from `from` to `to`, writing `update` in the same statement.
    ///
    /// Rejects transitions outside the allowed table and writes that lose a
    /// race (the stored status is no longer `from`, or the claim is held by
    /// someone else). Leaving the in-progress states releases the claim.
    pub async fn transition(
        &self,
        id: i64,
        from: RequestStatus,
        to: RequestStatus,
        update: TransitionUpdate,
    ) -> Result<Request> {
        if !from.can_transition_to(to) {
            tracing::error!(request_id = id, %from, %to, "Rejected transition not in table");
            return Err(Error::InvalidTransition { id, from, to });
        }

        let now = now_text();
        let (source_service, source_id) = match update.source {
            Some((service, source_id)) => (Some(service.as_str()), Some(source_id)),
            None => (None, None),
        };
        let completed_at = update.completed.then(|| now.clone());
        let keep_claim = to.is_in_progress();

        let result = sqlx::query(
            r#"
            UPDATE requests SET
                status = ?,
                failure_reason = ?,
                retryable = ?,
                source_service = COALESCE(?, source_service),
                source_id = COALESCE(?, source_id),
                download_path = COALESCE(?, download_path),
                file_size = COALESCE(?, file_size),
                completed_at = COALESCE(?, completed_at),
                claimed_by = CASE WHEN ? THEN claimed_by ELSE NULL END,
                heartbeat_at = CASE WHEN ? THEN ? ELSE NULL END,
                updated_at = ?
            WHERE id = ? AND status = ? AND claimed_by IS ?
            "#,
        )
        .bind(to.as_str())
        .bind(&update.failure_reason)
        .bind(update.retryable)
        .bind(source_service)
        .bind(&source_id)
        .bind(&update.download_path)
        .bind(update.file_size)
        .bind(&completed_at)
        .bind(keep_claim)
        .bind(keep_claim)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(from.as_str())
        .bind(&update.claim)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(id).await?.ok_or(Error::RequestNotFound(id))?;
            tracing::warn!(
                request_id = id,
                expected = %from,
                actual = %current.status,
                claim = ?update.claim,
                holder = ?current.claimed_by,
                %to,
                "Stale transition rejected"
            );
            return Err(Error::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }

        self.get(id).await?.ok_or(Error::RequestNotFound(id))
    }
}
