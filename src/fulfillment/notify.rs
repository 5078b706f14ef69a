//! Status-change notifications.
//!
//! The engine emits one [`StatusChanged`] per committed transition. Sinks are
//! fire-and-forget: they cannot fail the pipeline.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::model::{Request, RequestStatus};

/// A committed status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChanged {
    pub request_id: i64,
    pub owner: String,
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub failure_reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChanged {
    pub fn new(from: RequestStatus, request: &Request) -> Self {
        Self {
            request_id: request.id,
            owner: request.owner.clone(),
            from,
            to: request.status,
            failure_reason: request.failure_reason.clone(),
            at: request.updated_at,
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusChanged);
}

/// Logs every transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: StatusChanged) {
        match event.failure_reason {
            Some(ref reason) if event.to == RequestStatus::Failed => tracing::warn!(
                request_id = event.request_id,
                from = %event.from,
                to = %event.to,
                reason = %reason,
                "Request status changed"
            ),
            _ => tracing::info!(
                request_id = event.request_id,
                from = %event.from,
                to = %event.to,
                "Request status changed"
            ),
        }
    }
}

/// Fans events out to in-process subscribers over a broadcast channel.
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StatusChanged>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.tx.subscribe()
    }
}

impl StatusSink for BroadcastSink {
    fn emit(&self, event: StatusChanged) {
        let _ = self.tx.send(event);
    }
}

/// Emits to every inner sink in order.
pub struct FanOut(pub Vec<Box<dyn StatusSink>>);

impl StatusSink for FanOut {
    fn emit(&self, event: StatusChanged) {
        for sink in &self.0 {
            sink.emit(event.clone());
        }
    }
}
