//! At most one fulfillment attempt per request id.
//!
//! [`InFlight`] covers attempts inside one engine. Across processes the
//! request store claim does the same job; [`Heartbeat`] keeps that claim
//! alive while the attempt runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::db::RequestStore;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Identifier written into the claims of one engine instance.
pub fn instance_id() -> String {
    format!(
        "pid{}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_millis(),
        NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Set of request ids with an attempt currently running.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<i64>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as in flight. Returns `None` if it already is.
    ///
    /// The mark is cleared when the returned guard drops, on every exit path.
    pub fn try_acquire(&self, id: i64) -> Option<InFlightGuard> {
        if !self.ids.lock().insert(id) {
            return None;
        }
        Some(InFlightGuard {
            ids: Arc::clone(&self.ids),
            id,
        })
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the in-flight mark on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<i64>>>,
    id: i64,
}

impl InFlightGuard {
    pub fn id(&self) -> i64 {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.id);
    }
}

/// Refreshes a request claim every `period` until dropped.
#[derive(Debug)]
pub struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start(store: RequestStore, id: i64, claimant: String, period: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.heartbeat(id, &claimant).await {
                    Ok(true) => tracing::trace!(request_id = id, "Claim refreshed"),
                    Ok(false) => {
                        tracing::warn!(request_id = id, "Claim lost, stopping heartbeat");
                        break;
                    }
                    Err(e) => tracing::warn!(request_id = id, error = %e, "Heartbeat failed"),
                }
            }
        });
        Self { task }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}
