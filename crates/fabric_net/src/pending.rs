//! Responses awaited by in-flight requests.
//!
//! Each request registers a oneshot keyed by its event id. A response is
//! routed by its `parent_id`; delivery removes the entry, so each waiter is
//! resolved at most once. Entries whose waiter never receives a response are
//! removed by a background reaper once their TTL plus a grace period passes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use fabric_core::Event;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct PendingEntry {
    tx: oneshot::Sender<Event>,
    expires_at: Instant,
}

pub struct ResponseStore {
    pending: DashMap<String, PendingEntry>,
    grace: Duration,
    shutdown: CancellationToken,
}

impl ResponseStore {
    /// Create a store and start its reaper on the current runtime.
    ///
    /// The reaper holds only a weak reference; it stops on
    /// [`shutdown`](Self::shutdown) or when the store is dropped.
    pub fn new(reap_interval: Duration, grace: Duration) -> Arc<Self> {
        let store = Arc::new(Self {
            pending: DashMap::new(),
            grace,
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(reap_loop(
            Arc::downgrade(&store),
            reap_interval,
            store.shutdown.clone(),
        ));
        store
    }

    /// Register a waiter for the response to request `id`.
    pub fn register(&self, id: impl Into<String>, ttl: Duration) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            tx,
            expires_at: Instant::now() + ttl + self.grace,
        };
        self.pending.insert(id.into(), entry);
        rx
    }

    /// Route `resp` to its waiter. Returns `false` for an orphan response.
    pub fn deliver(&self, resp: Event) -> bool {
        // Removed before sending so no shard lock is held across the send.
        let Some((_, entry)) = self.pending.remove(&resp.parent_id) else {
            warn!(event_id = %resp.id, parent_id = %resp.parent_id, "request for response not found");
            return false;
        };
        if entry.tx.send(resp).is_err() {
            debug!("waiter gave up before the response arrived");
            return false;
        }
        true
    }

    pub fn remove(&self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Remove expired entries and return how many were removed.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let before = self.pending.len();
        self.pending.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.pending.len())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Stop the reaper.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ResponseStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn reap_loop(store: Weak<ResponseStore>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(store) = store.upgrade() else {
            break;
        };
        let reaped = store.reap();
        if reaped > 0 {
            debug!(reaped, remaining = store.len(), "reaped expired requests");
        }
    }
    debug!("response store reaper stopped");
}

/// Removes a pending entry when the waiting call returns, however it returns.
pub(crate) struct PendingGuard<'a> {
    pub(crate) store: &'a ResponseStore,
    pub(crate) id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.store.remove(&self.id);
    }
}
