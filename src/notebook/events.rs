use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// How a cell left the running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOutcome {
    Succeeded,
    Failed,
}

/// Emitted once per executed cell, keyed by the run that submitted it and the
/// cell's position at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellCompletion {
    pub run: u64,
    pub index: usize,
    pub outcome: CellOutcome,
}

impl CellCompletion {
    pub fn new(run: u64, index: usize, outcome: CellOutcome) -> Self {
        Self {
            run,
            index,
            outcome,
        }
    }
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    next_run: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<CellCompletion>>>,
}

/// Fan-out point for execution completion signals.
///
/// Every [`Subscription`] receives every completion published after it was
/// created. Dropping a subscription removes it from the hub.
#[derive(Clone, Default)]
pub struct CompletionHub {
    inner: Arc<HubInner>,
}

impl CompletionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().insert(id, tx);
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Allocates an id for a new execution run; ids are never reused by a hub.
    pub fn next_run(&self) -> u64 {
        self.inner.next_run.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Delivers to every live subscriber; returns how many received it.
    pub fn publish(&self, completion: CellCompletion) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|_, tx| tx.send(completion).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<CellCompletion>,
    hub: Weak<HubInner>,
}

impl Subscription {
    /// `None` once the hub itself is gone.
    pub async fn recv(&mut self) -> Option<CellCompletion> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers.lock().remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
