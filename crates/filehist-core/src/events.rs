//! Change-notification streams for history consumers.
//!
//! Per-entry events (added, changed, replaced, removed) fire once per
//! affected entry; `EntriesMoved` and `AllRemoved` are aggregates and
//! fire once per bulk operation. Consumers key behavior off which
//! stream fired, so the distinction is part of the contract.

use tokio::sync::broadcast;
use url::Url;

use crate::domain::Entry;

/// One history change notification.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    /// A new entry was appended to a model.
    EntryAdded(Entry),
    /// An existing entry's source was updated.
    EntryChanged(Entry),
    /// A save within the merge window overwrote the previous entry.
    EntryReplaced(Entry),
    /// An entry was removed, by a caller or by retention cleanup.
    EntryRemoved(Entry),
    /// Aggregate: histories were migrated to the listed resources.
    EntriesMoved { resources: Vec<Url> },
    /// Aggregate: the entire history store was deleted.
    AllRemoved,
}

/// Broadcast fan-out of [`HistoryEvent`]s.
///
/// Emission never fails: when no receiver is subscribed the event is
/// dropped silently.
#[derive(Debug, Clone)]
pub struct HistoryEvents {
    tx: broadcast::Sender<HistoryEvent>,
}

impl HistoryEvents {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx }
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: HistoryEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for HistoryEvents {
    fn default() -> Self {
        Self::new()
    }
}
