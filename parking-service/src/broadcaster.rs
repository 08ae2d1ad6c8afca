//! Fan-out of slot mutations to live subscribers.
//!
//! Delivery is best effort. A subscriber that falls behind the channel
//! capacity is told how many records it missed and is expected to resync from
//! a fresh snapshot; pushed records are full slot states, never diffs.

use shared::Slot;
use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct RealtimeBroadcaster {
    tx: broadcast::Sender<Slot>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotFeed {
    Update(Slot),
    /// The subscriber lagged and `missed` records were dropped for it.
    Gap { missed: u64 },
}

pub struct SlotSubscription {
    rx: broadcast::Receiver<Slot>,
}

impl RealtimeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Never blocks and never fails the caller.
    pub fn publish(&self, slot: Slot) {
        let slot_id = slot.id;
        let version = slot.version;
        match self.tx.send(slot) {
            Ok(receivers) => debug!(%slot_id, version, receivers, "slot_update published"),
            Err(_) => debug!(%slot_id, version, "slot_update dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> SlotSubscription {
        SlotSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl SlotSubscription {
    /// `None` once the broadcaster is gone.
    pub async fn next(&mut self) -> Option<SlotFeed> {
        match self.rx.recv().await {
            Ok(slot) => Some(SlotFeed::Update(slot)),
            Err(RecvError::Lagged(missed)) => Some(SlotFeed::Gap { missed }),
            Err(RecvError::Closed) => None,
        }
    }
}

/// Client-side reconciliation of snapshots and pushed slot records.
#[derive(Debug, Default, Clone)]
pub struct SlotView {
    slots: HashMap<Uuid, Slot>,
}

impl SlotView {
    pub fn from_snapshot(slots: Vec<Slot>) -> Self {
        let mut view = Self::default();
        view.replace(slots);
        view
    }

    pub fn replace(&mut self, slots: Vec<Slot>) {
        self.slots = slots.into_iter().map(|s| (s.id, s)).collect();
    }

    /// Applies a pushed record unless we already hold the same or a newer
    /// version of that slot. Returns whether the view changed.
    pub fn apply(&mut self, slot: Slot) -> bool {
        match self.slots.get(&slot.id) {
            Some(current) if current.version >= slot.version => false,
            _ => {
                self.slots.insert(slot.id, slot);
                true
            }
        }
    }

    pub fn get(&self, slot_id: Uuid) -> Option<&Slot> {
        self.slots.get(&slot_id)
    }

    pub fn slots(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.slots.values().cloned().collect();
        slots.sort_by(|a, b| a.number.cmp(&b.number));
        slots
    }
}
