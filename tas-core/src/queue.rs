//! Per-kind message queues between the transport and control threads.
//!
//! Each direction has one lane per message kind behind a single lock.
//! Entries carry a global arrival stamp so a consumer can take several
//! kinds at once and still see them in the order they were produced.
//! Locks are held only for the duration of one push or drain call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::message::{KIND_COUNT, Message, MessageKind};

/// A queued message and its arrival stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub arrival: u64,
    pub message: Message,
}

#[derive(Debug)]
struct Lanes {
    lanes: [VecDeque<QueueEntry>; KIND_COUNT],
    enabled: [bool; KIND_COUNT],
}

impl Lanes {
    fn new(enabled: impl Fn(MessageKind) -> bool) -> Self {
        Self {
            lanes: std::array::from_fn(|_| VecDeque::new()),
            enabled: MessageKind::ALL.map(enabled),
        }
    }

    fn push(&mut self, entry: QueueEntry) -> bool {
        let index = entry.message.kind() as usize;
        if !self.enabled[index] {
            return false;
        }
        self.lanes[index].push_back(entry);
        true
    }

    fn take(&mut self, kind: MessageKind) -> Vec<QueueEntry> {
        self.lanes[kind as usize].drain(..).collect()
    }

    fn take_merged(&mut self, kinds: &[MessageKind]) -> Vec<QueueEntry> {
        let mut merged = Vec::new();
        for kind in kinds {
            merged.extend(self.lanes[*kind as usize].drain(..));
        }
        merged.sort_by_key(|e| e.arrival);
        merged
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }
}

/// Incoming and outgoing queues, shared by reference (`Arc`) between the
/// transport thread and the control thread.
#[derive(Debug)]
pub struct QueueRouter {
    incoming: Mutex<Lanes>,
    outgoing: Mutex<Lanes>,
    arrivals: AtomicU64,
}

impl Default for QueueRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueRouter {
    pub fn new() -> Self {
        Self {
            incoming: Mutex::new(Lanes::new(MessageKind::is_consumed_by_engine)),
            outgoing: Mutex::new(Lanes::new(|_| true)),
            arrivals: AtomicU64::new(0),
        }
    }

    fn stamp(&self, message: Message) -> QueueEntry {
        QueueEntry {
            arrival: self.arrivals.fetch_add(1, Ordering::Relaxed),
            message,
        }
    }

    /// Queue a decoded message for the control thread.
    ///
    /// Kinds the engine never consumes are dropped and `false` is returned.
    pub fn push_incoming(&self, message: Message) -> bool {
        let kind = message.kind();
        let mut lanes = self.incoming.lock();
        // Stamp under the lock so lane order equals stamp order.
        let entry = self.stamp(message);
        let accepted = lanes.push(entry);
        drop(lanes);

        if accepted {
            trace!(%kind, "queued incoming");
        } else {
            warn!(%kind, "dropping incoming message the agent does not consume");
        }
        accepted
    }

    /// Queue a message for the transport thread to send.
    pub fn push_outgoing(&self, message: Message) {
        let mut lanes = self.outgoing.lock();
        let entry = self.stamp(message);
        lanes.push(entry);
    }

    /// Take every incoming entry of `kind`, oldest first.
    pub fn drain_incoming(&self, kind: MessageKind) -> Vec<QueueEntry> {
        self.incoming.lock().take(kind)
    }

    /// Take every outgoing entry of `kind`, oldest first.
    pub fn drain_outgoing(&self, kind: MessageKind) -> Vec<QueueEntry> {
        self.outgoing.lock().take(kind)
    }

    /// Atomically take several incoming kinds, merged by arrival.
    pub fn drain_incoming_merged(&self, kinds: &[MessageKind]) -> Vec<QueueEntry> {
        self.incoming.lock().take_merged(kinds)
    }

    /// Atomically take every outgoing entry, merged by arrival.
    pub fn drain_outgoing_all(&self) -> Vec<QueueEntry> {
        self.outgoing.lock().take_merged(&MessageKind::ALL)
    }

    pub fn incoming_len(&self) -> usize {
        self.incoming.lock().len()
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.lock().len()
    }
}
