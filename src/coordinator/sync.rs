//! Canonical record set held by the coordinator
//!
//! Last accepted notification wins. There is no version vector: two workers
//! writing before a broadcast reaches them each report a set that lacks the
//! other's write, and whichever notification is accepted second replaces the
//! first one entirely.

use crate::common::{ControlMessage, Record};

#[derive(Debug, Clone)]
pub struct SyncState {
    canonical: Vec<Record>,
    seq: u64,
}

impl SyncState {
    /// Starts at sequence 1 so that even the initial set outranks a fresh
    /// worker's empty store.
    pub fn new(initial: Vec<Record>) -> Self {
        Self {
            canonical: initial,
            seq: 1,
        }
    }

    pub fn canonical(&self) -> &[Record] {
        &self.canonical
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Accept a worker's record set as canonical and return the snapshot to
    /// broadcast.
    pub fn accept(&mut self, records: Vec<Record>) -> ControlMessage {
        self.canonical = records;
        self.seq += 1;
        self.snapshot()
    }

    /// The current canonical set as a snapshot message.
    pub fn snapshot(&self) -> ControlMessage {
        ControlMessage::SyncSnapshot {
            seq: self.seq,
            records: self.canonical.clone(),
        }
    }
}
