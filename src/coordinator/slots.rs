//! Worker slot bookkeeping
//!
//! Each slot is a fixed port with a lifecycle `Starting → Running → Exited`,
//! restarted in place. A generation counter tells events from a replaced
//! worker apart from events of the current one.

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Starting,
    Running,
    Exited,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotInfo {
    pub slot: usize,
    pub addr: SocketAddr,
    pub status: SlotStatus,
    pub generation: u64,
    pub pid: Option<u32>,
    pub restarts: u64,
}

impl SlotInfo {
    pub fn new(slot: usize, addr: SocketAddr) -> Self {
        Self {
            slot,
            addr,
            status: SlotStatus::Exited,
            generation: 0,
            pid: None,
            restarts: 0,
        }
    }

    /// Enter `Starting` with a new generation, which is returned.
    pub fn begin_start(&mut self) -> u64 {
        if self.generation > 0 {
            self.restarts += 1;
        }
        self.generation += 1;
        self.status = SlotStatus::Starting;
        self.pid = None;
        self.generation
    }

    /// `Starting → Running`; false for a stale generation.
    pub fn mark_running(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.status != SlotStatus::Starting {
            return false;
        }
        self.status = SlotStatus::Running;
        true
    }

    /// Any state → `Exited`; false for a stale generation.
    pub fn mark_exited(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.status == SlotStatus::Exited {
            return false;
        }
        self.status = SlotStatus::Exited;
        self.pid = None;
        true
    }
}

/// Shared read-only view of all slots, updated by the coordinator loop.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    slots: Arc<RwLock<Vec<SlotInfo>>>,
}

impl ClusterView {
    pub fn new(addrs: &[SocketAddr]) -> Self {
        let slots = addrs
            .iter()
            .enumerate()
            .map(|(slot, addr)| SlotInfo::new(slot, *addr))
            .collect();
        Self {
            slots: Arc::new(RwLock::new(slots)),
        }
    }

    pub fn slots(&self) -> Vec<SlotInfo> {
        self.read(|slots| slots.to_vec())
    }

    pub fn slot(&self, slot: usize) -> Option<SlotInfo> {
        self.read(|slots| slots.get(slot).cloned())
    }

    pub fn all_running(&self) -> bool {
        self.read(|slots| slots.iter().all(|s| s.status == SlotStatus::Running))
    }

    /// Wait until every slot is running. Returns false if `timeout` passes
    /// first.
    pub async fn wait_all_running(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.all_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    pub(crate) fn update<T>(&self, slot: usize, f: impl FnOnce(&mut SlotInfo) -> T) -> Option<T> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.get_mut(slot).map(f)
    }

    fn read<T>(&self, f: impl FnOnce(&[SlotInfo]) -> T) -> T {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        f(&slots)
    }
}
