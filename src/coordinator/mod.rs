//! Coordinator implementation
//!
//! The primary process is responsible for:
//! - Worker lifecycle (launch, exit detection, restart in place)
//! - Replication (accepting change notifications, broadcasting snapshots)
//! - Load balancing (round-robin dispatch of client requests)

pub mod core;
pub mod dispatcher;
pub mod launcher;
pub mod server;
pub mod slots;
pub mod sync;

pub use self::core::Coordinator;
pub use dispatcher::Dispatcher;
pub use launcher::{ProcessLauncher, TaskHandles, TaskLauncher, WorkerLauncher, WorkerLink};
pub use server::ClusterServer;
pub use slots::{ClusterView, SlotInfo, SlotStatus};
pub use sync::SyncState;
