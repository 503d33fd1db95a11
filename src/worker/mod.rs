//! Worker implementation
//!
//! A worker serves the user API against its own copy of the record set and
//! keeps that copy in line with the coordinator:
//! - local writes are reported as change notifications
//! - coordinator snapshots replace the local set wholesale

pub mod http;
pub mod server;
pub mod store;
pub mod sync;

pub use http::{create_router, WorkerState};
pub use server::WorkerServer;
pub use store::RecordStore;
