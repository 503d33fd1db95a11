//! # userkv
//!
//! A multi-process user record service:
//! - Round-robin load balancer on the public port
//! - N worker processes, each with its own in-memory copy of the records
//! - Snapshot replication through the primary so every copy converges
//! - Crashed workers restarted in place and resynced before serving
//!
//! ## Architecture
//!
//! ```text
//!             clients
//!                │ HTTP
//! ┌──────────────▼──────────────────────────┐
//! │ Primary process                         │
//! │  Dispatcher (round-robin proxy)         │
//! │  Coordinator (canonical set, restarts)  │
//! └───┬─────────────────┬──────────────┬────┘
//!     │ HTTP + channel  │              │
//! ┌───▼───────┐   ┌─────▼─────┐   ┌────▼──────┐
//! │ Worker 0  │   │ Worker 1  │   │ Worker 2  │
//! │ :4001     │   │ :4002     │   │ :4003     │
//! └───────────┘   └───────────┘   └───────────┘
//! ```
//!
//! Workers report each write as a `change_notification` carrying their full
//! record set; the coordinator takes the latest one as canonical and sends it
//! to every worker as a sequenced `sync_snapshot`.
//!
//! ## Usage
//!
//! ```bash
//! # Single process on :3000
//! userkv
//!
//! # Load balancer on :4000 with 4 workers on :4001-4004
//! userkv --multi --workers 4
//! ```

pub mod common;
pub mod coordinator;
pub mod worker;

// Re-export commonly used types
pub use common::{Config, Error, Record, Result};
pub use coordinator::{ClusterServer, Coordinator};
pub use worker::WorkerServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
