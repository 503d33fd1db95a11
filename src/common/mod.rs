//! Common utilities and types shared across userkv

pub mod channel;
pub mod config;
pub mod error;
pub mod record;
pub mod tracing_middleware;

pub use channel::{spawn_writer, ChannelReceiver, ChannelSender, ControlMessage};
pub use config::{Config, RunMode};
pub use error::{Error, Result};
pub use record::{parse_id, seed_records, Record, RecordFields};
