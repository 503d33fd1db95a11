//! Applying coordinator snapshots to the worker's store

use tokio::io::AsyncRead;

use crate::common::{ChannelReceiver, ControlMessage, Error, Result};
use crate::worker::http::WorkerState;
use crate::worker::store::SyncOutcome;

/// Apply one inbound control message. Returns whether the store changed.
pub fn apply_message(state: &WorkerState, msg: ControlMessage) -> bool {
    match msg {
        ControlMessage::SyncSnapshot { seq, records } => {
            let count = records.len();
            match state.store().apply_sync(seq, records) {
                SyncOutcome::Applied => {
                    tracing::debug!("Applied snapshot {} ({} records)", seq, count);
                    true
                }
                SyncOutcome::Stale { last } => {
                    tracing::debug!("Discarded stale snapshot {} (have {})", seq, last);
                    false
                }
            }
        }
        other => {
            tracing::warn!("Ignoring unexpected {} from coordinator", other.kind());
            false
        }
    }
}

/// Wait for the first snapshot; a worker must not serve before it has one.
pub async fn await_initial_snapshot<R>(
    state: &WorkerState,
    receiver: &mut ChannelReceiver<R>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(msg) = receiver.recv().await? {
        if matches!(msg, ControlMessage::SyncSnapshot { .. }) {
            apply_message(state, msg);
            return Ok(());
        }
        tracing::warn!("Ignoring {} before initial snapshot", msg.kind());
    }
    Err(Error::ChannelClosed("initial snapshot"))
}

/// Apply snapshots until the coordinator closes the channel.
pub async fn run<R>(state: WorkerState, mut receiver: ChannelReceiver<R>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(msg) = receiver.recv().await? {
        apply_message(&state, msg);
    }
    Ok(())
}
