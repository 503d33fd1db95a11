//! Worker server

use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::common::{spawn_writer, ChannelReceiver, ControlMessage, Result};
use crate::worker::http::{create_router, WorkerState};
use crate::worker::store::RecordStore;
use crate::worker::sync;

pub struct WorkerServer {
    addr: SocketAddr,
    max_body_bytes: usize,
}

impl WorkerServer {
    pub fn new(addr: SocketAddr, max_body_bytes: usize) -> Self {
        Self {
            addr,
            max_body_bytes,
        }
    }

    /// Serve `store` directly, with no coordinator behind it.
    pub async fn serve_standalone<F>(self, store: RecordStore, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting standalone server");
        tracing::info!("  HTTP API: {}", self.addr);
        tracing::info!("  Records: {}", store.len());

        let router = create_router(WorkerState::standalone(store), self.max_body_bytes);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        tracing::info!("✓ Server ready on {}", listener.local_addr()?);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Serve as cluster worker `slot`, talking to the coordinator over
    /// `reader`/`writer`.
    ///
    /// Blocks until the first snapshot arrives, then binds, reports `Ready`
    /// and serves until the coordinator closes the channel.
    pub async fn serve_clustered<R, W>(self, slot: usize, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (notifier, writer_task) = spawn_writer(writer);
        let mut receiver = ChannelReceiver::new(reader);
        let state = WorkerState::clustered(RecordStore::new(), slot, notifier.clone());

        sync::await_initial_snapshot(&state, &mut receiver).await?;

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let port = listener.local_addr()?.port();
        if let Err(e) = notifier.send(ControlMessage::Ready { port }) {
            tracing::warn!("Worker {} could not report ready: {}", slot, e);
        }
        tracing::info!(
            "✓ Worker {} ready on port {} ({} records)",
            slot,
            port,
            state.store().len()
        );

        let router = create_router(state.clone(), self.max_body_bytes);
        let http_server = axum::serve(listener, router);

        let result = tokio::select! {
            res = http_server => {
                if let Err(e) = &res {
                    tracing::error!("Worker {} HTTP server error: {}", slot, e);
                }
                res.map_err(Into::into)
            }
            res = sync::run(state, receiver) => {
                tracing::info!("Worker {}: coordinator channel closed, shutting down", slot);
                res
            }
        };

        writer_task.abort();
        result
    }
}
