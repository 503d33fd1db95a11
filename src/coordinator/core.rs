//! Coordinator event loop
//!
//! Owns the worker slots and the canonical record set. Every control event
//! (a worker message, a worker exit, a restart timer) goes through one queue
//! and is handled to completion before the next, which is what makes "last
//! accepted notification wins" a total order across workers.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::common::{spawn_writer, ChannelReceiver, ChannelSender, ControlMessage, Record, Result};
use crate::coordinator::launcher::{WorkerLauncher, WorkerLink};
use crate::coordinator::slots::ClusterView;
use crate::coordinator::sync::SyncState;

#[derive(Debug)]
enum CoordEvent {
    Message {
        slot: usize,
        generation: u64,
        msg: ControlMessage,
    },
    Exited {
        slot: usize,
        generation: u64,
        reason: String,
    },
    Restart {
        slot: usize,
    },
}

pub struct Coordinator<L> {
    launcher: L,
    addrs: Vec<SocketAddr>,
    links: Vec<Option<ChannelSender>>,
    view: ClusterView,
    sync: SyncState,
    restart_delay: Duration,
    events_tx: mpsc::UnboundedSender<CoordEvent>,
    events_rx: mpsc::UnboundedReceiver<CoordEvent>,
}

impl<L: WorkerLauncher> Coordinator<L> {
    /// One worker slot per address, all starting from `initial`.
    pub fn new(launcher: L, addrs: Vec<SocketAddr>, initial: Vec<Record>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            launcher,
            links: addrs.iter().map(|_| None).collect(),
            view: ClusterView::new(&addrs),
            addrs,
            sync: SyncState::new(initial),
            restart_delay: Duration::from_millis(500),
            events_tx,
            events_rx,
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Live view of the slots, usable after `run` takes ownership.
    pub fn view(&self) -> ClusterView {
        self.view.clone()
    }

    /// Start every worker and handle events until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Coordinator starting {} workers", self.addrs.len());
        for slot in 0..self.addrs.len() {
            self.start_slot(slot);
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Coordinator shutting down");
                    break;
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        // Closing the channels tells workers to stop.
        self.links.iter_mut().for_each(|link| *link = None);
        Ok(())
    }

    fn handle(&mut self, event: CoordEvent) {
        match event {
            CoordEvent::Message {
                slot,
                generation,
                msg,
            } => self.handle_message(slot, generation, msg),
            CoordEvent::Exited {
                slot,
                generation,
                reason,
            } => self.handle_exit(slot, generation, reason),
            CoordEvent::Restart { slot } => self.start_slot(slot),
        }
    }

    fn handle_message(&mut self, slot: usize, generation: u64, msg: ControlMessage) {
        let current = self.view.slot(slot).map(|s| s.generation);
        if current != Some(generation) {
            tracing::debug!("Dropping {} from replaced worker {}", msg.kind(), slot);
            return;
        }
        match msg {
            ControlMessage::ChangeNotification { records } => {
                tracing::debug!(
                    "Change from worker {} ({} records), broadcasting",
                    slot,
                    records.len()
                );
                let snapshot = self.sync.accept(records);
                self.broadcast(&snapshot);
            }
            ControlMessage::Ready { port } => {
                if self.view.update(slot, |s| s.mark_running(generation)) == Some(true) {
                    tracing::info!("Worker {} running on port {}", slot, port);
                }
            }
            ControlMessage::SyncSnapshot { .. } => {
                tracing::warn!("Ignoring sync_snapshot sent by worker {}", slot);
            }
        }
    }

    fn handle_exit(&mut self, slot: usize, generation: u64, reason: String) {
        if self.view.update(slot, |s| s.mark_exited(generation)) != Some(true) {
            return;
        }
        tracing::warn!("Worker {} exited ({}), restarting", slot, reason);
        self.links[slot] = None;
        self.schedule_restart(slot);
    }

    fn schedule_restart(&self, slot: usize) {
        let events = self.events_tx.clone();
        let delay = self.restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(CoordEvent::Restart { slot });
        });
    }

    /// Launch the worker for `slot` and hand it the canonical set right away,
    /// before it can take traffic.
    fn start_slot(&mut self, slot: usize) {
        let Some(generation) = self.view.update(slot, |s| s.begin_start()) else {
            return;
        };
        let addr = self.addrs[slot];

        let link = match self.launcher.launch(slot, addr) {
            Ok(link) => link,
            Err(e) => {
                tracing::error!("{}", e);
                self.view.update(slot, |s| s.mark_exited(generation));
                self.schedule_restart(slot);
                return;
            }
        };
        let WorkerLink {
            pid,
            reader,
            writer,
            exited,
        } = link;
        self.view.update(slot, |s| s.pid = pid);

        let (sender, _writer_task) = spawn_writer(writer);
        if let Err(e) = sender.send(self.sync.snapshot()) {
            tracing::warn!("Initial snapshot for worker {} not sent: {}", slot, e);
        }
        self.links[slot] = Some(sender);

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut receiver = ChannelReceiver::new(reader);
            loop {
                match receiver.recv().await {
                    Ok(Some(msg)) => {
                        let event = CoordEvent::Message {
                            slot,
                            generation,
                            msg,
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Worker {} channel read failed: {}", slot, e);
                        break;
                    }
                }
            }
        });

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let reason = exited
                .await
                .unwrap_or_else(|_| "exit watcher dropped".to_string());
            let _ = events.send(CoordEvent::Exited {
                slot,
                generation,
                reason,
            });
        });

        tracing::info!("Worker {} starting on {} (generation {})", slot, addr, generation);
    }

    /// Send a snapshot to every live worker. Failures are logged; the exit
    /// event for that worker follows on its own.
    fn broadcast(&self, snapshot: &ControlMessage) {
        for (slot, link) in self.links.iter().enumerate() {
            let Some(sender) = link else { continue };
            if let Err(e) = sender.send(snapshot.clone()) {
                tracing::warn!("Snapshot to worker {} not sent: {}", slot, e);
            }
        }
    }
}
