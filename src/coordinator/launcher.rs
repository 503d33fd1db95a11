//! Starting worker processes
//!
//! The coordinator only needs a pipe pair and an exit notification per
//! worker; how the worker is run is up to the [`WorkerLauncher`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::common::{Error, Result};
use crate::worker::WorkerServer;

/// A running worker as seen from the coordinator.
pub struct WorkerLink {
    pub pid: Option<u32>,
    /// Worker → coordinator messages
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Coordinator → worker messages
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Resolves with a description once the worker is gone
    pub exited: oneshot::Receiver<String>,
}

pub trait WorkerLauncher: Send + 'static {
    /// Start the worker for `slot`, listening on `addr`.
    fn launch(&mut self, slot: usize, addr: SocketAddr) -> Result<WorkerLink>;
}

/// Runs each worker as a child process of the current executable
/// (`<exe> worker --slot N --port P`), with the channel on its stdin/stdout.
pub struct ProcessLauncher {
    exe: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(exe: PathBuf) -> Self {
        Self {
            exe,
            extra_args: Vec::new(),
        }
    }

    /// Launcher re-executing the running binary.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Arguments appended to every worker command line.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn command(&self, slot: usize, addr: SocketAddr) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.exe);
        cmd.arg("worker")
            .arg("--slot")
            .arg(slot.to_string())
            .arg("--host")
            .arg(addr.ip().to_string())
            .arg("--port")
            .arg(addr.port().to_string())
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&mut self, slot: usize, addr: SocketAddr) -> Result<WorkerLink> {
        let mut child = self.command(slot, addr).spawn().map_err(|e| Error::Launch {
            slot,
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(Error::Launch {
                slot,
                reason: "worker pipes unavailable".into(),
            });
        };

        let (exit_tx, exited) = oneshot::channel();
        tokio::spawn(async move {
            let reason = match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            };
            let _ = exit_tx.send(reason);
        });

        Ok(WorkerLink {
            pid,
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            exited,
        })
    }
}

/// Runs each worker as a task inside the current process, connected through
/// in-memory pipes. Workers still bind their own HTTP listener.
pub struct TaskLauncher {
    max_body_bytes: usize,
    tasks: TaskHandles,
}

/// Handles to the workers started by a [`TaskLauncher`].
#[derive(Clone, Default)]
pub struct TaskHandles {
    inner: Arc<Mutex<HashMap<usize, (AbortHandle, u64)>>>,
}

impl TaskHandles {
    /// Abort the worker in `slot`, as if its process had crashed.
    pub fn kill(&self, slot: usize) -> bool {
        match self.lock().get(&slot) {
            Some((handle, _)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// How many times `slot` has been launched.
    pub fn launches(&self, slot: usize) -> u64 {
        self.lock().get(&slot).map(|(_, n)| *n).unwrap_or(0)
    }

    fn record(&self, slot: usize, handle: AbortHandle) {
        let mut tasks = self.lock();
        let launches = tasks.get(&slot).map(|(_, n)| *n).unwrap_or(0);
        tasks.insert(slot, (handle, launches + 1));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, (AbortHandle, u64)>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TaskLauncher {
    pub fn new(max_body_bytes: usize) -> Self {
        Self {
            max_body_bytes,
            tasks: TaskHandles::default(),
        }
    }

    pub fn handles(&self) -> TaskHandles {
        self.tasks.clone()
    }
}

/// Pipe capacity between coordinator and an in-process worker
const TASK_PIPE_BYTES: usize = 64 * 1024;

impl WorkerLauncher for TaskLauncher {
    fn launch(&mut self, slot: usize, addr: SocketAddr) -> Result<WorkerLink> {
        let (coord_rx, worker_tx) = tokio::io::duplex(TASK_PIPE_BYTES);
        let (worker_rx, coord_tx) = tokio::io::duplex(TASK_PIPE_BYTES);

        let server = WorkerServer::new(addr, self.max_body_bytes);
        let task = tokio::spawn(server.serve_clustered(slot, worker_rx, worker_tx));
        self.tasks.record(slot, task.abort_handle());

        let (exit_tx, exited) = oneshot::channel();
        tokio::spawn(async move {
            let reason = match task.await {
                Ok(Ok(())) => "exited".to_string(),
                Ok(Err(e)) => format!("failed: {}", e),
                Err(e) if e.is_cancelled() => "killed".to_string(),
                Err(e) => format!("panicked: {}", e),
            };
            let _ = exit_tx.send(reason);
        });

        Ok(WorkerLink {
            pid: None,
            reader: Box::new(coord_rx),
            writer: Box::new(coord_tx),
            exited,
        })
    }
}
