//! Cluster server: dispatcher + coordinator in the primary process

use std::future::Future;
use std::sync::Arc;

use crate::common::{seed_records, Config, Result, RunMode};
use crate::coordinator::core::Coordinator;
use crate::coordinator::dispatcher::{create_router, Dispatcher};
use crate::coordinator::launcher::WorkerLauncher;
use crate::coordinator::slots::SlotStatus;

pub struct ClusterServer<L> {
    config: Config,
    launcher: L,
}

impl<L: WorkerLauncher> ClusterServer<L> {
    pub fn new(config: Config, launcher: L) -> Self {
        Self { config, launcher }
    }

    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let public_addr = self.config.public_addr(RunMode::Cluster);
        let workers = self.config.worker_addrs();

        tracing::info!("Starting cluster (primary pid {})", std::process::id());
        tracing::info!("  HTTP API: {}", public_addr);
        tracing::info!(
            "  Workers: {} (ports {}..={})",
            workers.len(),
            self.config.worker_port(0),
            self.config.worker_port(workers.len() - 1)
        );

        let initial = if self.config.seed {
            seed_records()
        } else {
            Vec::new()
        };
        let coordinator = Coordinator::new(self.launcher, workers.clone(), initial)
            .with_restart_delay(self.config.restart_delay());

        let view = coordinator.view();

        let dispatcher = Arc::new(Dispatcher::new(
            &workers,
            self.config.proxy_timeout(),
            self.config.max_body_bytes,
        )?);
        // Bound now so clients queue in the backlog while workers start.
        let http_listener = tokio::net::TcpListener::bind(public_addr).await?;

        let coordinator = coordinator.run(shutdown);
        tokio::pin!(coordinator);

        let startup_timeout = self.config.startup_timeout();
        tokio::select! {
            res = &mut coordinator => {
                if let Err(e) = res {
                    tracing::error!("Coordinator error: {}", e);
                }
                return Ok(());
            }
            ready = view.wait_all_running(startup_timeout) => {
                if !ready {
                    let pending: Vec<usize> = view
                        .slots()
                        .iter()
                        .filter(|s| s.status != SlotStatus::Running)
                        .map(|s| s.slot)
                        .collect();
                    tracing::warn!(
                        "Workers {:?} not running after {:?}, serving anyway",
                        pending,
                        startup_timeout
                    );
                }
            }
        }

        let http_server = axum::serve(http_listener, create_router(dispatcher));
        tracing::info!("✓ Load balancer ready on {}", public_addr);

        tokio::select! {
            res = http_server => {
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            res = &mut coordinator => {
                if let Err(e) = res {
                    tracing::error!("Coordinator error: {}", e);
                }
            }
        }

        Ok(())
    }
}
