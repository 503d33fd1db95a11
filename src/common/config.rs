//! Configuration for userkv components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Config file picked up from the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "userkv.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interface every listener binds to
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Public port; defaults depend on the run mode
    #[serde(default)]
    pub port: Option<u16>,

    /// First worker port; worker `i` listens on `worker_port_base + i`
    #[serde(default = "default_worker_port_base")]
    pub worker_port_base: u16,

    /// Number of worker processes (defaults to available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Delay before a crashed worker is relaunched
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,

    /// How long the load balancer waits for workers before taking traffic
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    /// Dispatcher → worker request timeout
    #[serde(default = "default_proxy_timeout")]
    pub proxy_timeout_ms: u64,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Start with the built-in seed records
    #[serde(default = "default_seed")]
    pub seed: bool,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}
fn default_worker_port_base() -> u16 {
    4001
}
fn default_restart_delay() -> u64 {
    500
}
fn default_startup_timeout() -> u64 {
    10_000
}
fn default_proxy_timeout() -> u64 {
    10_000
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}
fn default_seed() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

/// How the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One process serving the API directly
    Single,
    /// Dispatcher + coordinator in front of worker processes
    Cluster,
}

impl RunMode {
    pub fn default_port(self) -> u16 {
        match self {
            RunMode::Single => 3000,
            RunMode::Cluster => 4000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            worker_port_base: default_worker_port_base(),
            workers: None,
            restart_delay_ms: default_restart_delay(),
            startup_timeout_ms: default_startup_timeout(),
            proxy_timeout_ms: default_proxy_timeout(),
            max_body_bytes: default_max_body_bytes(),
            seed: default_seed(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then `USERKV_*` variables, then the
    /// bare `PORT`, `WORKER_PORT_BASE` and `WORKERS` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let mut builder = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("USERKV").try_parsing(true));
        for (var, key) in [
            ("PORT", "port"),
            ("WORKER_PORT_BASE", "worker_port_base"),
            ("WORKERS", "workers"),
        ] {
            builder = builder.set_override_option(key, std::env::var(var).ok())?;
        }
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        let last = self.worker_port_base as usize + self.worker_count() - 1;
        if last > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "worker ports overflow: base {} with {} workers",
                self.worker_port_base,
                self.worker_count()
            )));
        }
        Ok(())
    }

    pub fn public_port(&self, mode: RunMode) -> u16 {
        self.port.unwrap_or_else(|| mode.default_port())
    }

    pub fn public_addr(&self, mode: RunMode) -> SocketAddr {
        SocketAddr::new(self.host, self.public_port(mode))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Port of the worker in `slot`.
    pub fn worker_port(&self, slot: usize) -> u16 {
        self.worker_port_base.saturating_add(slot as u16)
    }

    pub fn worker_addrs(&self) -> Vec<SocketAddr> {
        (0..self.worker_count())
            .map(|slot| SocketAddr::new(self.host, self.worker_port(slot)))
            .collect()
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }
}
