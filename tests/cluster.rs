//! Cluster tests: replication across workers and crash recovery

use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use userkv::common::seed_records;
use userkv::coordinator::dispatcher::{create_router, Dispatcher};
use userkv::coordinator::{
    ClusterServer, ClusterView, Coordinator, SlotStatus, TaskHandles, TaskLauncher,
};
use userkv::Config;

const WAIT: Duration = Duration::from_secs(10);

struct TestCluster {
    addrs: Vec<SocketAddr>,
    view: ClusterView,
    tasks: TaskHandles,
    stop: Option<oneshot::Sender<()>>,
    coordinator: JoinHandle<userkv::Result<()>>,
}

impl TestCluster {
    async fn start(workers: usize) -> Self {
        let addrs = free_addrs(workers);
        let launcher = TaskLauncher::new(1024 * 1024);
        let tasks = launcher.handles();

        let coordinator = Coordinator::new(launcher, addrs.clone(), seed_records())
            .with_restart_delay(Duration::from_millis(50));
        let view = coordinator.view();

        let (stop, stopped) = oneshot::channel::<()>();
        let coordinator = tokio::spawn(coordinator.run(async move {
            let _ = stopped.await;
        }));

        let cluster = Self {
            addrs,
            view,
            tasks,
            stop: Some(stop),
            coordinator,
        };
        let view = cluster.view.clone();
        wait_for("all workers running", || {
            let view = view.clone();
            async move { view.all_running() }
        })
        .await;
        cluster
    }

    fn url(&self, slot: usize, path: &str) -> String {
        format!("http://{}{}", self.addrs[slot], path)
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.coordinator).await.unwrap().unwrap();
    }
}

/// Ports that were free a moment ago.
fn free_addrs(n: usize) -> Vec<SocketAddr> {
    let listeners: Vec<_> = (0..n)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners.iter().map(|l| l.local_addr().unwrap()).collect()
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Fresh connection each time so a killed worker's open sockets are never reused.
async fn list(url: &str) -> Vec<Value> {
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap();
    match client.get(url).send().await {
        Ok(response) => response.json().await.unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

fn usernames(records: &[Value]) -> Vec<String> {
    let mut names: Vec<String> = records
        .iter()
        .filter_map(|r| r["username"].as_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

async fn wait_for_names(url: String, expected: &[&str]) {
    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    wait_for(&format!("{} to hold {:?}", url, expected), || {
        let url = url.clone();
        let expected = expected.clone();
        async move { usernames(&list(&url).await) == expected }
    })
    .await;
}

#[tokio::test]
async fn test_workers_start_from_seed() {
    let cluster = TestCluster::start(3).await;

    for slot in 0..3 {
        let records = list(&cluster.url(slot, "/api/users")).await;
        assert_eq!(usernames(&records), vec!["Bob", "Jane", "John"]);

        let info = cluster.view.slot(slot).unwrap();
        assert_eq!(info.status, SlotStatus::Running);
        assert_eq!(info.restarts, 0);
    }

    cluster.stop().await;
}

#[tokio::test]
async fn test_writes_replicate_to_every_worker() {
    let cluster = TestCluster::start(3).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(cluster.url(0, "/api/users"))
        .json(&json!({ "username": "Amy", "age": 22, "hobbies": [] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    for slot in 0..3 {
        wait_for_names(cluster.url(slot, "/api/users"), &["Amy", "Bob", "Jane", "John"]).await;
    }

    // Update on another worker, visible by id everywhere.
    let id = created["id"].as_str().unwrap();
    let response = client
        .put(cluster.url(1, &format!("/api/users/{}", id)))
        .json(&json!({ "username": "Amy Pond", "age": 23, "hobbies": ["travel"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    for slot in 0..3 {
        wait_for_names(
            cluster.url(slot, "/api/users"),
            &["Amy Pond", "Bob", "Jane", "John"],
        )
        .await;
    }
    let fetched: Value = client
        .get(cluster.url(2, &format!("/api/users/{}", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["age"], 23);

    // Delete on a third worker.
    let response = client
        .delete(cluster.url(2, &format!("/api/users/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    for slot in 0..3 {
        wait_for_names(cluster.url(slot, "/api/users"), &["Bob", "Jane", "John"]).await;
    }

    cluster.stop().await;
}

#[tokio::test]
async fn test_crashed_worker_restarts_with_current_data() {
    let cluster = TestCluster::start(2).await;
    let client = reqwest::Client::new();

    let response = client
        .post(cluster.url(0, "/api/users"))
        .json(&json!({ "username": "Amy", "age": 22, "hobbies": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    wait_for_names(cluster.url(1, "/api/users"), &["Amy", "Bob", "Jane", "John"]).await;

    assert!(cluster.tasks.kill(1));

    let view = cluster.view.clone();
    wait_for("worker 1 to come back", || {
        let view = view.clone();
        async move {
            view.slot(1)
                .map(|s| s.restarts == 1 && s.status == SlotStatus::Running)
                .unwrap_or(false)
        }
    })
    .await;

    let info = cluster.view.slot(1).unwrap();
    assert_eq!(info.addr, cluster.addrs[1]);
    assert_eq!(cluster.tasks.launches(1), 2);
    assert_eq!(cluster.tasks.launches(0), 1);

    // The replacement was handed the canonical set before it bound its port.
    let records = list(&cluster.url(1, "/api/users")).await;
    assert_eq!(usernames(&records), vec!["Amy", "Bob", "Jane", "John"]);

    // And it keeps replicating.
    let response = reqwest::Client::new()
        .post(cluster.url(1, "/api/users"))
        .json(&json!({ "username": "Zed", "age": 40, "hobbies": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    wait_for_names(
        cluster.url(0, "/api/users"),
        &["Amy", "Bob", "Jane", "John", "Zed"],
    )
    .await;

    cluster.stop().await;
}

#[tokio::test]
async fn test_dispatcher_in_front_of_cluster() {
    let cluster = TestCluster::start(3).await;

    let dispatcher = Dispatcher::new(&cluster.addrs, Duration::from_secs(5), 1024 * 1024).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let public = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, create_router(Arc::new(dispatcher)))
            .await
            .unwrap();
    });
    let client = reqwest::Client::new();

    // Consecutive requests land on consecutive workers.
    let mut slots = Vec::new();
    for _ in 0..4 {
        let health: Value = client
            .get(format!("{}/health", public))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        slots.push(health["slot"].as_u64().unwrap());
    }
    assert_eq!(slots, vec![0, 1, 2, 0]);

    // Write through the balancer on worker 1, then read back once replicated.
    let response = client
        .post(format!("{}/api/users", public))
        .json(&json!({ "username": "Amy", "age": 22, "hobbies": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    for slot in 0..3 {
        wait_for_names(cluster.url(slot, "/api/users"), &["Amy", "Bob", "Jane", "John"]).await;
    }
    for _ in 0..3 {
        let records = list(&format!("{}/api/users", public)).await;
        assert_eq!(records.len(), 4);
    }

    let response = client
        .get(format!("{}/api/users/not-a-uuid", public))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    cluster.stop().await;
}

#[tokio::test]
async fn test_workers_stop_with_coordinator() {
    let cluster = TestCluster::start(2).await;
    let urls: Vec<String> = (0..2).map(|s| cluster.url(s, "/health")).collect();
    cluster.stop().await;

    for url in urls {
        wait_for("worker to stop listening", || {
            let url = url.clone();
            async move {
                reqwest::Client::builder()
                    .pool_max_idle_per_host(0)
                    .build()
                    .unwrap()
                    .get(&url)
                    .send()
                    .await
                    .is_err()
            }
        })
        .await;
    }
}

/// First port of two consecutive free ports.
fn free_port_pair() -> u16 {
    loop {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = first.local_addr().unwrap().port();
        if port < u16::MAX && std::net::TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
            return port;
        }
    }
}

#[tokio::test]
async fn test_load_balancer_waits_for_workers() {
    let public = free_addrs(1)[0];
    let config = Config {
        port: Some(public.port()),
        workers: Some(2),
        worker_port_base: free_port_pair(),
        restart_delay_ms: 50,
        ..Default::default()
    };
    let (stop, stopped) = oneshot::channel::<()>();
    let server = ClusterServer::new(config, TaskLauncher::new(1024 * 1024));
    let handle = tokio::spawn(server.serve(async move {
        let _ = stopped.await;
    }));

    // Retry only until the public port is bound; the first answer must
    // already come from a running worker.
    let url = format!("http://{}/api/users", public);
    let deadline = tokio::time::Instant::now() + WAIT;
    let response = loop {
        match reqwest::get(&url).await {
            Ok(response) => break response,
            Err(e) if e.is_connect() && tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => panic!("load balancer never answered: {}", e),
        }
    };
    assert_eq!(response.status(), 200);
    let records: Vec<Value> = response.json().await.unwrap();
    assert_eq!(usernames(&records), vec!["Bob", "Jane", "John"]);

    let _ = stop.send(());
    handle.await.unwrap().unwrap();
}

/// Same as the in-process cluster, but with real worker processes.
#[cfg(unix)]
#[tokio::test]
async fn test_worker_processes() {
    use userkv::coordinator::ProcessLauncher;

    let addrs = free_addrs(2);
    let launcher = ProcessLauncher::new(env!("CARGO_BIN_EXE_userkv").into());
    let coordinator = Coordinator::new(launcher, addrs.clone(), seed_records())
        .with_restart_delay(Duration::from_millis(100));
    let view = coordinator.view();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(coordinator.run(async move {
        let _ = stopped.await;
    }));

    {
        let view = view.clone();
        wait_for("worker processes running", move || {
            let view = view.clone();
            async move { view.all_running() }
        })
        .await;
    }

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/api/users", addrs[0]))
        .json(&json!({ "username": "Amy", "age": 22, "hobbies": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    wait_for_names(
        format!("http://{}/api/users", addrs[1]),
        &["Amy", "Bob", "Jane", "John"],
    )
    .await;

    let pid = view.slot(1).unwrap().pid.unwrap();
    let status = std::process::Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .status()
        .unwrap();
    assert!(status.success());

    {
        let view = view.clone();
        wait_for("worker process restarted", move || {
            let view = view.clone();
            async move {
                view.slot(1)
                    .map(|s| s.restarts == 1 && s.status == SlotStatus::Running)
                    .unwrap_or(false)
            }
        })
        .await;
    }
    assert_ne!(view.slot(1).unwrap().pid, Some(pid));
    wait_for_names(
        format!("http://{}/api/users", addrs[1]),
        &["Amy", "Bob", "Jane", "John"],
    )
    .await;

    let _ = stop.send(());
    handle.await.unwrap().unwrap();
}
