//! Provider lifecycle against the real built-in content worker.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use stack_provider::config::WorkerCommand;
use stack_provider::provider::{hook_installed, listener_count};
use stack_provider::{
    ContentServerProps, DeploymentNode, Error, Provider, ProviderConfig, ResourceProvider,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn stackctl() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_stackctl"))
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

fn provider_in(dir: &Path) -> ResourceProvider {
    ResourceProvider::new(
        ProviderConfig::default()
            .with_work_dir(dir)
            .with_worker(WorkerCommand::builtin(stackctl()))
            .with_grace_period(Duration::from_secs(2)),
    )
}

fn content_node(id: &str, port: u16, content: &str) -> DeploymentNode {
    DeploymentNode::content_server(
        id,
        ContentServerProps {
            name: id.to_string(),
            port,
            content: content.to_string(),
        },
    )
}

fn kill_out_of_band(pid: u32) {
    killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).expect("kill worker group");
}

async fn wait_until_unreachable(port: u16) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("port {} still accepting connections", port);
}

#[tokio::test]
async fn test_dev_server_end_to_end() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = provider_in(temp_dir.path());
    let port = free_port();
    let mut nodes = vec![content_node("dev-server", port, "<h1>x</h1>")];

    provider.pre_deploy(&mut nodes).await;
    provider.materialize(&mut nodes).await.expect("materialize");

    let outputs = nodes[0].content_outputs().expect("outputs written").clone();
    assert_eq!(outputs.url, format!("http://localhost:{}", port));
    assert_eq!(outputs.port, port);
    assert_eq!(outputs.status.to_string(), "running");
    assert!(outputs.pid > 0);

    let body = reqwest::get(format!("http://127.0.0.1:{}/", port))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "<h1>x</h1>");

    let serialized = serde_json::to_value(&nodes[0]).unwrap();
    assert_eq!(serialized["outputs"]["status"], "running");

    kill_out_of_band(outputs.pid);
    wait_until_unreachable(port).await;

    let report = provider.detect_drift(&nodes[0]).await;
    assert!(report.has_drifted);
    assert_eq!(report.node_id, "dev-server");
    assert!(report.drift_description.is_some());

    provider.cleanup().await;
}

#[tokio::test]
async fn test_double_materialize_reuses_worker() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = provider_in(temp_dir.path());
    let port = free_port();

    let mut first = vec![content_node("web", port, "one")];
    provider.materialize(&mut first).await.unwrap();
    let pid = first[0].content_outputs().unwrap().pid;

    // Fresh node objects with the same id, as a new pass would build them.
    let mut second = vec![content_node("web", port, "one")];
    provider.materialize(&mut second).await.unwrap();

    assert_eq!(second[0].content_outputs().unwrap().pid, pid);
    assert_eq!(provider.process_count(), 1);
    assert_eq!(provider.tracked_pid("web"), Some(pid));

    provider.cleanup().await;
    assert_eq!(provider.process_count(), 0);
}

#[tokio::test]
async fn test_reuse_does_not_rewrite_content() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = provider_in(temp_dir.path());
    let port = free_port();

    let mut nodes = vec![content_node("site", port, "original")];
    provider.materialize(&mut nodes).await.unwrap();

    let index = provider.site_dir("site").join("index.html");
    std::fs::write(&index, "edited by hand").unwrap();

    let mut again = vec![content_node("site", port, "original")];
    provider.materialize(&mut again).await.unwrap();
    assert_eq!(std::fs::read_to_string(&index).unwrap(), "edited by hand");

    provider.cleanup().await;
}

#[tokio::test]
async fn test_drift_then_refresh_after_kill() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = provider_in(temp_dir.path());
    let port = free_port();

    let mut nodes = vec![content_node("web", port, "hi")];
    provider.materialize(&mut nodes).await.unwrap();
    assert!(!provider.detect_drift(&nodes[0]).await.has_drifted);

    let recorded = nodes[0].content_outputs().unwrap().clone();
    kill_out_of_band(recorded.pid);
    wait_until_unreachable(port).await;

    let report = provider.detect_drift(&nodes[0]).await;
    assert!(report.has_drifted);
    // Read-only: outputs untouched.
    assert_eq!(nodes[0].content_outputs(), Some(&recorded));

    provider.refresh_state(&mut nodes[0]).await;
    assert!(!nodes[0].has_outputs());

    // The dead handle is detected and the node is respawned.
    provider.materialize(&mut nodes).await.unwrap();
    let respawned = nodes[0].content_outputs().unwrap();
    assert_ne!(respawned.pid, recorded.pid);
    assert_eq!(provider.process_count(), 1);

    provider.cleanup().await;
}

#[tokio::test]
async fn test_pre_deploy_clears_dead_port() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = provider_in(temp_dir.path());
    let port = free_port();

    let mut nodes: Vec<DeploymentNode> = serde_json::from_value(serde_json::json!([{
        "id": "stale",
        "resourceKind": "ContentServer",
        "props": { "name": "stale", "port": port, "content": "x" },
        "outputs": { "url": format!("http://localhost:{}", port), "port": port, "status": "running", "pid": 424242 }
    }]))
    .unwrap();

    provider.pre_deploy(&mut nodes).await;
    assert!(!nodes[0].has_outputs());
    assert_eq!(provider.process_count(), 0);
}

#[tokio::test]
async fn test_pre_deploy_keeps_live_outputs() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = provider_in(temp_dir.path());
    let port = free_port();

    let mut nodes = vec![content_node("web", port, "hi")];
    provider.materialize(&mut nodes).await.unwrap();

    provider.pre_deploy(&mut nodes).await;
    assert!(nodes[0].has_outputs());

    provider.cleanup().await;
}

#[tokio::test]
async fn test_port_in_use_fails_materialize() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = provider_in(temp_dir.path());

    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();
    let mut nodes = vec![content_node("web", port, "hi")];

    let err = provider.materialize(&mut nodes).await.unwrap_err();
    assert!(matches!(err, Error::WorkerExited { .. }), "got {:?}", err);
    assert!(!nodes[0].has_outputs());
    assert_eq!(provider.process_count(), 0);
}

#[tokio::test]
async fn test_mismatched_ready_line_times_out() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut worker = WorkerCommand::builtin(stackctl());
    worker.ready_line = "this line is never printed".to_string();
    let provider = ResourceProvider::new(
        ProviderConfig::default()
            .with_work_dir(temp_dir.path())
            .with_worker(worker)
            .with_startup_timeout(Duration::from_millis(1500))
            .with_grace_period(Duration::from_secs(1)),
    );
    let port = free_port();
    let mut nodes = vec![content_node("web", port, "hi")];

    let err = provider.materialize(&mut nodes).await.unwrap_err();
    assert!(matches!(err, Error::StartupTimeout { .. }));
    assert_eq!(provider.process_count(), 0);

    // The worker that did come up was torn down.
    wait_until_unreachable(port).await;
}

#[tokio::test]
async fn test_missing_worker_binary_is_spawn_failure() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = ResourceProvider::new(
        ProviderConfig::default()
            .with_work_dir(temp_dir.path())
            .with_worker(WorkerCommand::builtin("/nonexistent/stackctl")),
    );
    let mut nodes = vec![content_node("web", free_port(), "hi")];

    let err = provider.materialize(&mut nodes).await.unwrap_err();
    assert!(matches!(err, Error::SpawnFailed { .. }));
}

#[tokio::test]
async fn test_failure_stops_remaining_nodes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let provider = provider_in(temp_dir.path());

    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = blocker.local_addr().unwrap().port();
    let mut nodes = vec![
        content_node("broken", taken, "x"),
        content_node("after", free_port(), "y"),
    ];

    assert!(provider.materialize(&mut nodes).await.is_err());
    assert!(!nodes[1].has_outputs());
    assert_eq!(provider.process_count(), 0);
}

#[tokio::test]
async fn test_many_providers_share_one_hook() {
    let temp_a = TempDir::new().unwrap();
    let temp_b = TempDir::new().unwrap();
    let a = provider_in(temp_a.path());
    let b = provider_in(temp_b.path());

    assert!(hook_installed());
    assert_eq!(listener_count(), 1);

    let port_a = free_port();
    let port_b = free_port();
    let mut nodes_a = vec![content_node("a", port_a, "a")];
    let mut nodes_b = vec![content_node("b", port_b, "b")];
    a.materialize(&mut nodes_a).await.unwrap();
    b.materialize(&mut nodes_b).await.unwrap();

    a.cleanup().await;
    a.cleanup().await;
    b.cleanup().await;

    wait_until_unreachable(port_a).await;
    wait_until_unreachable(port_b).await;
}

#[tokio::test]
async fn test_dropping_provider_kills_workers() {
    let temp_dir = tempfile::tempdir().unwrap();
    let port = free_port();
    {
        let provider = provider_in(temp_dir.path());
        let mut nodes = vec![content_node("web", port, "hi")];
        provider.materialize(&mut nodes).await.unwrap();
    }
    wait_until_unreachable(port).await;
}
