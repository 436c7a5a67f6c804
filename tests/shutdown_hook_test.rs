//! Process-wide interrupt teardown.
//!
//! Kept in its own test binary: tearing down every registered provider
//! would stop workers owned by unrelated tests.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use stack_provider::config::WorkerCommand;
use stack_provider::provider::{listener_count, terminate_all_registered};
use stack_provider::{ContentServerProps, DeploymentNode, Provider, ProviderConfig, ResourceProvider};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

const CHILD_PORT_ENV: &str = "STACK_SIGNAL_CHILD_PORT";
const CHILD_DIR_ENV: &str = "STACK_SIGNAL_CHILD_DIR";

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

fn provider_in(dir: &Path) -> ResourceProvider {
    ResourceProvider::new(
        ProviderConfig::default()
            .with_work_dir(dir)
            .with_worker(WorkerCommand::builtin(env!("CARGO_BIN_EXE_stackctl")))
            .with_grace_period(Duration::from_secs(2)),
    )
}

fn content_node(id: &str, port: u16) -> DeploymentNode {
    DeploymentNode::content_server(
        id,
        ContentServerProps {
            name: id.to_string(),
            port,
            content: format!("<p>{}</p>", id),
        },
    )
}

fn is_reachable(port: u16) -> bool {
    std::net::TcpStream::connect(("127.0.0.1", port)).is_ok()
}

fn wait_until_unreachable(port: u16) {
    for _ in 0..50 {
        if !is_reachable(port) {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("port {} still accepting connections", port);
}

/// Child side: the first provider lives in a runtime that is gone before
/// the second provider starts its worker.
fn serve_until_interrupted(port: u16, dir: PathBuf) {
    let first = tokio::runtime::Runtime::new().unwrap();
    first.block_on(async {
        let _early = provider_in(&dir);
    });
    drop(first);

    let second = tokio::runtime::Runtime::new().unwrap();
    second.block_on(async {
        let provider = provider_in(&dir);
        let mut nodes = vec![content_node("web", port)];
        provider.materialize(&mut nodes).await.expect("materialize");
        assert_eq!(listener_count(), 1);
        println!("serving");
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    panic!("interrupt did not end the process");
}

#[test]
fn test_interrupt_stops_provider_from_later_runtime() {
    if let (Ok(port), Ok(dir)) = (std::env::var(CHILD_PORT_ENV), std::env::var(CHILD_DIR_ENV)) {
        serve_until_interrupted(port.parse().unwrap(), PathBuf::from(dir));
        return;
    }

    let temp_dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let mut child = Command::new(std::env::current_exe().unwrap())
        .args([
            "test_interrupt_stops_provider_from_later_runtime",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(CHILD_PORT_ENV, port.to_string())
        .env(CHILD_DIR_ENV, temp_dir.path())
        .stdout(Stdio::piped())
        .spawn()
        .expect("re-run test binary");

    let lines = BufReader::new(child.stdout.take().unwrap()).lines();
    let mut serving = false;
    for line in lines {
        if line.unwrap().trim().ends_with("serving") {
            serving = true;
            break;
        }
    }
    assert!(serving, "child never started its worker");
    assert!(is_reachable(port));

    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(130));
    wait_until_unreachable(port);
}

#[tokio::test]
async fn test_terminate_all_registered_stops_every_provider() {
    let temp_a = tempfile::tempdir().unwrap();
    let temp_b = tempfile::tempdir().unwrap();
    let a = provider_in(temp_a.path());
    let b = provider_in(temp_b.path());

    let port_a = free_port();
    let port_b = free_port();
    let mut nodes_a = vec![content_node("a", port_a)];
    let mut nodes_b = vec![content_node("b", port_b)];
    a.materialize(&mut nodes_a).await.unwrap();
    b.materialize(&mut nodes_b).await.unwrap();
    let pid_a = nodes_a[0].content_outputs().unwrap().pid;
    let pid_b = nodes_b[0].content_outputs().unwrap().pid;

    assert_eq!(terminate_all_registered().await, 2);

    assert_eq!(a.process_count(), 0);
    assert_eq!(b.process_count(), 0);
    wait_until_unreachable(port_a);
    wait_until_unreachable(port_b);
    for pid in [pid_a, pid_b] {
        assert!(kill(Pid::from_raw(pid as i32), None).is_err(), "pid {} alive", pid);
    }
}
