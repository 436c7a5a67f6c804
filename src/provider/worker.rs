//! Launching a worker process and waiting for it to announce readiness.
//!
//! Workers are spawned as leaders of their own process group so teardown
//! can signal the whole tree. Their stdout and stderr are drained by
//! background tasks for the life of the process; the stdout task also
//! watches for the configured readiness line.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Spawn `program args...` in `cwd` as a new process group leader.
pub(crate) fn spawn(node_id: &str, program: &Path, args: &[String], cwd: &Path) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env("STACK_NODE_ID", node_id)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Teardown is explicit; see ProcessTable.
        .kill_on_drop(false)
        .process_group(0);

    tracing::debug!(
        "Spawning worker for '{}': {} {}",
        node_id,
        program.display(),
        args.join(" ")
    );

    cmd.spawn().map_err(|e| Error::SpawnFailed {
        node: node_id.to_string(),
        reason: format!("{}: {}", program.display(), e),
    })
}

/// Start draining the child's output. The returned receiver fires once a
/// stdout line containing `ready_line` is seen; it is dropped unfired if
/// stdout closes first.
pub(crate) fn attach_output(
    node_id: &str,
    child: &mut Child,
    ready_line: &str,
) -> (oneshot::Receiver<()>, Vec<JoinHandle<()>>) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let mut tasks = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        tasks.push(tokio::spawn(drain_lines(
            node_id.to_string(),
            "stdout",
            stdout,
            Some((ready_line.to_string(), ready_tx)),
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(tokio::spawn(drain_lines(
            node_id.to_string(),
            "stderr",
            stderr,
            None,
        )));
    }

    (ready_rx, tasks)
}

async fn drain_lines<R>(
    node_id: String,
    stream: &'static str,
    reader: R,
    mut watch: Option<(String, oneshot::Sender<()>)>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "worker", node = %node_id, stream, "{}", line);
                let matched = matches!(&watch, Some((pattern, _)) if line.contains(pattern.as_str()));
                if matched {
                    if let Some((_, tx)) = watch.take() {
                        let _ = tx.send(());
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading {} of '{}': {}", stream, node_id, e);
                break;
            }
        }
    }
}

/// Wait until the worker prints its readiness line.
///
/// Fails with [`Error::WorkerExited`] if the child exits non-zero first and
/// with [`Error::StartupTimeout`] once `timeout` elapses. A clean exit is
/// not a failure by itself; the wait continues until the timeout.
pub(crate) async fn wait_until_ready(
    node_id: &str,
    child: &mut Child,
    mut ready_rx: oneshot::Receiver<()>,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut stdout_closed = false;
    let mut exited = false;

    loop {
        tokio::select! {
            ready = &mut ready_rx, if !stdout_closed => match ready {
                Ok(()) => {
                    tracing::debug!("Worker for '{}' signalled readiness", node_id);
                    return Ok(());
                }
                Err(_) => {
                    tracing::debug!("Worker for '{}' closed stdout without a readiness line", node_id);
                    stdout_closed = true;
                }
            },
            status = child.wait(), if !exited => match status {
                Ok(status) => match status.code() {
                    Some(code) if code != 0 => {
                        return Err(Error::WorkerExited {
                            node: node_id.to_string(),
                            code,
                        });
                    }
                    _ => {
                        tracing::debug!(
                            "Worker for '{}' exited ({}) before readiness, still waiting",
                            node_id,
                            status
                        );
                        exited = true;
                    }
                },
                Err(e) => {
                    return Err(Error::SpawnFailed {
                        node: node_id.to_string(),
                        reason: format!("failed to wait on worker: {}", e),
                    });
                }
            },
            _ = &mut deadline => {
                return Err(Error::StartupTimeout {
                    node: node_id.to_string(),
                    timeout,
                });
            }
        }
    }
}
