use crate::error::validate_pid;
use crate::node::ContentServerOutputs;
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Synchronous mutex for the table: never held across `.await`, and usable
/// from `Drop`.
type SyncMutex<T> = parking_lot::Mutex<T>;

/// A live worker process backing one deployment node.
pub(crate) struct WorkerHandle {
    pub(crate) node_id: String,
    pub(crate) pid: u32,
    pub(crate) child: Child,
    pub(crate) outputs: ContentServerOutputs,
    pub(crate) started_at: DateTime<Utc>,
    /// Tasks draining the worker's stdout/stderr.
    pub(crate) drain_tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    fn abort_drains(&mut self) {
        for task in self.drain_tasks.drain(..) {
            task.abort();
        }
    }
}

/// Node id → live worker. Owned by one provider; the shutdown hook only
/// reaches it through [`ProcessTable::terminate_all`].
pub struct ProcessTable {
    workers: SyncMutex<HashMap<String, WorkerHandle>>,
    grace_period: Duration,
}

impl ProcessTable {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            workers: SyncMutex::new(HashMap::new()),
            grace_period,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    pub fn pid_of(&self, node_id: &str) -> Option<u32> {
        self.workers.lock().get(node_id).map(|h| h.pid)
    }

    pub(crate) fn insert(&self, handle: WorkerHandle) {
        let mut workers = self.workers.lock();
        if let Some(mut previous) = workers.insert(handle.node_id.clone(), handle) {
            // Callers only insert after live_outputs() found nothing, so this is a dead handle.
            previous.abort_drains();
        }
    }

    /// Outputs of the node's worker if it is tracked and its child has not
    /// exited. A handle whose child exited is dropped from the table.
    pub(crate) fn live_outputs(&self, node_id: &str) -> Option<ContentServerOutputs> {
        let mut workers = self.workers.lock();
        let handle = workers.get_mut(node_id)?;

        match handle.child.try_wait() {
            Ok(None) => return Some(handle.outputs.clone()),
            Ok(Some(status)) => {
                tracing::info!(
                    "Worker for '{}' (PID {}) exited with {}, forgetting it",
                    node_id,
                    handle.pid,
                    status
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Could not poll worker for '{}' (PID {}): {}, forgetting it",
                    node_id,
                    handle.pid,
                    e
                );
            }
        }

        if let Some(mut dead) = workers.remove(node_id) {
            dead.abort_drains();
        }
        None
    }

    /// Stop every tracked worker's process tree and empty the table.
    /// Returns how many workers were stopped. Safe to call repeatedly.
    pub async fn terminate_all(&self) -> usize {
        let handles: Vec<WorkerHandle> = self.workers.lock().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            terminate(handle, self.grace_period).await;
        }
        count
    }

    /// SIGKILL every tracked process group without waiting. Used on drop.
    fn kill_all_now(&self) {
        let mut workers = self.workers.lock();
        for (node_id, mut handle) in workers.drain() {
            if let Ok(pid) = validate_pid(handle.pid, &node_id) {
                let _ = signal_tree(pid, Signal::SIGKILL);
            }
            handle.abort_drains();
        }
    }
}

impl Drop for ProcessTable {
    fn drop(&mut self) {
        self.kill_all_now();
    }
}

/// Signal the worker's whole process group, falling back to the leader.
fn signal_tree(pid: Pid, sig: Signal) -> nix::Result<()> {
    killpg(pid, sig).or_else(|_| signal::kill(pid, sig))
}

/// Stop one worker: SIGTERM to its process group, wait up to `grace`,
/// then SIGKILL. A worker that is already gone counts as stopped.
pub(crate) async fn terminate(mut handle: WorkerHandle, grace: Duration) {
    let pid = match validate_pid(handle.pid, &handle.node_id) {
        Ok(pid) => pid,
        Err(e) => {
            tracing::error!("Not signalling worker for '{}': {}", handle.node_id, e);
            handle.abort_drains();
            return;
        }
    };

    match signal_tree(pid, Signal::SIGTERM) {
        Ok(()) => match tokio::time::timeout(grace, handle.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(
                    "Worker for '{}' (PID {}) exited with {}",
                    handle.node_id,
                    handle.pid,
                    status
                );
            }
            Ok(Err(e)) => {
                tracing::warn!("Error waiting for worker '{}': {}", handle.node_id, e);
                let _ = signal_tree(pid, Signal::SIGKILL);
                let _ = tokio::time::timeout(Duration::from_secs(2), handle.child.wait()).await;
            }
            Err(_) => {
                tracing::warn!(
                    "Worker for '{}' did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
                    handle.node_id,
                    grace
                );
                let _ = signal_tree(pid, Signal::SIGKILL);
                let _ = tokio::time::timeout(Duration::from_secs(2), handle.child.wait()).await;
            }
        },
        Err(Errno::ESRCH) => {
            tracing::debug!(
                "Worker for '{}' (PID {}) already stopped",
                handle.node_id,
                handle.pid
            );
            let _ = handle.child.try_wait();
        }
        Err(e) => {
            tracing::warn!(
                "Failed to signal worker for '{}' (PID {}): {}",
                handle.node_id,
                handle.pid,
                e
            );
        }
    }

    // Children forked by the leader stay in its group after the leader exits.
    match killpg(pid, Signal::SIGKILL) {
        Ok(()) => tracing::debug!("Killed leftover processes in group {}", handle.pid),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::debug!("killpg({}) failed: {}", handle.pid, e),
    }

    tracing::info!(
        "Stopped worker for '{}' (PID {}, up {}s)",
        handle.node_id,
        handle.pid,
        (Utc::now() - handle.started_at).num_seconds()
    );
    handle.abort_drains();
}
