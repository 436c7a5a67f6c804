use super::process_table::{terminate, ProcessTable, WorkerHandle};
use super::{shutdown, worker, Provider};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::healthcheck::{check_with_retry, HealthChecker, HttpProbe};
use crate::node::{ContentServerOutputs, ContentServerProps, DeploymentNode, DriftReport};
use crate::state::{now_ms, StateBackend};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Grace period used when killing a worker that failed to start.
const FAILED_START_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

/// Provider for `ContentServer` nodes: one worker process per node, serving
/// the node's content on its port.
pub struct ResourceProvider {
    config: ProviderConfig,
    table: Arc<ProcessTable>,
    /// Serializes materialize passes so two callers never spawn the same node.
    pass_gate: tokio::sync::Mutex<()>,
    backend: Option<(Arc<dyn StateBackend>, String)>,
}

impl ResourceProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let table = Arc::new(ProcessTable::new(config.grace_period));
        shutdown::register(&table);
        Self {
            config,
            table,
            pass_gate: tokio::sync::Mutex::new(()),
            backend: None,
        }
    }

    /// Attach a state backend so materialize can report on the stack's lock.
    pub fn with_backend(mut self, backend: Arc<dyn StateBackend>, stack_name: impl Into<String>) -> Self {
        self.backend = Some((backend, stack_name.into()));
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Number of tracked workers.
    pub fn process_count(&self) -> usize {
        self.table.len()
    }

    pub fn tracked_pid(&self, node_id: &str) -> Option<u32> {
        self.table.pid_of(node_id)
    }

    /// Directory holding a content server's files.
    pub fn site_dir(&self, name: &str) -> PathBuf {
        self.config.work_dir.join(slug(name))
    }

    async fn is_alive(&self, port: u16) -> bool {
        let probe = HttpProbe::for_port(port, self.config.probe_timeout);
        probe.check().await.unwrap_or(false)
    }

    async fn warn_if_unlocked(&self) {
        let Some((backend, stack)) = &self.backend else {
            return;
        };
        match backend.check_lock(stack).await {
            Ok(Some(lock)) if lock.is_held_at(now_ms()) => {
                tracing::debug!("Materializing '{}' under lock held by '{}'", stack, lock.holder);
            }
            Ok(_) => {
                tracing::warn!(
                    "Materializing stack '{}' without holding its deployment lock",
                    stack
                );
            }
            Err(e) => tracing::debug!("Could not read lock of '{}': {}", stack, e),
        }
    }

    async fn log_lock_holder(&self) {
        let Some((backend, stack)) = &self.backend else {
            return;
        };
        if let Ok(Some(lock)) = backend.check_lock(stack).await {
            tracing::error!(
                "Materialize of '{}' failed; lock held by '{}' for {}ms",
                stack,
                lock.holder,
                lock.age_ms(now_ms())
            );
        }
    }

    async fn materialize_node(&self, node: &mut DeploymentNode) -> Result<()> {
        let Some(props) = node.content_props().cloned() else {
            tracing::debug!("Skipping '{}' of unmanaged kind '{}'", node.id(), node.kind());
            return Ok(());
        };
        let node_id = node.id().to_string();

        if let Some(outputs) = self.table.live_outputs(&node_id) {
            tracing::debug!("Reusing worker for '{}' (PID {})", node_id, outputs.pid);
            node.set_content_outputs(outputs);
            return Ok(());
        }

        node.clear_outputs();
        let outputs = self.start_worker(&node_id, &props).await?;
        node.set_content_outputs(outputs);
        Ok(())
    }

    async fn start_worker(&self, node_id: &str, props: &ContentServerProps) -> Result<ContentServerOutputs> {
        let dir = self.site_dir(&props.name);
        tokio::fs::create_dir_all(&dir).await?;
        let index = dir.join("index.html");
        tokio::fs::write(&index, &props.content).await?;

        let worker_cmd = &self.config.worker;
        let args = worker_cmd.render_args(&props.name, props.port, &dir, &index);
        let mut child = worker::spawn(node_id, &worker_cmd.program, &args, &dir)?;

        let Some(pid) = child.id() else {
            let _ = child.wait().await;
            return Err(Error::SpawnFailed {
                node: node_id.to_string(),
                reason: "worker exited before its PID could be read".to_string(),
            });
        };

        let (ready_rx, drain_tasks) = worker::attach_output(node_id, &mut child, &worker_cmd.ready_line);
        let outputs = ContentServerOutputs::running(props.port, pid);
        let mut handle = WorkerHandle {
            node_id: node_id.to_string(),
            pid,
            child,
            outputs: outputs.clone(),
            started_at: Utc::now(),
            drain_tasks,
        };

        if let Err(e) =
            worker::wait_until_ready(node_id, &mut handle.child, ready_rx, self.config.startup_timeout).await
        {
            terminate(handle, FAILED_START_GRACE).await;
            return Err(e);
        }

        let probe = HttpProbe::for_port(props.port, self.config.probe_timeout);
        let answered = check_with_retry(&probe, self.config.verify_attempts, self.config.verify_interval).await;
        if !answered {
            terminate(handle, FAILED_START_GRACE).await;
            return Err(Error::HealthCheckFailed(
                node_id.to_string(),
                format!(
                    "{} did not respond after {} attempts",
                    probe.url(),
                    self.config.verify_attempts
                ),
            ));
        }

        tracing::info!(
            "Started content server '{}' for '{}' on {} (PID {})",
            props.name,
            node_id,
            outputs.url,
            pid
        );
        self.table.insert(handle);
        Ok(outputs)
    }
}

#[async_trait]
impl Provider for ResourceProvider {
    #[tracing::instrument(skip_all, fields(nodes = nodes.len()))]
    async fn pre_deploy(&self, nodes: &mut [DeploymentNode]) {
        for node in nodes.iter_mut() {
            let Some(port) = node.content_outputs().map(|o| o.port) else {
                continue;
            };
            if !self.is_alive(port).await {
                tracing::info!(
                    "'{}' is recorded on port {} but not responding, marking for redeploy",
                    node.id(),
                    port
                );
                node.clear_outputs();
            }
        }
    }

    #[tracing::instrument(skip_all, fields(nodes = nodes.len()))]
    async fn materialize(&self, nodes: &mut [DeploymentNode]) -> Result<()> {
        let _pass = self.pass_gate.lock().await;
        self.warn_if_unlocked().await;

        for node in nodes.iter_mut() {
            if let Err(e) = self.materialize_node(node).await {
                tracing::error!("Failed to materialize '{}': {}", node.id(), e);
                self.log_lock_holder().await;
                return Err(e);
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(node = node.id()))]
    async fn detect_drift(&self, node: &DeploymentNode) -> DriftReport {
        let (Some(props), Some(outputs)) = (node.content_props(), node.content_outputs()) else {
            return DriftReport::no_drift(node.id());
        };

        let alive = self.is_alive(outputs.port).await;
        DriftReport {
            node_id: node.id().to_string(),
            has_drifted: !alive,
            expected_state: serde_json::to_value(outputs).ok(),
            actual_state: Some(json!({ "reachable": alive, "port": outputs.port })),
            drift_description: (!alive).then(|| {
                format!(
                    "Content server '{}' (PID {}) is not responding on port {}",
                    props.name, outputs.pid, outputs.port
                )
            }),
            timestamp: Utc::now(),
        }
    }

    #[tracing::instrument(skip_all, fields(node = node.id()))]
    async fn refresh_state(&self, node: &mut DeploymentNode) {
        let Some(port) = node.content_outputs().map(|o| o.port) else {
            return;
        };
        if !self.is_alive(port).await {
            tracing::info!("'{}' no longer responds on port {}, clearing outputs", node.id(), port);
            node.clear_outputs();
        }
    }

    async fn cleanup(&self) {
        let stopped = self.table.terminate_all().await;
        if stopped > 0 {
            tracing::info!("Stopped {} worker(s)", stopped);
        }
    }
}

/// Directory-safe form of a content server name.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("site");
    }
    out
}
