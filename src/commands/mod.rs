mod audit;
mod deploy;
mod drift;
mod lock;

pub use audit::run_audit;
pub use deploy::run_deploy;
pub use drift::{run_drift, run_refresh};
pub use lock::{run_lock_release, run_lock_status};

use serde_json::{json, Value};
use stack_provider::{
    DeploymentNode, Parser, ProviderConfig, SqliteStateBackend, StackFile, StateBackend,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded stack file plus its opened state database.
pub struct StackContext {
    pub stack: StackFile,
    pub base_dir: PathBuf,
    pub backend: Arc<SqliteStateBackend>,
}

impl StackContext {
    pub async fn load(stack_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let parser = Parser::new();
        let path = match stack_path {
            Some(path) => path,
            None => parser.find_stack_file()?,
        };
        let stack = parser.load_stack(&path)?;

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let backend = SqliteStateBackend::open(stack.database_path(&base_dir)).await?;

        tracing::debug!("Loaded stack '{}' from {}", stack.stack, path.display());
        Ok(Self {
            stack,
            base_dir,
            backend: Arc::new(backend),
        })
    }

    pub fn name(&self) -> &str {
        &self.stack.stack
    }

    /// Provider settings with this executable as the default worker.
    pub fn provider_config(&self) -> anyhow::Result<ProviderConfig> {
        let program = std::env::current_exe()?;
        Ok(self.stack.provider.to_config(&self.base_dir, &program))
    }

    /// Nodes recorded by the last saved state, or none.
    pub async fn saved_nodes(&self) -> anyhow::Result<Vec<DeploymentNode>> {
        Ok(self
            .backend
            .get_state(self.name())
            .await?
            .map(|state| nodes_from_state(&state))
            .unwrap_or_default())
    }
}

/// Run `body` while holding the lock on `stack`.
///
/// The lock is released whether or not `body` succeeds. An error from
/// `body` takes precedence over an error releasing the lock.
pub async fn with_stack_lock<T, F, Fut>(
    backend: &dyn StateBackend,
    stack: &str,
    holder: &str,
    ttl_seconds: i64,
    body: F,
) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    backend.acquire_lock(stack, holder, ttl_seconds).await?;
    let result = body().await;
    let released = backend.release_lock(stack).await;

    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            tracing::warn!("Failed to release lock on '{}': {}", stack, release_err);
            Err(e)
        }
    }
}

pub fn state_from_nodes(nodes: &[DeploymentNode]) -> Value {
    json!({ "nodes": nodes })
}

pub fn nodes_from_state(state: &Value) -> Vec<DeploymentNode> {
    let Some(nodes) = state.get("nodes") else {
        return Vec::new();
    };
    match serde_json::from_value(nodes.clone()) {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!("Ignoring saved nodes that no longer parse: {}", e);
            Vec::new()
        }
    }
}

/// Epoch milliseconds as RFC 3339, or the raw number if out of range.
pub fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Lock holder identity: `stackctl@<host>:<pid>`.
pub fn holder_id() -> String {
    let host = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("stackctl@{}:{}", host, std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack_provider::{ContentServerOutputs, ContentServerProps};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_state_round_trip_keeps_outputs() {
        let node = DeploymentNode::restored(
            "dev",
            ContentServerProps {
                name: "dev".to_string(),
                port: 8080,
                content: "x".to_string(),
            },
            ContentServerOutputs::running(8080, 42),
        );
        let state = state_from_nodes(&[node.clone()]);
        assert_eq!(nodes_from_state(&state), vec![node]);
    }

    #[test]
    fn test_unparseable_state_yields_no_nodes() {
        assert!(nodes_from_state(&json!({ "nodes": "nope" })).is_empty());
        assert!(nodes_from_state(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_lock_released_when_body_fails() {
        let backend = SqliteStateBackend::new_ephemeral().await.unwrap();

        let result: anyhow::Result<()> = with_stack_lock(&backend, "demo", "me", 60, || async {
            let held = backend.check_lock("demo").await?;
            assert_eq!(held.map(|l| l.holder), Some("me".to_string()));
            anyhow::bail!("state write failed")
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "state write failed");
        assert!(backend.check_lock("demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_released_after_success() {
        let backend = SqliteStateBackend::new_ephemeral().await.unwrap();

        let value = with_stack_lock(&backend, "demo", "me", 60, || async { Ok(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(backend.check_lock("demo").await.unwrap().is_none());
        backend.acquire_lock("demo", "other", 60).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_conflict_skips_body() {
        let backend = SqliteStateBackend::new_ephemeral().await.unwrap();
        backend.acquire_lock("demo", "other", 60).await.unwrap();

        let ran = AtomicBool::new(false);
        let result = with_stack_lock(&backend, "demo", "me", 60, || async {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(result.is_err());
        assert!(!ran.load(Ordering::SeqCst));
        let held = backend.check_lock("demo").await.unwrap();
        assert_eq!(held.map(|l| l.holder), Some("other".to_string()));
    }

    #[test]
    fn test_holder_id_format() {
        let holder = holder_id();
        assert!(holder.starts_with("stackctl@"));
        assert!(holder.ends_with(&format!(":{}", std::process::id())));
    }
}
