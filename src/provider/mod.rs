//! Supervision of the worker processes that back `ContentServer` nodes.
//!
//! [`Provider`] is the lifecycle contract the orchestrator drives once per
//! reconciliation pass; [`ResourceProvider`] implements it by spawning one
//! worker per node and tracking it in a [`ProcessTable`].

mod content_server;
mod process_table;
mod shutdown;
mod worker;

pub use content_server::ResourceProvider;
pub use process_table::ProcessTable;
pub use shutdown::{hook_installed, listener_count, terminate_all_registered};

use crate::error::Result;
use crate::node::{DeploymentNode, DriftReport};
use async_trait::async_trait;

/// Lifecycle operations of a resource provider.
///
/// Call order within a pass: `pre_deploy` on all nodes, then `materialize`.
/// Only `pre_deploy` and `refresh_state` may clear outputs.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Clear outputs of nodes whose recorded port no longer answers.
    async fn pre_deploy(&self, nodes: &mut [DeploymentNode]);

    /// Bring every managed node up, reusing live workers.
    async fn materialize(&self, nodes: &mut [DeploymentNode]) -> Result<()>;

    /// Compare recorded outputs with reality. Never mutates the node.
    async fn detect_drift(&self, node: &DeploymentNode) -> DriftReport;

    /// Clear the node's outputs if its worker no longer answers.
    async fn refresh_state(&self, node: &mut DeploymentNode);

    /// Stop every tracked worker. Safe to call more than once.
    async fn cleanup(&self);
}
