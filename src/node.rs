//! Deployment nodes: the unit of desired and observed state.
//!
//! The orchestrator hands the provider a list of [`DeploymentNode`]s. Each
//! node carries a [`Resource`] that pairs the caller's desired `props` with
//! the provider-written `outputs`. Absent outputs always mean "must be
//! (re)materialized".
//!
//! On the wire a node looks like:
//!
//! ```json
//! { "id": "dev-server", "resourceKind": "ContentServer",
//!   "props": { "name": "dev", "port": 8080, "content": "<h1>x</h1>" },
//!   "outputs": { "url": "http://localhost:8080", "port": 8080, "status": "running", "pid": 4242 } }
//! ```

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Discriminator of the one resource kind this crate manages.
pub const CONTENT_SERVER_KIND: &str = "ContentServer";

/// Desired configuration of a content server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentServerProps {
    pub name: String,
    pub port: u16,
    pub content: String,
}

/// Observed status of a materialized resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Running => write!(f, "running"),
        }
    }
}

/// Provider-written state of a materialized content server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentServerOutputs {
    pub url: String,
    pub port: u16,
    pub status: NodeStatus,
    pub pid: u32,
}

impl ContentServerOutputs {
    pub fn running(port: u16, pid: u32) -> Self {
        Self {
            url: format!("http://localhost:{}", port),
            port,
            status: NodeStatus::Running,
            pid,
        }
    }
}

/// Resource payload of a node, keyed by resource kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    ContentServer {
        props: ContentServerProps,
        outputs: Option<ContentServerOutputs>,
    },
    /// A kind this provider does not manage. Passed through untouched.
    Unmanaged {
        kind: String,
        props: Value,
        outputs: Option<Value>,
    },
}

impl Resource {
    pub fn kind(&self) -> &str {
        match self {
            Resource::ContentServer { .. } => CONTENT_SERVER_KIND,
            Resource::Unmanaged { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct DeploymentNode {
    id: String,
    resource: Resource,
}

impl DeploymentNode {
    /// A content server node with no outputs yet.
    pub fn content_server(id: impl Into<String>, props: ContentServerProps) -> Self {
        Self {
            id: id.into(),
            resource: Resource::ContentServer {
                props,
                outputs: None,
            },
        }
    }

    /// Rebuild a content server node from persisted state, outputs included.
    pub fn restored(
        id: impl Into<String>,
        props: ContentServerProps,
        outputs: ContentServerOutputs,
    ) -> Self {
        Self {
            id: id.into(),
            resource: Resource::ContentServer {
                props,
                outputs: Some(outputs),
            },
        }
    }

    /// A node of a kind no provider in this crate manages.
    pub fn unmanaged(id: impl Into<String>, kind: impl Into<String>, props: Value) -> Self {
        Self {
            id: id.into(),
            resource: Resource::Unmanaged {
                kind: kind.into(),
                props,
                outputs: None,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        self.resource.kind()
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn content_props(&self) -> Option<&ContentServerProps> {
        match &self.resource {
            Resource::ContentServer { props, .. } => Some(props),
            Resource::Unmanaged { .. } => None,
        }
    }

    pub fn content_outputs(&self) -> Option<&ContentServerOutputs> {
        match &self.resource {
            Resource::ContentServer { outputs, .. } => outputs.as_ref(),
            Resource::Unmanaged { .. } => None,
        }
    }

    /// Outputs as untyped JSON, whatever the kind.
    pub fn outputs_json(&self) -> Option<Value> {
        match &self.resource {
            Resource::ContentServer { outputs, .. } => outputs
                .as_ref()
                .and_then(|o| serde_json::to_value(o).ok()),
            Resource::Unmanaged { outputs, .. } => outputs.clone(),
        }
    }

    pub fn has_outputs(&self) -> bool {
        match &self.resource {
            Resource::ContentServer { outputs, .. } => outputs.is_some(),
            Resource::Unmanaged { outputs, .. } => outputs.is_some(),
        }
    }

    /// Carry recorded outputs over from a previous pass's node with the same
    /// id and kind. Used when restoring saved state into freshly declared nodes.
    pub fn adopt_outputs(&mut self, previous: &DeploymentNode) {
        if previous.id != self.id {
            return;
        }
        match (&mut self.resource, &previous.resource) {
            (
                Resource::ContentServer { outputs, .. },
                Resource::ContentServer { outputs: prev, .. },
            ) => *outputs = prev.clone(),
            (
                Resource::Unmanaged { kind, outputs, .. },
                Resource::Unmanaged {
                    kind: prev_kind,
                    outputs: prev,
                    ..
                },
            ) if kind == prev_kind => *outputs = prev.clone(),
            _ => {}
        }
    }

    pub(crate) fn set_content_outputs(&mut self, new_outputs: ContentServerOutputs) {
        if let Resource::ContentServer { outputs, .. } = &mut self.resource {
            *outputs = Some(new_outputs);
        }
    }

    pub(crate) fn clear_outputs(&mut self) {
        match &mut self.resource {
            Resource::ContentServer { outputs, .. } => *outputs = None,
            Resource::Unmanaged { outputs, .. } => *outputs = None,
        }
    }
}

/// Loosely-typed wire form of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    id: String,
    resource_kind: String,
    #[serde(default)]
    props: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outputs: Option<Value>,
}

impl TryFrom<RawNode> for DeploymentNode {
    type Error = Error;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        if raw.id.trim().is_empty() {
            return Err(Error::Config("node id must not be empty".to_string()));
        }
        let resource = match raw.resource_kind.as_str() {
            CONTENT_SERVER_KIND => Resource::ContentServer {
                props: serde_json::from_value(raw.props)?,
                outputs: raw.outputs.map(serde_json::from_value).transpose()?,
            },
            _ => Resource::Unmanaged {
                kind: raw.resource_kind,
                props: raw.props,
                outputs: raw.outputs,
            },
        };
        Ok(Self {
            id: raw.id,
            resource,
        })
    }
}

impl From<DeploymentNode> for RawNode {
    fn from(node: DeploymentNode) -> Self {
        match node.resource {
            Resource::ContentServer { props, outputs } => RawNode {
                id: node.id,
                resource_kind: CONTENT_SERVER_KIND.to_string(),
                props: serde_json::to_value(props).unwrap_or_default(),
                outputs: outputs.and_then(|o| serde_json::to_value(o).ok()),
            },
            Resource::Unmanaged {
                kind,
                props,
                outputs,
            } => RawNode {
                id: node.id,
                resource_kind: kind,
                props,
                outputs,
            },
        }
    }
}

/// Result of comparing a node's recorded outputs against reality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub node_id: String,
    pub has_drifted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DriftReport {
    pub fn no_drift(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            has_drifted: false,
            expected_state: None,
            actual_state: None,
            drift_description: None,
            timestamp: Utc::now(),
        }
    }
}
