#![allow(unused_assignments)]

//! # Stack Provider
//!
//! The resource-provider layer of a declarative deployment engine.
//!
//! ## Features
//!
//! - **Resource Provider**: materializes `ContentServer` nodes as local worker processes,
//!   with readiness detection, HTTP verification and process-group teardown
//! - **Drift Detection**: probes recorded ports and reports or clears stale outputs
//! - **State Backend**: SQLite-backed state blobs, TTL deployment locks and an audit log
//! - **Shutdown Hook**: one process-wide SIGINT/SIGTERM handler, however many providers exist
//!
//! ## Quick Start
//!
//! ```no_run
//! use stack_provider::{
//!     ContentServerProps, DeploymentNode, Provider, ProviderConfig, ResourceProvider,
//!     SqliteStateBackend, StateBackend,
//! };
//!
//! # async fn example() -> Result<(), stack_provider::Error> {
//! let backend = SqliteStateBackend::open(".stack/state.db").await?;
//! backend.acquire_lock("demo", "me", 300).await?;
//!
//! let provider = ResourceProvider::new(ProviderConfig::default());
//! let mut nodes = vec![DeploymentNode::content_server(
//!     "dev-server",
//!     ContentServerProps { name: "dev".into(), port: 8080, content: "<h1>x</h1>".into() },
//! )];
//!
//! provider.pre_deploy(&mut nodes).await;
//! provider.materialize(&mut nodes).await?;
//! backend.save_state("demo", &serde_json::json!({ "nodes": nodes })).await?;
//! backend.release_lock("demo").await?;
//!
//! provider.cleanup().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod healthcheck;
pub mod node;
pub mod provider;
pub mod serve;
pub mod state;

// Re-export commonly used types
pub use config::{Parser, ProviderConfig, StackFile, WorkerCommand};
pub use error::{Error, Result};
pub use node::{ContentServerOutputs, ContentServerProps, DeploymentNode, DriftReport, Resource};
pub use provider::{Provider, ResourceProvider};
pub use state::{AuditEntry, LockRecord, SqliteStateBackend, StateBackend};
