// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(stack::config::error),
        help("Check the stack file against the documented layout")
    )]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Worker for '{node}' could not be spawned: {reason}")]
    #[diagnostic(
        code(stack::worker::spawn_failed),
        help("Check that the worker program exists and is executable")
    )]
    SpawnFailed { node: String, reason: String },

    #[error("Worker for '{node}' did not signal readiness within {}ms", .timeout.as_millis())]
    #[diagnostic(
        code(stack::worker::startup_timeout),
        help("The worker may be slow to start, or its readiness line does not match the configured `ready_line`")
    )]
    StartupTimeout { node: String, timeout: Duration },

    #[error("Worker for '{node}' exited with code {code} during startup")]
    #[diagnostic(
        code(stack::worker::exited),
        help("Run `stackctl deploy` with RUST_LOG=worker=debug to see the worker's output")
    )]
    WorkerExited { node: String, code: i32 },

    #[error("Worker for '{0}' never answered HTTP: {1}")]
    #[diagnostic(
        code(stack::worker::health_check_failed),
        help("The port may be taken by another process, or the worker binds a different address")
    )]
    HealthCheckFailed(String, String),

    #[error("Stack '{stack}' is locked by '{holder}' (acquired {age_ms}ms ago)")]
    #[diagnostic(
        code(stack::lock::conflict),
        help("Wait for the other deployment to finish, or force-release with `stackctl lock release`")
    )]
    LockConflict {
        stack: String,
        holder: String,
        age_ms: i64,
    },

    #[error("Database error: {0}")]
    #[diagnostic(
        code(stack::database::error),
        help("See recovery suggestions based on the specific error type")
    )]
    Database(#[from] tokio_rusqlite::Error),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::LockConflict { holder, age_ms, .. } => Some(format!(
                "'{}' has held the lock for {:.1}s. If that deployment crashed, run `stackctl lock release` or wait for the TTL to lapse.",
                holder,
                *age_ms as f64 / 1000.0
            )),
            Error::StartupTimeout { .. } => Some(
                "Increase `provider.startup_timeout` in the stack file or check the worker's `ready_line`."
                    .to_string(),
            ),
            Error::SpawnFailed { .. } => Some(
                "Set `provider.worker.program` to an absolute path of the worker binary.".to_string(),
            ),
            Error::HealthCheckFailed(_, _) => Some(
                "Find what's using the port with: lsof -i :<port> (macOS/Linux)".to_string(),
            ),
            Error::Config(_) | Error::Yaml(_) => Some(
                "Validate the stack file's YAML and its `nodes:` entries".to_string(),
            ),
            Error::Database(e) => {
                // tokio_rusqlite wraps the underlying error opaquely, so match on text.
                let err_str = e.to_string();
                if err_str.contains("database is locked") || err_str.contains("SQLITE_BUSY") {
                    Some(
                        "Another stackctl instance is writing to the state database. Retry once it finishes.".to_string(),
                    )
                } else if err_str.contains("database disk image is malformed")
                    || err_str.contains("SQLITE_CORRUPT")
                {
                    Some(
                        "State database corrupted. Back it up and try recovery:\n  sqlite3 state.db '.recover' | sqlite3 state.recovered.db".to_string(),
                    )
                } else {
                    Some(
                        "If the issue persists, remove the state database; stacks will redeploy from scratch.".to_string(),
                    )
                }
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32, node_id: &str) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for node '{}' (refers to process group, not a process)",
                node_id
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!("refusing to signal PID 1 (init) for node '{}'", node_id),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID {} exceeds i32::MAX for node '{}', cannot convert safely",
                pid, node_id
            ),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}
