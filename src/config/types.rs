use super::duration::duration_or;
use crate::node::DeploymentNode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard budget for a worker to print its readiness line.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout of a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Post-spawn HTTP verification: attempts and spacing.
pub const DEFAULT_VERIFY_ATTEMPTS: usize = 10;
pub const DEFAULT_VERIFY_INTERVAL: Duration = Duration::from_millis(500);

/// Grace period between SIGTERM and SIGKILL on teardown.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default TTL of the deployment lock taken by `stackctl`.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// Readiness line printed by the built-in content worker.
pub const DEFAULT_READY_LINE: &str = "Serving content on";

/// How to launch the worker that serves a content server's files.
///
/// `args` may contain `{port}`, `{dir}`, `{file}` and `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Substring of a stdout line that marks the worker as started.
    pub ready_line: String,
}

impl WorkerCommand {
    /// The built-in `stackctl serve` worker, launched from `program`.
    pub fn builtin(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![
                "serve".to_string(),
                "--port".to_string(),
                "{port}".to_string(),
                "--dir".to_string(),
                "{dir}".to_string(),
            ],
            ready_line: DEFAULT_READY_LINE.to_string(),
        }
    }

    /// Substitute placeholders in the argument template.
    pub fn render_args(&self, name: &str, port: u16, dir: &Path, file: &Path) -> Vec<String> {
        let dir = dir.to_string_lossy();
        let file = file.to_string_lossy();
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &port)
                    .replace("{dir}", &dir)
                    .replace("{file}", &file)
                    .replace("{name}", name)
            })
            .collect()
    }
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self::builtin("stackctl")
    }
}

/// Runtime configuration of a [`ResourceProvider`](crate::provider::ResourceProvider).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Root under which each content server gets a name-derived directory.
    pub work_dir: PathBuf,
    pub startup_timeout: Duration,
    pub probe_timeout: Duration,
    pub verify_attempts: usize,
    pub verify_interval: Duration,
    pub grace_period: Duration,
    pub worker: WorkerCommand,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("stack-provider"),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            verify_attempts: DEFAULT_VERIFY_ATTEMPTS,
            verify_interval: DEFAULT_VERIFY_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            worker: WorkerCommand::default(),
        }
    }
}

impl ProviderConfig {
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// Top-level stack file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFile {
    /// Stack name; keys state, lock and audit rows.
    pub stack: String,

    /// State database path, relative to the stack file.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Lock TTL (e.g., "300s", "5m").
    #[serde(default)]
    pub lock_ttl: Option<String>,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub nodes: Vec<DeploymentNode>,
}

impl StackFile {
    pub fn get_lock_ttl(&self) -> Duration {
        duration_or(self.lock_ttl.as_deref(), "lock_ttl", DEFAULT_LOCK_TTL)
    }

    /// Lock TTL in whole seconds, saturating at `i64::MAX`.
    pub fn lock_ttl_seconds(&self) -> i64 {
        i64::try_from(self.get_lock_ttl().as_secs()).unwrap_or(i64::MAX)
    }

    /// Database path resolved against `base_dir`.
    pub fn database_path(&self, base_dir: &Path) -> PathBuf {
        let path = self
            .database
            .clone()
            .unwrap_or_else(|| PathBuf::from(".stack/state.db"));
        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }
}

/// `provider:` section of a stack file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub startup_timeout: Option<String>,
    #[serde(default)]
    pub probe_timeout: Option<String>,
    #[serde(default)]
    pub verify_attempts: Option<usize>,
    #[serde(default)]
    pub verify_interval: Option<String>,
    #[serde(default)]
    pub grace_period: Option<String>,
    #[serde(default)]
    pub worker: Option<WorkerSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub ready_line: Option<String>,
}

impl ProviderSettings {
    /// Build a runtime config. Relative paths resolve against `base_dir`;
    /// a missing worker program falls back to `default_program`.
    pub fn to_config(&self, base_dir: &Path, default_program: &Path) -> ProviderConfig {
        let work_dir = match &self.work_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.join(".stack").join("content"),
        };

        let mut worker = WorkerCommand::builtin(default_program);
        if let Some(settings) = &self.worker {
            if let Some(program) = &settings.program {
                worker.program = program.clone();
            }
            if let Some(args) = &settings.args {
                worker.args = args.clone();
            }
            if let Some(ready_line) = &settings.ready_line {
                worker.ready_line = ready_line.clone();
            }
        }

        ProviderConfig {
            work_dir,
            startup_timeout: duration_or(
                self.startup_timeout.as_deref(),
                "provider.startup_timeout",
                DEFAULT_STARTUP_TIMEOUT,
            ),
            probe_timeout: duration_or(
                self.probe_timeout.as_deref(),
                "provider.probe_timeout",
                DEFAULT_PROBE_TIMEOUT,
            ),
            verify_attempts: self.verify_attempts.unwrap_or(DEFAULT_VERIFY_ATTEMPTS).max(1),
            verify_interval: duration_or(
                self.verify_interval.as_deref(),
                "provider.verify_interval",
                DEFAULT_VERIFY_INTERVAL,
            ),
            grace_period: duration_or(
                self.grace_period.as_deref(),
                "provider.grace_period",
                DEFAULT_GRACE_PERIOD,
            ),
            worker,
        }
    }
}
