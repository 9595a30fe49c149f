use std::num::NonZeroUsize;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Kind of execution unit a pool is backed by.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Resident child processes fed over stdin/stdout.
    #[default]
    Process,
    /// One OS thread per chunk, spawned fresh for every dispatch.
    Thread,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Process => "process",
            PoolKind::Thread => "thread",
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many workers a pool runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSize {
    /// Exactly this many workers.
    Fixed(usize),
    /// This many workers per available core.
    PerCore(usize),
}

impl Default for PoolSize {
    fn default() -> Self {
        PoolSize::PerCore(1)
    }
}

impl PoolSize {
    /// Resolve to a concrete worker count using the host's available
    /// parallelism for [`PoolSize::PerCore`].
    pub fn resolve(&self) -> Result<usize, PoolError> {
        let cores = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        self.resolve_with_cores(cores)
    }

    pub fn resolve_with_cores(&self, cores: usize) -> Result<usize, PoolError> {
        let count = match *self {
            PoolSize::Fixed(count) => count,
            PoolSize::PerCore(multiplier) => cores.saturating_mul(multiplier),
        };
        if count == 0 {
            return Err(PoolError::Configuration(format!(
                "pool size {self:?} resolves to zero workers"
            )));
        }
        Ok(count)
    }
}

/// Configuration for a single worker pool.
///
/// Deserializable from JSON; every field has a default so a bare `{}` is a
/// valid process pool with one worker per core writing its artifact to the
/// system temp directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Process-backed or thread-backed workers.
    pub kind: PoolKind,
    /// Fixed worker count or per-core multiplier.
    pub size: PoolSize,
    /// Directory the worker entry artifact is written to.
    pub work_dir: PathBuf,
    /// Forward worker log records to the host's tracing subscriber.
    pub debug: bool,
    /// Program spawned for process workers. Defaults to the current executable.
    pub worker_program: Option<PathBuf>,
    /// Extra arguments passed to `worker_program`.
    pub worker_args: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            kind: PoolKind::default(),
            size: PoolSize::default(),
            work_dir: std::env::temp_dir(),
            debug: false,
            worker_program: None,
            worker_args: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration for the given pool kind with default settings.
    pub fn new(kind: PoolKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Shorthand for a process pool.
    pub fn process() -> Self {
        Self::new(PoolKind::Process)
    }

    /// Shorthand for a thread pool.
    pub fn thread() -> Self {
        Self::new(PoolKind::Thread)
    }

    /// Use exactly `count` workers.
    pub fn with_size(mut self, count: usize) -> Self {
        self.size = PoolSize::Fixed(count);
        self
    }

    /// Use `multiplier` workers per available core.
    pub fn with_per_core(mut self, multiplier: usize) -> Self {
        self.size = PoolSize::PerCore(multiplier);
        self
    }

    /// Set the artifact directory.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Enable or disable worker log forwarding.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the program spawned for process workers.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    /// Append an argument passed to the worker program.
    pub fn with_worker_arg(mut self, arg: impl Into<String>) -> Self {
        self.worker_args.push(arg.into());
        self
    }

    /// Parse a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, PoolError> {
        serde_json::from_str(json)
            .map_err(|err| PoolError::Configuration(format!("invalid pool config: {err}")))
    }

    /// Resolve the configured size into a worker count.
    pub fn worker_count(&self) -> Result<usize, PoolError> {
        self.size.resolve()
    }

    /// The program process workers are spawned from.
    pub(crate) fn resolve_worker_program(&self) -> Result<PathBuf, PoolError> {
        match &self.worker_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|err| {
                PoolError::Configuration(format!("cannot locate current executable: {err}"))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size_resolves_verbatim() {
        assert_eq!(PoolSize::Fixed(4).resolve_with_cores(16).unwrap(), 4);
    }

    #[test]
    fn test_per_core_multiplies_cores() {
        assert_eq!(PoolSize::PerCore(2).resolve_with_cores(8).unwrap(), 16);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            PoolSize::Fixed(0).resolve_with_cores(8),
            Err(PoolError::Configuration(_))
        ));
        assert!(matches!(
            PoolSize::PerCore(0).resolve_with_cores(8),
            Err(PoolError::Configuration(_))
        ));
    }

    #[test]
    fn test_default_uses_host_cores() {
        let config = PoolConfig::default();
        assert_eq!(config.kind, PoolKind::Process);
        assert!(config.worker_count().unwrap() >= 1);
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let config =
            PoolConfig::from_json(r#"{"kind":"thread","size":{"fixed":3},"debug":true}"#).unwrap();
        assert_eq!(config.kind, PoolKind::Thread);
        assert_eq!(config.size, PoolSize::Fixed(3));
        assert!(config.debug);
        assert!(config.worker_args.is_empty());
        assert_eq!(config.work_dir, std::env::temp_dir());
    }

    #[test]
    fn test_from_json_rejects_unknown_kind() {
        assert!(PoolConfig::from_json(r#"{"kind":"fiber"}"#).is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = PoolConfig::process()
            .with_size(2)
            .with_work_dir("/var/tmp")
            .with_worker_program("/usr/bin/worker")
            .with_worker_arg("--quiet");
        assert_eq!(config.worker_count().unwrap(), 2);
        assert_eq!(
            config.resolve_worker_program().unwrap(),
            PathBuf::from("/usr/bin/worker")
        );
        assert_eq!(config.worker_args, vec!["--quiet".to_string()]);
    }
}
