//! Worker-count configuration for transform operators.
//!
//! The pool size is carried explicitly in an [`ExecutionConfig`] that every
//! operator call receives; nothing here mutates process-wide defaults.
//!
//! # Usage
//!
//! ```ignore
//! let exec = ProcessPoolConfigurator::apply(Some("4".parse()?))?;
//! operator.run(&mut source, &mut sink, &request, &exec)?;
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Requested degree of parallelism.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "WorkerCountRepr")]
pub enum WorkerCount {
  /// Single worker; lookup tables are built before any pool work starts.
  #[default]
  Serial,
  /// One worker per available execution unit.
  Auto,
  /// Exactly `n` workers.
  Count(usize),
}

impl WorkerCount {
  /// Number of workers this request resolves to on this machine.
  pub fn resolve(self) -> Result<usize> {
    match self {
      WorkerCount::Serial => Ok(1),
      WorkerCount::Auto => Ok(available_workers()),
      WorkerCount::Count(0) => Err(PipelineError::Config(
        "worker count must be >= 1".to_string(),
      )),
      WorkerCount::Count(n) => Ok(n),
    }
  }
}

/// Execution units available to this process (at least one).
pub fn available_workers() -> usize {
  std::thread::available_parallelism()
    .map(|n| n.get())
    .unwrap_or(1)
}

impl FromStr for WorkerCount {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim() {
      "serial" => Ok(WorkerCount::Serial),
      "auto" => Ok(WorkerCount::Auto),
      other => other
        .parse::<usize>()
        .map(WorkerCount::Count)
        .map_err(|_| format!("expected a positive integer, 'auto' or 'serial', got '{}'", other)),
    }
  }
}

impl fmt::Display for WorkerCount {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerCount::Serial => write!(f, "serial"),
      WorkerCount::Auto => write!(f, "auto"),
      WorkerCount::Count(n) => write!(f, "{}", n),
    }
  }
}

/// Config-file form: `processes = 4` or `processes = "auto"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WorkerCountRepr {
  Number(usize),
  Text(String),
}

impl TryFrom<WorkerCountRepr> for WorkerCount {
  type Error = String;

  fn try_from(repr: WorkerCountRepr) -> std::result::Result<Self, Self::Error> {
    match repr {
      WorkerCountRepr::Number(n) => Ok(WorkerCount::Count(n)),
      WorkerCountRepr::Text(s) => s.parse(),
    }
  }
}

// =============================================================================
// ExecutionConfig
// =============================================================================

/// Worker pool handed to every operator and convolution primitive call.
#[derive(Clone)]
pub struct ExecutionConfig {
  mode: WorkerCount,
  workers: usize,
  pool: Arc<rayon::ThreadPool>,
}

impl ExecutionConfig {
  fn build(mode: WorkerCount, workers: usize) -> Result<Self> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(workers)
      .thread_name(|i| format!("voxel-worker-{}", i))
      .build()
      .map_err(|e| PipelineError::Config(format!("cannot start {} workers: {}", workers, e)))?;
    Ok(Self {
      mode,
      workers,
      pool: Arc::new(pool),
    })
  }

  /// Single-worker configuration.
  pub fn serial() -> Result<Self> {
    Self::build(WorkerCount::Serial, 1)
  }

  /// Requested mode, as given by the caller.
  pub fn mode(&self) -> WorkerCount {
    self.mode
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// True when transforms must take the whole-volume path.
  pub fn is_serial(&self) -> bool {
    self.workers <= 1
  }

  /// Run `op` inside this configuration's pool.
  pub fn install<R, F>(&self, op: F) -> R
  where
    F: FnOnce() -> R + Send,
    R: Send,
  {
    self.pool.install(op)
  }
}

impl fmt::Debug for ExecutionConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutionConfig")
      .field("mode", &self.mode)
      .field("workers", &self.workers)
      .finish()
  }
}

/// Turns a requested worker count into an [`ExecutionConfig`].
pub struct ProcessPoolConfigurator;

impl ProcessPoolConfigurator {
  /// Build the execution configuration for `worker_count`.
  ///
  /// `None` keeps the default of one worker per available execution unit.
  /// A count of zero is a `Config` error.
  pub fn apply(worker_count: Option<WorkerCount>) -> Result<ExecutionConfig> {
    let mode = worker_count.unwrap_or(WorkerCount::Auto);
    let workers = mode.resolve()?;
    debug!(%mode, workers, "configured worker pool");
    ExecutionConfig::build(mode, workers)
  }
}
