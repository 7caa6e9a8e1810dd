//! Pipeline settings, loadable from TOML.
//!
//! ```toml
//! operator = "skeletonize"
//! method = "indexed"
//! steps = 40
//! processes = "auto"
//! border = "delete"
//! out_of_core = true
//! staging_order = { force = "column_major" }
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::border::BorderPolicy;
use crate::error::{PipelineError, Result};
use crate::pool::WorkerCount;
use crate::transform::OperatorKind;
use crate::volume::MemoryOrder;

/// Memory order of the staged volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingOrder {
  /// Keep the order the store read the volume in.
  Preserve,
  /// Convert to a fixed order before staging.
  Force(MemoryOrder),
}

impl Default for StagingOrder {
  fn default() -> Self {
    StagingOrder::Force(MemoryOrder::ColumnMajor)
  }
}

impl StagingOrder {
  /// Order to stage a volume that was read in `read_order`.
  pub fn resolve(self, read_order: MemoryOrder) -> MemoryOrder {
    match self {
      StagingOrder::Preserve => read_order,
      StagingOrder::Force(order) => order,
    }
  }
}

/// Everything one pipeline run needs besides the input and output paths.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  pub operator: OperatorKind,
  /// Operator method; `None` picks the operator's default.
  pub method: Option<String>,
  /// Smoothing passes.
  pub iterations: usize,
  /// Thinning step cap; `None` runs to convergence.
  pub steps: Option<usize>,
  pub processes: WorkerCount,
  pub border: BorderPolicy,
  /// Stage source and sink in memory-mapped files.
  pub out_of_core: bool,
  /// Directory for staging files (default: next to the output).
  pub staging_dir: Option<PathBuf>,
  /// Leave staging files on disk after the run.
  pub keep_staging: bool,
  pub staging_order: StagingOrder,
  /// Equalize block extents instead of fixed tiles plus a remainder.
  pub optimization: bool,
  /// Copy each block and its halo into memory before the kernel runs.
  pub as_memory: bool,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      operator: OperatorKind::default(),
      method: None,
      iterations: 2,
      steps: None,
      processes: WorkerCount::default(),
      border: BorderPolicy::default(),
      out_of_core: true,
      staging_dir: None,
      keep_staging: false,
      staging_order: StagingOrder::default(),
      optimization: false,
      as_memory: true,
    }
  }
}

impl PipelineConfig {
  /// Parse and validate a TOML document.
  pub fn from_toml_str(content: &str) -> Result<Self> {
    let config: PipelineConfig =
      toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  /// Load configuration from a TOML file.
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    Self::from_toml_str(&content).map_err(|e| match e {
      PipelineError::Config(msg) => PipelineError::Config(format!("{}: {}", path.display(), msg)),
      other => other,
    })
  }

  /// Reject settings no run could use.
  pub fn validate(&self) -> Result<()> {
    self.processes.resolve()?;
    self
      .operator
      .build(self.method.as_deref())
      .map_err(|e| PipelineError::Config(e.to_string()))?;
    Ok(())
  }

  /// Pass count handed to the operator.
  pub fn passes(&self) -> Option<usize> {
    match self.operator {
      OperatorKind::Smooth => Some(self.iterations),
      OperatorKind::Skeletonize => self.steps,
    }
  }
}
