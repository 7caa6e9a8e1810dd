//! Error taxonomy for the volume pipeline.
//!
//! Every stage failure maps onto one `PipelineError` variant. Operator
//! failures keep their own type so they can be surfaced unchanged.

use std::path::PathBuf;

use thiserror::Error;

/// Failure raised inside a transform operator.
#[derive(Error, Debug)]
pub enum OperatorError {
  /// Source and sink disagree on shape.
  #[error("source shape {source_shape:?} does not match sink shape {sink_shape:?}")]
  ShapeMismatch {
    source_shape: [usize; 3],
    sink_shape: [usize; 3],
  },

  /// Unknown method name for this operator.
  #[error("operator '{operator}' has no method '{method}'")]
  UnknownMethod { operator: &'static str, method: String },

  /// A worker panicked or otherwise failed on a block.
  #[error("block worker failed: {0}")]
  Worker(String),
}

/// Failure of a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
  /// Invalid worker count, block shape or settings.
  #[error("configuration error: {0}")]
  Config(String),

  /// A staging file could not be created, opened or mapped.
  #[error("staging error at {path}: {reason}")]
  Storage { path: PathBuf, reason: String },

  /// Source unreadable or output unwritable.
  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The voxel data could not be interpreted.
  #[error("format error in {path}: {reason}")]
  Format { path: PathBuf, reason: String },

  /// An operator precondition on the input volume does not hold.
  #[error("precondition failed: {0}")]
  Precondition(String),

  /// Opaque failure from the transform operator.
  #[error(transparent)]
  Operator(#[from] OperatorError),
}

impl PipelineError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    PipelineError::Io {
      path: path.into(),
      source,
    }
  }

  pub(crate) fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
    PipelineError::Storage {
      path: path.into(),
      reason: reason.to_string(),
    }
  }

  pub(crate) fn format(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
    PipelineError::Format {
      path: path.into(),
      reason: reason.to_string(),
    }
  }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
