//! Transform operators and the pass driver they share.
//!
//! ```text
//!            ┌──────────────┐  pass 1   ┌──────────────┐
//!            │    source    ├──────────►│     sink     │
//!            │ (view)       │◄──────────┤ (view)       │
//!            └──────────────┘  pass 2   └──────────────┘
//!
//! serial:  kernel over the whole volume
//! blocks:  kernel per Block { core, halo } on the worker pool,
//!          core written into the target under a lock
//! ```
//!
//! Every pass reads only the previous pass's result and each block reads
//! its core plus a halo as wide as the kernel radius, so serial and
//! block-parallel runs produce identical volumes.

pub mod convolution;
pub mod skeleton;
pub mod smoothing;
pub mod window;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::trace;

use crate::error::OperatorError;
use crate::planner::{decompose, ProcessingParameter};
use crate::pool::ExecutionConfig;
use crate::volume::{MemoryOrder, Region, Volume, VolumeView};
use window::{BlockBuffer, ViewWindow, Window};

pub use skeleton::Skeletonize;
pub use smoothing::Smooth;

// =============================================================================
// Operator contract
// =============================================================================

/// Per-call transform settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformRequest {
  /// Iteration count (smoothing) or step cap (thinning); `None` runs to
  /// convergence.
  pub passes: Option<usize>,
  /// Block decomposition; `None` takes the whole-volume path.
  pub processing: Option<ProcessingParameter>,
}

/// Where an operator left its result.
#[derive(Debug)]
pub enum TransformOutput {
  /// The source view holds the result.
  InSource,
  /// The sink view holds the result.
  InSink,
  /// A new volume unrelated to either view.
  Detached(Volume),
}

/// Statistics of one operator run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransformStats {
  /// Kernel passes executed.
  pub passes: usize,
  /// Voxels flipped over all passes.
  pub changed: usize,
  /// Blocks per pass (1 on the whole-volume path).
  pub blocks: usize,
}

/// Block(s) in, transformed block(s) out.
pub trait TransformOperator: Send + Sync {
  fn name(&self) -> &'static str;

  /// Neighbourhood radius one pass reads around a voxel.
  fn halo(&self) -> usize {
    1
  }

  /// Whether the input must have no foreground on the volume faces.
  fn requires_empty_border(&self) -> bool {
    false
  }

  /// Build lookup tables / kernel sets. Idempotent; safe to call from
  /// several threads.
  fn prepare(&self, exec: &ExecutionConfig);

  /// Transform `source` into `sink` (the two may be used alternately as
  /// scratch).
  fn run(
    &self,
    source: &mut dyn VolumeView,
    sink: &mut dyn VolumeView,
    request: &TransformRequest,
    exec: &ExecutionConfig,
  ) -> Result<(TransformOutput, TransformStats), OperatorError>;
}

/// Operator selector, as named on the command line and in config files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
  #[default]
  Smooth,
  Skeletonize,
}

impl OperatorKind {
  /// Operator for `method` (`None` picks the default method).
  pub fn build(self, method: Option<&str>) -> Result<Box<dyn TransformOperator>, OperatorError> {
    Ok(match self {
      OperatorKind::Smooth => Box::new(Smooth::with_method(method)?),
      OperatorKind::Skeletonize => Box::new(Skeletonize::with_method(method)?),
    })
  }
}

impl std::str::FromStr for OperatorKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "smooth" => Ok(OperatorKind::Smooth),
      "skeletonize" => Ok(OperatorKind::Skeletonize),
      other => Err(format!("unknown operator '{}'", other)),
    }
  }
}

// =============================================================================
// Pass driver
// =============================================================================

/// One kernel pass over a region.
pub(crate) trait PassKernel: Sync {
  /// Write the result for `core` into `out` (laid out in `order` over
  /// `core.extent`) and return how many voxels differ from the input.
  fn apply<W: Window>(
    &self,
    window: &W,
    core: &Region,
    order: MemoryOrder,
    out: &mut [u8],
    exec: &ExecutionConfig,
  ) -> usize;
}

/// Fill `out` by evaluating `f` at every voxel of `core`.
pub(crate) fn apply_per_voxel<W: Window>(
  window: &W,
  core: &Region,
  order: MemoryOrder,
  out: &mut [u8],
  f: impl Fn(&W, [usize; 3]) -> u8,
) -> usize {
  let mut changed = 0;
  convolution::for_each_in(core, order, |p| {
    let value = f(window, p);
    if value != window.at_u(p) {
      changed += 1;
    }
    let local = [p[0] - core.origin[0], p[1] - core.origin[1], p[2] - core.origin[2]];
    out[order.index(core.extent, local)] = value;
  });
  changed
}

/// Result of one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PassOutcome {
  pub changed: usize,
  pub blocks: usize,
}

/// Run one pass `source -> target`.
pub(crate) fn run_pass<K: PassKernel>(
  kernel: &K,
  halo: usize,
  source: &dyn VolumeView,
  target: &mut dyn VolumeView,
  processing: Option<&ProcessingParameter>,
  exec: &ExecutionConfig,
) -> Result<PassOutcome, OperatorError> {
  if source.shape() != target.shape() {
    return Err(OperatorError::ShapeMismatch {
      source_shape: source.shape(),
      sink_shape: target.shape(),
    });
  }
  let shape = source.shape();
  let order = target.order();

  let param = match processing {
    Some(param) if !exec.is_serial() => param,
    _ => {
      let whole = Region::whole(shape);
      let changed = kernel.apply(
        &ViewWindow::new(source),
        &whole,
        order,
        target.voxels_mut(),
        exec,
      );
      return Ok(PassOutcome { changed, blocks: 1 });
    }
  };

  let blocks = decompose(shape, param, halo);
  let changed = AtomicUsize::new(0);
  let target = Mutex::new(target);

  exec.install(|| {
    blocks.par_iter().try_for_each(|block| {
      let mut out = vec![0u8; block.core.voxel_count()];
      let flipped = if param.as_memory {
        let buffer = BlockBuffer::load(source, block.halo);
        kernel.apply(&buffer, &block.core, order, &mut out, exec)
      } else {
        kernel.apply(&ViewWindow::new(source), &block.core, order, &mut out, exec)
      };
      changed.fetch_add(flipped, Ordering::Relaxed);

      let mut guard = target
        .lock()
        .map_err(|_| OperatorError::Worker(format!("block {} found the sink lock poisoned", block.index)))?;
      guard.write_region(&block.core, &out);
      trace!(block = block.index, flipped, "block pass done");
      Ok(())
    })
  })?;

  Ok(PassOutcome {
    changed: changed.into_inner(),
    blocks: blocks.len(),
  })
}

/// Alternates passes between two views.
pub(crate) struct PingPong<'a> {
  source: &'a mut dyn VolumeView,
  sink: &'a mut dyn VolumeView,
  /// True once the latest result lives in `sink`.
  in_sink: bool,
  pub stats: TransformStats,
}

impl<'a> PingPong<'a> {
  pub fn new(source: &'a mut dyn VolumeView, sink: &'a mut dyn VolumeView) -> Self {
    Self {
      source,
      sink,
      in_sink: false,
      stats: TransformStats::default(),
    }
  }

  /// Run one pass from the latest result into the other view.
  pub fn pass<K: PassKernel>(
    &mut self,
    kernel: &K,
    halo: usize,
    processing: Option<&ProcessingParameter>,
    exec: &ExecutionConfig,
  ) -> Result<usize, OperatorError> {
    let outcome = if self.in_sink {
      run_pass(kernel, halo, &*self.sink, &mut *self.source, processing, exec)?
    } else {
      run_pass(kernel, halo, &*self.source, &mut *self.sink, processing, exec)?
    };
    self.in_sink = !self.in_sink;
    self.stats.passes += 1;
    self.stats.changed += outcome.changed;
    self.stats.blocks = outcome.blocks;
    Ok(outcome.changed)
  }

  /// The view holding the latest result.
  pub fn current(&self) -> &dyn VolumeView {
    if self.in_sink {
      &*self.sink
    } else {
      &*self.source
    }
  }

  pub fn finish(self) -> (TransformOutput, TransformStats) {
    let output = if self.in_sink {
      TransformOutput::InSink
    } else {
      TransformOutput::InSource
    };
    (output, self.stats)
  }
}
