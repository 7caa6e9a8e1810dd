//! Block planning for the block-parallel transform path.
//!
//! ```text
//! full shape (X, Y, Z), workers N
//!        │
//!        ▼  plan(): halve the longest axis (floored at 16) until
//!           X' * Y' * Z' <= X * Y * Z / N
//! block shape (X', Y', Z')
//!        │
//!        ▼  decompose(): tile the splittable axes, grow each tile by the
//!           operator halo
//! Vec<Block { core, halo }>
//! ```
//!
//! Cores are disjoint and cover the volume exactly once; halos overlap and
//! are read-only.

use smallvec::{smallvec, SmallVec};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::volume::{voxel_count, Region, Shape};

/// Smallest block edge the planner produces along an axis (unless the
/// volume itself is thinner).
pub const MIN_BLOCK_EDGE: usize = 16;

/// Largest sub-volume one worker processes.
pub type BlockShape = [usize; 3];

/// Block shape for `worker_count` workers.
///
/// `worker_count <= 1` returns `full_shape` unchanged (single block).
pub fn plan(full_shape: Shape, worker_count: usize) -> BlockShape {
  plan_steps(full_shape, worker_count)
    .pop()
    .unwrap_or(full_shape)
}

/// Every intermediate shape visited by [`plan`], starting with `full_shape`.
pub fn plan_steps(full_shape: Shape, worker_count: usize) -> Vec<BlockShape> {
  let mut steps = vec![full_shape];
  if worker_count <= 1 {
    return steps;
  }

  let target = voxel_count(full_shape) as f64 / worker_count as f64;
  let floor = full_shape.map(|dim| dim.min(MIN_BLOCK_EDGE));
  let mut current = full_shape;

  while voxel_count(current) as f64 > target {
    let Some(axis) = longest_shrinkable_axis(current, floor) else {
      debug!(?current, target, "block floor reached before target");
      break;
    };
    current[axis] = (current[axis] / 2).max(floor[axis]);
    steps.push(current);
  }
  steps
}

/// Longest axis that is still above its floor; the first axis wins ties.
fn longest_shrinkable_axis(shape: BlockShape, floor: BlockShape) -> Option<usize> {
  let mut best: Option<usize> = None;
  for axis in 0..3 {
    if shape[axis] <= floor[axis] {
      continue;
    }
    if best.map_or(true, |b| shape[axis] > shape[b]) {
      best = Some(axis);
    }
  }
  best
}

// =============================================================================
// ProcessingParameter
// =============================================================================

/// Block decomposition settings handed to an operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessingParameter {
  /// Upper bound on a block's extent.
  pub size_max: BlockShape,
  /// Axes that may be split, in order.
  pub axes: SmallVec<[usize; 3]>,
  /// Equalize block extents along each split axis instead of fixed tiles
  /// plus a short remainder tile.
  pub optimization: bool,
  /// Copy each block (with halo) into memory before running the kernel,
  /// instead of reading it through the source view.
  pub as_memory: bool,
}

impl ProcessingParameter {
  /// Parameters for `workers` workers over `full_shape`.
  pub fn for_workers(full_shape: Shape, workers: usize) -> Self {
    Self {
      size_max: plan(full_shape, workers),
      axes: smallvec![0, 1, 2],
      optimization: false,
      as_memory: true,
    }
  }

  pub fn with_optimization(mut self, optimization: bool) -> Self {
    self.optimization = optimization;
    self
  }

  pub fn with_as_memory(mut self, as_memory: bool) -> Self {
    self.as_memory = as_memory;
    self
  }

  /// Reject zero-sized blocks and unknown axes.
  pub fn validate(&self) -> Result<()> {
    if self.size_max.iter().any(|&d| d == 0) {
      return Err(PipelineError::Config(format!(
        "block size_max {:?} has a zero axis",
        self.size_max
      )));
    }
    if let Some(axis) = self.axes.iter().find(|&&a| a > 2) {
      return Err(PipelineError::Config(format!(
        "split axis {} out of range 0..=2",
        axis
      )));
    }
    Ok(())
  }
}

// =============================================================================
// Decomposition
// =============================================================================

/// One unit of block-parallel work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
  pub index: usize,
  /// Voxels this block writes.
  pub core: Region,
  /// Voxels this block reads (`core` grown by the operator halo).
  pub halo: Region,
}

/// `(start, len)` segments along one axis.
fn segments(dim: usize, size: usize, optimization: bool) -> Vec<(usize, usize)> {
  if dim == 0 {
    return Vec::new();
  }
  let size = size.clamp(1, dim);
  let count = dim.div_ceil(size);
  let size = if optimization { dim.div_ceil(count) } else { size };

  let mut out = Vec::with_capacity(count);
  let mut start = 0;
  while start < dim {
    let len = size.min(dim - start);
    out.push((start, len));
    start += len;
  }
  out
}

/// Tile `full_shape` into blocks per `param`, each grown by `halo` voxels.
pub fn decompose(full_shape: Shape, param: &ProcessingParameter, halo: usize) -> Vec<Block> {
  let per_axis: [Vec<(usize, usize)>; 3] = std::array::from_fn(|axis| {
    if param.axes.contains(&axis) {
      segments(full_shape[axis], param.size_max[axis], param.optimization)
    } else if full_shape[axis] == 0 {
      Vec::new()
    } else {
      vec![(0, full_shape[axis])]
    }
  });

  let mut blocks = Vec::with_capacity(per_axis.iter().map(Vec::len).product());
  for &(x0, xl) in &per_axis[0] {
    for &(y0, yl) in &per_axis[1] {
      for &(z0, zl) in &per_axis[2] {
        let core = Region::new([x0, y0, z0], [xl, yl, zl]);
        blocks.push(Block {
          index: blocks.len(),
          core,
          halo: core.grow(halo, full_shape),
        });
      }
    }
  }
  blocks
}

#[cfg(test)]
#[path = "planner_test.rs"]
mod planner_test;
