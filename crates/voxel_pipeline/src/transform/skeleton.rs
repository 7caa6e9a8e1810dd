//! Directional parallel thinning.
//!
//! One step is six sub-iterations, one per face direction. Sub-iteration
//! `d` deletes every foreground voxel that
//!
//! - has a background neighbour in direction `d` (a border point),
//! - has more than one foreground 26-neighbour (not an end point),
//! - is simple.
//!
//! Each sub-iteration runs as eight passes over the parity subfields
//!
//! ```text
//! subfield(p) = (x & 1) | (y & 1) << 1 | (z & 1) << 2
//! ```
//!
//! so voxels deleted in the same pass are never 26-adjacent and the
//! simultaneous deletion equals a sequential one.
//!
//! Steps repeat until a whole step deletes nothing or the step cap is hit.
//! Voxels on the volume faces see background outside the volume, so the
//! input is expected to have an empty border.

use tracing::debug;

use super::convolution::{
  self, border_points, kernels, neighbourhood_code, neighbourhood_codes, subfield, KernelSet,
  FACE_DIRECTIONS, SUBFIELDS,
};
use super::window::Window;
use super::{
  apply_per_voxel, PassKernel, PingPong, TransformOperator, TransformOutput, TransformRequest,
  TransformStats,
};
use crate::error::OperatorError;
use crate::pool::ExecutionConfig;
use crate::volume::{MemoryOrder, Region, VolumeView};

/// How border candidates are found in each sub-iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThinningMethod {
  /// Evaluate every voxel of the block.
  Full,
  /// Collect border points first, then evaluate only those.
  #[default]
  Indexed,
}

/// Topology-preserving skeletonization operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Skeletonize {
  method: ThinningMethod,
}

impl Skeletonize {
  pub fn new(method: ThinningMethod) -> Self {
    Self { method }
  }

  /// `indexed` (default) or `full`.
  pub fn with_method(method: Option<&str>) -> Result<Self, OperatorError> {
    let method = match method {
      None | Some("indexed") => ThinningMethod::Indexed,
      Some("full") => ThinningMethod::Full,
      Some(other) => {
        return Err(OperatorError::UnknownMethod {
          operator: "skeletonize",
          method: other.to_string(),
        })
      }
    };
    Ok(Self::new(method))
  }

  pub fn method(&self) -> ThinningMethod {
    self.method
  }
}

#[inline]
fn deletable(set: &KernelSet, code: u32) -> bool {
  KernelSet::neighbour_count(code) > 1 && set.is_simple(code)
}

/// One subfield pass of a directional sub-iteration.
struct SubIteration {
  dir: usize,
  subfield: usize,
  method: ThinningMethod,
  set: &'static KernelSet,
}

impl SubIteration {
  fn full<W: Window>(&self, window: &W, core: &Region, order: MemoryOrder, out: &mut [u8]) -> usize {
    let d = FACE_DIRECTIONS[self.dir];
    apply_per_voxel(window, core, order, out, |w, p| {
      let centre = w.at_u(p);
      if centre == 0 {
        return 0;
      }
      if subfield(p) != self.subfield {
        return 1;
      }
      let q = [p[0] as i64 + d[0], p[1] as i64 + d[1], p[2] as i64 + d[2]];
      if w.at(q) == 0 && deletable(self.set, neighbourhood_code(self.set, w, p)) {
        0
      } else {
        1
      }
    })
  }

  fn indexed<W: Window>(
    &self,
    window: &W,
    core: &Region,
    order: MemoryOrder,
    out: &mut [u8],
    exec: &ExecutionConfig,
  ) -> usize {
    // start from a binarized copy of the core
    apply_per_voxel(window, core, order, out, |w, p| (w.at_u(p) != 0) as u8);

    let mut points = border_points(window, core, order, self.dir);
    points.retain(|&p| subfield(p) == self.subfield);
    let codes = neighbourhood_codes(window, &points, exec);
    let mut deleted = 0;
    for (p, code) in points.iter().zip(codes) {
      if deletable(self.set, code) {
        let local = [p[0] - core.origin[0], p[1] - core.origin[1], p[2] - core.origin[2]];
        out[order.index(core.extent, local)] = 0;
        deleted += 1;
      }
    }
    deleted
  }
}

impl PassKernel for SubIteration {
  fn apply<W: Window>(
    &self,
    window: &W,
    core: &Region,
    order: MemoryOrder,
    out: &mut [u8],
    exec: &ExecutionConfig,
  ) -> usize {
    match self.method {
      ThinningMethod::Full => self.full(window, core, order, out),
      ThinningMethod::Indexed => self.indexed(window, core, order, out, exec),
    }
  }
}

impl TransformOperator for Skeletonize {
  fn name(&self) -> &'static str {
    "skeletonize"
  }

  fn requires_empty_border(&self) -> bool {
    true
  }

  fn prepare(&self, _exec: &ExecutionConfig) {
    convolution::kernels();
  }

  fn run(
    &self,
    source: &mut dyn VolumeView,
    sink: &mut dyn VolumeView,
    request: &TransformRequest,
    exec: &ExecutionConfig,
  ) -> Result<(TransformOutput, TransformStats), OperatorError> {
    self.prepare(exec);
    let set = kernels();
    let processing = request.processing.as_ref();

    let mut pp = PingPong::new(source, sink);
    let mut step = 0;
    while request.passes.map_or(true, |cap| step < cap) {
      let mut deleted = 0;
      for dir in 0..FACE_DIRECTIONS.len() {
        for subfield in 0..SUBFIELDS {
          let sub = SubIteration {
            dir,
            subfield,
            method: self.method,
            set,
          };
          deleted += pp.pass(&sub, self.halo(), processing, exec)?;
        }
      }
      step += 1;
      debug!(step, deleted, "thinning step");
      if deleted == 0 {
        break;
      }
    }
    Ok(pp.finish())
  }
}

#[cfg(test)]
#[path = "skeleton_test.rs"]
mod skeleton_test;
