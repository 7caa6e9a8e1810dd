//! Lookup-table driven topological border smoothing.
//!
//! Each pass looks at a voxel and its six face neighbours:
//!
//! ```text
//! centre  face neighbours set  candidate
//! 1       0 or 1               remove   (spur / protrusion)
//! 0       5 or 6               fill     (dent / pit)
//! ```
//!
//! A candidate is only flipped if it is a simple point. One iteration runs
//! as eight passes, one per parity subfield, so voxels flipped together are
//! never adjacent and the pass equals flipping them one at a time: object
//! count, cavities and tunnels are left alone. The 7-bit face configuration
//! is resolved through a 128-entry table built once per process.

use std::sync::OnceLock;

use tracing::debug;

use super::convolution::{
  self, face_code, kernels, neighbourhood_code, subfield, KernelSet, SUBFIELDS,
};
use super::window::Window;
use super::{
  apply_per_voxel, PassKernel, PingPong, TransformOperator, TransformOutput, TransformRequest,
  TransformStats,
};
use crate::error::OperatorError;
use crate::pool::ExecutionConfig;
use crate::volume::{MemoryOrder, Region, VolumeView};

/// Passes run when the request does not say otherwise.
pub const DEFAULT_ITERATIONS: usize = 2;

const TABLE_LEN: usize = 1 << 7;
const CENTRE_BIT: u8 = 1 << 6;

/// Table entry: voxel is a removal/fill candidate.
const KEEP: u8 = 0;
const CANDIDATE: u8 = 1;

static TABLE: OnceLock<[u8; TABLE_LEN]> = OnceLock::new();

/// Candidate rule for one face configuration.
fn is_candidate(code: u8) -> bool {
  let faces = (code & !CENTRE_BIT).count_ones();
  if code & CENTRE_BIT != 0 {
    faces <= 1
  } else {
    faces >= 5
  }
}

fn build_table() -> [u8; TABLE_LEN] {
  let mut table = [KEEP; TABLE_LEN];
  for (code, entry) in table.iter_mut().enumerate() {
    if is_candidate(code as u8) {
      *entry = CANDIDATE;
    }
  }
  debug!(
    candidates = table.iter().filter(|&&e| e == CANDIDATE).count(),
    "built smoothing table"
  );
  table
}

/// The smoothing table, built on first use.
pub fn lookup_table() -> &'static [u8; TABLE_LEN] {
  TABLE.get_or_init(build_table)
}

/// True once the smoothing table exists.
pub fn table_ready() -> bool {
  TABLE.get().is_some()
}

/// How candidates are found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SmoothMethod {
  /// Face configuration looked up in the precomputed table.
  #[default]
  Table,
  /// Rule evaluated per voxel.
  Direct,
}

/// Topological smoothing operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Smooth {
  method: SmoothMethod,
}

impl Smooth {
  pub fn new(method: SmoothMethod) -> Self {
    Self { method }
  }

  /// `table` (default) or `direct`.
  pub fn with_method(method: Option<&str>) -> Result<Self, OperatorError> {
    let method = match method {
      None | Some("table") => SmoothMethod::Table,
      Some("direct") => SmoothMethod::Direct,
      Some(other) => {
        return Err(OperatorError::UnknownMethod {
          operator: "smooth",
          method: other.to_string(),
        })
      }
    };
    Ok(Self::new(method))
  }

  pub fn method(&self) -> SmoothMethod {
    self.method
  }
}

/// One subfield pass of a smoothing iteration.
struct SmoothKernel<'t> {
  table: Option<&'t [u8; TABLE_LEN]>,
  set: &'static KernelSet,
  subfield: usize,
}

impl SmoothKernel<'_> {
  #[inline]
  fn eval<W: Window>(&self, window: &W, p: [usize; 3]) -> u8 {
    let code = face_code(window, p);
    let centre = (code & CENTRE_BIT != 0) as u8;
    if subfield(p) != self.subfield {
      return centre;
    }
    let candidate = match self.table {
      Some(table) => table[code as usize] == CANDIDATE,
      None => is_candidate(code),
    };
    if candidate && self.set.is_simple(neighbourhood_code(self.set, window, p)) {
      1 - centre
    } else {
      centre
    }
  }
}

impl PassKernel for SmoothKernel<'_> {
  fn apply<W: Window>(
    &self,
    window: &W,
    core: &Region,
    order: MemoryOrder,
    out: &mut [u8],
    _exec: &ExecutionConfig,
  ) -> usize {
    apply_per_voxel(window, core, order, out, |w, p| self.eval(w, p))
  }
}

impl TransformOperator for Smooth {
  fn name(&self) -> &'static str {
    "smooth"
  }

  fn prepare(&self, _exec: &ExecutionConfig) {
    convolution::kernels();
    if self.method == SmoothMethod::Table {
      lookup_table();
    }
  }

  fn run(
    &self,
    source: &mut dyn VolumeView,
    sink: &mut dyn VolumeView,
    request: &TransformRequest,
    exec: &ExecutionConfig,
  ) -> Result<(TransformOutput, TransformStats), OperatorError> {
    self.prepare(exec);
    let table = match self.method {
      SmoothMethod::Table => Some(lookup_table()),
      SmoothMethod::Direct => None,
    };
    let set = kernels();
    let iterations = request.passes.unwrap_or(DEFAULT_ITERATIONS);
    let processing = request.processing.as_ref();

    let mut pp = PingPong::new(source, sink);
    for iteration in 0..iterations {
      let mut changed = 0;
      for subfield in 0..SUBFIELDS {
        let kernel = SmoothKernel {
          table,
          set,
          subfield,
        };
        changed += pp.pass(&kernel, self.halo(), processing, exec)?;
      }
      debug!(iteration, changed, "smoothing iteration");
      if changed == 0 {
        break;
      }
    }
    Ok(pp.finish())
  }
}

#[cfg(test)]
#[path = "smoothing_test.rs"]
mod smoothing_test;
