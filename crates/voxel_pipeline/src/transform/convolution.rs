//! Neighbourhood convolution primitives and the shared kernel set.
//!
//! A voxel's 3x3x3 neighbourhood is folded into a 26-bit code by weighting
//! neighbour `k` with `2^k`:
//!
//! ```text
//! k = 9 * (dx + 1) + 3 * (dy + 1) + (dz + 1), skipping the centre (k = 13)
//!
//!   dz=-1      dz=0       dz=+1
//!   .  .  .    .  F  .    .  .  .      F = face neighbour (6)
//!   .  F  .    F  p  F    .  F  .      corners + edges fill the rest
//!   .  .  .    .  F  .    .  .  .
//! ```
//!
//! The kernel set (offsets, adjacency masks) is built once per process on
//! first use; concurrent callers share the same instance.

use std::sync::OnceLock;

use rayon::prelude::*;

use super::window::Window;
use crate::pool::ExecutionConfig;
use crate::volume::{MemoryOrder, Region};

/// Neighbours in a 3x3x3 cube, centre excluded.
pub const NEIGHBOUR_COUNT: usize = 26;

const ALL_NEIGHBOURS: u32 = (1 << NEIGHBOUR_COUNT) - 1;

/// Point lists shorter than this are evaluated on the calling thread.
const PARALLEL_MIN_POINTS: usize = 4096;

/// Face directions, in the order used by `KernelSet::faces`.
pub const FACE_DIRECTIONS: [[i64; 3]; 6] = [
  [-1, 0, 0],
  [1, 0, 0],
  [0, -1, 0],
  [0, 1, 0],
  [0, 0, -1],
  [0, 0, 1],
];

/// Precomputed offsets and adjacency used by every neighbourhood kernel.
pub struct KernelSet {
  /// Offset of neighbour bit `k`.
  pub offsets: [[i64; 3]; NEIGHBOUR_COUNT],
  /// Neighbour bit of each face direction (see `FACE_DIRECTIONS`).
  pub faces: [usize; 6],
  face_mask: u32,
  /// Neighbourhood without the 8 corners.
  n18_mask: u32,
  /// Per bit: bits 26-adjacent to it inside the cube.
  adj26: [u32; NEIGHBOUR_COUNT],
  /// Per bit: bits 6-adjacent to it inside the cube.
  adj6: [u32; NEIGHBOUR_COUNT],
}

static KERNELS: OnceLock<KernelSet> = OnceLock::new();

/// Shared kernel set, built on first call.
pub fn kernels() -> &'static KernelSet {
  KERNELS.get_or_init(KernelSet::build)
}

/// True once the kernel set exists.
pub fn kernels_ready() -> bool {
  KERNELS.get().is_some()
}

impl KernelSet {
  fn build() -> Self {
    let mut offsets = [[0i64; 3]; NEIGHBOUR_COUNT];
    let mut k = 0;
    for dx in -1..=1i64 {
      for dy in -1..=1i64 {
        for dz in -1..=1i64 {
          if dx == 0 && dy == 0 && dz == 0 {
            continue;
          }
          offsets[k] = [dx, dy, dz];
          k += 1;
        }
      }
    }

    let bit_of = |o: [i64; 3]| -> usize {
      offsets
        .iter()
        .position(|&q| q == o)
        .unwrap_or(NEIGHBOUR_COUNT)
    };
    let faces = FACE_DIRECTIONS.map(bit_of);

    let mut face_mask = 0u32;
    let mut n18_mask = 0u32;
    let mut adj26 = [0u32; NEIGHBOUR_COUNT];
    let mut adj6 = [0u32; NEIGHBOUR_COUNT];
    for (i, a) in offsets.iter().enumerate() {
      let nonzero = a.iter().filter(|&&c| c != 0).count();
      if nonzero == 1 {
        face_mask |= 1 << i;
      }
      if nonzero <= 2 {
        n18_mask |= 1 << i;
      }
      for (j, b) in offsets.iter().enumerate() {
        if i == j {
          continue;
        }
        let d = [(a[0] - b[0]).abs(), (a[1] - b[1]).abs(), (a[2] - b[2]).abs()];
        if d.iter().all(|&c| c <= 1) {
          adj26[i] |= 1 << j;
        }
        if d[0] + d[1] + d[2] == 1 {
          adj6[i] |= 1 << j;
        }
      }
    }

    Self {
      offsets,
      faces,
      face_mask,
      n18_mask,
      adj26,
      adj6,
    }
  }

  /// True if the centre of neighbourhood `code` is a simple point
  /// (26-connectivity foreground, 6-connectivity background): flipping it
  /// changes neither the number of object components nor of cavities/tunnels.
  pub fn is_simple(&self, code: u32) -> bool {
    let foreground = code & ALL_NEIGHBOURS;
    if components(foreground, &self.adj26, foreground) != 1 {
      return false;
    }
    let background = !code & self.n18_mask;
    components(background, &self.adj6, self.face_mask) == 1
  }

  /// Bit of face direction `dir` in a neighbourhood code.
  #[inline]
  pub fn face_bit(&self, dir: usize) -> u32 {
    1 << self.faces[dir]
  }

  /// Number of foreground neighbours in `code`.
  #[inline]
  pub fn neighbour_count(code: u32) -> u32 {
    (code & ALL_NEIGHBOURS).count_ones()
  }

  /// Number of foreground face neighbours in `code`.
  #[inline]
  pub fn face_count(&self, code: u32) -> u32 {
    (code & self.face_mask).count_ones()
  }
}

/// Components of `set` under `adj` that contain at least one `seeds` bit.
fn components(set: u32, adj: &[u32; NEIGHBOUR_COUNT], seeds: u32) -> usize {
  let mut remaining = set;
  let mut count = 0;
  while remaining & seeds != 0 {
    let start = (remaining & seeds).trailing_zeros();
    let mut component = 1u32 << start;
    let mut frontier = component;
    while frontier != 0 {
      let i = frontier.trailing_zeros() as usize;
      frontier &= frontier - 1;
      let next = adj[i] & set & !component;
      component |= next;
      frontier |= next;
    }
    remaining &= !component;
    count += 1;
  }
  count
}

// =============================================================================
// Primitives
// =============================================================================

/// Parity subfields of the grid. Two distinct voxels of one subfield are
/// never 26-adjacent, so simple points of one subfield can flip together.
pub const SUBFIELDS: usize = 8;

/// Subfield of `p`: `(x & 1) | (y & 1) << 1 | (z & 1) << 2`.
#[inline]
pub fn subfield(p: [usize; 3]) -> usize {
  (p[0] & 1) | (p[1] & 1) << 1 | (p[2] & 1) << 2
}

/// 26-neighbourhood code of `p`.
#[inline]
pub fn neighbourhood_code<W: Window>(set: &KernelSet, window: &W, p: [usize; 3]) -> u32 {
  let c = [p[0] as i64, p[1] as i64, p[2] as i64];
  let mut code = 0u32;
  for (k, o) in set.offsets.iter().enumerate() {
    if window.at([c[0] + o[0], c[1] + o[1], c[2] + o[2]]) != 0 {
      code |= 1 << k;
    }
  }
  code
}

/// 7-bit face code of `p`: bits 0..6 follow `FACE_DIRECTIONS`, bit 6 is `p`.
#[inline]
pub fn face_code<W: Window>(window: &W, p: [usize; 3]) -> u8 {
  let c = [p[0] as i64, p[1] as i64, p[2] as i64];
  let mut code = 0u8;
  for (bit, d) in FACE_DIRECTIONS.iter().enumerate() {
    if window.at([c[0] + d[0], c[1] + d[1], c[2] + d[2]]) != 0 {
      code |= 1 << bit;
    }
  }
  if window.at(c) != 0 {
    code |= 1 << 6;
  }
  code
}

/// Neighbourhood codes for a point list, split across the pool.
pub fn neighbourhood_codes<W: Window>(
  window: &W,
  points: &[[usize; 3]],
  exec: &ExecutionConfig,
) -> Vec<u32> {
  let set = kernels();
  if exec.is_serial() || points.len() < PARALLEL_MIN_POINTS {
    return points
      .iter()
      .map(|&p| neighbourhood_code(set, window, p))
      .collect();
  }
  exec.install(|| {
    points
      .par_iter()
      .with_min_len(PARALLEL_MIN_POINTS / 4)
      .map(|&p| neighbourhood_code(set, window, p))
      .collect()
  })
}

/// Foreground points of `region` whose neighbour in face direction `dir`
/// is background, in `order`.
pub fn border_points<W: Window>(
  window: &W,
  region: &Region,
  order: MemoryOrder,
  dir: usize,
) -> Vec<[usize; 3]> {
  let d = FACE_DIRECTIONS[dir];
  let mut points = Vec::new();
  for_each_in(region, order, |p| {
    if window.at_u(p) == 0 {
      return;
    }
    let q = [p[0] as i64 + d[0], p[1] as i64 + d[1], p[2] as i64 + d[2]];
    if window.at(q) == 0 {
      points.push(p);
    }
  });
  points
}

/// Visit every voxel of `region` (global coordinates) in `order`.
pub fn for_each_in(region: &Region, order: MemoryOrder, mut f: impl FnMut([usize; 3])) {
  let o = region.origin;
  let e = region.end();
  match order {
    MemoryOrder::RowMajor => {
      for x in o[0]..e[0] {
        for y in o[1]..e[1] {
          for z in o[2]..e[2] {
            f([x, y, z]);
          }
        }
      }
    }
    MemoryOrder::ColumnMajor => {
      for z in o[2]..e[2] {
        for y in o[1]..e[1] {
          for x in o[0]..e[0] {
            f([x, y, z]);
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transform::window::ViewWindow;
  use crate::volume::{Volume, VolumeView};

  fn code_of(points: &[[i64; 3]]) -> u32 {
    let set = kernels();
    points.iter().fold(0u32, |acc, p| {
      let k = set.offsets.iter().position(|q| q == p).unwrap();
      acc | (1 << k)
    })
  }

  #[test]
  fn test_kernel_set_layout() {
    let set = kernels();
    assert!(kernels_ready());
    assert_eq!(set.offsets[0], [-1, -1, -1]);
    assert_eq!(set.offsets[25], [1, 1, 1]);
    assert_eq!(set.face_mask.count_ones(), 6);
    assert_eq!(set.n18_mask.count_ones(), 18);
    assert_eq!(set.offsets[set.faces[1]], [1, 0, 0]);
  }

  #[test]
  fn test_isolated_point_is_not_simple() {
    assert!(!kernels().is_simple(0));
  }

  #[test]
  fn test_interior_point_is_not_simple() {
    assert!(!kernels().is_simple(ALL_NEIGHBOURS));
  }

  #[test]
  fn test_end_of_line_is_simple() {
    assert!(kernels().is_simple(code_of(&[[1, 0, 0]])));
  }

  #[test]
  fn test_middle_of_line_is_not_simple() {
    assert!(!kernels().is_simple(code_of(&[[1, 0, 0], [-1, 0, 0]])));
  }

  #[test]
  fn test_half_space_border_is_simple() {
    let mut pts = Vec::new();
    for dy in -1..=1 {
      for dz in -1..=1 {
        pts.push([0, dy, dz]);
        pts.push([-1, dy, dz]);
      }
    }
    pts.retain(|p| *p != [0, 0, 0]);
    assert!(kernels().is_simple(code_of(&pts)));
  }

  #[test]
  fn test_codes_match_serial_and_parallel() {
    let shape = [24, 24, 24];
    let mut v = Volume::zeros(shape, MemoryOrder::RowMajor);
    let mut seed = 7u32;
    for x in 0..24 {
      for y in 0..24 {
        for z in 0..24 {
          seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
          v.set([x, y, z], (seed >> 31) as u8);
        }
      }
    }
    let w = ViewWindow::new(&v);
    let mut points = Vec::new();
    for_each_in(&Region::whole(shape), MemoryOrder::RowMajor, |p| points.push(p));

    let serial = neighbourhood_codes(&w, &points, &ExecutionConfig::serial().unwrap());
    let exec = crate::pool::ProcessPoolConfigurator::apply(Some(crate::pool::WorkerCount::Count(4)))
      .unwrap();
    let parallel = neighbourhood_codes(&w, &points, &exec);
    assert_eq!(serial, parallel);
  }

  #[test]
  fn test_subfield_members_are_not_adjacent() {
    let set = kernels();
    for x in 0..2 {
      for y in 0..2 {
        for z in 0..2 {
          let p = [x + 2, y + 2, z + 2];
          for o in set.offsets.iter() {
            let q = [
              (p[0] as i64 + o[0]) as usize,
              (p[1] as i64 + o[1]) as usize,
              (p[2] as i64 + o[2]) as usize,
            ];
            assert_ne!(subfield(p), subfield(q), "{:?} and {:?}", p, q);
          }
        }
      }
    }
    let all: std::collections::HashSet<usize> =
      (0..8).map(|i| subfield([i & 1, (i >> 1) & 1, (i >> 2) & 1])).collect();
    assert_eq!(all.len(), SUBFIELDS);
  }

  #[test]
  fn test_face_code_marks_centre() {
    let mut v = Volume::zeros([3, 3, 3], MemoryOrder::RowMajor);
    v.set([1, 1, 1], 1);
    v.set([2, 1, 1], 1);
    let w = ViewWindow::new(&v);
    assert_eq!(face_code(&w, [1, 1, 1]), (1 << 6) | (1 << 1));
    assert_eq!(face_code(&w, [2, 1, 1]), (1 << 6) | 1);
  }

  #[test]
  fn test_border_points_direction() {
    let mut v = Volume::zeros([4, 1, 1], MemoryOrder::RowMajor);
    v.set([1, 0, 0], 1);
    v.set([2, 0, 0], 1);
    let w = ViewWindow::new(&v);
    let whole = Region::whole([4, 1, 1]);
    assert_eq!(border_points(&w, &whole, MemoryOrder::RowMajor, 0), vec![[1, 0, 0]]);
    assert_eq!(border_points(&w, &whole, MemoryOrder::RowMajor, 1), vec![[2, 0, 0]]);
  }
}
