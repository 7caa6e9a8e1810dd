//! Read-only neighbourhood access for kernels.
//!
//! Kernels address voxels in global coordinates and may step one voxel
//! outside the volume; everything outside reads as background.

use crate::volume::{MemoryOrder, Region, Shape, VolumeView};

/// Source voxels visible to a kernel.
pub trait Window: Sync {
  /// Shape of the whole volume.
  fn volume_shape(&self) -> Shape;

  /// Voxel at global `p`, `0` outside the volume.
  fn at(&self, p: [i64; 3]) -> u8;

  #[inline]
  fn at_u(&self, p: [usize; 3]) -> u8 {
    self.at([p[0] as i64, p[1] as i64, p[2] as i64])
  }
}

#[inline]
fn inside(shape: Shape, p: [i64; 3]) -> bool {
  (0..3).all(|a| p[a] >= 0 && (p[a] as usize) < shape[a])
}

/// Reads straight through a volume view (no copy).
pub struct ViewWindow<'a> {
  view: &'a dyn VolumeView,
}

impl<'a> ViewWindow<'a> {
  pub fn new(view: &'a dyn VolumeView) -> Self {
    Self { view }
  }
}

impl Window for ViewWindow<'_> {
  fn volume_shape(&self) -> Shape {
    self.view.shape()
  }

  #[inline]
  fn at(&self, p: [i64; 3]) -> u8 {
    if !inside(self.view.shape(), p) {
      return 0;
    }
    self.view.get([p[0] as usize, p[1] as usize, p[2] as usize])
  }
}

/// In-memory copy of a block plus its halo.
pub struct BlockBuffer {
  volume_shape: Shape,
  region: Region,
  order: MemoryOrder,
  data: Vec<u8>,
}

impl BlockBuffer {
  /// Copy `region` out of `view`.
  pub fn load(view: &dyn VolumeView, region: Region) -> Self {
    Self {
      volume_shape: view.shape(),
      region,
      order: view.order(),
      data: view.read_region(&region),
    }
  }

  pub fn region(&self) -> &Region {
    &self.region
  }
}

impl Window for BlockBuffer {
  fn volume_shape(&self) -> Shape {
    self.volume_shape
  }

  #[inline]
  fn at(&self, p: [i64; 3]) -> u8 {
    if !inside(self.volume_shape, p) {
      return 0;
    }
    let g = [p[0] as usize, p[1] as usize, p[2] as usize];
    debug_assert!(self.region.contains(g), "{:?} outside block halo {:?}", g, self.region);
    if !self.region.contains(g) {
      return 0;
    }
    let local = [
      g[0] - self.region.origin[0],
      g[1] - self.region.origin[1],
      g[2] - self.region.origin[2],
    ];
    self.data[self.order.index(self.region.extent, local)]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::volume::Volume;

  fn numbered(shape: Shape) -> Volume {
    let mut v = Volume::zeros(shape, MemoryOrder::ColumnMajor);
    for x in 0..shape[0] {
      for y in 0..shape[1] {
        for z in 0..shape[2] {
          v.set([x, y, z], (x + 10 * y + 100 * z) as u8);
        }
      }
    }
    v
  }

  #[test]
  fn test_view_window_reads_zero_outside() {
    let v = numbered([3, 3, 2]);
    let w = ViewWindow::new(&v);
    assert_eq!(w.at([2, 1, 1]), 112);
    assert_eq!(w.at([-1, 0, 0]), 0);
    assert_eq!(w.at([0, 3, 0]), 0);
  }

  #[test]
  fn test_block_buffer_matches_view() {
    let v = numbered([6, 5, 2]);
    let region = Region::new([1, 1, 0], [4, 3, 2]);
    let buf = BlockBuffer::load(&v, region);
    let w = ViewWindow::new(&v);
    for x in 1..5 {
      for y in 1..4 {
        for z in 0..2 {
          assert_eq!(buf.at_u([x, y, z]), w.at_u([x, y, z]));
        }
      }
    }
    assert_eq!(buf.at([1, 1, -1]), 0);
  }
}
