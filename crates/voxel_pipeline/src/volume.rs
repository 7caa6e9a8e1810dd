//! Volume types and the shared addressing contract.
//!
//! ```text
//! RowMajor    (Z fastest):  index = (x * Y + y) * Z + z
//! ColumnMajor (X fastest):  index = (z * Y + y) * X + x
//! ```
//!
//! Operators only ever address voxels by `(x, y, z)`, so a volume can be
//! stored in either order without changing spatial adjacency. Conversions
//! between orders are explicit (`Volume::to_order`).

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Full extent of a volume along X, Y, Z.
pub type Shape = [usize; 3];

/// Number of voxels in a shape.
#[inline]
pub fn voxel_count(shape: Shape) -> usize {
  shape[0] * shape[1] * shape[2]
}

// =============================================================================
// MemoryOrder
// =============================================================================

/// Linear layout of a 3D array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOrder {
  /// C order, Z is the fastest-varying axis.
  #[default]
  RowMajor,
  /// Fortran order, X is the fastest-varying axis.
  ColumnMajor,
}

impl MemoryOrder {
  /// Element strides for each axis.
  #[inline]
  pub fn strides(self, shape: Shape) -> [usize; 3] {
    match self {
      MemoryOrder::RowMajor => [shape[1] * shape[2], shape[2], 1],
      MemoryOrder::ColumnMajor => [1, shape[0], shape[0] * shape[1]],
    }
  }

  /// Linear index of `p` inside `shape`.
  #[inline]
  pub fn index(self, shape: Shape, p: [usize; 3]) -> usize {
    match self {
      MemoryOrder::RowMajor => (p[0] * shape[1] + p[1]) * shape[2] + p[2],
      MemoryOrder::ColumnMajor => (p[2] * shape[1] + p[1]) * shape[0] + p[0],
    }
  }

  /// Coordinate stored at linear index `i`; inverse of `index`.
  #[inline]
  pub fn coords(self, shape: Shape, i: usize) -> [usize; 3] {
    match self {
      MemoryOrder::RowMajor => [i / (shape[1] * shape[2]), (i / shape[2]) % shape[1], i % shape[2]],
      MemoryOrder::ColumnMajor => [i % shape[0], (i / shape[0]) % shape[1], i / (shape[0] * shape[1])],
    }
  }

  /// Axis whose neighbours are adjacent in memory.
  #[inline]
  pub fn fastest_axis(self) -> usize {
    match self {
      MemoryOrder::RowMajor => 2,
      MemoryOrder::ColumnMajor => 0,
    }
  }

  pub(crate) fn code(self) -> u8 {
    match self {
      MemoryOrder::RowMajor => b'C',
      MemoryOrder::ColumnMajor => b'F',
    }
  }

  pub(crate) fn from_code(code: u8) -> Option<Self> {
    match code {
      b'C' => Some(MemoryOrder::RowMajor),
      b'F' => Some(MemoryOrder::ColumnMajor),
      _ => None,
    }
  }
}

/// Visit every contiguous run of an `extent`-sized box laid out in `order`.
///
/// `f` receives the box-local coordinate of the run start; each run spans
/// `extent[order.fastest_axis()]` voxels.
pub(crate) fn for_each_run(order: MemoryOrder, extent: Shape, mut f: impl FnMut([usize; 3])) {
  if voxel_count(extent) == 0 {
    return;
  }
  let (outer, inner) = match order {
    MemoryOrder::RowMajor => (0, 1),
    MemoryOrder::ColumnMajor => (2, 1),
  };
  for i in 0..extent[outer] {
    for j in 0..extent[inner] {
      let mut p = [0usize; 3];
      p[outer] = i;
      p[inner] = j;
      f(p);
    }
  }
}

// =============================================================================
// Region
// =============================================================================

/// Axis-aligned box inside a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
  pub origin: [usize; 3],
  pub extent: [usize; 3],
}

impl Region {
  pub fn new(origin: [usize; 3], extent: [usize; 3]) -> Self {
    Self { origin, extent }
  }

  /// Region covering the whole shape.
  pub fn whole(shape: Shape) -> Self {
    Self::new([0; 3], shape)
  }

  /// Exclusive upper corner.
  #[inline]
  pub fn end(&self) -> [usize; 3] {
    [
      self.origin[0] + self.extent[0],
      self.origin[1] + self.extent[1],
      self.origin[2] + self.extent[2],
    ]
  }

  /// Voxels in the region.
  #[inline]
  pub fn voxel_count(&self) -> usize {
    voxel_count(self.extent)
  }

  /// True if the region lies inside `shape`.
  pub fn fits(&self, shape: Shape) -> bool {
    let end = self.end();
    (0..3).all(|a| end[a] <= shape[a])
  }

  /// True if `p` (global coordinates) is inside the region.
  #[inline]
  pub fn contains(&self, p: [usize; 3]) -> bool {
    let end = self.end();
    (0..3).all(|a| p[a] >= self.origin[a] && p[a] < end[a])
  }

  /// Grow by `by` voxels on every side, clipped to `shape`.
  pub fn grow(&self, by: usize, shape: Shape) -> Region {
    let end = self.end();
    let mut origin = [0usize; 3];
    let mut extent = [0usize; 3];
    for a in 0..3 {
      origin[a] = self.origin[a].saturating_sub(by);
      extent[a] = (end[a] + by).min(shape[a]) - origin[a];
    }
    Region { origin, extent }
  }
}

// =============================================================================
// VolumeView - one addressing contract, in-memory or memory-mapped
// =============================================================================

/// Binary voxel array addressed by `(x, y, z)`.
///
/// Implemented by [`Volume`] (plain memory) and
/// [`StagedArray`](crate::staging::StagedArray) (memory-mapped file), so
/// orchestration and operators are written once against this trait.
pub trait VolumeView: Send + Sync {
  fn shape(&self) -> Shape;
  fn order(&self) -> MemoryOrder;
  fn voxels(&self) -> &[u8];
  fn voxels_mut(&mut self) -> &mut [u8];

  #[inline]
  fn index(&self, p: [usize; 3]) -> usize {
    self.order().index(self.shape(), p)
  }

  #[inline]
  fn get(&self, p: [usize; 3]) -> u8 {
    self.voxels()[self.index(p)]
  }

  #[inline]
  fn set(&mut self, p: [usize; 3], value: u8) {
    let i = self.index(p);
    self.voxels_mut()[i] = value;
  }

  /// Copy a region out, laid out in this view's order over `region.extent`.
  fn read_region(&self, region: &Region) -> Vec<u8> {
    debug_assert!(region.fits(self.shape()));
    let order = self.order();
    let run = region.extent[order.fastest_axis()];
    let mut out = vec![0u8; region.voxel_count()];
    let voxels = self.voxels();
    for_each_run(order, region.extent, |local| {
      let dst = order.index(region.extent, local);
      let src = self.index([
        region.origin[0] + local[0],
        region.origin[1] + local[1],
        region.origin[2] + local[2],
      ]);
      out[dst..dst + run].copy_from_slice(&voxels[src..src + run]);
    });
    out
  }

  /// Write `data` (this view's order over `region.extent`) into a region.
  fn write_region(&mut self, region: &Region, data: &[u8]) {
    debug_assert!(region.fits(self.shape()));
    debug_assert_eq!(data.len(), region.voxel_count());
    let order = self.order();
    let shape = self.shape();
    let run = region.extent[order.fastest_axis()];
    let voxels = self.voxels_mut();
    for_each_run(order, region.extent, |local| {
      let src = order.index(region.extent, local);
      let dst = order.index(
        shape,
        [
          region.origin[0] + local[0],
          region.origin[1] + local[1],
          region.origin[2] + local[2],
        ],
      );
      voxels[dst..dst + run].copy_from_slice(&data[src..src + run]);
    });
  }

  /// Number of non-zero voxels.
  fn count_foreground(&self) -> usize {
    self.voxels().par_iter().filter(|&&v| v != 0).count()
  }

  /// Overwrite every voxel with `other`, converting order if needed.
  fn copy_from(&mut self, other: &dyn VolumeView) {
    debug_assert_eq!(self.shape(), other.shape());
    if self.order() == other.order() {
      self.voxels_mut().copy_from_slice(other.voxels());
      return;
    }
    let shape = self.shape();
    for x in 0..shape[0] {
      for y in 0..shape[1] {
        for z in 0..shape[2] {
          let v = other.get([x, y, z]);
          self.set([x, y, z], v);
        }
      }
    }
  }

  /// Materialize as a plain in-memory volume in the same order.
  fn to_volume(&self) -> Volume {
    Volume {
      shape: self.shape(),
      order: self.order(),
      data: self.voxels().to_vec(),
    }
  }
}

// =============================================================================
// Volume - plain in-memory binary array
// =============================================================================

/// Dense binary volume, one byte per voxel, values `{0, 1}`.
#[derive(Clone, PartialEq, Eq)]
pub struct Volume {
  shape: Shape,
  order: MemoryOrder,
  data: Vec<u8>,
}

impl Volume {
  /// All-background volume.
  pub fn zeros(shape: Shape, order: MemoryOrder) -> Self {
    Self {
      shape,
      order,
      data: vec![0; voxel_count(shape)],
    }
  }

  /// Wrap an existing buffer laid out in `order`.
  pub fn from_vec(shape: Shape, order: MemoryOrder, data: Vec<u8>) -> Result<Self> {
    if data.len() != voxel_count(shape) {
      return Err(PipelineError::Config(format!(
        "buffer of {} voxels does not fit shape {:?}",
        data.len(),
        shape
      )));
    }
    Ok(Self { shape, order, data })
  }

  /// Same voxels, relaid in `order`.
  pub fn to_order(&self, order: MemoryOrder) -> Volume {
    if order == self.order {
      return self.clone();
    }
    let mut out = Volume::zeros(self.shape, order);
    out.copy_from(self);
    out
  }

  pub fn into_vec(self) -> Vec<u8> {
    self.data
  }
}

impl VolumeView for Volume {
  fn shape(&self) -> Shape {
    self.shape
  }

  fn order(&self) -> MemoryOrder {
    self.order
  }

  fn voxels(&self) -> &[u8] {
    &self.data
  }

  fn voxels_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl std::fmt::Debug for Volume {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Volume({}x{}x{}, {:?})",
      self.shape[0], self.shape[1], self.shape[2], self.order
    )
  }
}

// =============================================================================
// RawVolume - typed samples as read from disk
// =============================================================================

/// Voxel samples in their on-disk element type.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
  U8(Vec<u8>),
  U16(Vec<u16>),
  U32(Vec<u32>),
  I8(Vec<i8>),
  I16(Vec<i16>),
  I32(Vec<i32>),
  F32(Vec<f32>),
  F64(Vec<f64>),
}

macro_rules! threshold {
  ($v:expr, $zero:expr) => {
    $v.into_par_iter().map(|s| (s > $zero) as u8).collect()
  };
}

/// Threshold while relaying `from` -> `to`; writes the output buffer only.
macro_rules! threshold_reordered {
  ($v:expr, $zero:expr, $shape:expr, $from:expr, $to:expr) => {{
    let (src, shape, from, to) = ($v, $shape, $from, $to);
    let mut out = vec![0u8; src.len()];
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
      *o = (src[from.index(shape, to.coords(shape, i))] > $zero) as u8;
    });
    out
  }};
}

impl Samples {
  pub fn len(&self) -> usize {
    match self {
      Samples::U8(v) => v.len(),
      Samples::U16(v) => v.len(),
      Samples::U32(v) => v.len(),
      Samples::I8(v) => v.len(),
      Samples::I16(v) => v.len(),
      Samples::I32(v) => v.len(),
      Samples::F32(v) => v.len(),
      Samples::F64(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Element type name, for progress output.
  pub fn dtype_name(&self) -> &'static str {
    match self {
      Samples::U8(_) => "uint8",
      Samples::U16(_) => "uint16",
      Samples::U32(_) => "uint32",
      Samples::I8(_) => "int8",
      Samples::I16(_) => "int16",
      Samples::I32(_) => "int32",
      Samples::F32(_) => "float32",
      Samples::F64(_) => "float64",
    }
  }

  /// Threshold at `> 0`, consuming the typed buffer.
  fn threshold(self) -> Vec<u8> {
    match self {
      Samples::U8(v) => threshold!(v, 0),
      Samples::U16(v) => threshold!(v, 0),
      Samples::U32(v) => threshold!(v, 0),
      Samples::I8(v) => threshold!(v, 0),
      Samples::I16(v) => threshold!(v, 0),
      Samples::I32(v) => threshold!(v, 0),
      Samples::F32(v) => threshold!(v, 0.0),
      Samples::F64(v) => threshold!(v, 0.0),
    }
  }

  fn threshold_into(self, shape: Shape, from: MemoryOrder, to: MemoryOrder) -> Vec<u8> {
    match self {
      Samples::U8(v) => threshold_reordered!(v, 0, shape, from, to),
      Samples::U16(v) => threshold_reordered!(v, 0, shape, from, to),
      Samples::U32(v) => threshold_reordered!(v, 0, shape, from, to),
      Samples::I8(v) => threshold_reordered!(v, 0, shape, from, to),
      Samples::I16(v) => threshold_reordered!(v, 0, shape, from, to),
      Samples::I32(v) => threshold_reordered!(v, 0, shape, from, to),
      Samples::F32(v) => threshold_reordered!(v, 0.0, shape, from, to),
      Samples::F64(v) => threshold_reordered!(v, 0.0, shape, from, to),
    }
  }
}

/// Volume as produced by a [`VolumeStore`](crate::store::VolumeStore).
#[derive(Clone, Debug, PartialEq)]
pub struct RawVolume {
  pub shape: Shape,
  pub order: MemoryOrder,
  pub samples: Samples,
}

impl RawVolume {
  /// Threshold at `> 0` into a binary volume with the same shape and order.
  ///
  /// The typed buffer is consumed so only one full volume stays resident.
  pub fn binarize(self) -> Volume {
    let data = self.samples.threshold();
    Volume {
      shape: self.shape,
      order: self.order,
      data,
    }
  }

  /// Threshold at `> 0` straight into `order`.
  ///
  /// Same footprint as [`binarize`](Self::binarize): the typed buffer plus
  /// one binary volume, never a second binary copy for the relayout.
  pub fn binarize_to(self, order: MemoryOrder) -> Volume {
    if order == self.order {
      return self.binarize();
    }
    let data = self.samples.threshold_into(self.shape, self.order, order);
    Volume {
      shape: self.shape,
      order,
      data,
    }
  }
}

#[cfg(test)]
#[path = "volume_test.rs"]
mod volume_test;
