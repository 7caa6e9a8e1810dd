//! `.vxl` files: a staging header followed by the voxel bytes.
//!
//! The layout is the one staged arrays use, so a retained staging file can
//! be renamed to `.vxl` and read back.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use super::{ensure_parent, VolumeStore};
use crate::error::{PipelineError, Result};
use crate::staging::{Dtype, Header, HEADER_LEN};
use crate::volume::{RawVolume, Samples, VolumeView};

/// File extension handled by [`RawStore`].
pub const EXTENSION: &str = "vxl";

/// Header + payload volume files, read and written in their own order.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawStore;

impl VolumeStore for RawStore {
  fn name(&self) -> &'static str {
    "raw"
  }

  fn read(&self, path: &Path) -> Result<RawVolume> {
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let header = Header::decode(&bytes).map_err(|reason| PipelineError::format(path, reason))?;
    if bytes.len() != header.file_len() {
      return Err(PipelineError::format(
        path,
        format!("file is {} bytes, header implies {}", bytes.len(), header.file_len()),
      ));
    }
    debug!(path = %path.display(), shape = ?header.shape, "read raw volume");
    Ok(RawVolume {
      shape: header.shape,
      order: header.order,
      samples: Samples::U8(bytes[HEADER_LEN..].to_vec()),
    })
  }

  fn write(&self, path: &Path, volume: &dyn VolumeView) -> Result<()> {
    ensure_parent(path)?;
    let header = Header {
      dtype: Dtype::Bool,
      order: volume.order(),
      shape: volume.shape(),
    };
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut out = BufWriter::new(file);
    out
      .write_all(&header.encode())
      .and_then(|_| out.write_all(volume.voxels()))
      .and_then(|_| out.flush())
      .map_err(|e| PipelineError::io(path, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::volume::{MemoryOrder, Volume};

  #[test]
  fn test_round_trip_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out.vxl");
    let mut v = Volume::zeros([3, 4, 5], MemoryOrder::ColumnMajor);
    v.set([2, 3, 4], 1);
    v.set([0, 1, 0], 1);
    RawStore.write(&path, &v).unwrap();

    let raw = RawStore.read(&path).unwrap();
    assert_eq!(raw.order, MemoryOrder::ColumnMajor);
    assert_eq!(raw.binarize(), v);
  }

  #[test]
  fn test_truncated_file_is_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.vxl");
    let v = Volume::zeros([4, 4, 4], MemoryOrder::RowMajor);
    RawStore.write(&path, &v).unwrap();
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
    assert!(matches!(RawStore.read(&path), Err(PipelineError::Format { .. })));
  }

  #[test]
  fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RawStore.read(&dir.path().join("absent.vxl"));
    assert!(matches!(err, Err(PipelineError::Io { .. })));
  }
}
