//! Volume file formats.
//!
//! | extension      | store        | read order   |
//! |----------------|--------------|--------------|
//! | `.tif` `.tiff` | [`TiffStore`] | column-major |
//! | `.vxl`         | [`RawStore`]  | as written   |

pub mod raw;
pub mod tiff;

use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::volume::{RawVolume, VolumeView};

pub use self::raw::RawStore;
pub use self::tiff::TiffStore;

/// Reads and writes whole volumes.
pub trait VolumeStore: Send + Sync {
  fn name(&self) -> &'static str;

  /// Load the volume at `path` in its on-disk sample type.
  fn read(&self, path: &Path) -> Result<RawVolume>;

  /// Write `volume` to `path`, creating parent directories.
  fn write(&self, path: &Path, volume: &dyn VolumeView) -> Result<()>;
}

/// Store for `path`, chosen by extension.
pub fn store_for_path(path: &Path) -> Result<Box<dyn VolumeStore>> {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());
  match ext.as_deref() {
    Some("tif") | Some("tiff") => Ok(Box::new(TiffStore)),
    Some(raw::EXTENSION) => Ok(Box::new(RawStore)),
    Some(other) => Err(PipelineError::format(
      path,
      format!("unsupported volume extension '.{}'", other),
    )),
    None => Err(PipelineError::format(path, "volume path has no extension")),
  }
}

/// Create the parent directory of `path` if it does not exist.
pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => {
      fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))
    }
    _ => Ok(()),
  }
}
