//! Foreground on the outer faces of a volume.
//!
//! Thinning treats everything outside the volume as background, so
//! foreground touching a face would be thinned against an invisible wall.

use serde::Deserialize;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::volume::{Region, VolumeView};

/// What to do about foreground on the volume faces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderPolicy {
  /// Fail with a precondition error.
  #[default]
  Require,
  /// Clear the faces before transforming.
  Delete,
  /// Transform as is.
  Skip,
}

impl BorderPolicy {
  /// `--delete-border` wins over `--skip-border-check`.
  pub fn from_flags(delete_border: bool, skip_border_check: bool) -> Self {
    if delete_border {
      BorderPolicy::Delete
    } else if skip_border_check {
      BorderPolicy::Skip
    } else {
      BorderPolicy::Require
    }
  }
}

/// The six one-voxel-thick face slabs of `shape` (overlapping at edges).
fn face_regions(shape: [usize; 3]) -> Vec<Region> {
  let mut faces = Vec::with_capacity(6);
  if shape.iter().any(|&d| d == 0) {
    return faces;
  }
  for axis in 0..3 {
    let mut extent = shape;
    extent[axis] = 1;
    faces.push(Region::new([0; 3], extent));
    let mut origin = [0; 3];
    origin[axis] = shape[axis] - 1;
    faces.push(Region::new(origin, extent));
  }
  faces
}

/// True if any voxel on the volume faces is foreground.
pub fn has_border_foreground(view: &dyn VolumeView) -> bool {
  face_regions(view.shape())
    .iter()
    .any(|face| view.read_region(face).iter().any(|&v| v != 0))
}

/// Zero every voxel on the volume faces; returns how many were foreground.
pub fn clear_border(view: &mut dyn VolumeView) -> usize {
  let mut cleared = 0;
  for face in face_regions(view.shape()) {
    let mut data = view.read_region(&face);
    let set = data.iter().filter(|&&v| v != 0).count();
    if set == 0 {
      continue;
    }
    cleared += set;
    data.fill(0);
    view.write_region(&face, &data);
  }
  cleared
}

/// Apply `policy` to `view`; returns the number of voxels cleared.
pub fn enforce(policy: BorderPolicy, view: &mut dyn VolumeView) -> Result<usize> {
  match policy {
    BorderPolicy::Skip => Ok(0),
    BorderPolicy::Delete => {
      let cleared = clear_border(view);
      debug!(cleared, "cleared border foreground");
      Ok(cleared)
    }
    BorderPolicy::Require => {
      if has_border_foreground(view) {
        return Err(PipelineError::Precondition(
          "foreground touches the volume border; pass --delete-border or --skip-border-check"
            .to_string(),
        ));
      }
      Ok(0)
    }
  }
}
