//! Multi-page greyscale TIFF stacks.
//!
//! One page per Z slice, X varying fastest within a page, so a stack maps
//! onto a column-major volume without reordering.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ::tiff::decoder::{Decoder, DecodingResult, Limits};
use ::tiff::encoder::{colortype, TiffEncoder};
use ::tiff::{ColorType, TiffError};
use tracing::debug;

use super::{ensure_parent, VolumeStore};
use crate::error::{PipelineError, Result};
use crate::volume::{MemoryOrder, RawVolume, Samples, VolumeView};

/// TIFF stack store.
#[derive(Clone, Copy, Debug, Default)]
pub struct TiffStore;

/// Append one decoded page to the samples gathered so far.
fn append(samples: &mut Option<Samples>, page: DecodingResult, path: &Path) -> Result<()> {
  macro_rules! extend {
    ($variant:ident, $data:expr) => {
      match samples {
        None => {
          *samples = Some(Samples::$variant($data));
          Ok(())
        }
        Some(Samples::$variant(acc)) => {
          acc.extend_from_slice(&$data);
          Ok(())
        }
        Some(_) => Err(PipelineError::format(path, "pages differ in sample type")),
      }
    };
  }

  match page {
    DecodingResult::U8(d) => extend!(U8, d),
    DecodingResult::U16(d) => extend!(U16, d),
    DecodingResult::U32(d) => extend!(U32, d),
    DecodingResult::I8(d) => extend!(I8, d),
    DecodingResult::I16(d) => extend!(I16, d),
    DecodingResult::I32(d) => extend!(I32, d),
    DecodingResult::F32(d) => extend!(F32, d),
    DecodingResult::F64(d) => extend!(F64, d),
    _ => Err(PipelineError::format(path, "unsupported 64-bit integer samples")),
  }
}

/// Write-side encoder failure: I/O stays I/O, the rest is a format problem.
fn encode_error(path: &Path, e: TiffError) -> PipelineError {
  match e {
    TiffError::IoError(e) => PipelineError::io(path, e),
    other => PipelineError::format(path, other),
  }
}

impl VolumeStore for TiffStore {
  fn name(&self) -> &'static str {
    "tiff"
  }

  fn read(&self, path: &Path) -> Result<RawVolume> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file))
      .map_err(|e| PipelineError::format(path, e))?
      .with_limits(Limits::unlimited());

    let mut samples = None;
    let mut plane: Option<(u32, u32)> = None;
    let mut pages = 0usize;
    loop {
      match decoder.colortype().map_err(|e| PipelineError::format(path, e))? {
        ColorType::Gray(_) => {}
        other => {
          return Err(PipelineError::format(
            path,
            format!("page {} is {:?}, expected greyscale", pages, other),
          ))
        }
      }
      let dims = decoder.dimensions().map_err(|e| PipelineError::format(path, e))?;
      match plane {
        None => plane = Some(dims),
        Some(first) if first != dims => {
          return Err(PipelineError::format(
            path,
            format!("page {} is {:?}, first page is {:?}", pages, dims, first),
          ))
        }
        Some(_) => {}
      }
      let page = decoder.read_image().map_err(|e| PipelineError::format(path, e))?;
      append(&mut samples, page, path)?;
      pages += 1;

      if !decoder.more_images() {
        break;
      }
      decoder.next_image().map_err(|e| PipelineError::format(path, e))?;
    }

    let (width, height) = plane.unwrap_or((0, 0));
    let shape = [width as usize, height as usize, pages];
    let samples = samples.ok_or_else(|| PipelineError::format(path, "no pages"))?;
    if samples.len() != shape[0] * shape[1] * shape[2] {
      return Err(PipelineError::format(
        path,
        format!("{} samples for shape {:?}", samples.len(), shape),
      ));
    }
    debug!(path = %path.display(), ?shape, dtype = samples.dtype_name(), "read tiff stack");
    Ok(RawVolume {
      shape,
      order: MemoryOrder::ColumnMajor,
      samples,
    })
  }

  fn write(&self, path: &Path, volume: &dyn VolumeView) -> Result<()> {
    ensure_parent(path)?;
    let [width, height, depth] = volume.shape();
    let (w, h) = match (u32::try_from(width), u32::try_from(height)) {
      (Ok(w), Ok(h)) => (w, h),
      _ => {
        return Err(PipelineError::format(
          path,
          format!("slice {}x{} too large for TIFF", width, height),
        ))
      }
    };

    let column_major;
    let data = if volume.order() == MemoryOrder::ColumnMajor {
      volume.voxels()
    } else {
      column_major = volume.to_volume().to_order(MemoryOrder::ColumnMajor);
      column_major.voxels()
    };

    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut out = BufWriter::new(file);
    let mut encoder = TiffEncoder::new(&mut out).map_err(|e| encode_error(path, e))?;
    let slice = width * height;
    for z in 0..depth {
      encoder
        .write_image::<colortype::Gray8>(w, h, &data[z * slice..(z + 1) * slice])
        .map_err(|e| encode_error(path, e))?;
    }
    drop(encoder);
    out.flush().map_err(|e| PipelineError::io(path, e))?;
    debug!(path = %path.display(), pages = depth, "wrote tiff stack");
    Ok(())
  }
}
