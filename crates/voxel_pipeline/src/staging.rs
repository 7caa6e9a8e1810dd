//! Memory-mapped staging arrays.
//!
//! A staged array is a file holding a 64-byte header followed by one byte
//! per voxel, mapped read-write so it can stand in for an in-memory
//! [`Volume`](crate::volume::Volume).
//!
//! ```text
//! offset  size  field
//! 0       8     magic "VXSTAGE1"
//! 8       1     dtype  ('b' bool, 'u' uint8)
//! 9       1     order  ('C' row-major, 'F' column-major)
//! 10      6     reserved (zero)
//! 16      24    shape, 3 x u64 little-endian
//! 40      24    reserved (zero)
//! 64      N     voxels
//! ```
//!
//! [`StagingArea`] owns every staging file a run creates and removes them on
//! cleanup or drop. Names carry a per-run id so two runs writing next to the
//! same output never collide.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::volume::{voxel_count, MemoryOrder, Shape, VolumeView};

/// Header length in bytes; the voxel payload starts here.
pub const HEADER_LEN: usize = 64;

const MAGIC: &[u8; 8] = b"VXSTAGE1";

/// Extension of staging files.
pub const STAGE_EXTENSION: &str = "stage";

// =============================================================================
// Header
// =============================================================================

/// Element type recorded in the header. Both variants occupy one byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dtype {
  #[default]
  Bool,
  U8,
}

impl Dtype {
  fn code(self) -> u8 {
    match self {
      Dtype::Bool => b'b',
      Dtype::U8 => b'u',
    }
  }

  fn from_code(code: u8) -> Option<Self> {
    match code {
      b'b' => Some(Dtype::Bool),
      b'u' => Some(Dtype::U8),
      _ => None,
    }
  }
}

/// Decoded array header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
  pub dtype: Dtype,
  pub order: MemoryOrder,
  pub shape: Shape,
}

impl Header {
  pub fn encode(&self) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[..8].copy_from_slice(MAGIC);
    buf[8] = self.dtype.code();
    buf[9] = self.order.code();
    for (axis, dim) in self.shape.iter().enumerate() {
      let at = 16 + axis * 8;
      buf[at..at + 8].copy_from_slice(&(*dim as u64).to_le_bytes());
    }
    buf
  }

  pub fn decode(buf: &[u8]) -> std::result::Result<Self, String> {
    if buf.len() < HEADER_LEN {
      return Err(format!("header truncated to {} bytes", buf.len()));
    }
    if &buf[..8] != MAGIC {
      return Err("bad magic".to_string());
    }
    let dtype = Dtype::from_code(buf[8]).ok_or_else(|| format!("unknown dtype code {}", buf[8]))?;
    let order =
      MemoryOrder::from_code(buf[9]).ok_or_else(|| format!("unknown order code {}", buf[9]))?;
    let mut shape = [0usize; 3];
    for (axis, dim) in shape.iter_mut().enumerate() {
      let at = 16 + axis * 8;
      let mut bytes = [0u8; 8];
      bytes.copy_from_slice(&buf[at..at + 8]);
      *dim = usize::try_from(u64::from_le_bytes(bytes))
        .map_err(|_| format!("axis {} does not fit in memory", axis))?;
    }
    Ok(Header { dtype, order, shape })
  }

  /// Total file length for this header.
  pub fn file_len(&self) -> usize {
    HEADER_LEN + voxel_count(self.shape)
  }
}

// =============================================================================
// StagedArray
// =============================================================================

/// Disk-backed binary volume with array-like addressing.
///
/// Writes land in the shared mapping and are visible to any other handle on
/// the same file. One writer at a time.
pub struct StagedArray {
  path: PathBuf,
  header: Header,
  mmap: MmapMut,
}

impl StagedArray {
  /// Allocate a staged array at `location`, optionally filled from `initial`.
  ///
  /// Fails with `Storage` if the parent directory is missing, the file cannot
  /// be sized or mapped, or `initial` has a different shape.
  pub fn create(
    location: &Path,
    shape: Shape,
    dtype: Dtype,
    order: MemoryOrder,
    initial: Option<&dyn VolumeView>,
  ) -> Result<Self> {
    let parent = match location.parent() {
      Some(p) if !p.as_os_str().is_empty() => p,
      _ => Path::new("."),
    };
    if !parent.is_dir() {
      return Err(PipelineError::storage(
        location,
        format!("directory {} does not exist", parent.display()),
      ));
    }
    if let Some(initial) = initial {
      if initial.shape() != shape {
        return Err(PipelineError::storage(
          location,
          format!("initial data shape {:?} != {:?}", initial.shape(), shape),
        ));
      }
    }

    let header = Header { dtype, order, shape };
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(true)
      .open(location)
      .map_err(|e| PipelineError::storage(location, e))?;
    file
      .set_len(header.file_len() as u64)
      .map_err(|e| PipelineError::storage(location, e))?;

    // SAFETY: the file was created above and belongs to this run; nothing
    // truncates it while the mapping is alive.
    let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| PipelineError::storage(location, e))?;
    mmap[..HEADER_LEN].copy_from_slice(&header.encode());

    let mut staged = Self {
      path: location.to_path_buf(),
      header,
      mmap,
    };
    if let Some(initial) = initial {
      staged.copy_from(initial);
    }

    debug!(
      path = %location.display(),
      ?shape,
      ?order,
      "allocated staged array"
    );
    Ok(staged)
  }

  /// Map an existing staged array.
  pub fn open(location: &Path) -> Result<Self> {
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .open(location)
      .map_err(|e| PipelineError::storage(location, e))?;

    // SAFETY: staged files are only resized by `create`, which this handle
    // does not race with (single-writer model).
    let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| PipelineError::storage(location, e))?;
    let header = Header::decode(&mmap).map_err(|reason| PipelineError::storage(location, reason))?;
    if mmap.len() != header.file_len() {
      return Err(PipelineError::storage(
        location,
        format!("file is {} bytes, header implies {}", mmap.len(), header.file_len()),
      ));
    }

    Ok(Self {
      path: location.to_path_buf(),
      header,
      mmap,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn dtype(&self) -> Dtype {
    self.header.dtype
  }

  /// Write dirty pages back to the file.
  pub fn flush(&self) -> Result<()> {
    self
      .mmap
      .flush()
      .map_err(|e| PipelineError::storage(&self.path, e))
  }
}

impl VolumeView for StagedArray {
  fn shape(&self) -> Shape {
    self.header.shape
  }

  fn order(&self) -> MemoryOrder {
    self.header.order
  }

  fn voxels(&self) -> &[u8] {
    &self.mmap[HEADER_LEN..]
  }

  fn voxels_mut(&mut self) -> &mut [u8] {
    &mut self.mmap[HEADER_LEN..]
  }
}

impl std::fmt::Debug for StagedArray {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "StagedArray({}, {:?}, {:?})",
      self.path.display(),
      self.header.shape,
      self.header.order
    )
  }
}

// =============================================================================
// StagingArea - run-scoped owner of staging files
// =============================================================================

/// Outcome of removing a run's staging files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
  pub removed: Vec<PathBuf>,
  pub retained: Vec<PathBuf>,
  pub failed: Vec<PathBuf>,
}

/// Creates uniquely named staging files and removes them when the run ends.
pub struct StagingArea {
  dir: PathBuf,
  prefix: String,
  run_id: String,
  /// Staged arrays; kept when `retain` is set.
  arrays: Vec<PathBuf>,
  /// Scratch files (partial outputs); always removed.
  scratch: Vec<PathBuf>,
  retain: bool,
  cleaned: bool,
}

impl StagingArea {
  /// Staging area in `dir`, naming files after `prefix`.
  pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
    let run_id = uuid::Uuid::new_v4().simple().to_string();
    Self {
      dir: dir.into(),
      prefix: prefix.into(),
      run_id: run_id[..12].to_string(),
      arrays: Vec::new(),
      scratch: Vec::new(),
      retain: false,
      cleaned: false,
    }
  }

  /// Staging area next to `output` (or in `staging_dir` if given).
  pub fn for_output(output: &Path, staging_dir: Option<&Path>) -> Self {
    let dir = match staging_dir {
      Some(dir) => dir.to_path_buf(),
      None => match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
      },
    };
    let prefix = output
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "volume".to_string());
    Self::new(dir, prefix)
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// `<dir>/<prefix>.<run-id>.<role>.stage`
  pub fn path_for(&self, role: &str) -> PathBuf {
    self.dir.join(format!(
      "{}.{}.{}.{}",
      self.prefix, self.run_id, role, STAGE_EXTENSION
    ))
  }

  /// Allocate a staged array owned by this area.
  pub fn allocate(
    &mut self,
    role: &str,
    shape: Shape,
    dtype: Dtype,
    order: MemoryOrder,
    initial: Option<&dyn VolumeView>,
  ) -> Result<StagedArray> {
    let path = self.path_for(role);
    // Registered first so a half-created file is still removed.
    self.arrays.push(path.clone());
    StagedArray::create(&path, shape, dtype, order, initial)
  }

  /// Register a scratch file that must not survive the run.
  pub fn track_scratch(&mut self, path: impl Into<PathBuf>) {
    self.scratch.push(path.into());
  }

  /// Keep staged arrays on disk after the run.
  pub fn retain(&mut self) {
    self.retain = true;
  }

  /// Staged array paths allocated so far.
  pub fn paths(&self) -> &[PathBuf] {
    &self.arrays
  }

  /// Remove owned files. Failures are logged and reported, never raised.
  pub fn cleanup(&mut self) -> CleanupReport {
    let mut report = CleanupReport::default();
    if self.cleaned {
      return report;
    }
    self.cleaned = true;

    let arrays = std::mem::take(&mut self.arrays);
    if self.retain {
      for path in &arrays {
        if path.exists() {
          debug!(path = %path.display(), "retaining staging file");
          report.retained.push(path.clone());
        }
      }
    } else {
      remove_all(&arrays, &mut report);
    }
    let scratch = std::mem::take(&mut self.scratch);
    remove_all(&scratch, &mut report);
    report
  }
}

fn remove_all(paths: &[PathBuf], report: &mut CleanupReport) {
  for path in paths {
    match fs::remove_file(path) {
      Ok(()) => {
        debug!(path = %path.display(), "removed staging file");
        report.removed.push(path.clone());
      }
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => {
        warn!(path = %path.display(), error = %e, "failed to remove staging file");
        report.failed.push(path.clone());
      }
    }
  }
}

impl Drop for StagingArea {
  fn drop(&mut self) {
    self.cleanup();
  }
}

#[cfg(test)]
#[path = "staging_test.rs"]
mod staging_test;
