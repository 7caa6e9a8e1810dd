//! voxel_pipeline - Out-of-core block-parallel transforms for binary volumes
//!
//! This crate runs topology-aware transforms (border smoothing, skeleton
//! thinning) over 3D binary volumes that are too large to handle comfortably
//! in memory. Volumes are staged into memory-mapped files, split into blocks
//! sized to the worker count and processed on a rayon pool.
//!
//! # Features
//!
//! - **Staging**: memory-mapped source/sink arrays with run-scoped names,
//!   removed on every exit path
//! - **Block planning**: longest-axis halving down to a 16-voxel floor
//! - **Operators**: lookup-table smoothing and directional thinning that give
//!   identical output serially and block-parallel
//! - **Stores**: multi-page TIFF stacks and `.vxl` raw volumes
//!
//! # Example
//!
//! ```ignore
//! use voxel_pipeline::{OperatorKind, PipelineConfig, PipelineOrchestrator, WorkerCount};
//!
//! let config = PipelineConfig {
//!   operator: OperatorKind::Skeletonize,
//!   processes: WorkerCount::Auto,
//!   ..PipelineConfig::default()
//! };
//! let report = PipelineOrchestrator::new("in.tif", "skeleton.tif", config).run()?;
//! println!("{} -> {} voxels", report.foreground_in, report.foreground_out);
//! ```

pub mod error;
pub use error::{OperatorError, PipelineError, Result};

// Volume layout and the shared addressing contract
pub mod volume;
pub use volume::{MemoryOrder, RawVolume, Region, Samples, Shape, Volume, VolumeView};

// Memory-mapped staging
pub mod staging;
pub use staging::{CleanupReport, Dtype, StagedArray, StagingArea};

// Block planning
pub mod planner;
pub use planner::{decompose, plan, Block, BlockShape, ProcessingParameter};

// Worker pool configuration
pub mod pool;
pub use pool::{ExecutionConfig, ProcessPoolConfigurator, WorkerCount};

pub mod border;
pub use border::BorderPolicy;

// Operators and the pass driver
pub mod transform;
pub use transform::{
  OperatorKind, Skeletonize, Smooth, TransformOperator, TransformOutput, TransformRequest,
  TransformStats,
};

pub mod store;
pub use store::{store_for_path, RawStore, TiffStore, VolumeStore};

pub mod config;
pub use config::{PipelineConfig, StagingOrder};

pub mod orchestrator;
pub use orchestrator::{PipelineOrchestrator, PipelineStage, RunReport};
