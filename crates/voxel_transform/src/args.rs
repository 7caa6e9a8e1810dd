//! CLI argument definitions for voxel_transform.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use voxel_pipeline::{BorderPolicy, OperatorKind, PipelineConfig, WorkerCount};

use crate::logging::LogLevel;

/// Smooth or skeletonize a binary voxel volume.
///
/// Reads a TIFF stack (or `.vxl` volume), thresholds it at > 0, stages it in
/// memory-mapped files and writes the transformed volume.
///
/// ## Examples
///
///   voxel_transform in.tif smooth.tif --iterations 3 --processes 8
///
///   voxel_transform in.tif skeleton.tif --operator skeletonize --delete-border
#[derive(Parser, Debug)]
#[command(name = "voxel_transform")]
#[command(version, about, long_about = None)]
pub struct Args {
	/// Input volume (.tif, .tiff or .vxl).
	pub input: PathBuf,

	/// Output volume (.tif, .tiff or .vxl).
	pub output: PathBuf,

	/// Transform to run: smooth or skeletonize [default: smooth].
	#[arg(long)]
	pub operator: Option<OperatorKind>,

	/// Smoothing passes [default: 2].
	#[arg(long)]
	pub iterations: Option<usize>,

	/// Maximum thinning steps [default: run to convergence].
	#[arg(long)]
	pub steps: Option<usize>,

	/// Operator method: table|direct (smooth), indexed|full (skeletonize).
	#[arg(long)]
	pub method: Option<String>,

	/// Worker count: a positive integer, auto or serial [default: serial].
	#[arg(long)]
	pub processes: Option<WorkerCount>,

	/// Drop foreground voxels touching the volume border before thinning.
	#[arg(long)]
	pub delete_border: bool,

	/// Skip the empty-border check before thinning.
	#[arg(long)]
	pub skip_border_check: bool,

	/// Keep source and sink in memory instead of memory-mapped staging files.
	#[arg(long)]
	pub in_memory: bool,

	/// Directory for staging files (default: next to the output).
	#[arg(long)]
	pub staging_dir: Option<PathBuf>,

	/// Leave staging files on disk after the run.
	#[arg(long)]
	pub keep_staging: bool,

	/// Pipeline settings file (TOML); flags given here override it.
	#[arg(short, long)]
	pub config: Option<PathBuf>,

	/// Log verbosity on stderr.
	#[arg(long, value_enum, default_value_t = LogLevel::Warn)]
	pub log_level: LogLevel,
}

impl Args {
	/// Settings file (or defaults) with command-line overrides applied.
	pub fn pipeline_config(&self) -> Result<PipelineConfig> {
		let mut config = match &self.config {
			Some(path) => PipelineConfig::load(path)
				.with_context(|| format!("Failed to load config file: {}", path.display()))?,
			None => PipelineConfig::default(),
		};

		if let Some(operator) = self.operator {
			config.operator = operator;
		}
		if let Some(iterations) = self.iterations {
			config.iterations = iterations;
		}
		if self.steps.is_some() {
			config.steps = self.steps;
		}
		if self.method.is_some() {
			config.method = self.method.clone();
		}
		if let Some(processes) = self.processes {
			config.processes = processes;
		}
		if self.delete_border || self.skip_border_check {
			config.border = BorderPolicy::from_flags(self.delete_border, self.skip_border_check);
		}
		if self.in_memory {
			config.out_of_core = false;
		}
		if self.staging_dir.is_some() {
			config.staging_dir = self.staging_dir.clone();
		}
		if self.keep_staging {
			config.keep_staging = true;
		}

		config.validate().context("Invalid settings")?;
		Ok(config)
	}
}
