//! Out-of-core binary volume transforms.
//!
//! Runs one smoothing or skeletonization pipeline per invocation:
//! - [1/5] read the input volume
//! - [2/5] binarize and stage it in memory-mapped files
//! - [3/5] prepare lookup tables and plan blocks
//! - [4/5] transform
//! - [5/5] write the output (atomically, via a partial file)
//!
//! Staging files are removed on every exit path.

mod args;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use voxel_pipeline::PipelineOrchestrator;

use args::Args;

fn main() -> Result<()> {
	let args = Args::parse();
	logging::init_logging(args.log_level)?;

	let config = args.pipeline_config()?;
	info!(?config, "settings");

	println!("Input:  {}", args.input.display());
	println!("Output: {}", args.output.display());
	println!(
		"Operator: {:?} (method: {}, workers: {})",
		config.operator,
		config.method.as_deref().unwrap_or("default"),
		config.processes
	);

	let report = PipelineOrchestrator::new(&args.input, &args.output, config)
		.run()
		.with_context(|| {
			format!(
				"Failed to transform {} into {}",
				args.input.display(),
				args.output.display()
			)
		})?;

	println!(
		"Done: {} -> {} foreground voxels, {} passes over {} block(s)",
		report.foreground_in, report.foreground_out, report.passes, report.blocks
	);
	Ok(())
}
