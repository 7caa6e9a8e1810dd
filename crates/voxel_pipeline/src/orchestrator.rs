//! Pipeline Orchestrator
//!
//! Turns one whole-volume transform request into a disk-resident run:
//!
//! ```text
//! Loaded ─► Binarized ─► Staged ─► Transforming ─► Written ─┐
//!    │          │           │            │                    ▼
//!    └──────────┴───────────┴────────────┴──────────────► CleanedUp
//! ```
//!
//! Every run ends in `CleanedUp`, whichever stage failed. The output file
//! appears only once `Written` completes: the volume is written to
//! `<output>.<run-id>.partial` and renamed into place.
//!
//! # Usage
//!
//! ```ignore
//! let report = PipelineOrchestrator::new(input, output, PipelineConfig::default()).run()?;
//! println!("{} voxels set", report.foreground_out);
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use web_time::Instant;

use crate::border;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::planner::ProcessingParameter;
use crate::pool::{ExecutionConfig, ProcessPoolConfigurator};
use crate::staging::{CleanupReport, Dtype, StagingArea};
use crate::store::{self, store_for_path};
use crate::transform::{TransformOutput, TransformRequest};
use crate::volume::{Shape, Volume, VolumeView};

/// Stages of one run, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
  /// Nothing done yet.
  Started,
  Loaded,
  Binarized,
  Staged,
  Transforming,
  Written,
  CleanedUp,
}

impl fmt::Display for PipelineStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PipelineStage::Started => "started",
      PipelineStage::Loaded => "loaded",
      PipelineStage::Binarized => "binarized",
      PipelineStage::Staged => "staged",
      PipelineStage::Transforming => "transforming",
      PipelineStage::Written => "written",
      PipelineStage::CleanedUp => "cleaned-up",
    };
    f.write_str(name)
  }
}

/// Summary of a finished run.
#[derive(Clone, Debug)]
pub struct RunReport {
  pub run_id: String,
  /// Last stage reached.
  pub stage: PipelineStage,
  pub shape: Shape,
  /// Sample type of the input file.
  pub input_dtype: &'static str,
  pub workers: usize,
  pub foreground_in: usize,
  pub foreground_out: usize,
  /// Border voxels cleared before thinning.
  pub border_cleared: usize,
  /// Blocks per pass (1 on the whole-volume path).
  pub blocks: usize,
  pub passes: usize,
  /// Voxels flipped over all passes.
  pub changed: usize,
  /// Elapsed time per completed stage.
  pub timings: Vec<(PipelineStage, Duration)>,
  pub cleanup: CleanupReport,
}

impl RunReport {
  fn new(run_id: &str) -> Self {
    Self {
      run_id: run_id.to_string(),
      stage: PipelineStage::Started,
      shape: [0; 3],
      input_dtype: "",
      workers: 1,
      foreground_in: 0,
      foreground_out: 0,
      border_cleared: 0,
      blocks: 0,
      passes: 0,
      changed: 0,
      timings: Vec::new(),
      cleanup: CleanupReport::default(),
    }
  }

  fn reach(&mut self, stage: PipelineStage, started: Instant) {
    let elapsed = started.elapsed();
    debug!(%stage, elapsed_ms = elapsed.as_millis() as u64, "stage complete");
    self.stage = stage;
    self.timings.push((stage, elapsed));
  }

  /// Time spent in `stage`, if it completed.
  pub fn elapsed(&self, stage: PipelineStage) -> Option<Duration> {
    self
      .timings
      .iter()
      .find(|(s, _)| *s == stage)
      .map(|(_, d)| *d)
  }

  /// Sum over all completed stages.
  pub fn total(&self) -> Duration {
    self.timings.iter().map(|(_, d)| *d).sum()
  }
}

fn progress(step: usize, message: impl fmt::Display) {
  println!("[{}/5] {}", step, message);
}

fn detail(message: impl fmt::Display, started: Instant) {
  println!("    {} ({:.2}s)", message, started.elapsed().as_secs_f64());
}

/// Drives one input → output transform.
pub struct PipelineOrchestrator {
  input: PathBuf,
  output: PathBuf,
  config: PipelineConfig,
}

impl PipelineOrchestrator {
  pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, config: PipelineConfig) -> Self {
    Self {
      input: input.into(),
      output: output.into(),
      config,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// `<output>.<run-id>.partial`, next to the output.
  fn partial_path(&self, run_id: &str) -> PathBuf {
    let name = self
      .output
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "volume".to_string());
    self.output.with_file_name(format!("{}.{}.partial", name, run_id))
  }

  /// Run every stage. Staging files are removed whatever the outcome.
  pub fn run(&self) -> Result<RunReport> {
    let mut staging = StagingArea::for_output(&self.output, self.config.staging_dir.as_deref());
    if self.config.keep_staging {
      staging.retain();
    }
    let mut report = RunReport::new(staging.run_id());
    debug!(
      run_id = staging.run_id(),
      input = %self.input.display(),
      output = %self.output.display(),
      "pipeline run"
    );

    let outcome = self.execute(&mut staging, &mut report);

    let started = Instant::now();
    if let Err(e) = &outcome {
      debug!(stage = %report.stage, error = %e, "run failed, cleaning up");
    }
    report.cleanup = staging.cleanup();
    for path in &report.cleanup.retained {
      info!(path = %path.display(), "staging file kept");
    }
    report.reach(PipelineStage::CleanedUp, started);

    outcome.map(|()| {
      println!("    total {:.2}s", report.total().as_secs_f64());
      report
    })
  }

  fn execute(&self, staging: &mut StagingArea, report: &mut RunReport) -> Result<()> {
    let config = &self.config;
    config.validate()?;
    let operator = config.operator.build(config.method.as_deref())?;
    let reader = store_for_path(&self.input)?;
    let writer = store_for_path(&self.output)?;
    let exec = ProcessPoolConfigurator::apply(Some(config.processes))?;
    report.workers = exec.workers();

    // Loaded
    let started = Instant::now();
    progress(1, format_args!("reading {}", self.input.display()));
    let raw = reader.read(&self.input)?;
    report.shape = raw.shape;
    report.input_dtype = raw.samples.dtype_name();
    detail(
      format_args!("shape {:?}, dtype {}", raw.shape, report.input_dtype),
      started,
    );
    report.reach(PipelineStage::Loaded, started);

    // Binarized
    let started = Instant::now();
    progress(2, "binarizing and staging");
    let order = config.staging_order.resolve(raw.order);
    let volume = raw.binarize_to(order);
    report.foreground_in = volume.count_foreground();
    report.reach(PipelineStage::Binarized, started);

    // Staged
    let started = Instant::now();
    let shape = volume.shape();
    let (mut source, mut sink): (Box<dyn VolumeView>, Box<dyn VolumeView>) = if config.out_of_core {
      if config.staging_dir.is_none() {
        store::ensure_parent(&self.output)?;
      }
      let initial: &dyn VolumeView = &volume;
      let source = staging.allocate("source", shape, Dtype::Bool, order, Some(initial))?;
      drop(volume);
      let sink = staging.allocate("sink", shape, Dtype::Bool, order, None)?;
      detail(format_args!("staged in {}", staging.dir().display()), started);
      (Box::new(source) as Box<dyn VolumeView>, Box::new(sink) as Box<dyn VolumeView>)
    } else {
      detail("kept in memory", started);
      let sink = Volume::zeros(shape, order);
      (Box::new(volume) as Box<dyn VolumeView>, Box::new(sink) as Box<dyn VolumeView>)
    };
    report.reach(PipelineStage::Staged, started);

    // Transforming
    let started = Instant::now();
    progress(
      3,
      format_args!("preparing {} (workers = {})", operator.name(), exec.workers()),
    );
    if operator.requires_empty_border() {
      report.border_cleared = border::enforce(config.border, source.as_mut())?;
      if report.border_cleared > 0 {
        println!("    cleared {} border voxels", report.border_cleared);
      }
    }
    operator.prepare(&exec);
    let processing = self.processing_for(shape, &exec)?;
    if let Some(param) = &processing {
      println!(
        "    [auto blocks] workers: {}, size_max: {:?}",
        exec.workers(),
        param.size_max
      );
    }

    progress(
      4,
      format_args!("{} (passes = {:?})", operator.name(), config.passes()),
    );
    let request = TransformRequest {
      passes: config.passes(),
      processing,
    };
    let (output, stats) = operator.run(source.as_mut(), sink.as_mut(), &request, &exec)?;
    report.passes = stats.passes;
    report.changed = stats.changed;
    report.blocks = stats.blocks;
    detail(
      format_args!("{} passes, {} voxels changed", stats.passes, stats.changed),
      started,
    );
    report.reach(PipelineStage::Transforming, started);

    // Written
    let started = Instant::now();
    progress(5, format_args!("writing {}", self.output.display()));
    let result: &dyn VolumeView = match &output {
      TransformOutput::InSource => source.as_ref(),
      TransformOutput::InSink => sink.as_ref(),
      TransformOutput::Detached(volume) => volume,
    };
    report.foreground_out = result.count_foreground();
    let partial = self.partial_path(staging.run_id());
    staging.track_scratch(&partial);
    writer.write(&partial, result)?;
    fs::rename(&partial, &self.output).map_err(|e| PipelineError::io(&self.output, e))?;
    detail(
      format_args!("{} foreground voxels", report.foreground_out),
      started,
    );
    report.reach(PipelineStage::Written, started);
    info!(
      operator = operator.name(),
      foreground_in = report.foreground_in,
      foreground_out = report.foreground_out,
      "run complete"
    );
    Ok(())
  }

  /// Block decomposition for a multi-worker run.
  fn processing_for(
    &self,
    shape: Shape,
    exec: &ExecutionConfig,
  ) -> Result<Option<ProcessingParameter>> {
    if exec.is_serial() {
      return Ok(None);
    }
    let param = ProcessingParameter::for_workers(shape, exec.workers())
      .with_optimization(self.config.optimization)
      .with_as_memory(self.config.as_memory);
    param.validate()?;
    debug!(size_max = ?param.size_max, workers = exec.workers(), "planned blocks");
    Ok(Some(param))
  }
}

impl fmt::Debug for PipelineOrchestrator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipelineOrchestrator")
      .field("input", &self.input)
      .field("output", &self.output)
      .field("operator", &self.config.operator)
      .finish()
  }
}

/// True if `path` is a partial output left by some run.
pub fn is_partial_output(path: &Path) -> bool {
  path.extension().is_some_and(|e| e == "partial")
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
