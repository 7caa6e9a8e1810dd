//! Logging initialization.

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Log verbosity accepted by `--log-level`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	#[default]
	Warn,
	Error,
}

impl LogLevel {
	pub fn as_str(self) -> &'static str {
		match self {
			LogLevel::Trace => "trace",
			LogLevel::Debug => "debug",
			LogLevel::Info => "info",
			LogLevel::Warn => "warn",
			LogLevel::Error => "error",
		}
	}
}

/// Install the stderr subscriber. `RUST_LOG`, when set, wins over `level`.
///
/// Progress lines go to stdout, so logs stay on stderr.
pub fn init_logging(level: LogLevel) -> Result<()> {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.try_init()
		.map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}
