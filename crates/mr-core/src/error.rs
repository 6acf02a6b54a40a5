//! Errors produced by the supervision engine.
//!
//! Everything below "abandon this job" stays inside that job's tasks; the
//! manager only ever logs these or hands them back to the shell.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::JobId;

#[derive(Error, Debug)]
pub enum JobError {
	/// Configuration could not be read or parsed. Fatal at startup.
	#[error("config {path}: {reason}")]
	Config { path: PathBuf, reason: String },

	/// The job's env file could not be read; the job is abandoned.
	#[error("{name}: cannot read env file {path}: {source}")]
	EnvFile {
		name: String,
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// The OS refused to create the process; the job is abandoned.
	#[error("{name}: failed to spawn {command}: {source}")]
	Spawn {
		name: String,
		command: String,
		#[source]
		source: std::io::Error,
	},

	/// A health check did not succeed. Only affects registry membership.
	#[error("health check {target}: {reason}")]
	Probe { target: String, reason: String },

	/// The job's process terminated abnormally.
	#[error("{name}: process exited with {status}")]
	Exit { name: String, status: String },

	/// Restart asked for an id that is not in the live registry.
	#[error("job {0} not found")]
	NotFound(JobId),

	#[error("shutting down")]
	ShuttingDown,
}

impl JobError {
	/// Short stable label for log fields.
	pub fn as_label(&self) -> &'static str {
		match self {
			JobError::Config { .. } => "config",
			JobError::EnvFile { .. } => "start_env_file",
			JobError::Spawn { .. } => "start_spawn",
			JobError::Probe { .. } => "probe_failed",
			JobError::Exit { .. } => "process_exit",
			JobError::NotFound(_) => "not_found",
			JobError::ShuttingDown => "shutting_down",
		}
	}
}
