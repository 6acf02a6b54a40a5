use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::JobError;
use crate::types::{EnvSource, HealthCheckSpec, JobSpec, Protocol};

pub const DEFAULT_CONFIG_FILE: &str = "mr.toml";

/// The configured job set. Jobs are kept in name order, which is also the
/// order ids are assigned in.
#[derive(Debug, Clone, Default)]
pub struct JobConfig {
	/// Configuration identity (the file's base name).
	pub name: String,
	pub jobs: BTreeMap<String, JobSpec>,
}

impl JobConfig {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			jobs: BTreeMap::new(),
		}
	}

	pub fn with_job(mut self, spec: JobSpec) -> Self {
		self.jobs.insert(spec.name.clone(), spec);
		self
	}

	pub fn load(path: &Path) -> Result<Self, JobError> {
		let content = std::fs::read_to_string(path).map_err(|e| config_error(path, e))?;
		let name = path
			.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

		let raw: RawConfig = match path.extension().and_then(|e| e.to_str()) {
			Some("json") => serde_json::from_str(&content).map_err(|e| config_error(path, e))?,
			_ => toml::from_str(&content).map_err(|e| config_error(path, e))?,
		};
		raw.into_config(name).map_err(|reason| JobError::Config {
			path: path.to_path_buf(),
			reason,
		})
	}

	pub fn from_toml_str(name: &str, content: &str) -> Result<Self, JobError> {
		let raw: RawConfig = toml::from_str(content).map_err(|e| config_error(Path::new(name), e))?;
		raw.into_config(name.to_string()).map_err(|reason| JobError::Config {
			path: PathBuf::from(name),
			reason,
		})
	}
}

fn config_error(path: &Path, e: impl std::fmt::Display) -> JobError {
	JobError::Config {
		path: path.to_path_buf(),
		reason: e.to_string(),
	}
}

#[derive(Debug, Deserialize)]
struct RawConfig {
	#[serde(default)]
	jobs: BTreeMap<String, RawJob>,
}

#[derive(Debug, Deserialize)]
struct RawJob {
	#[serde(alias = "cmd")]
	command: String,
	#[serde(default)]
	args: Vec<String>,
	#[serde(default, alias = "path")]
	dir: Option<PathBuf>,
	#[serde(default, alias = "envs")]
	env: Vec<String>,
	#[serde(default)]
	env_file: Option<PathBuf>,
	#[serde(default)]
	health_check: Option<RawHealthCheck>,
}

#[derive(Debug, Deserialize)]
struct RawHealthCheck {
	#[serde(default = "default_protocol")]
	protocol: Protocol,
	address: String,
	#[serde(default)]
	port: Option<u16>,
	#[serde(default = "default_max_await", deserialize_with = "duration::deserialize")]
	max_await: Duration,
	#[serde(default, deserialize_with = "duration::deserialize_option")]
	interval: Option<Duration>,
	#[serde(default, deserialize_with = "duration::deserialize_option")]
	delay: Option<Duration>,
}

fn default_protocol() -> Protocol {
	Protocol::Tcp
}
fn default_max_await() -> Duration {
	Duration::from_secs(1)
}

impl RawConfig {
	fn into_config(self, name: String) -> Result<JobConfig, String> {
		let mut jobs = BTreeMap::new();
		for (job_name, raw) in self.jobs {
			if raw.command.trim().is_empty() {
				return Err(format!("job {}: command is empty", job_name));
			}
			let env = if !raw.env.is_empty() {
				EnvSource::Inline(raw.env)
			} else if let Some(path) = raw.env_file {
				EnvSource::File(path)
			} else {
				EnvSource::Inline(Vec::new())
			};
			let health_check = raw.health_check.map(|hc| HealthCheckSpec {
				protocol: hc.protocol,
				target: match hc.port {
					Some(port) => format!("{}:{}", hc.address, port),
					None => hc.address,
				},
				max_await: hc.max_await,
				interval: hc.interval,
				delay: hc.delay,
			});
			jobs.insert(
				job_name.clone(),
				JobSpec {
					name: job_name,
					command: raw.command,
					args: raw.args,
					dir: raw.dir.filter(|d| !d.as_os_str().is_empty()),
					env,
					health_check,
				},
			);
		}
		Ok(JobConfig { name, jobs })
	}
}

mod duration {
	use serde::{Deserialize, Deserializer};
	use std::time::Duration;

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		humantime::parse_duration(&s).map_err(serde::de::Error::custom)
	}

	pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = Option::<String>::deserialize(deserializer)?;
		s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
			.transpose()
	}
}
