use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// One configured job. Read-only once the configuration is loaded.
#[derive(Debug, Clone)]
pub struct JobSpec {
	pub name: String,
	pub command: String,
	pub args: Vec<String>,
	pub dir: Option<PathBuf>,
	pub env: EnvSource,
	pub health_check: Option<HealthCheckSpec>,
}

impl JobSpec {
	pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			command: command.into(),
			args: Vec::new(),
			dir: None,
			env: EnvSource::Inline(Vec::new()),
			health_check: None,
		}
	}
}

/// Where a job's extra environment comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvSource {
	/// `KEY=VALUE` entries used verbatim.
	Inline(Vec<String>),
	/// A dotenv-style file read on first start.
	File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	Tcp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckSpec {
	pub protocol: Protocol,
	/// `host:port` to dial.
	pub target: String,
	/// Dial and read timeout.
	pub max_await: Duration,
	/// Probe period. `None` probes once.
	pub interval: Option<Duration>,
	/// Wait before the first probe.
	pub delay: Option<Duration>,
}

impl HealthCheckSpec {
	pub fn tcp(target: impl Into<String>, max_await: Duration) -> Self {
		Self {
			protocol: Protocol::Tcp,
			target: target.into(),
			max_await,
			interval: None,
			delay: None,
		}
	}

	pub fn periodic(&self) -> Option<Duration> {
		self.interval.filter(|d| !d.is_zero())
	}
}

/// Manager-assigned job identifier. Its string form is what the shell accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for JobId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.trim().parse().map(JobId)
	}
}

/// Entry of the live listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
	pub id: JobId,
	pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
	Starting,
	Probing,
	Registered,
	Unregistered,
	Stopping,
	Stopped,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn job_id_round_trips_through_text() {
		assert_eq!("7".parse::<JobId>().unwrap(), JobId(7));
		assert_eq!(" 3 ".parse::<JobId>().unwrap(), JobId(3));
		assert!("web".parse::<JobId>().is_err());
		assert_eq!(JobId(12).to_string(), "12");
	}

	#[test]
	fn zero_interval_is_one_shot() {
		let mut hc = HealthCheckSpec::tcp("127.0.0.1:1", Duration::from_millis(200));
		assert_eq!(hc.periodic(), None);
		hc.interval = Some(Duration::ZERO);
		assert_eq!(hc.periodic(), None);
		hc.interval = Some(Duration::from_secs(1));
		assert_eq!(hc.periodic(), Some(Duration::from_secs(1)));
	}
}
