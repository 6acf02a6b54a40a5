use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::env;
use crate::error::JobError;
use crate::output::{JobOutput, Stream};
use crate::types::JobSpec;

/// Time between SIGTERM and SIGKILL when a job is cancelled.
const STOP_GRACE: Duration = Duration::from_secs(3);

#[async_trait]
pub trait Runner: Send + Sync {
	/// Launches the job's process. The process is killed once `cancel` fires.
	async fn start(
		&self,
		cancel: CancellationToken,
		spec: &JobSpec,
		output: JobOutput,
	) -> Result<(), JobError>;

	/// Waits for the most recently started process to exit.
	async fn wait(&self) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
enum ProcessExit {
	Status(ExitStatus),
	Lost(String),
}

type ExitWatch = watch::Receiver<Option<ProcessExit>>;

/// Runs the job as a plain child process in its own process group.
#[derive(Default)]
pub struct ProcessRunner {
	env: OnceCell<Vec<String>>,
	exit: Mutex<Option<(String, ExitWatch)>>,
}

impl ProcessRunner {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Runner for ProcessRunner {
	async fn start(
		&self,
		cancel: CancellationToken,
		spec: &JobSpec,
		output: JobOutput,
	) -> Result<(), JobError> {
		// Resolved once; restarts reuse it without touching the env file.
		let job_env = self
			.env
			.get_or_try_init(|| env::resolve(&spec.name, &spec.env))
			.await?;

		let mut cmd = Command::new(&spec.command);
		cmd.args(&spec.args)
			.envs(env::pairs(job_env))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0)
			.kill_on_drop(true);
		if let Some(dir) = &spec.dir {
			cmd.current_dir(dir);
		}

		let mut child = cmd.spawn().map_err(|source| JobError::Spawn {
			name: spec.name.clone(),
			command: spec.command.clone(),
			source,
		})?;

		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(pipe_output(stdout, output.clone(), Stream::Stdout));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(pipe_output(stderr, output, Stream::Stderr));
		}

		let (tx, rx) = watch::channel(None);
		*self.exit.lock().await = Some((spec.name.clone(), rx));

		tokio::spawn(async move {
			let exit = supervise_child(child, cancel).await;
			tx.send_replace(Some(exit));
		});
		Ok(())
	}

	async fn wait(&self) -> Result<(), JobError> {
		let Some((name, mut rx)) = self.exit.lock().await.clone() else {
			return Ok(());
		};
		let exit = match rx.wait_for(Option::is_some).await {
			Ok(exit) => exit.clone(),
			Err(_) => Some(ProcessExit::Lost("exit watcher dropped".to_string())),
		};
		match exit {
			Some(ProcessExit::Status(status)) if status.success() => Ok(()),
			Some(ProcessExit::Status(status)) => Err(JobError::Exit {
				name,
				status: status.to_string(),
			}),
			Some(ProcessExit::Lost(reason)) => Err(JobError::Exit {
				name,
				status: reason,
			}),
			None => Ok(()),
		}
	}
}

async fn supervise_child(mut child: Child, cancel: CancellationToken) -> ProcessExit {
	let status = tokio::select! {
		status = child.wait() => status,
		_ = cancel.cancelled() => terminate(&mut child).await,
	};
	match status {
		Ok(status) => ProcessExit::Status(status),
		Err(e) => ProcessExit::Lost(e.to_string()),
	}
}

async fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
	use nix::sys::signal::Signal;

	if let Some(pid) = child.id() {
		signal_group(pid, Signal::SIGTERM);
		if let Ok(status) = tokio::time::timeout(STOP_GRACE, child.wait()).await {
			return status;
		}
		signal_group(pid, Signal::SIGKILL);
	}
	let _ = child.start_kill();
	child.wait().await
}

fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;
	let _ = killpg(Pid::from_raw(pid as i32), signal);
}

async fn pipe_output<R: AsyncRead + Unpin>(reader: R, output: JobOutput, stream: Stream) {
	let mut reader = BufReader::new(reader);
	let mut line = Vec::new();
	loop {
		line.clear();
		match reader.read_until(b'\n', &mut line).await {
			Ok(0) => break,
			Ok(_) => {
				while matches!(line.last(), Some(b'\n' | b'\r')) {
					line.pop();
				}
				output.write_line(stream, &line);
			}
			Err(_) => break,
		}
	}
}
