use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::JobConfig;
use crate::error::JobError;
use crate::output::OutputHub;
use crate::registry::LiveRegistry;
use crate::supervisor::{JobScope, RunningJob};
use crate::types::{JobId, JobInfo};

/// Starts every configured job, owns the live registry and drains everything
/// on shutdown.
///
/// Every task that runs a job to completion holds a slot in the task tracker
/// from before it is spawned until it exits; `wait_terminate` returns only once
/// the tracker is empty.
pub struct JobManager {
	config: JobConfig,
	root: CancellationToken,
	scope: JobScope,
	started: AtomicBool,
}

enum Launch {
	Initial,
	/// Holds the job's relaunch lock until the replacement has started.
	Restart(OwnedMutexGuard<()>),
}

impl JobManager {
	/// The manager's root token is a child of `parent`.
	pub fn new(config: JobConfig, outputs: OutputHub, parent: &CancellationToken) -> Arc<Self> {
		let scope = JobScope {
			config_name: config.name.clone(),
			registry: LiveRegistry::new(),
			outputs,
			tracker: TaskTracker::new(),
		};
		Arc::new(Self {
			config,
			root: parent.child_token(),
			scope,
			started: AtomicBool::new(false),
		})
	}

	pub fn registry(&self) -> &LiveRegistry {
		&self.scope.registry
	}

	/// Spawns one supervisor per job. Ids follow name order, starting at 0.
	pub fn start_jobs(&self) {
		if self.started.swap(true, Ordering::AcqRel) {
			tracing::warn!("jobs already started");
			return;
		}
		for (index, spec) in self.config.jobs.values().enumerate() {
			let id = JobId(index as u32);
			let job = Arc::new(RunningJob::new(id, Arc::new(spec.clone())));
			let scope = self.scope.clone();
			let token = self.root.child_token();
			self.scope
				.tracker
				.spawn(run_job(job, scope, token, Launch::Initial));
		}
		tracing::info!(
			"{}: started {} job(s)",
			self.config.name,
			self.config.jobs.len()
		);
	}

	/// Currently registered (healthy) jobs.
	pub async fn jobs(&self) -> Vec<JobInfo> {
		self.scope.registry.snapshot().await
	}

	/// Stops a registered job, waits for its process to exit, then launches
	/// it again in the background with the same spec and id.
	pub async fn restart(&self, id: JobId) -> Result<(), JobError> {
		if self.root.is_cancelled() {
			return Err(JobError::ShuttingDown);
		}
		let job = self
			.scope
			.registry
			.get(id)
			.await
			.ok_or(JobError::NotFound(id))?;

		// Concurrent restarts of one job queue up behind each other.
		let relaunch = job.relaunch_lock().lock_owned().await;
		tracing::info!("[{}] {} restarting", id, job.name());

		let slot = self.scope.tracker.token();
		if let Err(e) = job.stop_and_wait().await {
			tracing::debug!("[{}] {} previous process: {}", id, job.name(), e);
		}
		if self.root.is_cancelled() {
			return Err(JobError::ShuttingDown);
		}

		let scope = self.scope.clone();
		let token = self.root.child_token();
		tokio::spawn(async move {
			let _slot = slot;
			run_job(job, scope, token, Launch::Restart(relaunch)).await;
		});
		Ok(())
	}

	/// Cancels every job. `wait_terminate` still has to drain them.
	pub fn shutdown(&self) {
		self.root.cancel();
	}

	/// Blocks until `trigger` completes, cancels every job and waits for all
	/// job tasks (restarts included) to finish.
	pub async fn wait_terminate<F: Future>(&self, trigger: F) {
		tokio::select! {
			_ = trigger => tracing::info!("shutdown requested"),
			_ = self.root.cancelled() => {}
		}
		self.root.cancel();
		self.scope.tracker.close();
		self.scope.tracker.wait().await;
		tracing::info!("{}: all jobs stopped", self.config.name);
	}
}

async fn run_job(job: Arc<RunningJob>, scope: JobScope, token: CancellationToken, launch: Launch) {
	let started = job.start(&scope, token.clone()).await;
	let generation = match (started, launch) {
		(Ok(generation), _) => generation,
		(Err(e), launch) => {
			tracing::error!(error = e.as_label(), "[{}] {} start failed: {}", job.id(), job.name(), e);
			token.cancel();
			if let Launch::Restart(_relaunch) = launch {
				if scope.registry.remove(job.id()).await {
					tracing::warn!("[{}] {} retired after failed restart", job.id(), job.name());
				}
			}
			return;
		}
	};

	// A process that exits on its own leaves the token alone: probing goes on
	// until the job is stopped or the manager shuts down.
	let result = job.wait().await;
	let stopped = token.is_cancelled();
	job.finish(generation);

	match result {
		Ok(()) => tracing::info!("[{}] {} exited", job.id(), job.name()),
		Err(e) if stopped => tracing::info!("[{}] {} stopped ({})", job.id(), job.name(), e),
		Err(e) => tracing::error!(error = e.as_label(), "[{}] {}", job.id(), e),
	}
}
