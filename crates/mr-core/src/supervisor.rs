use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::JobError;
use crate::health::{self, HealthCheck};
use crate::output::OutputHub;
use crate::registry::LiveRegistry;
use crate::runner::{ProcessRunner, Runner};
use crate::types::{HealthCheckSpec, JobId, JobSpec, JobState};

/// What a supervisor needs from its manager while running.
#[derive(Clone)]
pub struct JobScope {
	/// Configuration identity, used for output labels.
	pub config_name: String,
	pub registry: LiveRegistry,
	pub outputs: OutputHub,
	/// Probe loops are tracked here so shutdown waits for them.
	pub tracker: TaskTracker,
}

/// Identifies one start of a job. Restarting bumps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

struct StopGate {
	generation: Generation,
	token: CancellationToken,
	fired: AtomicBool,
}

/// Owns one job's lifecycle: process, probe loop and registry membership.
pub struct RunningJob {
	id: JobId,
	spec: Arc<JobSpec>,
	runner: Box<dyn Runner>,
	prober: tokio::sync::Mutex<Box<dyn HealthCheck>>,
	gate: Mutex<Option<Arc<StopGate>>>,
	generations: AtomicU64,
	state: Mutex<JobState>,
	relaunch: Arc<tokio::sync::Mutex<()>>,
}

impl RunningJob {
	pub fn new(id: JobId, spec: Arc<JobSpec>) -> Self {
		let prober = health::for_spec(spec.health_check.as_ref());
		Self::with_parts(id, spec, Box::new(ProcessRunner::new()), prober)
	}

	pub fn with_parts(
		id: JobId,
		spec: Arc<JobSpec>,
		runner: Box<dyn Runner>,
		prober: Box<dyn HealthCheck>,
	) -> Self {
		Self {
			id,
			spec,
			runner,
			prober: tokio::sync::Mutex::new(prober),
			gate: Mutex::new(None),
			generations: AtomicU64::new(0),
			state: Mutex::new(JobState::Starting),
			relaunch: Arc::new(tokio::sync::Mutex::new(())),
		}
	}

	pub fn id(&self) -> JobId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.spec.name
	}

	pub fn spec(&self) -> &JobSpec {
		&self.spec
	}

	pub fn state(&self) -> JobState {
		*self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Launches the process under `token` and spawns the probe loop.
	///
	/// On failure nothing keeps running and the job never probes.
	pub async fn start(
		self: &Arc<Self>,
		scope: &JobScope,
		token: CancellationToken,
	) -> Result<Generation, JobError> {
		self.set_state(JobState::Starting);
		let generation = Generation(self.generations.fetch_add(1, Ordering::AcqRel) + 1);
		*self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(StopGate {
			generation,
			token: token.clone(),
			fired: AtomicBool::new(false),
		}));

		let output = scope.outputs.acquire(&scope.config_name, self.name());
		if let Err(e) = self.runner.start(token.clone(), &self.spec, output).await {
			self.set_state(JobState::Stopped);
			return Err(e);
		}
		tracing::info!("[{}] {} started", self.id, self.name());

		self.set_state(JobState::Probing);
		let job = Arc::clone(self);
		let registry = scope.registry.clone();
		scope.tracker.spawn(async move {
			job.probe_loop(registry, token).await;
		});
		Ok(generation)
	}

	/// Cancels the current start. Only the first call per start has effect;
	/// returns whether this call was it.
	pub fn stop(&self) -> bool {
		let gate = self
			.gate
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();
		let Some(gate) = gate else {
			return false;
		};
		if gate.fired.swap(true, Ordering::AcqRel) {
			return false;
		}
		self.set_state(JobState::Stopping);
		tracing::info!("[{}] {} stopping", self.id, self.name());
		gate.token.cancel();
		true
	}

	/// Waits for the current process to exit.
	pub async fn wait(&self) -> Result<(), JobError> {
		self.runner.wait().await
	}

	pub async fn stop_and_wait(&self) -> Result<(), JobError> {
		self.stop();
		self.wait().await
	}

	/// Marks the job stopped if `generation` is still the current start.
	pub fn finish(&self, generation: Generation) {
		let current = self
			.gate
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.as_ref()
			.map(|gate| gate.generation);
		if current == Some(generation) {
			self.set_state(JobState::Stopped);
		}
	}

	async fn probe_loop(self: Arc<Self>, registry: LiveRegistry, token: CancellationToken) {
		let check = self.spec.health_check.clone();

		if let Some(delay) = check.as_ref().and_then(|hc| hc.delay) {
			tokio::select! {
				_ = token.cancelled() => return,
				_ = tokio::time::sleep(delay) => {}
			}
		}

		let Some(period) = check.as_ref().and_then(HealthCheckSpec::periodic) else {
			self.probe(&registry, &token).await;
			return;
		};

		let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				biased;
				_ = token.cancelled() => break,
				_ = ticker.tick() => self.probe(&registry, &token).await,
			}
		}
		tracing::debug!("[{}] {} probe loop stopped", self.id, self.name());
	}

	async fn probe(self: &Arc<Self>, registry: &LiveRegistry, token: &CancellationToken) {
		let outcome = {
			let mut prober = self.prober.lock().await;
			tokio::select! {
				biased;
				_ = token.cancelled() => return,
				outcome = prober.check() => outcome,
			}
		};
		if token.is_cancelled() {
			return;
		}

		match outcome {
			Ok(()) => {
				if registry.insert(Arc::clone(self)).await {
					tracing::info!("[{}] {} registered", self.id, self.name());
				}
				self.set_probe_state(JobState::Registered);
			}
			Err(e) => {
				if registry.remove(self.id).await {
					tracing::warn!("[{}] {} deregistered: {}", self.id, self.name(), e);
				} else {
					tracing::debug!("[{}] {} still unhealthy: {}", self.id, self.name(), e);
				}
				self.set_probe_state(JobState::Unregistered);
			}
		}
	}

	/// Held by the manager from the start of a restart until the replacement
	/// has started.
	pub(crate) fn relaunch_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
		Arc::clone(&self.relaunch)
	}

	fn set_state(&self, next: JobState) {
		*self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
	}

	/// Probe results never override a stop in progress.
	fn set_probe_state(&self, next: JobState) {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		if !matches!(*state, JobState::Stopping | JobState::Stopped) {
			*state = next;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::sync::atomic::AtomicUsize;
	use std::time::Duration;

	struct Scripted {
		results: Arc<Mutex<Vec<bool>>>,
	}

	#[async_trait]
	impl HealthCheck for Scripted {
		async fn check(&mut self) -> Result<(), JobError> {
			let next = {
				let mut results = self.results.lock().unwrap();
				if results.len() > 1 {
					results.remove(0)
				} else {
					results[0]
				}
			};
			if next {
				Ok(())
			} else {
				Err(JobError::Probe {
					target: "scripted".into(),
					reason: "down".into(),
				})
			}
		}
	}

	struct Counting(Arc<AtomicUsize>);

	#[async_trait]
	impl HealthCheck for Counting {
		async fn check(&mut self) -> Result<(), JobError> {
			self.0.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	fn scope() -> JobScope {
		JobScope {
			config_name: "test".into(),
			registry: LiveRegistry::new(),
			outputs: OutputHub::discard(),
			tracker: TaskTracker::new(),
		}
	}

	fn sleeper(name: &str, health_check: Option<HealthCheckSpec>) -> Arc<JobSpec> {
		let mut spec = JobSpec::new(name, "sleep");
		spec.args = vec!["60".into()];
		spec.health_check = health_check;
		Arc::new(spec)
	}

	fn periodic(interval_ms: u64) -> HealthCheckSpec {
		let mut hc = HealthCheckSpec::tcp("unused:0", Duration::from_millis(100));
		hc.interval = Some(Duration::from_millis(interval_ms));
		hc
	}

	async fn eventually<F, Fut>(mut cond: F) -> bool
	where
		F: FnMut() -> Fut,
		Fut: std::future::Future<Output = bool>,
	{
		for _ in 0..100 {
			if cond().await {
				return true;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		false
	}

	#[tokio::test]
	async fn stop_fires_once_under_concurrency() {
		let scope = scope();
		let job = Arc::new(RunningJob::new(JobId(0), sleeper("sleeper", None)));
		job.start(&scope, CancellationToken::new()).await.unwrap();

		let mut handles = Vec::new();
		for _ in 0..16 {
			let job = Arc::clone(&job);
			handles.push(tokio::spawn(async move { job.stop() }));
		}
		let mut fired = 0;
		for handle in handles {
			if handle.await.unwrap() {
				fired += 1;
			}
		}
		assert_eq!(fired, 1);
		assert!(!job.stop());
		let _ = job.wait().await;
	}

	#[tokio::test]
	async fn stop_before_start_does_nothing() {
		let job = RunningJob::new(JobId(0), sleeper("idle", None));
		assert!(!job.stop());
		assert!(job.wait().await.is_ok());
	}

	#[tokio::test]
	async fn one_shot_probe_registers_and_stays() {
		let scope = scope();
		let count = Arc::new(AtomicUsize::new(0));
		let job = Arc::new(RunningJob::with_parts(
			JobId(3),
			sleeper("web", None),
			Box::new(ProcessRunner::new()),
			Box::new(Counting(Arc::clone(&count))),
		));
		let token = CancellationToken::new();
		job.start(&scope, token.clone()).await.unwrap();

		assert!(eventually(|| scope.registry.contains(JobId(3))).await);
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(job.state(), JobState::Registered);

		job.stop_and_wait().await.ok();
		assert!(scope.registry.contains(JobId(3)).await);
	}

	#[tokio::test]
	async fn membership_tracks_latest_probe() {
		let scope = scope();
		let results = Arc::new(Mutex::new(vec![true, true, false]));
		let job = Arc::new(RunningJob::with_parts(
			JobId(1),
			sleeper("api", Some(periodic(50))),
			Box::new(ProcessRunner::new()),
			Box::new(Scripted {
				results: Arc::clone(&results),
			}),
		));
		job.start(&scope, CancellationToken::new()).await.unwrap();

		assert!(eventually(|| scope.registry.contains(JobId(1))).await);
		assert!(eventually(|| async { !scope.registry.contains(JobId(1)).await }).await);
		assert_eq!(job.state(), JobState::Unregistered);

		*results.lock().unwrap() = vec![true];
		assert!(eventually(|| scope.registry.contains(JobId(1))).await);

		job.stop_and_wait().await.ok();
	}

	#[tokio::test]
	async fn cancelled_probe_loop_ends_and_is_tracked() {
		let scope = scope();
		let job = Arc::new(RunningJob::new(
			JobId(2),
			sleeper("slow", Some({
				let mut hc = periodic(50);
				hc.delay = Some(Duration::from_secs(30));
				hc
			})),
		));
		let token = CancellationToken::new();
		let generation = job.start(&scope, token.clone()).await.unwrap();
		assert_eq!(job.state(), JobState::Probing);

		job.stop_and_wait().await.ok();
		job.finish(generation);
		assert_eq!(job.state(), JobState::Stopped);

		scope.tracker.close();
		let drained = tokio::time::timeout(Duration::from_secs(2), scope.tracker.wait()).await;
		assert!(drained.is_ok(), "probe loop outlived its token");
		assert!(!scope.registry.contains(JobId(2)).await);
	}

	#[tokio::test]
	async fn failed_start_never_probes() {
		let scope = scope();
		let job = Arc::new(RunningJob::new(
			JobId(4),
			Arc::new(JobSpec::new("ghost", "/definitely/not/a/binary")),
		));
		let err = job.start(&scope, CancellationToken::new()).await.unwrap_err();
		assert!(matches!(err, JobError::Spawn { .. }));
		assert_eq!(job.state(), JobState::Stopped);
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(!scope.registry.contains(JobId(4)).await);
	}
}
