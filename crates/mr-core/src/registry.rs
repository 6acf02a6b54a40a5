use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::supervisor::RunningJob;
use crate::types::{JobId, JobInfo};

/// Jobs whose most recent health probe succeeded, keyed by id.
///
/// All mutation goes through the write lock; `get` and `snapshot` take the
/// read lock. Entries can come and go between a lookup and its use.
#[derive(Clone, Default)]
pub struct LiveRegistry {
	jobs: Arc<RwLock<BTreeMap<JobId, Arc<RunningJob>>>>,
}

impl LiveRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns true if the id was not registered before.
	pub async fn insert(&self, job: Arc<RunningJob>) -> bool {
		let mut jobs = self.jobs.write().await;
		jobs.insert(job.id(), job).is_none()
	}

	/// Returns true if an entry was removed.
	pub async fn remove(&self, id: JobId) -> bool {
		let mut jobs = self.jobs.write().await;
		jobs.remove(&id).is_some()
	}

	pub async fn get(&self, id: JobId) -> Option<Arc<RunningJob>> {
		let jobs = self.jobs.read().await;
		jobs.get(&id).cloned()
	}

	pub async fn contains(&self, id: JobId) -> bool {
		self.jobs.read().await.contains_key(&id)
	}

	/// Registered jobs in id order.
	pub async fn snapshot(&self) -> Vec<JobInfo> {
		let jobs = self.jobs.read().await;
		jobs.values()
			.map(|job| JobInfo {
				id: job.id(),
				name: job.name().to_string(),
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::JobSpec;

	fn job(id: u32, name: &str) -> Arc<RunningJob> {
		Arc::new(RunningJob::new(JobId(id), Arc::new(JobSpec::new(name, "true"))))
	}

	#[tokio::test]
	async fn insert_overwrites_and_remove_is_idempotent() {
		let registry = LiveRegistry::new();
		assert!(registry.insert(job(1, "web")).await);
		assert!(!registry.insert(job(1, "web")).await);
		assert!(registry.contains(JobId(1)).await);

		assert!(registry.remove(JobId(1)).await);
		assert!(!registry.remove(JobId(1)).await);
		assert!(registry.get(JobId(1)).await.is_none());
	}

	#[tokio::test]
	async fn snapshot_is_ordered_by_id() {
		let registry = LiveRegistry::new();
		registry.insert(job(2, "worker")).await;
		registry.insert(job(0, "api")).await;
		registry.insert(job(1, "web")).await;
		let names: Vec<String> = registry
			.snapshot()
			.await
			.into_iter()
			.map(|info| format!("{} {}", info.id, info.name))
			.collect();
		assert_eq!(names, vec!["0 api", "1 web", "2 worker"]);
	}
}
