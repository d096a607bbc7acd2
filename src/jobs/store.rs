//! Background Job Runner (C8) persistence contract and in-memory backend.

// self
use crate::{_prelude::*, auth::TenantId};

/// Future returned by [`JobStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Error type produced by [`JobStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Job lifecycle state (§4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	/// Waiting for `next_eligible_time` or initial dispatch.
	Pending,
	/// Reserved and currently executing.
	Running,
	/// Terminal: completed successfully.
	Succeeded,
	/// Terminal: exhausted retries or hit a permanent error.
	Failed,
	/// Terminal: cancelled by the caller.
	Cancelled,
}
impl JobStatus {
	/// Returns `true` for the three terminal states.
	pub const fn is_terminal(self) -> bool {
		matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
	}
}

/// Fields supplied by the caller when submitting a job; the runner assigns `job_id` and the
/// bookkeeping timestamps.
#[derive(Clone, Debug)]
pub struct NewJob {
	/// Owning tenant; `None` for system-wide work.
	pub tenant: Option<TenantId>,
	/// Dedup key: a second submission sharing this key returns the prior job (§4.8).
	pub idempotency_key: Option<String>,
	/// Name of the registered handler this job invokes.
	pub function_name: String,
	/// Handler arguments.
	pub arguments: serde_json::Value,
}

/// One unit of deferred or recurring work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
	/// Globally unique job id.
	pub job_id: u64,
	/// Owning tenant; `None` for system-wide work.
	pub tenant: Option<TenantId>,
	/// Dedup key, if the caller supplied one.
	pub idempotency_key: Option<String>,
	/// Name of the registered handler this job invokes.
	pub function_name: String,
	/// Handler arguments.
	pub arguments: serde_json::Value,
	/// Current lifecycle state.
	pub status: JobStatus,
	/// Number of execution attempts so far.
	pub attempt_count: u32,
	/// Earliest instant the scheduler may dispatch this job.
	pub next_eligible_time: OffsetDateTime,
	/// Submission instant.
	pub created_at: OffsetDateTime,
	/// Instant the most recent attempt began.
	pub started_at: Option<OffsetDateTime>,
	/// Instant the job reached a terminal state.
	pub finished_at: Option<OffsetDateTime>,
	/// Error message from the most recent failed attempt.
	pub last_error: Option<String>,
	/// Handler result, retained through the idempotency replay window.
	pub result: Option<serde_json::Value>,
}

/// Filter applied by [`JobStore::list_by_filter`].
#[derive(Clone, Debug, Default)]
pub struct JobFilter {
	/// Restrict to one tenant; `None` matches every tenant, including system-wide jobs.
	pub tenant: Option<TenantId>,
	/// Restrict to one lifecycle state.
	pub status: Option<JobStatus>,
}

/// Pluggable storage backend for [`Job`]s (§4.8: "in-memory for development, Redis-class store
/// for production").
pub trait JobStore
where
	Self: Send + Sync,
{
	/// Inserts or overwrites a job record.
	fn save(&self, job: Job) -> StoreFuture<'_, ()>;

	/// Fetches one job by id.
	fn get_by_id(&self, job_id: u64) -> StoreFuture<'_, Option<Job>>;

	/// Fetches one job by idempotency key, if any job was submitted with it.
	fn get_by_idempotency_key<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Job>>;

	/// Lists jobs matching the given filter.
	fn list_by_filter(&self, filter: JobFilter) -> StoreFuture<'_, Vec<Job>>;

	/// Deletes a job record (administrative cleanup only; not used by the runner itself).
	fn delete(&self, job_id: u64) -> StoreFuture<'_, ()>;

	/// Atomically transitions a job from `pending` to `running`. Returns `false` if the job was
	/// not in `pending` state (already reserved by another scanner, or in a terminal state).
	fn try_reserve(&self, job_id: u64) -> StoreFuture<'_, bool>;
}

/// Thread-safe in-memory [`JobStore`] for development and tests.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
	jobs: RwLock<HashMap<u64, Job>>,
}
impl JobStore for MemoryJobStore {
	fn save(&self, job: Job) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.jobs.write().insert(job.job_id, job);

			Ok(())
		})
	}

	fn get_by_id(&self, job_id: u64) -> StoreFuture<'_, Option<Job>> {
		Box::pin(async move { Ok(self.jobs.read().get(&job_id).cloned()) })
	}

	fn get_by_idempotency_key<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Job>> {
		Box::pin(async move {
			Ok(self
				.jobs
				.read()
				.values()
				.filter(|j| j.idempotency_key.as_deref() == Some(key))
				.max_by_key(|j| j.created_at)
				.cloned())
		})
	}

	fn list_by_filter(&self, filter: JobFilter) -> StoreFuture<'_, Vec<Job>> {
		Box::pin(async move {
			Ok(self
				.jobs
				.read()
				.values()
				.filter(|j| match &filter.tenant {
					Some(tenant) => j.tenant.as_ref() == Some(tenant),
					None => true,
				})
				.filter(|j| filter.status.is_none_or(|status| j.status == status))
				.cloned()
				.collect())
		})
	}

	fn delete(&self, job_id: u64) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.jobs.write().remove(&job_id);

			Ok(())
		})
	}

	fn try_reserve(&self, job_id: u64) -> StoreFuture<'_, bool> {
		Box::pin(async move {
			let mut jobs = self.jobs.write();

			match jobs.get_mut(&job_id) {
				Some(job) if job.status == JobStatus::Pending => {
					job.status = JobStatus::Running;
					job.started_at = Some(OffsetDateTime::now_utc());

					Ok(true)
				},
				_ => Ok(false),
			}
		})
	}
}
