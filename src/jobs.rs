//! Background Job Runner (C8): schedules and executes recurring or deferred work.
//!
//! The state machine is driven entirely through [`JobStore::try_reserve`] (the compare-and-set
//! pending→running step) so multiple [`JobRunner::run_once`] callers — even across processes
//! sharing a durable store — never double-dispatch the same job (§4.8, §5 "parallel workers").

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	auth::TenantId,
	config::{JobStorageKind, SyncCoreConfig},
	jobs::store::{Job, JobFilter, JobStatus},
	obs::{self, ComponentKind, ComponentSpan, Outcome},
	transport::backoff_delay,
};

#[cfg(feature = "sea-orm")]
pub mod sea_orm;
pub mod store;

#[cfg(feature = "sea-orm")]
pub use sea_orm::SeaOrmJobStore;
pub use store::{JobStore, MemoryJobStore, NewJob, StoreError};

/// Builds the [`JobStore`] named by `config.jobs_storage`, wiring the decorative config field
/// into an actual backend selection (§4.8).
///
/// `sea_orm_db` is only consulted for [`JobStorageKind::Postgres`]; pass `None` when the caller
/// has not established a database connection.
#[cfg(feature = "sea-orm")]
pub fn build_job_store(
	config: &SyncCoreConfig,
	sea_orm_db: Option<::sea_orm::DatabaseConnection>,
) -> Result<Arc<dyn JobStore>, Error> {
	match config.jobs_storage {
		JobStorageKind::Memory => Ok(Arc::new(MemoryJobStore::default())),
		JobStorageKind::Redis => Err(Error::Validation {
			reason: "redis job storage has no implementation in this crate; supply a custom \
			         JobStore and construct JobRunner::new directly"
				.into(),
		}),
		JobStorageKind::Postgres => {
			let db = sea_orm_db.ok_or_else(|| Error::Validation {
				reason: "postgres job storage requires a DatabaseConnection".into(),
			})?;

			Ok(Arc::new(sea_orm::SeaOrmJobStore::new(db)))
		},
	}
}

/// Builds the [`JobStore`] named by `config.jobs_storage`, wiring the decorative config field
/// into an actual backend selection (§4.8).
#[cfg(not(feature = "sea-orm"))]
pub fn build_job_store(config: &SyncCoreConfig) -> Result<Arc<dyn JobStore>, Error> {
	match config.jobs_storage {
		JobStorageKind::Memory => Ok(Arc::new(MemoryJobStore::default())),
		JobStorageKind::Redis => Err(Error::Validation {
			reason: "redis job storage has no implementation in this crate; supply a custom \
			         JobStore and construct JobRunner::new directly"
				.into(),
		}),
		JobStorageKind::Postgres => {
			Err(Error::Validation { reason: "postgres job storage requires the `sea-orm` feature".into() })
		},
	}
}

/// Standard periodic sync functions dispatched every `jobs_scheduled_sync_interval_min` for
/// each connected tenant (§4.8).
pub const STANDARD_SYNC_FUNCTIONS: &[&str] =
	&["sync_bills", "sync_invoices", "sync_vendors", "sync_customers", "sync_accounts", "sync_company_info"];

/// Window within which a terminal job sharing an idempotency key returns its prior result
/// instead of executing again (§4.8).
const IDEMPOTENCY_REPLAY_WINDOW: Duration = Duration::hours(24);

/// Overall deadline for a single job attempt, after which it is marked failed (§5).
const JOB_DEADLINE: std::time::Duration = std::time::Duration::from_secs(600);

/// Maximum jobs executing concurrently for a single tenant, across every [`JobRunner::run_once`]
/// caller sharing this runner (§4.8 "per-tenant concurrency is bounded").
const MAX_CONCURRENT_PER_TENANT: usize = 4;

/// A registered unit of work a [`Job`] can invoke by `function_name`.
pub trait JobHandler
where
	Self: Send + Sync,
{
	/// Executes the job and returns a JSON result to retain through the replay window.
	fn call<'a>(
		&'a self,
		job: &'a Job,
	) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, Error>> + Send + 'a>>;
}

/// C8: reserves and executes jobs against a pluggable [`JobStore`].
pub struct JobRunner {
	store: Arc<dyn JobStore>,
	handlers: HashMap<String, Arc<dyn JobHandler>>,
	next_job_id: AtomicU64,
	max_attempts: u32,
	in_flight: Mutex<HashMap<Option<String>, usize>>,
}
impl JobRunner {
	/// Builds a runner over the given store with no handlers registered yet.
	pub fn new(store: Arc<dyn JobStore>, max_attempts: u32) -> Self {
		Self {
			store,
			handlers: HashMap::new(),
			next_job_id: AtomicU64::new(1),
			max_attempts,
			in_flight: Mutex::new(HashMap::new()),
		}
	}

	/// Registers a handler for `function_name`. Builder-style: call once per function before
	/// the runner starts processing.
	pub fn with_handler(mut self, function_name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
		self.handlers.insert(function_name.into(), handler);

		self
	}

	/// *submit(new_job)*: creates a job, or returns the id of a prior job sharing its
	/// idempotency key (§4.8 idempotency contract).
	pub async fn submit(&self, new_job: NewJob) -> Result<u64, Error> {
		if let Some(key) = &new_job.idempotency_key {
			if let Some(existing) = self.store.get_by_idempotency_key(key).await? {
				if !existing.status.is_terminal() {
					return Ok(existing.job_id);
				}

				let settled_at = existing.finished_at.unwrap_or(existing.created_at);

				if OffsetDateTime::now_utc() - settled_at <= IDEMPOTENCY_REPLAY_WINDOW {
					return Ok(existing.job_id);
				}
			}
		}

		let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
		let now = OffsetDateTime::now_utc();

		self
			.store
			.save(Job {
				job_id,
				tenant: new_job.tenant,
				idempotency_key: new_job.idempotency_key,
				function_name: new_job.function_name,
				arguments: new_job.arguments,
				status: JobStatus::Pending,
				attempt_count: 0,
				next_eligible_time: now,
				created_at: now,
				started_at: None,
				finished_at: None,
				last_error: None,
				result: None,
			})
			.await?;

		Ok(job_id)
	}

	/// Submits one job per [`STANDARD_SYNC_FUNCTIONS`] entry for `tenant`, deduplicated per
	/// `interval` window so repeated scheduler ticks within the same window are no-ops.
	pub async fn schedule_periodic_syncs(
		&self,
		tenant: &TenantId,
		interval: Duration,
	) -> Result<Vec<u64>, Error> {
		let bucket = OffsetDateTime::now_utc().unix_timestamp() / interval.whole_seconds().max(1);
		let mut job_ids = Vec::with_capacity(STANDARD_SYNC_FUNCTIONS.len());

		for function in STANDARD_SYNC_FUNCTIONS {
			let job_id = self
				.submit(NewJob {
					tenant: Some(tenant.clone()),
					idempotency_key: Some(format!("{}:{function}:{bucket}", tenant.as_ref())),
					function_name: (*function).to_owned(),
					arguments: serde_json::json!({}),
				})
				.await?;

			job_ids.push(job_id);
		}

		Ok(job_ids)
	}

	fn tenant_key(tenant: &Option<TenantId>) -> Option<String> {
		tenant.as_ref().map(|t| t.as_ref().to_owned())
	}

	fn try_admit(&self, tenant: &Option<TenantId>) -> bool {
		let mut in_flight = self.in_flight.lock();
		let slot = in_flight.entry(Self::tenant_key(tenant)).or_insert(0);

		if *slot < MAX_CONCURRENT_PER_TENANT {
			*slot += 1;

			true
		} else {
			false
		}
	}

	fn release(&self, tenant: &Option<TenantId>) {
		if let Some(slot) = self.in_flight.lock().get_mut(&Self::tenant_key(tenant)) {
			*slot = slot.saturating_sub(1);
		}
	}

	/// Reserves and executes at most one ready job. Returns the processed job's id, or `None`
	/// if no job was both due and admissible. Callers intending real concurrency run several
	/// tasks each looping this method (§5 "parallel workers"); per-tenant admission keeps any
	/// single tenant bounded regardless of how many callers are looping.
	pub async fn run_once(&self) -> Result<Option<u64>, Error> {
		let now = OffsetDateTime::now_utc();
		let candidates =
			self.store.list_by_filter(JobFilter { tenant: None, status: Some(JobStatus::Pending) }).await?;

		for job in candidates.into_iter().filter(|j| j.next_eligible_time <= now) {
			if !self.try_admit(&job.tenant) {
				continue;
			}

			if !self.store.try_reserve(job.job_id).await? {
				self.release(&job.tenant);

				continue;
			}

			let job_id = job.job_id;
			let tenant = job.tenant.clone();

			// The admission slot must be freed whether `execute` succeeds or fails (a storage
			// error, say) — propagating via `?` before releasing would leave the tenant's
			// counter permanently incremented and the job stuck mid-execution forever.
			let result = self.execute(job).await;

			self.release(&tenant);
			result?;

			return Ok(Some(job_id));
		}

		Ok(None)
	}

	async fn execute(&self, mut job: Job) -> Result<(), Error> {
		let span = ComponentSpan::new(ComponentKind::Jobs, "execute");

		span.record("job_id", &job.job_id.to_string());

		let _entered = span.entered();

		let Some(handler) = self.handlers.get(&job.function_name).cloned() else {
			job.status = JobStatus::Failed;
			job.finished_at = Some(OffsetDateTime::now_utc());
			job.last_error = Some(format!("no handler registered for `{}`", job.function_name));

			self.store.save(job).await?;
			obs::record_outcome(ComponentKind::Jobs, Outcome::Failure);

			return Ok(());
		};

		job.attempt_count += 1;

		let attempt = tokio::time::timeout(JOB_DEADLINE, handler.call(&job)).await;

		match attempt {
			Ok(Ok(result)) => {
				job.status = JobStatus::Succeeded;
				job.finished_at = Some(OffsetDateTime::now_utc());
				job.result = Some(result);

				self.store.save(job).await?;
				obs::record_outcome(ComponentKind::Jobs, Outcome::Success);
			},
			Ok(Err(error)) if error.is_retryable() && job.attempt_count < self.max_attempts => {
				job.status = JobStatus::Pending;
				job.last_error = Some(error.to_string());
				job.next_eligible_time = OffsetDateTime::now_utc()
					+ backoff_delay(job.attempt_count, Duration::seconds(300));

				self.store.save(job).await?;
			},
			Ok(Err(error)) => {
				job.status = JobStatus::Failed;
				job.finished_at = Some(OffsetDateTime::now_utc());
				job.last_error = Some(error.to_string());

				self.store.save(job).await?;
				obs::record_outcome(ComponentKind::Jobs, Outcome::Failure);
			},
			Err(_elapsed) => {
				job.status = JobStatus::Failed;
				job.finished_at = Some(OffsetDateTime::now_utc());
				job.last_error = Some(format!("deadline of {:?} exceeded", JOB_DEADLINE));

				self.store.save(job).await?;
				obs::record_outcome(ComponentKind::Jobs, Outcome::Failure);
			},
		}

		Ok(())
	}

	/// Marks a pending or running job cancelled. A running job is cancelled "softly": the
	/// handler is not interrupted mid-flight, but the job will not be retried on failure and
	/// the scheduler will not reserve it again (§4.8's soft-cancel transition).
	pub async fn cancel(&self, job_id: u64) -> Result<(), Error> {
		let Some(mut job) = self.store.get_by_id(job_id).await? else {
			return Err(Error::Validation { reason: format!("job {job_id} does not exist") });
		};

		if job.status.is_terminal() {
			return Ok(());
		}

		job.status = JobStatus::Cancelled;
		job.finished_at = Some(OffsetDateTime::now_utc());
		self.store.save(job).await?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::TransientError;

	fn tenant() -> TenantId {
		TenantId::new("t1").expect("Tenant fixture should be valid.")
	}

	struct OkHandler;
	impl JobHandler for OkHandler {
		fn call<'a>(
			&'a self,
			_job: &'a Job,
		) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, Error>> + Send + 'a>> {
			Box::pin(async move { Ok(serde_json::json!({"ok": true})) })
		}
	}

	struct FailNTimesHandler {
		remaining: Mutex<u32>,
	}
	impl JobHandler for FailNTimesHandler {
		fn call<'a>(
			&'a self,
			_job: &'a Job,
		) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, Error>> + Send + 'a>> {
			Box::pin(async move {
				let mut remaining = self.remaining.lock();

				if *remaining > 0 {
					*remaining -= 1;

					Err(Error::Transient(TransientError::LedgerResponse {
						message: "temporary".into(),
						status: Some(503),
						retry_after: None,
					}))
				} else {
					Ok(serde_json::json!({"ok": true}))
				}
			})
		}
	}

	fn runner(store: Arc<dyn JobStore>) -> JobRunner {
		JobRunner::new(store, 3).with_handler("sync_bills", Arc::new(OkHandler))
	}

	#[tokio::test]
	async fn submit_then_run_once_succeeds() {
		let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::default());
		let runner = runner(store.clone());
		let job_id = runner
			.submit(NewJob {
				tenant: Some(tenant()),
				idempotency_key: None,
				function_name: "sync_bills".into(),
				arguments: serde_json::json!({}),
			})
			.await
			.expect("Submit should succeed.");

		let processed = runner.run_once().await.expect("run_once should succeed.");

		assert_eq!(processed, Some(job_id));

		let job = store.get_by_id(job_id).await.expect("Fetch should succeed.").expect("Job should exist.");

		assert_eq!(job.status, JobStatus::Succeeded);
	}

	#[tokio::test]
	async fn idempotent_submission_returns_existing_nonterminal_job() {
		let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::default());
		let runner = runner(store);
		let new_job = || NewJob {
			tenant: Some(tenant()),
			idempotency_key: Some("key-1".into()),
			function_name: "sync_bills".into(),
			arguments: serde_json::json!({}),
		};
		let first = runner.submit(new_job()).await.expect("First submit should succeed.");
		let second = runner.submit(new_job()).await.expect("Second submit should succeed.");

		assert_eq!(first, second);
	}

	#[tokio::test]
	async fn transient_failure_retries_then_succeeds() {
		let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::default());
		let runner = JobRunner::new(store.clone(), 3)
			.with_handler("sync_bills", Arc::new(FailNTimesHandler { remaining: Mutex::new(1) }));
		let job_id = runner
			.submit(NewJob {
				tenant: Some(tenant()),
				idempotency_key: None,
				function_name: "sync_bills".into(),
				arguments: serde_json::json!({}),
			})
			.await
			.expect("Submit should succeed.");

		runner.run_once().await.expect("First attempt should not error.");

		let after_first =
			store.get_by_id(job_id).await.expect("Fetch should succeed.").expect("Job should exist.");

		assert_eq!(after_first.status, JobStatus::Pending);
		assert_eq!(after_first.attempt_count, 1);

		// Force the retry to be immediately eligible rather than waiting out the backoff.
		let mut retried = after_first;

		retried.next_eligible_time = OffsetDateTime::now_utc();
		store.save(retried).await.expect("Save should succeed.");

		let processed = runner.run_once().await.expect("Second attempt should not error.");

		assert_eq!(processed, Some(job_id));

		let finished =
			store.get_by_id(job_id).await.expect("Fetch should succeed.").expect("Job should exist.");

		assert_eq!(finished.status, JobStatus::Succeeded);
		assert_eq!(finished.attempt_count, 2);
	}

	#[tokio::test]
	async fn cancel_marks_pending_job_cancelled() {
		let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::default());
		let runner = runner(store.clone());
		let job_id = runner
			.submit(NewJob {
				tenant: Some(tenant()),
				idempotency_key: None,
				function_name: "sync_bills".into(),
				arguments: serde_json::json!({}),
			})
			.await
			.expect("Submit should succeed.");

		runner.cancel(job_id).await.expect("Cancel should succeed.");

		let job = store.get_by_id(job_id).await.expect("Fetch should succeed.").expect("Job should exist.");

		assert_eq!(job.status, JobStatus::Cancelled);
	}

	#[test]
	fn build_job_store_defaults_to_memory() {
		let config = SyncCoreConfig::builder().build().expect("Default config should build.");

		#[cfg(feature = "sea-orm")]
		let store = build_job_store(&config, None).expect("Memory backend should build.");
		#[cfg(not(feature = "sea-orm"))]
		let store = build_job_store(&config).expect("Memory backend should build.");

		let _: Arc<dyn JobStore> = store;
	}

	#[cfg(feature = "sea-orm")]
	#[test]
	fn build_job_store_rejects_postgres_without_connection() {
		let config = SyncCoreConfig::builder().jobs_storage(JobStorageKind::Postgres).build().expect("Config should build.");

		assert!(build_job_store(&config, None).is_err());
	}

	#[test]
	fn build_job_store_rejects_redis() {
		let config = SyncCoreConfig::builder().jobs_storage(JobStorageKind::Redis).build().expect("Config should build.");

		#[cfg(feature = "sea-orm")]
		let result = build_job_store(&config, None);
		#[cfg(not(feature = "sea-orm"))]
		let result = build_job_store(&config);

		assert!(result.is_err());
	}
}
