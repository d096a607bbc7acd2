//! Sea-ORM-backed [`JobStore`] (C8), enabled via the `sea-orm` feature.
//!
//! `job_id` is caller-supplied (assigned by [`crate::jobs::JobRunner`]'s own counter, not by the
//! store), so the `jobs` table's primary key is a plain, non-auto-increment column, the same
//! composite-natural-key shape the mirror store's table uses.

// self
use crate::{
	_prelude::*,
	auth::TenantId,
	jobs::store::{Job, JobFilter, JobStatus, JobStore, StoreError, StoreFuture},
};
// crates.io
use sea_orm::{ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait, entity::prelude::*};

pub mod migration;

/// Hand-authored sea-orm entity for the `jobs` table.
pub mod entity {
	// crates.io
	use sea_orm::entity::prelude::*;

	/// Row shape of the `jobs` table; a flat mapping of [`super::Job`].
	#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
	#[sea_orm(table_name = "jobs")]
	pub struct Model {
		/// Caller-assigned job id; not auto-incrementing.
		#[sea_orm(primary_key, auto_increment = false)]
		pub job_id: i64,
		/// Owning tenant; `None` for system-wide work.
		pub tenant: Option<String>,
		/// Dedup key, if the caller supplied one.
		pub idempotency_key: Option<String>,
		/// Name of the registered handler this job invokes.
		pub function_name: String,
		/// Handler arguments.
		pub arguments: Json,
		/// Current lifecycle state, stored as its `snake_case` label.
		pub status: String,
		/// Number of execution attempts so far.
		pub attempt_count: i32,
		/// RFC 3339 earliest-dispatch instant.
		pub next_eligible_time: String,
		/// RFC 3339 submission instant.
		pub created_at: String,
		/// RFC 3339 instant the most recent attempt began.
		pub started_at: Option<String>,
		/// RFC 3339 instant the job reached a terminal state.
		pub finished_at: Option<String>,
		/// Error message from the most recent failed attempt.
		pub last_error: Option<String>,
		/// Handler result, retained through the idempotency replay window.
		pub result: Option<Json>,
	}

	/// No related tables: a job record is self-contained.
	#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
	pub enum Relation {}

	impl ActiveModelBehavior for ActiveModel {}
}

use entity::{ActiveModel, Column, Entity as JobEntity, Model};

fn status_to_str(status: JobStatus) -> &'static str {
	match status {
		JobStatus::Pending => "pending",
		JobStatus::Running => "running",
		JobStatus::Succeeded => "succeeded",
		JobStatus::Failed => "failed",
		JobStatus::Cancelled => "cancelled",
	}
}

fn status_from_str(s: &str) -> Result<JobStatus, StoreError> {
	match s {
		"pending" => Ok(JobStatus::Pending),
		"running" => Ok(JobStatus::Running),
		"succeeded" => Ok(JobStatus::Succeeded),
		"failed" => Ok(JobStatus::Failed),
		"cancelled" => Ok(JobStatus::Cancelled),
		other => Err(StoreError::Backend { message: format!("unrecognized stored job status `{other}`") }),
	}
}

fn format_rfc3339(instant: OffsetDateTime) -> String {
	instant.format(&time::format_description::well_known::Rfc3339).expect("OffsetDateTime should format as RFC 3339.")
}

fn parse_rfc3339(s: &str) -> Result<OffsetDateTime, StoreError> {
	OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
		.map_err(|e| StoreError::Backend { message: format!("stored timestamp is not RFC 3339: {e}") })
}

fn model_to_job(model: Model) -> Result<Job, StoreError> {
	let tenant = model.tenant.map(|t| TenantId::new(&t)).transpose().map_err(|e| StoreError::Backend { message: e.to_string() })?;

	Ok(Job {
		job_id: model.job_id as u64,
		tenant,
		idempotency_key: model.idempotency_key,
		function_name: model.function_name,
		arguments: model.arguments,
		status: status_from_str(&model.status)?,
		attempt_count: model.attempt_count as u32,
		next_eligible_time: parse_rfc3339(&model.next_eligible_time)?,
		created_at: parse_rfc3339(&model.created_at)?,
		started_at: model.started_at.map(|s| parse_rfc3339(&s)).transpose()?,
		finished_at: model.finished_at.map(|s| parse_rfc3339(&s)).transpose()?,
		last_error: model.last_error,
		result: model.result,
	})
}

fn job_to_active_model(job: &Job) -> ActiveModel {
	ActiveModel {
		job_id: Set(job.job_id as i64),
		tenant: Set(job.tenant.as_ref().map(|t| t.to_string())),
		idempotency_key: Set(job.idempotency_key.clone()),
		function_name: Set(job.function_name.clone()),
		arguments: Set(job.arguments.clone()),
		status: Set(status_to_str(job.status).to_owned()),
		attempt_count: Set(job.attempt_count as i32),
		next_eligible_time: Set(format_rfc3339(job.next_eligible_time)),
		created_at: Set(format_rfc3339(job.created_at)),
		started_at: Set(job.started_at.map(format_rfc3339)),
		finished_at: Set(job.finished_at.map(format_rfc3339)),
		last_error: Set(job.last_error.clone()),
		result: Set(job.result.clone()),
	}
}

/// Sea-ORM-backed [`JobStore`], gated behind the `sea-orm` feature.
#[derive(Clone, Debug)]
pub struct SeaOrmJobStore {
	db: DatabaseConnection,
}
impl SeaOrmJobStore {
	/// Wraps an already-connected, already-migrated [`DatabaseConnection`].
	pub fn new(db: DatabaseConnection) -> Self {
		Self { db }
	}
}
impl JobStore for SeaOrmJobStore {
	fn save(&self, job: Job) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			JobEntity::insert(job_to_active_model(&job))
				.on_conflict(
					sea_orm::sea_query::OnConflict::column(Column::JobId)
						.update_columns([
							Column::Tenant,
							Column::IdempotencyKey,
							Column::FunctionName,
							Column::Arguments,
							Column::Status,
							Column::AttemptCount,
							Column::NextEligibleTime,
							Column::StartedAt,
							Column::FinishedAt,
							Column::LastError,
							Column::Result,
						])
						.to_owned(),
				)
				.exec(&self.db)
				.await
				.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			Ok(())
		})
	}

	fn get_by_id(&self, job_id: u64) -> StoreFuture<'_, Option<Job>> {
		Box::pin(async move {
			JobEntity::find_by_id(job_id as i64)
				.one(&self.db)
				.await
				.map_err(|e| StoreError::Backend { message: e.to_string() })?
				.map(model_to_job)
				.transpose()
		})
	}

	fn get_by_idempotency_key<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Job>> {
		Box::pin(async move {
			JobEntity::find()
				.filter(Column::IdempotencyKey.eq(key))
				.order_by_desc(Column::CreatedAt)
				.one(&self.db)
				.await
				.map_err(|e| StoreError::Backend { message: e.to_string() })?
				.map(model_to_job)
				.transpose()
		})
	}

	fn list_by_filter(&self, filter: JobFilter) -> StoreFuture<'_, Vec<Job>> {
		Box::pin(async move {
			let mut query = JobEntity::find();

			if let Some(tenant) = &filter.tenant {
				query = query.filter(Column::Tenant.eq(tenant.to_string()));
			}
			if let Some(status) = filter.status {
				query = query.filter(Column::Status.eq(status_to_str(status)));
			}

			let models = query.all(&self.db).await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			models.into_iter().map(model_to_job).collect()
		})
	}

	fn delete(&self, job_id: u64) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			JobEntity::delete_by_id(job_id as i64).exec(&self.db).await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			Ok(())
		})
	}

	fn try_reserve(&self, job_id: u64) -> StoreFuture<'_, bool> {
		Box::pin(async move {
			let txn = self.db.begin().await.map_err(|e| StoreError::Backend { message: e.to_string() })?;
			let model = JobEntity::find_by_id(job_id as i64)
				.one(&txn)
				.await
				.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			let Some(model) = model else {
				return Ok(false);
			};

			if model.status != status_to_str(JobStatus::Pending) {
				return Ok(false);
			}

			let mut active: ActiveModel = model.into();

			active.status = Set(status_to_str(JobStatus::Running).to_owned());
			active.started_at = Set(Some(format_rfc3339(OffsetDateTime::now_utc())));
			active.update(&txn).await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			txn.commit().await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			Ok(true)
		})
	}
}
