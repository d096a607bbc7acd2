//! Schema migration for the sea-orm [`super::SeaOrmJobStore`] backend.

// crates.io
use sea_orm_migration::prelude::*;

/// Runs every migration owned by this crate; an embedder calls `Migrator::up(&db, None)` once at
/// startup before handing the connection to [`super::SeaOrmJobStore::new`].
pub struct Migrator;
#[async_trait::async_trait]
impl MigratorTrait for Migrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![Box::new(CreateJobs)]
	}
}

#[derive(DeriveMigrationName)]
struct CreateJobs;
#[async_trait::async_trait]
impl MigrationTrait for CreateJobs {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Jobs::Table)
					.if_not_exists()
					.col(ColumnDef::new(Jobs::JobId).big_integer().not_null().primary_key())
					.col(ColumnDef::new(Jobs::Tenant).string())
					.col(ColumnDef::new(Jobs::IdempotencyKey).string())
					.col(ColumnDef::new(Jobs::FunctionName).string().not_null())
					.col(ColumnDef::new(Jobs::Arguments).json().not_null())
					.col(ColumnDef::new(Jobs::Status).string().not_null())
					.col(ColumnDef::new(Jobs::AttemptCount).integer().not_null().default(0))
					.col(ColumnDef::new(Jobs::NextEligibleTime).string().not_null())
					.col(ColumnDef::new(Jobs::CreatedAt).string().not_null())
					.col(ColumnDef::new(Jobs::StartedAt).string())
					.col(ColumnDef::new(Jobs::FinishedAt).string())
					.col(ColumnDef::new(Jobs::LastError).string())
					.col(ColumnDef::new(Jobs::Result).json())
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_jobs_status_next_eligible_time")
					.table(Jobs::Table)
					.col(Jobs::Status)
					.col(Jobs::NextEligibleTime)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_jobs_idempotency_key")
					.table(Jobs::Table)
					.col(Jobs::IdempotencyKey)
					.to_owned(),
			)
			.await
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager.drop_table(Table::drop().table(Jobs::Table).to_owned()).await
	}
}

#[derive(DeriveIden)]
enum Jobs {
	Table,
	JobId,
	Tenant,
	IdempotencyKey,
	FunctionName,
	Arguments,
	Status,
	AttemptCount,
	NextEligibleTime,
	CreatedAt,
	StartedAt,
	FinishedAt,
	LastError,
	Result,
}
