//! Schema migration for the sea-orm [`super::SeaOrmTransactionLogStore`] backend.

// crates.io
use sea_orm_migration::prelude::*;

/// Runs every migration owned by this crate; an embedder calls `Migrator::up(&db, None)` once at
/// startup before handing the connection to [`super::SeaOrmTransactionLogStore::new`].
pub struct Migrator;
#[async_trait::async_trait]
impl MigratorTrait for Migrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![Box::new(CreateTransactionLogEntries)]
	}
}

#[derive(DeriveMigrationName)]
struct CreateTransactionLogEntries;
#[async_trait::async_trait]
impl MigrationTrait for CreateTransactionLogEntries {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(TransactionLogEntries::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(TransactionLogEntries::EntryId)
							.big_integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(TransactionLogEntries::Tenant).string().not_null())
					.col(ColumnDef::new(TransactionLogEntries::EntityKind).string().not_null())
					.col(ColumnDef::new(TransactionLogEntries::EntityLocalId).string().not_null())
					.col(ColumnDef::new(TransactionLogEntries::TransactionType).string().not_null())
					.col(ColumnDef::new(TransactionLogEntries::Source).string().not_null())
					.col(ColumnDef::new(TransactionLogEntries::ExternalId).string())
					.col(ColumnDef::new(TransactionLogEntries::ExternalSyncToken).big_integer())
					.col(ColumnDef::new(TransactionLogEntries::WirePayload).json().not_null())
					.col(ColumnDef::new(TransactionLogEntries::Diff).json().not_null())
					.col(ColumnDef::new(TransactionLogEntries::ActorUserId).string())
					.col(ColumnDef::new(TransactionLogEntries::SessionId).string())
					.col(ColumnDef::new(TransactionLogEntries::Reason).string().not_null())
					.col(ColumnDef::new(TransactionLogEntries::Metadata).json().not_null())
					.col(ColumnDef::new(TransactionLogEntries::CreatedAt).string().not_null())
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_transaction_log_entries_tenant_kind_entity")
					.table(TransactionLogEntries::Table)
					.col(TransactionLogEntries::Tenant)
					.col(TransactionLogEntries::EntityKind)
					.col(TransactionLogEntries::EntityLocalId)
					.to_owned(),
			)
			.await
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager.drop_table(Table::drop().table(TransactionLogEntries::Table).to_owned()).await
	}
}

#[derive(DeriveIden)]
enum TransactionLogEntries {
	Table,
	EntryId,
	Tenant,
	EntityKind,
	EntityLocalId,
	TransactionType,
	Source,
	ExternalId,
	ExternalSyncToken,
	WirePayload,
	Diff,
	ActorUserId,
	SessionId,
	Reason,
	Metadata,
	CreatedAt,
}
