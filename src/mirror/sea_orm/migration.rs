//! Schema migration for the sea-orm [`super::SeaOrmMirrorStore`] backend.

// crates.io
use sea_orm_migration::prelude::*;

/// Runs every migration owned by this crate; an embedder calls `Migrator::up(&db, None)` once at
/// startup before handing the connection to [`super::SeaOrmMirrorStore::new`].
pub struct Migrator;
#[async_trait::async_trait]
impl MigratorTrait for Migrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![Box::new(CreateMirrorRows)]
	}
}

#[derive(DeriveMigrationName)]
struct CreateMirrorRows;
#[async_trait::async_trait]
impl MigrationTrait for CreateMirrorRows {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(MirrorRows::Table)
					.if_not_exists()
					.col(ColumnDef::new(MirrorRows::Tenant).string().not_null())
					.col(ColumnDef::new(MirrorRows::Kind).string().not_null())
					.col(ColumnDef::new(MirrorRows::ExternalId).string().not_null())
					.col(ColumnDef::new(MirrorRows::SyncToken).big_integer().not_null())
					.col(ColumnDef::new(MirrorRows::AmountCents).big_integer())
					.col(ColumnDef::new(MirrorRows::Fields).json().not_null())
					.col(ColumnDef::new(MirrorRows::IsActive).boolean().not_null().default(true))
					.col(ColumnDef::new(MirrorRows::DeactivatedAtSyncToken).big_integer())
					.col(ColumnDef::new(MirrorRows::LastSyncedAt).string().not_null())
					.primary_key(
						Index::create()
							.col(MirrorRows::Tenant)
							.col(MirrorRows::Kind)
							.col(MirrorRows::ExternalId),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_mirror_rows_tenant_kind_active")
					.table(MirrorRows::Table)
					.col(MirrorRows::Tenant)
					.col(MirrorRows::Kind)
					.col(MirrorRows::IsActive)
					.to_owned(),
			)
			.await
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager.drop_table(Table::drop().table(MirrorRows::Table).to_owned()).await
	}
}

#[derive(DeriveIden)]
enum MirrorRows {
	Table,
	Tenant,
	Kind,
	ExternalId,
	SyncToken,
	AmountCents,
	Fields,
	IsActive,
	DeactivatedAtSyncToken,
	LastSyncedAt,
}
