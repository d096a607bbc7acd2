//! Sea-ORM-backed [`MirrorStore`] (C4), enabled via the `sea-orm` feature.
//!
//! An embedder owns the [`DatabaseConnection`] and runs [`migration::Migrator`] at startup, the
//! same split the in-memory backend's caller never has to think about. The natural key
//! `(tenant, kind, external_id)` is the table's composite primary key, so there is no surrogate
//! row id to keep in sync with [`MirrorRow`].

// self
use crate::{
	_prelude::*,
	auth::TenantId,
	mirror::{
		entities::{EntityKind, MirrorRow},
		store::{MirrorStore, StoreError, StoreFuture, UpsertOutcome},
	},
};
// crates.io
use sea_orm::{ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait, entity::prelude::*};

pub mod migration;

/// Hand-authored sea-orm entity for the `mirror_rows` table.
pub mod entity {
	// crates.io
	use sea_orm::entity::prelude::*;

	/// Row shape of the `mirror_rows` table; a direct, flat mapping of [`super::MirrorRow`].
	#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
	#[sea_orm(table_name = "mirror_rows")]
	pub struct Model {
		/// Tenant this row belongs to; part of the composite primary key.
		#[sea_orm(primary_key, auto_increment = false)]
		pub tenant: String,
		/// Entity kind, stored as its [`super::super::entities::EntityKind::as_str`] label; part of
		/// the composite primary key.
		#[sea_orm(primary_key, auto_increment = false)]
		pub kind: String,
		/// External ledger id; part of the composite primary key.
		#[sea_orm(primary_key, auto_increment = false)]
		pub external_id: String,
		/// Monotonic sync token, stored as `i64`: real external sync tokens never approach
		/// `i64::MAX`, and Postgres has no native unsigned bigint.
		pub sync_token: i64,
		/// Primary amount in integer minor units (cents).
		pub amount_cents: Option<i64>,
		/// Domain-specific fields not common to every entity kind.
		pub fields: Json,
		/// `false` once the row has been soft-deleted.
		pub is_active: bool,
		/// Sync token recorded immediately before a soft-delete.
		pub deactivated_at_sync_token: Option<i64>,
		/// RFC 3339 timestamp of the last sync, kept as text to avoid a second datetime crate.
		pub last_synced_at: String,
	}

	/// No related tables: the mirror row is self-contained.
	#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
	pub enum Relation {}

	impl ActiveModelBehavior for ActiveModel {}
}

use entity::{ActiveModel, Column, Entity as MirrorRowEntity, Model};

fn kind_to_str(kind: EntityKind) -> String {
	kind.as_str().to_owned()
}

fn kind_from_str(s: &str) -> Result<EntityKind, StoreError> {
	match s {
		"bills" => Ok(EntityKind::Bill),
		"invoices" => Ok(EntityKind::Invoice),
		"vendors" => Ok(EntityKind::Vendor),
		"customers" => Ok(EntityKind::Customer),
		"payments" => Ok(EntityKind::Payment),
		"accounts" => Ok(EntityKind::Account),
		"balances" => Ok(EntityKind::Balance),
		other => Err(StoreError::Backend { message: format!("unrecognized stored entity kind `{other}`") }),
	}
}

fn model_to_row(model: Model) -> Result<MirrorRow, StoreError> {
	let last_synced_at = OffsetDateTime::parse(&model.last_synced_at, &time::format_description::well_known::Rfc3339)
		.map_err(|e| StoreError::Backend { message: format!("stored timestamp is not RFC 3339: {e}") })?;

	Ok(MirrorRow {
		tenant: TenantId::new(&model.tenant).map_err(|e| StoreError::Backend { message: e.to_string() })?,
		kind: kind_from_str(&model.kind)?,
		external_id: model.external_id,
		sync_token: model.sync_token as u64,
		amount_cents: model.amount_cents,
		fields: model.fields,
		is_active: model.is_active,
		deactivated_at_sync_token: model.deactivated_at_sync_token.map(|t| t as u64),
		last_synced_at,
	})
}

fn row_to_active_model(row: &MirrorRow) -> ActiveModel {
	ActiveModel {
		tenant: Set(row.tenant.to_string()),
		kind: Set(kind_to_str(row.kind)),
		external_id: Set(row.external_id.clone()),
		sync_token: Set(row.sync_token as i64),
		amount_cents: Set(row.amount_cents),
		fields: Set(row.fields.clone()),
		is_active: Set(row.is_active),
		deactivated_at_sync_token: Set(row.deactivated_at_sync_token.map(|t| t as i64)),
		last_synced_at: Set(row
			.last_synced_at
			.format(&time::format_description::well_known::Rfc3339)
			.expect("OffsetDateTime should format as RFC 3339.")),
	}
}

/// Sea-ORM-backed [`MirrorStore`], gated behind the `sea-orm` feature.
#[derive(Clone, Debug)]
pub struct SeaOrmMirrorStore {
	db: DatabaseConnection,
}
impl SeaOrmMirrorStore {
	/// Wraps an already-connected, already-migrated [`DatabaseConnection`].
	pub fn new(db: DatabaseConnection) -> Self {
		Self { db }
	}

	async fn find_model(&self, tenant: &TenantId, kind: EntityKind, external_id: &str) -> Result<Option<Model>, StoreError> {
		MirrorRowEntity::find_by_id((tenant.to_string(), kind_to_str(kind), external_id.to_owned()))
			.one(&self.db)
			.await
			.map_err(|e| StoreError::Backend { message: e.to_string() })
	}
}
impl MirrorStore for SeaOrmMirrorStore {
	fn upsert(&self, row: MirrorRow) -> StoreFuture<'_, UpsertOutcome> {
		Box::pin(async move {
			let txn = self.db.begin().await.map_err(|e| StoreError::Backend { message: e.to_string() })?;
			let key = (row.tenant.to_string(), kind_to_str(row.kind), row.external_id.clone());
			let current =
				MirrorRowEntity::find_by_id(key).one(&txn).await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			let outcome = match current {
				None => {
					row_to_active_model(&row).insert(&txn).await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

					UpsertOutcome::Inserted(row)
				},
				Some(model) => {
					let before = model_to_row(model)?;

					if row.sync_token > before.sync_token {
						row_to_active_model(&row)
							.update(&txn)
							.await
							.map_err(|e| StoreError::Backend { message: e.to_string() })?;

						UpsertOutcome::Updated { before, after: row }
					} else {
						UpsertOutcome::StaleIgnored { current: before }
					}
				},
			};

			txn.commit().await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			Ok(outcome)
		})
	}

	fn get<'a>(
		&'a self,
		tenant: &'a TenantId,
		kind: EntityKind,
		external_id: &'a str,
	) -> StoreFuture<'a, Option<MirrorRow>> {
		Box::pin(async move { self.find_model(tenant, kind, external_id).await?.map(model_to_row).transpose() })
	}

	fn list<'a>(&'a self, tenant: &'a TenantId, kind: EntityKind) -> StoreFuture<'a, Vec<MirrorRow>> {
		Box::pin(async move {
			let models = MirrorRowEntity::find()
				.filter(Column::Tenant.eq(tenant.to_string()))
				.filter(Column::Kind.eq(kind_to_str(kind)))
				.filter(Column::IsActive.eq(true))
				.all(&self.db)
				.await
				.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			models.into_iter().map(model_to_row).collect()
		})
	}

	fn soft_delete<'a>(
		&'a self,
		tenant: &'a TenantId,
		kind: EntityKind,
		external_id: &'a str,
	) -> StoreFuture<'a, Option<MirrorRow>> {
		Box::pin(async move {
			let Some(model) = self.find_model(tenant, kind, external_id).await? else {
				return Ok(None);
			};
			let sync_token = model.sync_token;
			let mut active: ActiveModel = model.into();

			active.is_active = Set(false);
			active.deactivated_at_sync_token = Set(Some(sync_token));

			let updated = active.update(&self.db).await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			model_to_row(updated).map(Some)
		})
	}

	fn revert(&self, outcome: UpsertOutcome) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			match outcome {
				UpsertOutcome::Inserted(row) => {
					let key = (row.tenant.to_string(), kind_to_str(row.kind), row.external_id.clone());

					MirrorRowEntity::delete_by_id(key)
						.exec(&self.db)
						.await
						.map_err(|e| StoreError::Backend { message: e.to_string() })?;
				},
				UpsertOutcome::Updated { before, .. } => {
					row_to_active_model(&before)
						.update(&self.db)
						.await
						.map_err(|e| StoreError::Backend { message: e.to_string() })?;
				},
				UpsertOutcome::StaleIgnored { .. } => {},
			}

			Ok(())
		})
	}
}
