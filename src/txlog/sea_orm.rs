//! Sea-ORM-backed [`TransactionLogStore`] (C5), enabled via the `sea-orm` feature.
//!
//! `entry_id` is a store-assigned, auto-incrementing surrogate key, the same role
//! [`MemoryTransactionLogStore`]'s internal `AtomicU64` counter plays: entry-id order always
//! reflects commit order, never caller intent.

// self
use crate::{
	_prelude::*,
	auth::TenantId,
	mirror::EntityKind,
	txlog::{
		entry::{Source, TransactionLogEntry, TransactionType},
		store::{NewTransactionLogEntry, StoreError, StoreFuture, TransactionLogStore},
	},
};
// crates.io
use sea_orm::{ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, entity::prelude::*};

pub mod migration;

/// Hand-authored sea-orm entity for the `transaction_log_entries` table.
pub mod entity {
	// crates.io
	use sea_orm::entity::prelude::*;

	/// Row shape of the `transaction_log_entries` table; a flat mapping of
	/// [`super::TransactionLogEntry`].
	#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
	#[sea_orm(table_name = "transaction_log_entries")]
	pub struct Model {
		/// Store-assigned, auto-incrementing primary key.
		#[sea_orm(primary_key)]
		pub entry_id: i64,
		/// Tenant this entry belongs to.
		pub tenant: String,
		/// Entity family, stored as its label.
		pub entity_kind: String,
		/// Local mirror identifier.
		pub entity_local_id: String,
		/// Mutation kind, stored as its `snake_case` label.
		pub transaction_type: String,
		/// Mutation origin, stored as its `kebab-case` label.
		pub source: String,
		/// External id, when attributable to a specific ledger entity.
		pub external_id: Option<String>,
		/// External sync token observed at the time of this mutation.
		pub external_sync_token: Option<i64>,
		/// Raw wire payload.
		pub wire_payload: Json,
		/// Field-level diff, stored as a JSON object of `{field: [old, new]}`.
		pub diff: Json,
		/// Human actor responsible, if any.
		pub actor_user_id: Option<String>,
		/// Session identifier, if any.
		pub session_id: Option<String>,
		/// Free-text justification.
		pub reason: String,
		/// Arbitrary structured metadata.
		pub metadata: Json,
		/// RFC 3339 commit instant.
		pub created_at: String,
	}

	/// No related tables: an entry is self-contained.
	#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
	pub enum Relation {}

	impl ActiveModelBehavior for ActiveModel {}
}

use entity::{ActiveModel, Column, Entity as TransactionLogEntity, Model};

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

fn tx_type_to_str(tx_type: TransactionType) -> &'static str {
	match tx_type {
		TransactionType::Created => "created",
		TransactionType::Updated => "updated",
		TransactionType::Deleted => "deleted",
		TransactionType::Synced => "synced",
		TransactionType::Executed => "executed",
		TransactionType::Failed => "failed",
	}
}

fn tx_type_from_str(s: &str) -> Result<TransactionType, StoreError> {
	match s {
		"created" => Ok(TransactionType::Created),
		"updated" => Ok(TransactionType::Updated),
		"deleted" => Ok(TransactionType::Deleted),
		"synced" => Ok(TransactionType::Synced),
		"executed" => Ok(TransactionType::Executed),
		"failed" => Ok(TransactionType::Failed),
		other => Err(StoreError::Backend { message: format!("unrecognized stored transaction type `{other}`") }),
	}
}

fn source_to_str(source: Source) -> &'static str {
	match source {
		Source::ExternalLedger => "external-ledger",
		Source::PaymentRail => "payment-rail",
		Source::BankRail => "bank-rail",
		Source::User => "user",
		Source::System => "system",
	}
}

fn source_from_str(s: &str) -> Result<Source, StoreError> {
	match s {
		"external-ledger" => Ok(Source::ExternalLedger),
		"payment-rail" => Ok(Source::PaymentRail),
		"bank-rail" => Ok(Source::BankRail),
		"user" => Ok(Source::User),
		"system" => Ok(Source::System),
		other => Err(StoreError::Backend { message: format!("unrecognized stored source `{other}`") }),
	}
}

fn diff_to_json(diff: &BTreeMap<String, (serde_json::Value, serde_json::Value)>) -> serde_json::Value {
	serde_json::to_value(diff).expect("A BTreeMap of JSON values should always serialize.")
}

fn diff_from_json(value: Json) -> Result<BTreeMap<String, (serde_json::Value, serde_json::Value)>, StoreError> {
	serde_json::from_value(value).map_err(|e| StoreError::Backend { message: format!("stored diff is malformed: {e}") })
}

fn model_to_entry(model: Model) -> Result<TransactionLogEntry, StoreError> {
	let created_at = OffsetDateTime::parse(&model.created_at, &time::format_description::well_known::Rfc3339)
		.map_err(|e| StoreError::Backend { message: format!("stored timestamp is not RFC 3339: {e}") })?;

	Ok(TransactionLogEntry {
		entry_id: model.entry_id as u64,
		tenant: TenantId::new(&model.tenant).map_err(|e| StoreError::Backend { message: e.to_string() })?,
		entity_kind: kind_from_str(&model.entity_kind)?,
		entity_local_id: model.entity_local_id,
		transaction_type: tx_type_from_str(&model.transaction_type)?,
		source: source_from_str(&model.source)?,
		external_id: model.external_id,
		external_sync_token: model.external_sync_token.map(|t| t as u64),
		wire_payload: model.wire_payload,
		diff: diff_from_json(model.diff)?,
		actor_user_id: model.actor_user_id,
		session_id: model.session_id,
		reason: model.reason,
		metadata: model.metadata,
		created_at,
	})
}

/// Sea-ORM-backed [`TransactionLogStore`], gated behind the `sea-orm` feature.
///
/// Matches [`crate::txlog::MemoryTransactionLogStore`]'s append-only guarantee at the API level
/// only; the durability guarantee comes from the underlying SQL backend, not from this type.
#[derive(Clone, Debug)]
pub struct SeaOrmTransactionLogStore {
	db: DatabaseConnection,
}
impl SeaOrmTransactionLogStore {
	/// Wraps an already-connected, already-migrated [`DatabaseConnection`].
	pub fn new(db: DatabaseConnection) -> Self {
		Self { db }
	}
}
impl TransactionLogStore for SeaOrmTransactionLogStore {
	fn append(&self, entry: NewTransactionLogEntry) -> StoreFuture<'_, TransactionLogEntry> {
		Box::pin(async move {
			let created_at = OffsetDateTime::now_utc();
			let active = ActiveModel {
				entry_id: sea_orm::ActiveValue::NotSet,
				tenant: Set(entry.tenant.to_string()),
				entity_kind: Set(kind_to_str(entry.entity_kind)),
				entity_local_id: Set(entry.entity_local_id),
				transaction_type: Set(tx_type_to_str(entry.transaction_type).to_owned()),
				source: Set(source_to_str(entry.source).to_owned()),
				external_id: Set(entry.external_id),
				external_sync_token: Set(entry.external_sync_token.map(|t| t as i64)),
				wire_payload: Set(entry.wire_payload),
				diff: Set(diff_to_json(&entry.diff)),
				actor_user_id: Set(entry.actor_user_id),
				session_id: Set(entry.session_id),
				reason: Set(entry.reason),
				metadata: Set(entry.metadata),
				created_at: Set(created_at
					.format(&time::format_description::well_known::Rfc3339)
					.expect("OffsetDateTime should format as RFC 3339.")),
			};

			let inserted = active.insert(&self.db).await.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			model_to_entry(inserted)
		})
	}

	fn query<'a>(
		&'a self,
		tenant: &'a TenantId,
		entity_kind: EntityKind,
		entity_local_id: &'a str,
	) -> StoreFuture<'a, Vec<TransactionLogEntry>> {
		Box::pin(async move {
			let models = TransactionLogEntity::find()
				.filter(Column::Tenant.eq(tenant.to_string()))
				.filter(Column::EntityKind.eq(kind_to_str(entity_kind)))
				.filter(Column::EntityLocalId.eq(entity_local_id))
				.order_by_asc(Column::EntryId)
				.all(&self.db)
				.await
				.map_err(|e| StoreError::Backend { message: e.to_string() })?;

			models.into_iter().map(model_to_entry).collect()
		})
	}
}
