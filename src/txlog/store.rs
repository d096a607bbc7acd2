//! Transaction Log (C5) persistence contract and in-memory backend.
//!
//! Entries are append-only: no method in [`TransactionLogStore`] updates or deletes an existing
//! entry, matching the §4.5 invariant that a log entry, once written, is never mutated.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	auth::TenantId,
	mirror::EntityKind,
	txlog::entry::{Source, TransactionLogEntry, TransactionType},
};

/// Future returned by [`TransactionLogStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Error type produced by [`TransactionLogStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Fields supplied by the caller when appending a new entry; `entry_id` and `created_at` are
/// assigned by the store itself so entry-id order always reflects commit order.
#[derive(Clone, Debug)]
pub struct NewTransactionLogEntry {
	/// Tenant this entry belongs to.
	pub tenant: TenantId,
	/// Entity family the mutation applies to.
	pub entity_kind: EntityKind,
	/// Local mirror identifier.
	pub entity_local_id: String,
	/// What kind of mutation this entry records.
	pub transaction_type: TransactionType,
	/// Where the mutation originated.
	pub source: Source,
	/// External id, when attributable to a specific ledger entity.
	pub external_id: Option<String>,
	/// External sync token observed at the time of this mutation.
	pub external_sync_token: Option<u64>,
	/// Raw wire payload.
	pub wire_payload: serde_json::Value,
	/// Field-level diff.
	pub diff: BTreeMap<String, (serde_json::Value, serde_json::Value)>,
	/// Human actor responsible, if any.
	pub actor_user_id: Option<String>,
	/// Session identifier, if any.
	pub session_id: Option<String>,
	/// Free-text justification.
	pub reason: String,
	/// Arbitrary structured metadata.
	pub metadata: serde_json::Value,
}

/// Storage backend contract for the append-only transaction log.
pub trait TransactionLogStore
where
	Self: Send + Sync,
{
	/// Appends exactly one entry and returns it with its assigned `entry_id`.
	fn append(&self, entry: NewTransactionLogEntry) -> StoreFuture<'_, TransactionLogEntry>;

	/// Queries entries for (tenant, entity kind, entity id) in monotonic entry-id order.
	fn query<'a>(
		&'a self,
		tenant: &'a TenantId,
		entity_kind: EntityKind,
		entity_local_id: &'a str,
	) -> StoreFuture<'a, Vec<TransactionLogEntry>>;
}

/// Thread-safe in-memory [`TransactionLogStore`] for development and tests.
#[derive(Debug, Default)]
pub struct MemoryTransactionLogStore {
	entries: RwLock<Vec<TransactionLogEntry>>,
	next_id: AtomicU64,
}
impl TransactionLogStore for MemoryTransactionLogStore {
	fn append(&self, entry: NewTransactionLogEntry) -> StoreFuture<'_, TransactionLogEntry> {
		Box::pin(async move {
			let entry_id = self.next_id.fetch_add(1, Ordering::SeqCst);
			let finalized = TransactionLogEntry {
				entry_id,
				tenant: entry.tenant,
				entity_kind: entry.entity_kind,
				entity_local_id: entry.entity_local_id,
				transaction_type: entry.transaction_type,
				source: entry.source,
				external_id: entry.external_id,
				external_sync_token: entry.external_sync_token,
				wire_payload: entry.wire_payload,
				diff: entry.diff,
				actor_user_id: entry.actor_user_id,
				session_id: entry.session_id,
				reason: entry.reason,
				metadata: entry.metadata,
				created_at: OffsetDateTime::now_utc(),
			};

			self.entries.write().push(finalized.clone());

			Ok(finalized)
		})
	}

	fn query<'a>(
		&'a self,
		tenant: &'a TenantId,
		entity_kind: EntityKind,
		entity_local_id: &'a str,
	) -> StoreFuture<'a, Vec<TransactionLogEntry>> {
		Box::pin(async move {
			let mut matching: Vec<_> = self
				.entries
				.read()
				.iter()
				.filter(|e| {
					e.tenant.as_ref() == tenant.as_ref()
						&& e.entity_kind == entity_kind
						&& e.entity_local_id == entity_local_id
				})
				.cloned()
				.collect();

			matching.sort_by_key(|e| e.entry_id);

			Ok(matching)
		})
	}
}
