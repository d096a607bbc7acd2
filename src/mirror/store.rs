//! Mirror Store (C4) persistence contract and in-memory backend.
//!
//! Every read and write takes an explicit [`TenantId`] — there is no API surface that omits it,
//! per the §9 redesign note "Tenant filtering by convention" → tenant id is a parameter, never a
//! convention.

// self
use crate::{
	_prelude::*,
	auth::TenantId,
	mirror::entities::{EntityKind, MirrorRow},
};

/// Future returned by [`MirrorStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Error type produced by [`MirrorStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Outcome of an [`MirrorStore::upsert`] call, per the §4.4 monotonicity guard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
	/// No prior row existed; the incoming row was inserted.
	Inserted(MirrorRow),
	/// A prior row existed with a strictly smaller sync token; it was replaced.
	Updated {
		/// The row as it existed before the update.
		before: MirrorRow,
		/// The row as stored after the update.
		after: MirrorRow,
	},
	/// A prior row existed with a sync token greater-or-equal to the incoming one; the write
	/// was dropped and must be counted as a stale-write-ignored metric, never silently lost.
	StaleIgnored {
		/// The row that remains stored, unchanged.
		current: MirrorRow,
	},
}

/// Storage backend contract for the per-tenant mirror of external ledger entities.
pub trait MirrorStore
where
	Self: Send + Sync,
{
	/// Inserts or monotonically updates a row; see [`UpsertOutcome`].
	fn upsert(&self, row: MirrorRow) -> StoreFuture<'_, UpsertOutcome>;

	/// Fetches one row by (tenant, kind, external id).
	fn get<'a>(
		&'a self,
		tenant: &'a TenantId,
		kind: EntityKind,
		external_id: &'a str,
	) -> StoreFuture<'a, Option<MirrorRow>>;

	/// Lists active rows of a kind for a tenant.
	fn list<'a>(&'a self, tenant: &'a TenantId, kind: EntityKind) -> StoreFuture<'a, Vec<MirrorRow>>;

	/// Soft-deletes a row: flips `is_active = false` and records the prior sync token. Hard
	/// deletes are forbidden by the §4.4 delete contract.
	fn soft_delete<'a>(
		&'a self,
		tenant: &'a TenantId,
		kind: EntityKind,
		external_id: &'a str,
	) -> StoreFuture<'a, Option<MirrorRow>>;

	/// Undoes a prior [`UpsertOutcome`]: hard-deletes an `Inserted` row, force-restores an
	/// `Updated` row to its `before` state (bypassing the monotonicity guard that `upsert`
	/// enforces), and is a no-op for `StaleIgnored` (nothing was written in the first place).
	///
	/// Used by the sync layer to compensate for a mirror write whose paired transaction-log
	/// append then failed, since the two writes are not joined in one storage transaction.
	fn revert(&self, outcome: UpsertOutcome) -> StoreFuture<'_, ()>;
}

type Key = (String, EntityKind, String);
type RowMap = Arc<RwLock<HashMap<Key, MirrorRow>>>;

fn key(tenant: &TenantId, kind: EntityKind, external_id: &str) -> Key {
	(tenant.to_string(), kind, external_id.to_owned())
}

/// Thread-safe in-memory [`MirrorStore`] for development and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryMirrorStore(RowMap);
impl MirrorStore for MemoryMirrorStore {
	fn upsert(&self, row: MirrorRow) -> StoreFuture<'_, UpsertOutcome> {
		let map = self.0.clone();

		Box::pin(async move {
			let key = key(&row.tenant, row.kind, &row.external_id);
			let mut guard = map.write();

			match guard.get(&key).cloned() {
				None => {
					guard.insert(key, row.clone());

					Ok(UpsertOutcome::Inserted(row))
				},
				Some(current) if row.sync_token > current.sync_token => {
					guard.insert(key, row.clone());

					Ok(UpsertOutcome::Updated { before: current, after: row })
				},
				Some(current) => Ok(UpsertOutcome::StaleIgnored { current }),
			}
		})
	}

	fn get<'a>(
		&'a self,
		tenant: &'a TenantId,
		kind: EntityKind,
		external_id: &'a str,
	) -> StoreFuture<'a, Option<MirrorRow>> {
		let map = self.0.clone();
		let key = key(tenant, kind, external_id);

		Box::pin(async move { Ok(map.read().get(&key).cloned()) })
	}

	fn list<'a>(&'a self, tenant: &'a TenantId, kind: EntityKind) -> StoreFuture<'a, Vec<MirrorRow>> {
		let map = self.0.clone();
		let tenant_key = tenant.to_string();

		Box::pin(async move {
			Ok(map
				.read()
				.values()
				.filter(|row| row.tenant.as_ref() == tenant_key && row.kind == kind && row.is_active)
				.cloned()
				.collect())
		})
	}

	fn soft_delete<'a>(
		&'a self,
		tenant: &'a TenantId,
		kind: EntityKind,
		external_id: &'a str,
	) -> StoreFuture<'a, Option<MirrorRow>> {
		let map = self.0.clone();
		let key = key(tenant, kind, external_id);

		Box::pin(async move {
			let mut guard = map.write();

			Ok(guard.get_mut(&key).map(|row| {
				row.deactivated_at_sync_token = Some(row.sync_token);
				row.is_active = false;

				row.clone()
			}))
		})
	}

	fn revert(&self, outcome: UpsertOutcome) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			match outcome {
				UpsertOutcome::Inserted(row) => {
					map.write().remove(&key(&row.tenant, row.kind, &row.external_id));
				},
				UpsertOutcome::Updated { before, .. } => {
					let k = key(&before.tenant, before.kind, &before.external_id);

					map.write().insert(k, before);
				},
				UpsertOutcome::StaleIgnored { .. } => {},
			}

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn tenant(id: &str) -> TenantId {
		TenantId::new(id).expect("Tenant fixture should be valid.")
	}

	fn row(tenant_id: &str, external_id: &str, sync_token: u64, amount_cents: i64) -> MirrorRow {
		MirrorRow {
			tenant: tenant(tenant_id),
			kind: EntityKind::Bill,
			external_id: external_id.to_owned(),
			sync_token,
			amount_cents: Some(amount_cents),
			fields: serde_json::json!({}),
			is_active: true,
			deactivated_at_sync_token: None,
			last_synced_at: OffsetDateTime::now_utc(),
		}
	}

	#[tokio::test]
	async fn upsert_inserts_when_absent() {
		let store = MemoryMirrorStore::default();
		let outcome = store.upsert(row("t1", "B1", 0, 10000)).await.expect("Upsert should succeed.");

		assert!(matches!(outcome, UpsertOutcome::Inserted(_)));
	}

	#[tokio::test]
	async fn upsert_drops_stale_token() {
		let store = MemoryMirrorStore::default();

		store.upsert(row("t1", "B1", 0, 10000)).await.expect("First upsert should succeed.");

		let outcome =
			store.upsert(row("t1", "B1", 0, 99900)).await.expect("Second upsert should succeed.");

		assert!(matches!(outcome, UpsertOutcome::StaleIgnored { .. }));

		let current = store
			.get(&tenant("t1"), EntityKind::Bill, "B1")
			.await
			.expect("Get should succeed.")
			.expect("Row should exist.");

		assert_eq!(current.amount_cents, Some(10000));
	}

	#[tokio::test]
	async fn upsert_applies_newer_token() {
		let store = MemoryMirrorStore::default();

		store.upsert(row("t1", "B1", 0, 10000)).await.expect("First upsert should succeed.");

		let outcome =
			store.upsert(row("t1", "B1", 1, 15000)).await.expect("Second upsert should succeed.");

		assert!(matches!(outcome, UpsertOutcome::Updated { .. }));

		let current = store
			.get(&tenant("t1"), EntityKind::Bill, "B1")
			.await
			.expect("Get should succeed.")
			.expect("Row should exist.");

		assert_eq!(current.amount_cents, Some(15000));
		assert_eq!(current.sync_token, 1);
	}

	#[tokio::test]
	async fn list_is_tenant_scoped() {
		let store = MemoryMirrorStore::default();

		store.upsert(row("t1", "B1", 0, 10000)).await.expect("Upsert for t1 should succeed.");
		store.upsert(row("t2", "B2", 0, 20000)).await.expect("Upsert for t2 should succeed.");

		let rows = store.list(&tenant("t1"), EntityKind::Bill).await.expect("List should succeed.");

		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].external_id, "B1");
	}

	#[tokio::test]
	async fn soft_delete_keeps_row_but_marks_inactive() {
		let store = MemoryMirrorStore::default();

		store.upsert(row("t1", "B1", 2, 10000)).await.expect("Upsert should succeed.");
		store
			.soft_delete(&tenant("t1"), EntityKind::Bill, "B1")
			.await
			.expect("Soft delete should succeed.");

		let rows = store.list(&tenant("t1"), EntityKind::Bill).await.expect("List should succeed.");

		assert!(rows.is_empty());

		let row = store
			.get(&tenant("t1"), EntityKind::Bill, "B1")
			.await
			.expect("Get should succeed.")
			.expect("Row should still exist after soft delete.");

		assert!(!row.is_active);
		assert_eq!(row.deactivated_at_sync_token, Some(2));
	}

	#[tokio::test]
	async fn revert_of_insert_hard_deletes_the_row() {
		let store = MemoryMirrorStore::default();
		let outcome = store.upsert(row("t1", "B1", 0, 10000)).await.expect("Upsert should succeed.");

		store.revert(outcome).await.expect("Revert should succeed.");

		assert!(store.get(&tenant("t1"), EntityKind::Bill, "B1").await.expect("Get should succeed.").is_none());
	}

	#[tokio::test]
	async fn revert_of_update_restores_the_prior_row() {
		let store = MemoryMirrorStore::default();

		store.upsert(row("t1", "B1", 0, 10000)).await.expect("First upsert should succeed.");

		let outcome =
			store.upsert(row("t1", "B1", 1, 15000)).await.expect("Second upsert should succeed.");

		store.revert(outcome).await.expect("Revert should succeed.");

		let current = store
			.get(&tenant("t1"), EntityKind::Bill, "B1")
			.await
			.expect("Get should succeed.")
			.expect("Row should still exist.");

		assert_eq!(current.amount_cents, Some(10000));
		assert_eq!(current.sync_token, 0);
	}

	#[tokio::test]
	async fn revert_of_stale_ignored_is_a_noop() {
		let store = MemoryMirrorStore::default();

		store.upsert(row("t1", "B1", 1, 15000)).await.expect("First upsert should succeed.");

		let outcome =
			store.upsert(row("t1", "B1", 0, 10000)).await.expect("Second upsert should succeed.");

		store.revert(outcome).await.expect("Revert should succeed.");

		let current = store
			.get(&tenant("t1"), EntityKind::Bill, "B1")
			.await
			.expect("Get should succeed.")
			.expect("Row should still exist.");

		assert_eq!(current.sync_token, 1);
	}
}
