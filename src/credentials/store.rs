//! Persistence contract and in-memory backend for [`TokenRecord`]s.

// self
use crate::{_prelude::*, auth::{TenantId, TokenRecord}};

/// Future returned by [`CredentialStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for the credential store (C1).
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the credential for a tenant.
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()>;

	/// Fetches the credential for a tenant, if one has ever been established.
	fn fetch<'a>(&'a self, tenant: &'a TenantId) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Marks the tenant's credential as failed-to-refresh without discarding the stale tokens,
	/// so the next reconnect can still inspect what was on file.
	fn mark_error<'a>(&'a self, tenant: &'a TenantId, reason: String) -> StoreFuture<'a, ()>;

	/// Revokes (disconnects) the tenant's credential at the given instant.
	fn revoke<'a>(&'a self, tenant: &'a TenantId, instant: OffsetDateTime) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

type CredentialMap = Arc<RwLock<HashMap<TenantId, TokenRecord>>>;

/// Thread-safe in-memory [`CredentialStore`] for development and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryCredentialStore(CredentialMap);
impl CredentialStore for MemoryCredentialStore {
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().insert(record.tenant.clone(), record);

			Ok(())
		})
	}

	fn fetch<'a>(&'a self, tenant: &'a TenantId) -> StoreFuture<'a, Option<TokenRecord>> {
		let map = self.0.clone();
		let tenant = tenant.clone();

		Box::pin(async move { Ok(map.read().get(&tenant).cloned()) })
	}

	fn mark_error<'a>(&'a self, tenant: &'a TenantId, reason: String) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let tenant = tenant.clone();

		Box::pin(async move {
			if let Some(record) = map.write().get_mut(&tenant) {
				record.mark_refresh_error(reason);
			}

			Ok(())
		})
	}

	fn revoke<'a>(&'a self, tenant: &'a TenantId, instant: OffsetDateTime) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let tenant = tenant.clone();

		Box::pin(async move {
			if let Some(record) = map.write().get_mut(&tenant) {
				record.revoke(instant);
			}

			Ok(())
		})
	}
}
