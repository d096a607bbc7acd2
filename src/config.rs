//! Sync-core configuration: one validated, serde-friendly struct per §6's configuration table.
//!
//! The crate never picks a config-file format itself; the embedding application loads a
//! [`SyncCoreConfig`] from TOML, JSON, or environment variables and hands it to the core.

// self
use crate::{_prelude::*, error::ConfigError};

/// Storage backend selected for the background job runner (§6 `jobs.storage`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStorageKind {
	/// In-process store; state is lost on restart. Suitable for development only.
	Memory,
	/// Redis-class store (not implemented by this crate; selectable for embedders that supply
	/// their own `JobStore`).
	Redis,
	/// Durable SQL store via the `sea-orm` feature.
	Postgres,
}

/// Validated, immutable configuration for the sync core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncCoreConfig {
	/// Global outbound request budget, in requests per minute.
	pub rate_limit_global_rpm: u32,
	/// Per-tenant outbound request budget, in requests per minute.
	pub rate_limit_per_tenant_rpm: u32,
	/// Read request timeout.
	pub transport_timeout_read_sec: u64,
	/// Default maximum retry attempts for transient failures.
	pub transport_max_attempts_default: u32,
	/// Default TTL for `data-fetch` strategy cache entries.
	pub cache_ttl_data_fetch_sec: u64,
	/// Default TTL for `scheduled` strategy cache entries.
	pub cache_ttl_scheduled_sec: u64,
	/// How far ahead of expiry a credential is proactively refreshed.
	pub credentials_refresh_skew_sec: u64,
	/// Storage backend for the background job runner.
	pub jobs_storage: JobStorageKind,
	/// Interval, in minutes, between standard periodic sync jobs.
	pub jobs_scheduled_sync_interval_min: u64,
}
impl SyncCoreConfig {
	/// Returns a builder seeded with §6's defaults.
	pub fn builder() -> SyncCoreConfigBuilder {
		SyncCoreConfigBuilder::default()
	}

	/// Returns the `data-fetch` cache TTL as a [`time::Duration`].
	pub fn cache_ttl_data_fetch(&self) -> Duration {
		Duration::seconds(self.cache_ttl_data_fetch_sec as i64)
	}

	/// Returns the `scheduled` cache TTL as a [`time::Duration`].
	pub fn cache_ttl_scheduled(&self) -> Duration {
		Duration::seconds(self.cache_ttl_scheduled_sec as i64)
	}

	/// Returns the credential refresh skew as a [`time::Duration`].
	pub fn credentials_refresh_skew(&self) -> Duration {
		Duration::seconds(self.credentials_refresh_skew_sec as i64)
	}
}

/// Builder for [`SyncCoreConfig`]: required fields are checked at `build()`, never at field
/// access.
#[derive(Clone, Debug)]
pub struct SyncCoreConfigBuilder {
	rate_limit_global_rpm: u32,
	rate_limit_per_tenant_rpm: u32,
	transport_timeout_read_sec: u64,
	transport_max_attempts_default: u32,
	cache_ttl_data_fetch_sec: u64,
	cache_ttl_scheduled_sec: u64,
	credentials_refresh_skew_sec: u64,
	jobs_storage: JobStorageKind,
	jobs_scheduled_sync_interval_min: u64,
}
impl Default for SyncCoreConfigBuilder {
	fn default() -> Self {
		Self {
			rate_limit_global_rpm: 500,
			rate_limit_per_tenant_rpm: 60,
			transport_timeout_read_sec: 30,
			transport_max_attempts_default: 3,
			cache_ttl_data_fetch_sec: 60,
			cache_ttl_scheduled_sec: 300,
			credentials_refresh_skew_sec: 300,
			jobs_storage: JobStorageKind::Memory,
			jobs_scheduled_sync_interval_min: 15,
		}
	}
}
impl SyncCoreConfigBuilder {
	/// Overrides the global requests-per-minute budget.
	pub fn rate_limit_global_rpm(mut self, value: u32) -> Self {
		self.rate_limit_global_rpm = value;

		self
	}

	/// Overrides the per-tenant requests-per-minute budget.
	pub fn rate_limit_per_tenant_rpm(mut self, value: u32) -> Self {
		self.rate_limit_per_tenant_rpm = value;

		self
	}

	/// Overrides the read-request timeout, in seconds.
	pub fn transport_timeout_read_sec(mut self, value: u64) -> Self {
		self.transport_timeout_read_sec = value;

		self
	}

	/// Overrides the default maximum retry attempts.
	pub fn transport_max_attempts_default(mut self, value: u32) -> Self {
		self.transport_max_attempts_default = value;

		self
	}

	/// Overrides the `data-fetch` cache TTL, in seconds.
	pub fn cache_ttl_data_fetch_sec(mut self, value: u64) -> Self {
		self.cache_ttl_data_fetch_sec = value;

		self
	}

	/// Overrides the `scheduled` cache TTL, in seconds.
	pub fn cache_ttl_scheduled_sec(mut self, value: u64) -> Self {
		self.cache_ttl_scheduled_sec = value;

		self
	}

	/// Overrides the credential refresh skew, in seconds.
	pub fn credentials_refresh_skew_sec(mut self, value: u64) -> Self {
		self.credentials_refresh_skew_sec = value;

		self
	}

	/// Overrides the job storage backend.
	pub fn jobs_storage(mut self, value: JobStorageKind) -> Self {
		self.jobs_storage = value;

		self
	}

	/// Overrides the scheduled-sync interval, in minutes.
	pub fn jobs_scheduled_sync_interval_min(mut self, value: u64) -> Self {
		self.jobs_scheduled_sync_interval_min = value;

		self
	}

	/// Validates and produces a [`SyncCoreConfig`].
	pub fn build(self) -> Result<SyncCoreConfig, ConfigError> {
		if self.rate_limit_global_rpm == 0 {
			return Err(ConfigError::OutOfRange {
				field: "rate_limit.global_rpm",
				reason: "must be greater than zero".into(),
			});
		}
		if self.rate_limit_per_tenant_rpm == 0 {
			return Err(ConfigError::OutOfRange {
				field: "rate_limit.per_tenant_rpm",
				reason: "must be greater than zero".into(),
			});
		}
		if self.rate_limit_per_tenant_rpm > self.rate_limit_global_rpm {
			return Err(ConfigError::OutOfRange {
				field: "rate_limit.per_tenant_rpm",
				reason: "cannot exceed rate_limit.global_rpm".into(),
			});
		}
		if self.transport_max_attempts_default == 0 {
			return Err(ConfigError::OutOfRange {
				field: "transport.max_attempts_default",
				reason: "must be greater than zero".into(),
			});
		}
		if self.jobs_scheduled_sync_interval_min == 0 {
			return Err(ConfigError::OutOfRange {
				field: "jobs.scheduled_sync_interval_min",
				reason: "must be greater than zero".into(),
			});
		}

		Ok(SyncCoreConfig {
			rate_limit_global_rpm: self.rate_limit_global_rpm,
			rate_limit_per_tenant_rpm: self.rate_limit_per_tenant_rpm,
			transport_timeout_read_sec: self.transport_timeout_read_sec,
			transport_max_attempts_default: self.transport_max_attempts_default,
			cache_ttl_data_fetch_sec: self.cache_ttl_data_fetch_sec,
			cache_ttl_scheduled_sec: self.cache_ttl_scheduled_sec,
			credentials_refresh_skew_sec: self.credentials_refresh_skew_sec,
			jobs_storage: self.jobs_storage,
			jobs_scheduled_sync_interval_min: self.jobs_scheduled_sync_interval_min,
		})
	}
}
