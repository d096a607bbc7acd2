//! Mirrors a rate-limited external ledger into a per-tenant local store with an immutable audit
//! trail: OAuth2 credentials, a single rate-limited transport, caching and dedup, the mirror
//! itself, a transaction log, and background sync, composed in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cancel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod jobs;
pub mod mapper;
pub mod mirror;
pub mod obs;
pub mod orchestrator;
pub mod sync_service;
pub mod transport;
pub mod txlog;

#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		credentials::CredentialService,
		http::ReqwestOAuthClient,
		sync_service::SyncService,
		transport::{RateLimitedTransport, ReqwestLedgerClient},
	};

	/// Sync service type alias used by reqwest-backed integration tests.
	pub type ReqwestTestSyncService = SyncService<ReqwestLedgerClient, ReqwestOAuthClient>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_ledger_client(base_url: Url) -> ReqwestLedgerClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestLedgerClient::new(client, base_url)
	}

	/// Builds a [`RateLimitedTransport`] over the reqwest ledger client, rate-limited to the
	/// given global/per-tenant budgets.
	pub fn build_reqwest_test_transport(
		base_url: Url,
		credentials: Arc<CredentialService<ReqwestOAuthClient>>,
		global_rpm: u32,
		per_tenant_rpm: u32,
	) -> RateLimitedTransport<ReqwestLedgerClient, CredentialService<ReqwestOAuthClient>> {
		RateLimitedTransport::new(
			test_reqwest_ledger_client(base_url),
			credentials,
			global_rpm,
			per_tenant_rpm,
			30,
		)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, hash_map::DefaultHasher},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::{Hash, Hasher},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::{
		cancel::CancelToken,
		error::{Error, Result},
	};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
