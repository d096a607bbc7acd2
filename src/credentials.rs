//! Credential Store (C1): holds per-tenant OAuth2 tokens and refreshes them before expiry.
//!
//! Refreshes are serialized per tenant via an async mutex keyed by [`TenantId`]: concurrent
//! callers observing an expired token wait on the single in-flight refresh rather than each
//! issuing their own request to the ledger's token endpoint (§4.1, S5).

pub mod store;

pub use store::{CredentialStore, MemoryCredentialStore, StoreError};

// self
use crate::{
	_prelude::*,
	auth::{TenantId, TokenRecord, TokenSecret},
	error::{ConfigError, Error, Result, TransientError},
	http::{OAuthHttpClient, ResponseMetadata, WireTokenResponse},
	obs::{self, ComponentKind, ComponentSpan, Outcome},
};

/// Ledger OAuth2 endpoint + client configuration used to exchange and refresh tokens.
#[derive(Clone, Debug)]
pub struct OAuthEndpoints {
	/// Token endpoint URL (shared for both `authorization_code` and `refresh_token` grants).
	pub token_url: Url,
	/// OAuth2 client id registered with the ledger.
	pub client_id: String,
	/// OAuth2 client secret registered with the ledger.
	pub client_secret: String,
	/// How far ahead of expiry a cached token is proactively refreshed (default 5 min, §6).
	pub refresh_skew: Duration,
}

type RefreshGuards = Arc<Mutex<HashMap<TenantId, Arc<AsyncMutex<()>>>>>;

/// Public façade over the credential store: `get-valid-token`, `exchange-code`, `disconnect`.
pub struct CredentialService<H: OAuthHttpClient> {
	store: Arc<dyn CredentialStore>,
	http: H,
	endpoints: OAuthEndpoints,
	refresh_guards: RefreshGuards,
}
impl<H: OAuthHttpClient> CredentialService<H> {
	/// Builds a new service over the given store, transport, and OAuth2 endpoint configuration.
	pub fn new(store: Arc<dyn CredentialStore>, http: H, endpoints: OAuthEndpoints) -> Self {
		Self { store, http, endpoints, refresh_guards: Arc::new(Mutex::new(HashMap::new())) }
	}

	fn guard_for(&self, tenant: &TenantId) -> Arc<AsyncMutex<()>> {
		self.refresh_guards.lock().entry(tenant.clone()).or_insert_with(Default::default).clone()
	}

	/// *get-valid-token(tenant)*: returns the cached access token, refreshing first if it
	/// expires within the configured skew.
	pub async fn get_valid_token(&self, tenant: &TenantId) -> Result<TokenSecret> {
		let span = ComponentSpan::new(ComponentKind::Credentials, "get_valid_token");
		let _entered = span.entered();
		let unavailable = || Error::CredentialsUnavailable { tenant: tenant.to_string() };
		let record = self.store.fetch(tenant).await?.ok_or_else(unavailable)?;

		if record.is_revoked() {
			return Err(unavailable());
		}

		let now = OffsetDateTime::now_utc();

		if !record.needs_refresh_at(now, self.endpoints.refresh_skew) {
			obs::record_outcome(ComponentKind::Credentials, Outcome::Success);

			return Ok(record.access_token);
		}

		// Serialize refresh per tenant; concurrent callers share the one in-flight attempt.
		let guard = self.guard_for(tenant);
		let _permit = guard.lock().await;

		// Re-check: another caller may have refreshed while we waited for the permit.
		let record = self.store.fetch(tenant).await?.ok_or_else(unavailable)?;

		if record.is_revoked() {
			return Err(unavailable());
		}
		if !record.needs_refresh_at(OffsetDateTime::now_utc(), self.endpoints.refresh_skew) {
			return Ok(record.access_token);
		}

		let refresh_token = record.refresh_token.as_ref().ok_or_else(unavailable)?;

		match self.refresh_now(tenant, &record.realm, refresh_token.expose()).await {
			Ok(updated) => {
				let token = updated.access_token.clone();

				self.store.save(updated).await?;
				obs::record_outcome(ComponentKind::Credentials, Outcome::Success);

				Ok(token)
			},
			Err(error) => {
				self.store.mark_error(tenant, error.to_string()).await?;
				obs::record_outcome(ComponentKind::Credentials, Outcome::Failure);

				Err(error)
			},
		}
	}

	async fn refresh_now(
		&self,
		tenant: &TenantId,
		realm: &str,
		refresh_token: &str,
	) -> Result<TokenRecord> {
		let form = [
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token),
			("client_id", self.endpoints.client_id.as_str()),
			("client_secret", self.endpoints.client_secret.as_str()),
		];
		let (meta, body) = self.http.post_form(&self.endpoints.token_url, &form).await?;

		self.parse_token_response(tenant, realm, meta, &body)
	}

	/// *exchange-code(tenant, auth-code, realm id)*: persists both tokens and sets the
	/// tenant's connection status to connected.
	pub async fn exchange_code(
		&self,
		tenant: &TenantId,
		auth_code: &str,
		realm: impl Into<String>,
	) -> Result<()> {
		let span = ComponentSpan::new(ComponentKind::Credentials, "exchange_code");
		let _entered = span.entered();
		let realm = realm.into();
		let form = [
			("grant_type", "authorization_code"),
			("code", auth_code),
			("client_id", self.endpoints.client_id.as_str()),
			("client_secret", self.endpoints.client_secret.as_str()),
		];
		let (meta, body) = self.http.post_form(&self.endpoints.token_url, &form).await?;
		let record = self.parse_token_response(tenant, &realm, meta, &body)?;

		self.store.save(record).await?;
		obs::record_outcome(ComponentKind::Credentials, Outcome::Success);

		Ok(())
	}

	/// *disconnect(tenant)*: sets status = disconnected and revokes the cached tokens.
	pub async fn disconnect(&self, tenant: &TenantId) -> Result<()> {
		self.store.revoke(tenant, OffsetDateTime::now_utc()).await?;

		Ok(())
	}

	/// Forces a refresh regardless of the cached token's remaining lifetime. Used by C2 after
	/// observing a 401 from the ledger.
	pub async fn force_refresh(&self, tenant: &TenantId) -> Result<TokenSecret> {
		let unavailable = || Error::CredentialsUnavailable { tenant: tenant.to_string() };
		let guard = self.guard_for(tenant);
		let _permit = guard.lock().await;
		let record = self.store.fetch(tenant).await?.ok_or_else(unavailable)?;

		if record.is_revoked() {
			return Err(unavailable());
		}

		let refresh_token = record.refresh_token.as_ref().ok_or_else(unavailable)?;

		match self.refresh_now(tenant, &record.realm, refresh_token.expose()).await {
			Ok(updated) => {
				let token = updated.access_token.clone();

				self.store.save(updated).await?;

				Ok(token)
			},
			Err(error) => {
				self.store.mark_error(tenant, error.to_string()).await?;

				Err(error)
			},
		}
	}

	fn parse_token_response(
		&self,
		tenant: &TenantId,
		realm: &str,
		meta: ResponseMetadata,
		body: &[u8],
	) -> Result<TokenRecord> {
		match meta.status {
			Some(status) if (200..300).contains(&status) => {},
			Some(status @ (400 | 401)) => {
				return Err(Error::TokenInvalid {
					reason: format!("ledger rejected the grant with status {status}"),
				});
			},
			status => {
				return Err(Error::Transient(TransientError::LedgerResponse {
					message: "token endpoint returned a non-success status".into(),
					status,
					retry_after: meta.retry_after,
				}));
			},
		}

		let mut deserializer = serde_json::Deserializer::from_slice(body);
		let wire: WireTokenResponse = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| TransientError::ResponseParse { source, status: meta.status })?;
		let issued_at = OffsetDateTime::now_utc();
		let expires_in = wire.expires_in.ok_or(ConfigError::MissingExpiresIn)?;
		let mut builder = TokenRecord::builder(tenant.clone(), realm)
			.access_token(wire.access_token)
			.issued_at(issued_at)
			.expires_in(Duration::seconds(expires_in.max(0)));

		if let Some(refresh_token) = wire.refresh_token {
			builder = builder.refresh_token(refresh_token);
		}

		Ok(builder.build().map_err(ConfigError::from)?)
	}
}

impl<H: OAuthHttpClient> crate::transport::TokenSource for CredentialService<H> {
	fn valid_token<'a>(
		&'a self,
		tenant: &'a TenantId,
	) -> Pin<Box<dyn Future<Output = Result<TokenSecret>> + Send + 'a>> {
		Box::pin(self.get_valid_token(tenant))
	}

	fn force_refresh<'a>(
		&'a self,
		tenant: &'a TenantId,
	) -> Pin<Box<dyn Future<Output = Result<TokenSecret>> + Send + 'a>> {
		Box::pin(CredentialService::force_refresh(self, tenant))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::http::OAuthCallFuture;

	#[derive(Clone)]
	struct ScriptedHttp {
		responses: Arc<Mutex<Vec<(u16, String)>>>,
		calls: Arc<Mutex<u32>>,
	}
	impl ScriptedHttp {
		fn new(responses: Vec<(u16, String)>) -> Self {
			Self { responses: Arc::new(Mutex::new(responses)), calls: Arc::new(Mutex::new(0)) }
		}

		fn call_count(&self) -> u32 {
			*self.calls.lock()
		}
	}
	impl OAuthHttpClient for ScriptedHttp {
		fn post_form<'a>(
			&'a self,
			_url: &'a Url,
			_form: &'a [(&'a str, &'a str)],
		) -> OAuthCallFuture<'a> {
			Box::pin(async move {
				*self.calls.lock() += 1;

				let (status, body) = self.responses.lock().remove(0);

				Ok((ResponseMetadata { status: Some(status), retry_after: None }, body.into_bytes()))
			})
		}
	}

	fn endpoints() -> OAuthEndpoints {
		OAuthEndpoints {
			token_url: Url::parse("https://ledger.example.test/oauth2/token")
				.expect("Fixture URL should parse."),
			client_id: "client-id".into(),
			client_secret: "client-secret".into(),
			refresh_skew: Duration::minutes(5),
		}
	}

	fn tenant() -> TenantId {
		TenantId::new("tenant-1").expect("Tenant fixture should be valid.")
	}

	#[tokio::test]
	async fn exchange_code_persists_tokens() {
		let http = ScriptedHttp::new(vec![(
			200,
			r#"{"access_token":"a1","refresh_token":"r1","expires_in":3600}"#.into(),
		)]);
		let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
		let service = CredentialService::new(store.clone(), http, endpoints());

		service
			.exchange_code(&tenant(), "auth-code", "realm-1")
			.await
			.expect("Exchange should succeed.");

		let record = store
			.fetch(&tenant())
			.await
			.expect("Fetch should succeed.")
			.expect("Record should exist after exchange.");

		assert_eq!(record.access_token.expose(), "a1");
		assert_eq!(record.realm, "realm-1");
	}

	#[tokio::test]
	async fn get_valid_token_returns_cached_value_without_refresh() {
		let http = ScriptedHttp::new(vec![]);
		let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
		let record = TokenRecord::builder(tenant(), "realm-1")
			.access_token("cached")
			.refresh_token("refresh")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Fixture record should build.");

		store.save(record).await.expect("Save should succeed.");

		let service = CredentialService::new(store, http.clone(), endpoints());
		let token = service.get_valid_token(&tenant()).await.expect("Should return cached token.");

		assert_eq!(token.expose(), "cached");
		assert_eq!(http.call_count(), 0);
	}

	#[tokio::test]
	async fn get_valid_token_refreshes_when_within_skew() {
		let http = ScriptedHttp::new(vec![(
			200,
			r#"{"access_token":"fresh","refresh_token":"r2","expires_in":3600}"#.into(),
		)]);
		let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
		let record = TokenRecord::builder(tenant(), "realm-1")
			.access_token("stale")
			.refresh_token("refresh")
			.expires_in(Duration::seconds(60))
			.build()
			.expect("Fixture record should build.");

		store.save(record).await.expect("Save should succeed.");

		let service = CredentialService::new(store.clone(), http.clone(), endpoints());
		let token = service.get_valid_token(&tenant()).await.expect("Refresh should succeed.");

		assert_eq!(token.expose(), "fresh");
		assert_eq!(http.call_count(), 1);

		let stored = store
			.fetch(&tenant())
			.await
			.expect("Fetch should succeed.")
			.expect("Record should persist after refresh.");

		assert_eq!(stored.refresh_token.expect("Refresh token should be rotated.").expose(), "r2");
	}

	#[tokio::test]
	async fn disconnect_revokes_credential() {
		let http = ScriptedHttp::new(vec![]);
		let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
		let record = TokenRecord::builder(tenant(), "realm-1")
			.access_token("a")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Fixture record should build.");

		store.save(record).await.expect("Save should succeed.");

		let service = CredentialService::new(store.clone(), http, endpoints());

		service.disconnect(&tenant()).await.expect("Disconnect should succeed.");

		let err = service.get_valid_token(&tenant()).await.unwrap_err();

		assert!(matches!(err, Error::CredentialsUnavailable { .. }));
	}
}
