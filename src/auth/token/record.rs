//! Immutable credential token records, lifecycle helpers, and builders.

// self
use crate::{
	_prelude::*,
	auth::{TenantId, token::secret::TokenSecret},
};

/// Current lifecycle status for a tenant's connection to the external ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
	/// No credential has ever been established for this tenant.
	Disconnected,
	/// An authorization-code exchange is in flight.
	Connecting,
	/// A valid credential is on file.
	Connected,
	/// The credential exists but its tokens have expired past the refresh skew.
	Expired,
	/// The last refresh attempt failed and the tenant must reconnect.
	Error,
}

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Immutable record describing the OAuth2 credential held for one tenant's connection to the
/// external ledger-of-record.
#[derive(Serialize, Deserialize, Clone)]
pub struct TokenRecord {
	/// Tenant this credential belongs to.
	pub tenant: TenantId,
	/// External ledger realm (company) identifier this credential authorizes.
	pub realm: String,
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the ledger issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Issued-at instant recorded from the ledger's token response.
	pub issued_at: OffsetDateTime,
	/// Expiry instant derived from issued_at plus expires_in or absolute expiry.
	pub expires_at: OffsetDateTime,
	/// Revocation instant if the record has been revoked via disconnect.
	pub revoked_at: Option<OffsetDateTime>,
	/// Set when the last refresh attempt failed; cleared on the next successful refresh.
	pub last_refresh_error: Option<String>,
}
impl TokenRecord {
	/// Returns a builder for constructing rotation-friendly records.
	pub fn builder(tenant: TenantId, realm: impl Into<String>) -> TokenRecordBuilder {
		TokenRecordBuilder::new(tenant, realm.into())
	}

	/// Computes the lifecycle status at a given instant, given the refresh skew that governs
	/// when a still-valid token should be proactively refreshed.
	pub fn status_at(&self, instant: OffsetDateTime) -> ConnectionStatus {
		if self.revoked_at.is_some() {
			return ConnectionStatus::Disconnected;
		}
		if self.last_refresh_error.is_some() {
			return ConnectionStatus::Error;
		}
		if instant >= self.expires_at {
			return ConnectionStatus::Expired;
		}

		ConnectionStatus::Connected
	}

	/// Marks the record as failed-to-refresh; subsequent operations observe `Error` status
	/// until the next successful refresh clears this.
	pub fn mark_refresh_error(&mut self, reason: impl Into<String>) {
		self.last_refresh_error = Some(reason.into());
	}

	/// Returns `true` if the cached access token expires within `skew` of `instant`.
	pub fn needs_refresh_at(&self, instant: OffsetDateTime, skew: Duration) -> bool {
		instant + skew >= self.expires_at
	}

	/// Returns `true` if the record has been revoked.
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	/// Marks the record as revoked (disconnect).
	pub fn revoke(&mut self, instant: OffsetDateTime) {
		self.revoked_at = Some(instant);
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("tenant", &self.tenant)
			.field("realm", &self.realm)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("revoked_at", &self.revoked_at)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug)]
pub struct TokenRecordBuilder {
	tenant: TenantId,
	realm: String,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenRecordBuilder {
	fn new(tenant: TenantId, realm: String) -> Self {
		Self {
			tenant,
			realm,
			access_token: None,
			refresh_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Convenience helper that stamps `issued_at` with the current clock.
	pub fn issued_now(self) -> Self {
		self.issued_at(OffsetDateTime::now_utc())
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self.access_token.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(TokenRecordBuilderError::MissingExpiry),
		};

		Ok(TokenRecord {
			tenant: self.tenant,
			realm: self.realm,
			access_token,
			refresh_token: self.refresh_token,
			issued_at,
			expires_at,
			revoked_at: None,
			last_refresh_error: None,
		})
	}
}
