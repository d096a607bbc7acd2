//! Minimal OAuth2 HTTP transport used by the credential store (C1) to exchange authorization
//! codes and rotate refresh tokens against the external ledger's token endpoint.
//!
//! This is deliberately narrower than a general-purpose OAuth2 client: the sync core only ever
//! performs `authorization_code` exchange and `refresh_token` rotation against one ledger, so it
//! speaks plain form-encoded POSTs rather than pulling in a full multi-grant flow engine.

// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
};

/// Parsed OAuth2 token endpoint response (ledger-agnostic shape).
#[derive(Clone, Debug, Deserialize)]
pub struct WireTokenResponse {
	/// Bearer access token.
	pub access_token: String,
	/// Rotated refresh token, when the ledger issues one on every grant.
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// Access token lifetime in seconds, per OAuth2 §4.2.2.
	#[serde(default)]
	pub expires_in: Option<i64>,
	/// Token type, normally `bearer`.
	#[serde(default)]
	pub token_type: Option<String>,
}

/// Metadata captured alongside a raw HTTP response, used for retry/backoff decisions.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code, when the transport received a response at all.
	pub status: Option<u16>,
	/// Parsed `Retry-After` hint, if the ledger supplied one.
	pub retry_after: Option<Duration>,
}

/// Future type returned by [`OAuthHttpClient::post_form`].
pub type OAuthCallFuture<'a> =
	Pin<Box<dyn Future<Output = Result<(ResponseMetadata, Vec<u8>), TransportError>> + Send + 'a>>;

/// Transport contract for calling an OAuth2 token endpoint.
///
/// Kept as a trait (rather than a concrete reqwest call inline in the credential store) so tests
/// can substitute a canned-response fake.
pub trait OAuthHttpClient
where
	Self: Send + Sync,
{
	/// Issues a form-encoded POST and returns the raw response metadata + body bytes.
	fn post_form<'a>(&'a self, url: &'a Url, form: &'a [(&'a str, &'a str)]) -> OAuthCallFuture<'a>;
}

/// Reqwest-backed [`OAuthHttpClient`] used outside of tests.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestOAuthClient {
	client: ReqwestClient,
}
#[cfg(feature = "reqwest")]
impl ReqwestOAuthClient {
	/// Builds a client with the crate's default transport settings.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().build()?;

		Ok(Self { client })
	}

	/// Wraps an already-configured reqwest client (used by tests against mock servers).
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client }
	}
}
#[cfg(feature = "reqwest")]
impl OAuthHttpClient for ReqwestOAuthClient {
	fn post_form<'a>(&'a self, url: &'a Url, form: &'a [(&'a str, &'a str)]) -> OAuthCallFuture<'a> {
		Box::pin(async move {
			let response =
				self.client.post(url.clone()).form(form).send().await.map_err(TransportError::from)?;
			let status = response.status().as_u16();
			let retry_after = parse_retry_after(response.headers());
			let bytes = response.bytes().await.map_err(TransportError::from)?.to_vec();

			Ok((ResponseMetadata { status: Some(status), retry_after }, bytes))
		})
	}
}

/// Parses a `Retry-After` header value, accepting both the numeric-seconds form and the
/// RFC 2822 HTTP-date form.
#[cfg(feature = "reqwest")]
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
	let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;

	parse_retry_after_str(raw)
}

/// String-level parser shared by the reqwest transport and unit tests.
pub fn parse_retry_after_str(raw: &str) -> Option<Duration> {
	if let Ok(secs) = raw.trim().parse::<i64>() {
		return Some(Duration::seconds(secs.max(0)));
	}

	let parsed = OffsetDateTime::parse(raw.trim(), &time::format_description::well_known::Rfc2822).ok()?;
	let delta = parsed - OffsetDateTime::now_utc();

	Some(if delta > Duration::ZERO { delta } else { Duration::ZERO })
}
