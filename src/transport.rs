//! Rate-Limited Transport (C2): the single outbound HTTP client that speaks to the external
//! ledger. Every other component reaches the ledger through this module — no parallel HTTP
//! paths exist elsewhere in the crate (§9 redesign: "Scattered HTTP clients").

// self
use crate::{
	_prelude::*,
	auth::{TenantId, TokenSecret},
	error::{Error, Result, TransientError, TransportError},
	http::parse_retry_after_str,
	obs::{self, ComponentKind, ComponentSpan, Outcome},
};

/// HTTP method used by a [`LedgerRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerMethod {
	/// Read.
	Get,
	/// Create.
	Post,
	/// Full or partial update (the ledger's `PUT /bills/{id}` style approve/update calls).
	Put,
}

/// A single outbound call against the external ledger, independent of transport.
#[derive(Clone, Debug)]
pub struct LedgerRequest {
	/// HTTP method.
	pub method: LedgerMethod,
	/// Path relative to `{base}/{realm-id}`, e.g. `bills` or `payments/P1/void`.
	pub path: String,
	/// Raw query string, without the leading `?`.
	pub query: Option<String>,
	/// JSON request body, for `Post`/`Put`.
	pub body: Option<Vec<u8>>,
}
impl LedgerRequest {
	/// Builds a `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self { method: LedgerMethod::Get, path: path.into(), query: None, body: None }
	}

	/// Builds a `POST` request with a JSON body.
	pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
		Self { method: LedgerMethod::Post, path: path.into(), query: None, body: Some(body) }
	}

	/// Builds a `PUT` request with a JSON body.
	pub fn put(path: impl Into<String>, body: Vec<u8>) -> Self {
		Self { method: LedgerMethod::Put, path: path.into(), query: None, body: Some(body) }
	}

	/// Attaches a raw query string.
	pub fn with_query(mut self, query: impl Into<String>) -> Self {
		self.query = Some(query.into());

		self
	}
}

/// Raw response as observed by the transport, before classification.
#[derive(Clone, Debug)]
pub struct LedgerResponse {
	/// HTTP status code.
	pub status: u16,
	/// Parsed `Retry-After` hint, if present.
	pub retry_after: Option<Duration>,
	/// Response body bytes.
	pub body: Vec<u8>,
}

/// How the transport classified a completed (or failed) call, per §4.2.
#[derive(Clone, Debug)]
pub enum Classification {
	/// 2xx.
	Success(LedgerResponse),
	/// 401, after the forced-refresh retry also failed.
	TokenInvalid,
	/// 429, or the transport's own backoff budget was exhausted while rate-limited.
	RateLimited {
		/// How long the caller should wait before the next attempt.
		wait: Duration,
	},
	/// 5xx, timeout, or connection reset.
	Transient,
	/// 4xx other than 401/429.
	Permanent {
		/// Ledger-reported status code.
		status: u16,
	},
	/// The caller's [`crate::cancel::CancelToken`] fired before or during the call (§5).
	Cancelled,
}

/// Transport contract for issuing a single raw call to the external ledger, bearer token
/// already attached by the caller. Implemented by the reqwest-backed transport and by a
/// canned-response fake in tests.
pub trait LedgerHttpClient
where
	Self: Send + Sync,
{
	/// Issues the request and returns the raw response or a transport-level failure.
	fn call<'a>(
		&'a self,
		bearer: &'a str,
		request: &'a LedgerRequest,
	) -> Pin<Box<dyn Future<Output = Result<LedgerResponse, TransportError>> + Send + 'a>>;
}

/// Reqwest-backed [`LedgerHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestLedgerClient {
	client: ReqwestClient,
	base_url: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestLedgerClient {
	/// Builds a client rooted at `base_url` (expected to already include the realm segment).
	pub fn new(client: ReqwestClient, base_url: Url) -> Self {
		Self { client, base_url }
	}
}
#[cfg(feature = "reqwest")]
impl LedgerHttpClient for ReqwestLedgerClient {
	fn call<'a>(
		&'a self,
		bearer: &'a str,
		request: &'a LedgerRequest,
	) -> Pin<Box<dyn Future<Output = Result<LedgerResponse, TransportError>> + Send + 'a>> {
		Box::pin(async move {
			let mut url = self
				.base_url
				.join(&request.path)
				.map_err(|e| TransportError::network(UrlJoinError(e)))?;

			url.set_query(request.query.as_deref());

			let mut builder = match request.method {
				LedgerMethod::Get => self.client.get(url),
				LedgerMethod::Post => self.client.post(url),
				LedgerMethod::Put => self.client.put(url),
			};

			builder = builder.bearer_auth(bearer);

			if let Some(body) = &request.body {
				builder = builder.header("content-type", "application/json").body(body.clone());
			}

			let response = builder.send().await.map_err(TransportError::from)?;
			let status = response.status().as_u16();
			let retry_after = response
				.headers()
				.get(reqwest::header::RETRY_AFTER)
				.and_then(|v| v.to_str().ok())
				.and_then(parse_retry_after_str);
			let body = response.bytes().await.map_err(TransportError::from)?.to_vec();

			Ok(LedgerResponse { status, retry_after, body })
		})
	}
}

#[cfg(feature = "reqwest")]
struct UrlJoinError(url::ParseError);
#[cfg(feature = "reqwest")]
impl Debug for UrlJoinError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		Debug::fmt(&self.0, f)
	}
}
#[cfg(feature = "reqwest")]
impl Display for UrlJoinError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		Display::fmt(&self.0, f)
	}
}
#[cfg(feature = "reqwest")]
impl std::error::Error for UrlJoinError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		Some(&self.0)
	}
}

/// Narrow contract C2 needs from the credential store: a valid bearer token, and a way to force
/// a refresh after observing a 401.
pub trait TokenSource
where
	Self: Send + Sync,
{
	/// Returns a currently-valid bearer token for the tenant.
	fn valid_token<'a>(
		&'a self,
		tenant: &'a TenantId,
	) -> Pin<Box<dyn Future<Output = Result<TokenSecret>> + Send + 'a>>;

	/// Forces a refresh (used once after a 401) and returns the new token.
	fn force_refresh<'a>(
		&'a self,
		tenant: &'a TenantId,
	) -> Pin<Box<dyn Future<Output = Result<TokenSecret>> + Send + 'a>>;
}

/// Sliding token bucket shared process-wide (global) or per tenant.
#[derive(Debug)]
struct TokenBucket {
	capacity: f64,
	tokens: Mutex<f64>,
	refill_per_sec: f64,
	last_refill: Mutex<std::time::Instant>,
}
impl TokenBucket {
	fn new(rpm: u32) -> Self {
		let capacity = rpm.max(1) as f64;

		Self {
			capacity,
			tokens: Mutex::new(capacity),
			refill_per_sec: capacity / 60.0,
			last_refill: Mutex::new(std::time::Instant::now()),
		}
	}

	fn refill(&self) {
		let now = std::time::Instant::now();
		let mut last = self.last_refill.lock();
		let elapsed = now.saturating_duration_since(*last).as_secs_f64();

		if elapsed > 0.0 {
			let mut tokens = self.tokens.lock();

			*tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
			*last = now;
		}
	}

	/// Tries to take one token; returns the wait duration if none is available.
	fn try_acquire(&self) -> Option<Duration> {
		self.refill();

		let mut tokens = self.tokens.lock();

		if *tokens >= 1.0 {
			*tokens -= 1.0;

			None
		} else {
			let deficit = 1.0 - *tokens;
			let wait_secs = deficit / self.refill_per_sec;

			Some(Duration::seconds_f64(wait_secs.max(0.01)))
		}
	}

	async fn acquire(&self) {
		loop {
			match self.try_acquire() {
				None => return,
				Some(wait) => tokio::time::sleep(wait.unsigned_abs()).await,
			}
		}
	}
}

/// C2: the single outbound HTTP client to the external ledger.
pub struct RateLimitedTransport<C: LedgerHttpClient, T: TokenSource> {
	client: C,
	tokens: Arc<T>,
	global_bucket: TokenBucket,
	tenant_buckets: Mutex<HashMap<TenantId, Arc<TokenBucket>>>,
	per_tenant_rpm: u32,
	read_timeout: std::time::Duration,
}
impl<C: LedgerHttpClient, T: TokenSource> RateLimitedTransport<C, T> {
	/// Builds a transport with the given global/per-tenant budgets and read timeout.
	pub fn new(
		client: C,
		tokens: Arc<T>,
		global_rpm: u32,
		per_tenant_rpm: u32,
		read_timeout_sec: u64,
	) -> Self {
		Self {
			client,
			tokens,
			global_bucket: TokenBucket::new(global_rpm),
			tenant_buckets: Mutex::new(HashMap::new()),
			per_tenant_rpm,
			read_timeout: std::time::Duration::from_secs(read_timeout_sec),
		}
	}

	fn tenant_bucket(&self, tenant: &TenantId) -> Arc<TokenBucket> {
		self
			.tenant_buckets
			.lock()
			.entry(tenant.clone())
			.or_insert_with(|| Arc::new(TokenBucket::new(self.per_tenant_rpm)))
			.clone()
	}

	/// *execute(tenant, operation, request, cancel)*: obtains rate-limit permits, attaches the
	/// bearer token, issues the request, and classifies the result per §4.2. Retries exactly
	/// once, internally, after a 401 forces a token refresh; all other retry decisions belong to
	/// C3. Honors `cancel` per §5: no permit is acquired and no request is issued once cancelled,
	/// and an outstanding request is abandoned the moment cancellation fires.
	pub async fn execute(
		&self,
		tenant: &TenantId,
		operation: &'static str,
		request: &LedgerRequest,
		cancel: &CancelToken,
	) -> Classification {
		let span = ComponentSpan::new(ComponentKind::Transport, "execute");
		let _entered = span.entered();

		if cancel.is_cancelled() {
			return Classification::Cancelled;
		}

		let outcome = tokio::select! {
			_ = cancel.cancelled() => Classification::Cancelled,
			outcome = async {
				self.global_bucket.acquire().await;
				self.tenant_bucket(tenant).acquire().await;

				self.execute_once(tenant, operation, request, false, cancel).await
			} => outcome,
		};

		obs::record_outcome(
			ComponentKind::Transport,
			match &outcome {
				Classification::Success(_) => Outcome::Success,
				_ => Outcome::Failure,
			},
		);

		outcome
	}

	fn execute_once<'a>(
		&'a self,
		tenant: &'a TenantId,
		operation: &'static str,
		request: &'a LedgerRequest,
		already_refreshed: bool,
		cancel: &'a CancelToken,
	) -> Pin<Box<dyn Future<Output = Classification> + Send + 'a>> {
		Box::pin(async move {
			let token = match self.tokens.valid_token(tenant).await {
				Ok(token) => token,
				Err(_) => return Classification::TokenInvalid,
			};
			let call = self.client.call(token.expose(), request);
			let result = tokio::select! {
				_ = cancel.cancelled() => return Classification::Cancelled,
				result = tokio::time::timeout(self.read_timeout, call) => result,
			};

			let response = match result {
				Err(_elapsed) => return Classification::Transient,
				Ok(Err(_transport_error)) => return Classification::Transient,
				Ok(Ok(response)) => response,
			};

			match response.status {
				200..=299 => Classification::Success(response),
				401 if !already_refreshed => {
					if self.tokens.force_refresh(tenant).await.is_err() {
						return Classification::TokenInvalid;
					}

					self.execute_once(tenant, operation, request, true, cancel).await
				},
				401 => Classification::TokenInvalid,
				429 => Classification::RateLimited {
					wait: response.retry_after.unwrap_or(Duration::seconds(1)),
				},
				500..=599 => Classification::Transient,
				status => Classification::Permanent { status },
			}
		})
	}
}

/// Exponential backoff with jitter, per §4.2: base 1 s, multiplier 2, jitter uniform on
/// [0.5, 1.0), capped at `max_delay`.
pub fn backoff_delay(attempt: u32, max_delay: Duration) -> Duration {
	let base_secs = 2_f64.powi(attempt.min(20) as i32);
	let jitter = 0.5 + rand::random::<f64>() * 0.5;
	let delay = Duration::seconds_f64(base_secs * jitter);

	delay.min(max_delay)
}

impl From<Classification> for Option<Error> {
	fn from(value: Classification) -> Self {
		match value {
			Classification::Success(_) => None,
			Classification::TokenInvalid => {
				Some(Error::TokenInvalid { reason: "ledger rejected the bearer token".into() })
			},
			Classification::RateLimited { wait } => {
				Some(Error::RateLimited { wait_ms: wait.whole_milliseconds().max(0) as u64 })
			},
			Classification::Transient => Some(Error::Transient(TransientError::LedgerResponse {
				message: "transient failure calling the external ledger".into(),
				status: None,
				retry_after: None,
			})),
			Classification::Permanent { status } => {
				Some(Error::Permanent { reason: format!("ledger returned status {status}") })
			},
			Classification::Cancelled => Some(Error::Cancelled),
		}
	}
}
