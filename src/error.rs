//! Crate-wide error types shared across every sync-core component.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical sync-core error exposed by public APIs.
///
/// This is the crate's only public error shape (see the error taxonomy design): every kind a
/// caller can branch on is a distinct variant, not a string.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure (credential, mirror, transaction log, or job store).
	#[error("Storage failure: {0}")]
	Storage(String),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Network/5xx failure; likely succeeds on retry.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// DNS/TCP/TLS transport failure.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// External quota hit; retry after the attached wait hint.
	#[error("Rate limited by the external ledger; retry after {wait_ms} ms.")]
	RateLimited {
		/// Milliseconds the caller should wait before retrying.
		wait_ms: u64,
	},
	/// 401 observed after a forced refresh attempt already ran once.
	#[error("Token rejected by the external ledger: {reason}.")]
	TokenInvalid {
		/// Ledger-supplied reason string.
		reason: String,
	},
	/// No valid credential exists for the tenant; the caller must reconnect.
	#[error("No valid credentials for tenant {tenant}; reconnect required.")]
	CredentialsUnavailable {
		/// Tenant identifier as a plain string (kept untyped so the error does not depend on
		/// the `auth` module's validated newtype).
		tenant: String,
	},
	/// Caller-supplied data failed an invariant check.
	#[error("Validation failed: {reason}.")]
	Validation {
		/// Human-readable description of the failed invariant.
		reason: String,
	},
	/// Sync-token regression, missing tenant filter, or log/mirror divergence.
	#[error("Invariant violated: {condition}.")]
	InvariantViolation {
		/// Description of the detected condition; always logged as a bug.
		condition: String,
	},
	/// Caller or deadline cancelled the operation.
	#[error("Operation cancelled.")]
	Cancelled,
	/// 4xx other than 401/429, or a mapper rejection; never retried.
	#[error("Permanent failure: {reason}.")]
	Permanent {
		/// Human-readable description.
		reason: String,
	},
}
impl Error {
	/// Returns `true` if the orchestrator should consider retrying this error at all (the
	/// decision of *how* belongs to C3; this only reports whether retrying is ever sensible).
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Error::Transient(_) | Error::Transport(_) | Error::RateLimited { .. }
		)
	}
}

/// Configuration and validation failures raised by the sync core.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A required configuration field was not supplied.
	#[error("Configuration field `{field}` is required.")]
	MissingField {
		/// Name of the missing field.
		field: &'static str,
	},
	/// A configuration field held a value outside its supported range.
	#[error("Configuration field `{field}` is out of range: {reason}.")]
	OutOfRange {
		/// Name of the offending field.
		field: &'static str,
		/// Human-readable explanation.
		reason: String,
	},
	/// Ledger endpoint URL failed to parse.
	#[error("Ledger endpoint `{field}` is not a valid URL.")]
	InvalidUrl {
		/// Name of the offending field.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] crate::auth::TokenRecordBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
}
impl ConfigError {
	/// Wraps a transport builder's failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry per C3's policy).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// The ledger returned a 5xx or an unexpected non-fatal response.
	#[error("Ledger endpoint returned an unexpected response: {message}.")]
	LedgerResponse {
		/// Human-readable summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The ledger responded with malformed JSON that could not be parsed.
	#[error("Ledger endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The request timed out before a response was received.
	#[error("Request to the ledger timed out after {elapsed_ms} ms.")]
	Timeout {
		/// Elapsed time before the deadline fired.
		elapsed_ms: u64,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the ledger.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the ledger.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

impl From<crate::credentials::StoreError> for Error {
	fn from(e: crate::credentials::StoreError) -> Self {
		Self::Storage(e.to_string())
	}
}
impl From<crate::mirror::StoreError> for Error {
	fn from(e: crate::mirror::StoreError) -> Self {
		Self::Storage(e.to_string())
	}
}
impl From<crate::txlog::StoreError> for Error {
	fn from(e: crate::txlog::StoreError) -> Self {
		Self::Storage(e.to_string())
	}
}
impl From<crate::jobs::StoreError> for Error {
	fn from(e: crate::jobs::StoreError) -> Self {
		Self::Storage(e.to_string())
	}
}
