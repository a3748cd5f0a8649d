//! Crate-level error types shared by the session core and the resilience primitives.

// self
use crate::{
	_prelude::*,
	auth::RefreshError,
	batch::BatchFlushError,
	resilience::{CircuitOpenError, RetryDirective},
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// No session exists; the caller must re-authenticate.
	#[error("No stored credentials are available.")]
	NoCredential,
	/// Token refresh failed.
	#[error(transparent)]
	Refresh(#[from] RefreshError),
	/// The circuit breaker rejected the call without attempting it.
	#[error(transparent)]
	CircuitOpen(#[from] CircuitOpenError),
	/// Local admission control rejected the call.
	#[error("Rate limited; retry in {}ms.", .0.recommended_backoff.whole_milliseconds())]
	RateLimited(RetryDirective),
	/// The batch flush handler failed for the whole window.
	#[error(transparent)]
	BatchFlush(#[from] BatchFlushError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS, timeouts).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The API rejected the request; repeating it will not help.
	#[error("Request rejected with status {status}: {message}.")]
	Application {
		/// HTTP status code returned by the API.
		status: u16,
		/// API- or client-supplied message.
		message: String,
	},
}
impl Error {
	/// Classifies an HTTP status returned by the API into the error taxonomy.
	///
	/// Server faults, `408`, and `429` are transient; every other status is an
	/// application error.
	pub fn from_status(
		status: u16,
		message: impl Into<String>,
		retry_after: Option<Duration>,
	) -> Self {
		let message = message.into();

		if status >= 500 || status == 408 || status == 429 {
			TransientError::Upstream { message, status: Some(status), retry_after }.into()
		} else {
			Self::Application { status, message }
		}
	}

	/// Returns `true` when the error means the caller no longer holds a usable session.
	pub fn is_auth_failure(&self) -> bool {
		match self {
			Self::NoCredential => true,
			Self::Refresh(err) => err.is_terminal(),
			Self::Application { status, .. } => *status == 401,
			_ => false,
		}
	}
}

/// Errors that know whether repeating the failed call can succeed.
pub trait Retryable {
	/// Returns `true` for transient network/timeout conditions.
	fn is_retryable(&self) -> bool;

	/// Server- or limiter-provided hint for how long to wait before the next attempt.
	fn retry_after(&self) -> Option<Duration> {
		None
	}
}
impl Retryable for Error {
	fn is_retryable(&self) -> bool {
		match self {
			Self::Transient(_) | Self::Transport(_) | Self::RateLimited(_) => true,
			Self::Refresh(err) => matches!(err, RefreshError::Transient { .. }),
			_ => false,
		}
	}

	fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Transient(TransientError::Upstream { retry_after, .. }) => *retry_after,
			Self::RateLimited(directive) => Some(directive.recommended_backoff),
			_ => None,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A numeric setting must be greater than zero.
	#[error("The `{field}` setting must be greater than zero.")]
	ZeroValue {
		/// Name of the offending setting.
		field: &'static str,
	},
	/// A duration setting must be positive.
	#[error("The `{field}` setting must be a positive duration.")]
	NonPositiveDuration {
		/// Name of the offending setting.
		field: &'static str,
	},
	/// The refresh margin must be shorter than the default access-token lifetime.
	#[error("The refresh margin must be shorter than the access-token lifetime.")]
	MarginExceedsLifetime,
	/// Token lifetime supplied to the session was not positive.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Token lifetime supplied to the session cannot be represented.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Configuration document could not be parsed.
	#[error("Configuration document is invalid.")]
	Parse {
		/// Structured parsing failure including the offending field path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// API returned a server fault, timeout, or throttling status.
	#[error("Upstream returned a transient failure: {message}.")]
	Upstream {
		/// API- or client-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Refresh endpoint responded with a body that does not match the token grant shape.
	#[error("Refresh endpoint returned a malformed body.")]
	RefreshResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, timeouts).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The request did not complete in time.
	#[error("Request timed out.")]
	Timeout,
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
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}
