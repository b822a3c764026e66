//! Keeper-level error types shared across flows, stores, and the invoker.

// self
use crate::{
	_prelude::*,
	classify::{ClassifiedError, ErrorKind},
};

/// Keeper-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical keeper error exposed by public APIs.
///
/// Display strings never include tokens or the client secret.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure (read, write, or delete of the credential record).
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary token-endpoint failure; the credential stays loaded.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// No usable credential; interactive re-acquisition is required.
	#[error("Authentication required: {reason}.")]
	Authentication {
		/// Human-readable reason.
		reason: String,
	},
	/// A refresh attempt failed; interactive re-acquisition is required.
	#[error("Credential refresh failed: {reason}.")]
	TokenExpired {
		/// Human-readable reason.
		reason: String,
	},
	/// Remote daily quota is exhausted.
	#[error("API quota exceeded: {message}.")]
	QuotaExceeded {
		/// Message reported by the remote API.
		message: String,
	},
	/// Remote throttling persisted through every retry.
	#[error("API rate limit persisted after {attempts} attempts: {message}.")]
	RateLimited {
		/// Message reported by the remote API on the final attempt.
		message: String,
		/// Number of attempts performed.
		attempts: u32,
	},
	/// Terminal remote failure carrying its classification.
	#[error("API call failed: {}.", .0.message)]
	Remote(ClassifiedError),
	/// Shutdown was requested while waiting to retry.
	#[error("Retry was interrupted by shutdown.")]
	Interrupted,
}
impl Error {
	/// Returns `true` when interactive re-acquisition is the only remedy.
	pub fn is_authentication(&self) -> bool {
		matches!(self, Self::Authentication { .. } | Self::TokenExpired { .. })
	}

	/// Returns `true` when a remote call was rejected with an authentication-class failure.
	pub fn is_auth_failure(&self) -> bool {
		matches!(self, Self::Remote(classified) if classified.kind == ErrorKind::AuthFailed)
	}

	/// Classification of a terminal remote failure, when this error came from one.
	pub fn classification(&self) -> Option<ErrorKind> {
		match self {
			Self::QuotaExceeded { .. } => Some(ErrorKind::QuotaExceeded),
			Self::RateLimited { .. } => Some(ErrorKind::RateLimited),
			Self::Remote(classified) => Some(classified.kind),
			_ => None,
		}
	}
}

/// Configuration and validation failures raised by the keeper.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// An endpoint URL could not be parsed.
	#[error("The {endpoint} endpoint is not a valid URL.")]
	InvalidEndpoint {
		/// Which endpoint failed to parse.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// An endpoint does not use HTTPS and is not a loopback address.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// The client configuration file could not be read.
	#[error("Client configuration {path} could not be read.")]
	ClientConfigRead {
		/// Path of the configuration file.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// The client configuration JSON is malformed.
	#[error("Client configuration is malformed at `{path}`: {message}.")]
	ClientConfigParse {
		/// JSON path of the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
	/// The client configuration has neither an `installed` nor a `web` section.
	#[error("Client configuration must contain an `installed` or `web` section.")]
	MissingClientSection,
	/// The client configuration lists no redirect URI.
	#[error("Client configuration does not declare any redirect URI.")]
	MissingRedirectUri,
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary token-endpoint failures (safe to retry later).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or keeper-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::classify::classify;

	#[test]
	fn authentication_helpers_cover_both_variants() {
		assert!(Error::Authentication { reason: "no credential".into() }.is_authentication());
		assert!(Error::TokenExpired { reason: "invalid_grant".into() }.is_authentication());
		assert!(!Error::Interrupted.is_authentication());
	}

	#[test]
	fn remote_errors_expose_classification() {
		let auth = Error::Remote(classify(Some(401), "Invalid Credentials"));

		assert!(auth.is_auth_failure());
		assert_eq!(auth.classification(), Some(ErrorKind::AuthFailed));

		let quota = Error::QuotaExceeded { message: "daily limit".into() };

		assert!(!quota.is_auth_failure());
		assert_eq!(quota.classification(), Some(ErrorKind::QuotaExceeded));
		assert_eq!(Error::Interrupted.classification(), None);
	}

	#[test]
	fn display_carries_remote_message() {
		let err = Error::Remote(classify(Some(500), "backend exploded"));

		assert_eq!(err.to_string(), "API call failed: backend exploded.");
	}
}
