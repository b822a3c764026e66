//! Failure classification for remote API calls.
//!
//! [`classify`] is the only place that decides whether a remote failure is worth retrying.
//! The rule table is evaluated top to bottom:
//!
//! | status | message contains | kind            | retryable |
//! |--------|------------------|-----------------|-----------|
//! | 403    | `quota`          | `QuotaExceeded` | no        |
//! | 403    | `rate`           | `RateLimited`   | yes       |
//! | 429    | (any)            | `RateLimited`   | yes       |
//! | 401    | (any)            | `AuthFailed`    | no        |
//! | other  | (any)            | `Unknown`       | no        |
//!
//! Message matching ignores ASCII case so provider reasons such as `quotaExceeded` or
//! `Rate Limit Exceeded` both match.

// self
use crate::_prelude::*;

/// Typed outcome of a failed remote call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
	/// Daily quota exhausted; retrying within the process lifetime is pointless.
	QuotaExceeded,
	/// Transient throttling.
	RateLimited,
	/// The access token was rejected; the credential must be refreshed first.
	AuthFailed,
	/// Anything else.
	Unknown,
}
impl ErrorKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorKind::QuotaExceeded => "quota_exceeded",
			ErrorKind::RateLimited => "rate_limited",
			ErrorKind::AuthFailed => "auth_failed",
			ErrorKind::Unknown => "unknown",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Classified description of one failed remote call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
	/// Failure category.
	pub kind: ErrorKind,
	/// Whether the invoker may retry the call.
	pub retryable: bool,
	/// Message reported by the remote API.
	pub message: String,
}

/// Raw failure reported by a remote call: an HTTP-like status (if any) and a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFailure {
	/// HTTP status code, absent for transport-level failures.
	pub status: Option<u16>,
	/// Message extracted from the response or the transport error.
	pub message: String,
}
impl RemoteFailure {
	/// Creates a failure with an HTTP status.
	pub fn new(status: u16, message: impl Into<String>) -> Self {
		Self { status: Some(status), message: message.into() }
	}

	/// Creates a failure without an HTTP status (network, decoding, ...).
	pub fn without_status(message: impl Into<String>) -> Self {
		Self { status: None, message: message.into() }
	}

	/// Classifies this failure.
	pub fn classify(&self) -> ClassifiedError {
		classify(self.status, &self.message)
	}
}
impl Display for RemoteFailure {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self.status {
			Some(status) => write!(f, "HTTP {status}: {}", self.message),
			None => f.write_str(&self.message),
		}
	}
}
impl From<ReqwestError> for RemoteFailure {
	fn from(e: ReqwestError) -> Self {
		Self { status: e.status().map(|status| status.as_u16()), message: e.to_string() }
	}
}

/// Maps a failed call's status and message to a [`ClassifiedError`].
pub fn classify(status: Option<u16>, message: &str) -> ClassifiedError {
	let lowered = message.to_ascii_lowercase();
	let (kind, retryable) = match status {
		Some(403) if lowered.contains("quota") => (ErrorKind::QuotaExceeded, false),
		Some(403) if lowered.contains("rate") => (ErrorKind::RateLimited, true),
		Some(429) => (ErrorKind::RateLimited, true),
		Some(401) => (ErrorKind::AuthFailed, false),
		_ => (ErrorKind::Unknown, false),
	};

	ClassifiedError { kind, retryable, message: message.to_owned() }
}
