//! Observability helpers for keeper flows.
//!
//! Every manager flow runs inside a `tracing` span named `oauth2_keeper.flow` carrying the
//! `flow` and `stage` fields.
//!
//! # Feature Flags
//!
//! - Enable `metrics` to increment `oauth2_keeper_flow_total` (labeled by `flow` + `outcome`)
//!   and `oauth2_keeper_retry_total` (labeled by `kind`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Credential flows observed by the keeper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Producing a valid credential (load, reuse, or refresh).
	GetValid,
	/// Refresh token exchange.
	Refresh,
	/// Interactive acquisition.
	Acquire,
	/// Revocation.
	Revoke,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::GetValid => "get_valid",
			FlowKind::Refresh => "refresh",
			FlowKind::Acquire => "acquire",
			FlowKind::Revoke => "revoke",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a keeper flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
