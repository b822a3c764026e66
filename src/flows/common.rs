//! Refresh timing shared by the manager and the client cache.

// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialStatus},
};

/// Decides when a credential's access token must be refreshed.
///
/// The reactive rule always applies: a token within `margin` of expiry (or with no known
/// expiry) is refreshed. The optional proactive rule additionally refreshes once
/// `lifetime_fraction` of the token's lifetime has elapsed, but only when the moment the token
/// was obtained is known.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshPolicy {
	/// Reactive safety margin before expiry.
	pub margin: Duration,
	/// Fraction of the lifetime after which a proactive refresh happens, in `(0.0, 1.0]`.
	pub lifetime_fraction: Option<f64>,
}
impl RefreshPolicy {
	const DEFAULT_MARGIN: Duration = Duration::minutes(5);
	const PROACTIVE_FRACTION: f64 = 0.5;

	/// Reactive policy plus a refresh at half of the token lifetime.
	pub fn proactive() -> Self {
		Self::default().with_lifetime_fraction(Self::PROACTIVE_FRACTION)
	}

	/// Overrides the reactive margin (negative values are treated as zero).
	pub fn with_margin(mut self, margin: Duration) -> Self {
		self.margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Enables the proactive rule. Values outside `(0.0, 1.0]` disable it.
	pub fn with_lifetime_fraction(mut self, fraction: f64) -> Self {
		self.lifetime_fraction = (fraction > 0.0 && fraction <= 1.0).then_some(fraction);

		self
	}

	/// Returns `true` when `credential` must be refreshed before use at `now`.
	pub fn needs_refresh(
		&self,
		credential: &Credential,
		obtained_at: Option<OffsetDateTime>,
		now: OffsetDateTime,
	) -> bool {
		if credential.status_at(now, self.margin) != CredentialStatus::Active {
			return true;
		}

		match (self.lifetime_fraction, obtained_at, credential.expires_at) {
			(Some(fraction), Some(obtained_at), Some(expires_at)) => {
				let lifetime = expires_at - obtained_at;
				let remaining = credential.remaining_at(now).unwrap_or(Duration::ZERO);

				lifetime.is_positive() && remaining <= lifetime * (1.0 - fraction)
			},
			_ => false,
		}
	}
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self { margin: Self::DEFAULT_MARGIN, lifetime_fraction: None }
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn expiring_at(expires_at: OffsetDateTime) -> Credential {
		Credential::new("client", "secret")
			.with_refresh_token("refresh")
			.with_access_token("access")
			.with_expires_at(expires_at)
	}

	#[test]
	fn reactive_policy_refreshes_inside_margin_only() {
		let policy = RefreshPolicy::default();
		let now = macros::datetime!(2025-01-01 00:00 UTC);

		assert!(!policy.needs_refresh(&expiring_at(now + Duration::minutes(6)), None, now));
		assert!(policy.needs_refresh(&expiring_at(now + Duration::minutes(5)), None, now));
		assert!(policy.needs_refresh(&expiring_at(now - Duration::minutes(1)), None, now));
	}

	#[test]
	fn missing_expiry_always_refreshes() {
		let credential = Credential::new("a", "b").with_refresh_token("r").with_access_token("x");

		assert!(RefreshPolicy::default().needs_refresh(
			&credential,
			None,
			macros::datetime!(2025-01-01 00:00 UTC)
		));
	}

	#[test]
	fn proactive_policy_needs_the_issue_instant() {
		let policy = RefreshPolicy::proactive();
		let obtained_at = macros::datetime!(2025-01-01 00:00 UTC);
		let credential = expiring_at(obtained_at + Duration::hours(1));
		let past_half = obtained_at + Duration::minutes(31);

		assert!(policy.needs_refresh(&credential, Some(obtained_at), past_half));
		assert!(!policy.needs_refresh(&credential, None, past_half));
		assert!(!policy.needs_refresh(
			&credential,
			Some(obtained_at),
			obtained_at + Duration::minutes(29)
		));
	}

	#[test]
	fn out_of_range_fraction_disables_proactive_rule() {
		assert_eq!(RefreshPolicy::default().with_lifetime_fraction(1.5).lifetime_fraction, None);
		assert_eq!(RefreshPolicy::default().with_lifetime_fraction(0.0).lifetime_fraction, None);
	}
}
