//! The delegated credential held by the keeper and its lifecycle helpers.

// self
use crate::{
	_prelude::*,
	auth::{ClientConfig, Secret},
	oauth::TokenGrant,
};

/// Freshness of a credential's access token at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
	/// The access token is valid beyond the safety margin.
	Active,
	/// The access token is still valid but expires within the safety margin.
	NearExpiry,
	/// The access token is missing, has no known expiry, or has expired.
	Expired,
}

/// Delegated access grant: client identity plus the refresh/access token pair.
///
/// `expires_at` is kept at millisecond precision so it survives the persisted
/// `expiry_date` (epoch millis) unchanged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: Secret,
	/// Long-lived refresh token; without it the credential cannot recover from expiry.
	pub refresh_token: Option<Secret>,
	/// Short-lived access token, if one has been issued.
	pub access_token: Option<Secret>,
	/// Expiry instant of the access token.
	pub expires_at: Option<OffsetDateTime>,
}
impl Credential {
	/// Creates a credential carrying only the client identity.
	pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: Secret::new(client_secret),
			refresh_token: None,
			access_token: None,
			expires_at: None,
		}
	}

	/// Builds a credential from a freshly issued grant for the configured client.
	pub fn from_grant(config: &ClientConfig, grant: TokenGrant, now: OffsetDateTime) -> Self {
		let mut credential = Self {
			client_id: config.client_id.clone(),
			client_secret: config.client_secret.clone(),
			refresh_token: None,
			access_token: None,
			expires_at: None,
		};

		credential.apply_grant(grant, now);

		credential
	}

	/// Sets the refresh token.
	pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(Secret::new(token));

		self
	}

	/// Sets the access token.
	pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(Secret::new(token));

		self
	}

	/// Sets the access-token expiry, truncated to millisecond precision.
	pub fn with_expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(truncate_to_millis(instant));

		self
	}

	/// Returns `true` if the credential can be refreshed without user interaction.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|token| !token.is_empty())
	}

	/// Computes the access-token status at `now`, treating anything within `margin` of
	/// expiry as [`CredentialStatus::NearExpiry`].
	pub fn status_at(&self, now: OffsetDateTime, margin: Duration) -> CredentialStatus {
		let (Some(_), Some(expires_at)) = (&self.access_token, self.expires_at) else {
			return CredentialStatus::Expired;
		};

		if now >= expires_at {
			return CredentialStatus::Expired;
		}
		if expires_at - now <= margin {
			return CredentialStatus::NearExpiry;
		}

		CredentialStatus::Active
	}

	/// Remaining access-token lifetime at `now`, if the expiry is known.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expires_at| expires_at - now)
	}

	/// Applies a refresh or code-exchange result in place.
	///
	/// The previous refresh token is kept when the provider does not rotate it.
	pub fn apply_grant(&mut self, grant: TokenGrant, now: OffsetDateTime) {
		self.access_token = Some(grant.access_token);
		self.expires_at = grant.expires_in.map(|lifetime| truncate_to_millis(now + lifetime));

		if let Some(refresh) = grant.refresh_token {
			self.refresh_token = Some(refresh);
		}
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

pub(crate) fn truncate_to_millis(instant: OffsetDateTime) -> OffsetDateTime {
	let nanos = instant.nanosecond();

	instant.replace_nanosecond(nanos - nanos % 1_000_000).unwrap_or(instant)
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn fixture() -> Credential {
		Credential::new("client", "secret")
			.with_refresh_token("refresh")
			.with_access_token("access")
			.with_expires_at(macros::datetime!(2025-01-01 01:00 UTC))
	}

	#[test]
	fn status_transitions_cover_all_states() {
		let credential = fixture();
		let margin = Duration::minutes(5);

		assert_eq!(
			credential.status_at(macros::datetime!(2025-01-01 00:30 UTC), margin),
			CredentialStatus::Active
		);
		assert_eq!(
			credential.status_at(macros::datetime!(2025-01-01 00:56 UTC), margin),
			CredentialStatus::NearExpiry
		);
		assert_eq!(
			credential.status_at(macros::datetime!(2025-01-01 01:00 UTC), margin),
			CredentialStatus::Expired
		);
	}

	#[test]
	fn remaining_lifetime_goes_negative_after_expiry() {
		let credential = fixture();

		assert_eq!(
			credential.remaining_at(macros::datetime!(2025-01-01 00:45 UTC)),
			Some(Duration::minutes(15))
		);
		assert_eq!(
			credential.remaining_at(macros::datetime!(2025-01-01 01:10 UTC)),
			Some(Duration::minutes(-10))
		);
		assert_eq!(
			Credential::new("a", "b").remaining_at(macros::datetime!(2025-01-01 00:00 UTC)),
			None
		);
	}

	#[test]
	fn missing_access_token_or_expiry_counts_as_expired() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let no_expiry = Credential::new("a", "b").with_refresh_token("r").with_access_token("x");
		let no_access = Credential::new("a", "b")
			.with_refresh_token("r")
			.with_expires_at(now + Duration::hours(1));

		assert_eq!(no_expiry.status_at(now, Duration::ZERO), CredentialStatus::Expired);
		assert_eq!(no_access.status_at(now, Duration::ZERO), CredentialStatus::Expired);
	}

	#[test]
	fn apply_grant_keeps_refresh_token_unless_rotated() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let mut credential = fixture();

		credential.apply_grant(
			TokenGrant {
				access_token: Secret::new("access-2"),
				refresh_token: None,
				expires_in: Some(Duration::minutes(30)),
			},
			now,
		);

		assert_eq!(credential.access_token.as_ref().map(Secret::expose), Some("access-2"));
		assert_eq!(credential.refresh_token.as_ref().map(Secret::expose), Some("refresh"));
		assert_eq!(credential.expires_at, Some(macros::datetime!(2025-01-01 00:30 UTC)));

		credential.apply_grant(
			TokenGrant {
				access_token: Secret::new("access-3"),
				refresh_token: Some(Secret::new("refresh-3")),
				expires_in: Some(Duration::minutes(30)),
			},
			now,
		);

		assert_eq!(credential.refresh_token.as_ref().map(Secret::expose), Some("refresh-3"));
	}

	#[test]
	fn expiry_is_truncated_to_millis() {
		let instant = macros::datetime!(2025-01-01 00:00:00.123_456_789 UTC);
		let credential = Credential::new("a", "b").with_expires_at(instant);

		assert_eq!(credential.expires_at, Some(macros::datetime!(2025-01-01 00:00:00.123 UTC)));
	}

	#[test]
	fn debug_redacts_secrets() {
		let rendered = format!("{:?}", fixture());

		assert!(!rendered.contains("secret\""));
		assert!(!rendered.contains("\"refresh\""));
		assert!(!rendered.contains("\"access\""));
		assert!(rendered.contains("<redacted>"));
	}
}
