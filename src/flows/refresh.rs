//! Refresh exchanges under the manager's single-flight guard.
//!
//! A successful exchange mutates the held credential in place, persists it, and only then
//! returns it. When the write fails the new credential stays held but unpersisted, and every
//! later request retries the write before using it. A rejected grant (or a credential without
//! a refresh token) discards the credential and deletes its record so the next request
//! re-enters acquisition; transient and transport failures leave the credential loaded for a
//! later attempt.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::Credential,
	flows::{CredentialManager, CredentialPhase, Slot},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl CredentialManager {
	/// Forces a refresh exchange regardless of the current expiry.
	///
	/// Fails with [`Error::Authentication`] when no credential is loaded or stored.
	pub async fn refresh(&self) -> Result<Credential> {
		let mut slot = self.slot.lock().await;

		if !matches!(*slot, Slot::Loaded(_)) && !self.load_locked(&mut slot).await? {
			return Err(Error::Authentication {
				reason: "no credential is available to refresh".into(),
			});
		}

		self.refresh_locked(&mut slot).await
	}

	/// Refreshes after the API rejected `rejected`, unless another caller already replaced it.
	///
	/// Concurrent callers that saw the same rejected access token share one exchange: the
	/// first one refreshes and the others receive the credential it produced.
	pub async fn refresh_rejected(&self, rejected: &Credential) -> Result<Credential> {
		let mut slot = self.slot.lock().await;

		if !matches!(*slot, Slot::Loaded(_)) && !self.load_locked(&mut slot).await? {
			return Err(Error::Authentication {
				reason: "no credential is available to refresh".into(),
			});
		}
		if let Slot::Loaded(held) = &mut *slot {
			let now = OffsetDateTime::now_utc();

			if held.credential.access_token != rejected.access_token
				&& !self.refresh_policy.needs_refresh(&held.credential, held.obtained_at, now)
			{
				tracing::debug!("Rejected credential was already replaced; reusing it.");

				if !held.persisted {
					self.persist_locked(held).await?;
				}

				return Ok(held.credential.clone());
			}
		}

		self.refresh_locked(&mut slot).await
	}

	/// Performs the exchange for the credential held in `slot`. The caller holds the guard.
	pub(crate) async fn refresh_locked(&self, slot: &mut Slot) -> Result<Credential> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh_locked");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.exchange_locked(slot)).await;

		super::record_outcome(KIND, &result);

		result
	}

	async fn exchange_locked(&self, slot: &mut Slot) -> Result<Credential> {
		let Slot::Loaded(held) = &mut *slot else {
			return Err(Error::Authentication { reason: "no credential is loaded".into() });
		};

		if !held.credential.can_refresh() {
			tracing::warn!("Credential has no refresh token; discarding it.");

			self.refresh_metrics.record_rejection();
			self.discard_locked(slot).await;

			return Err(Error::TokenExpired {
				reason: "the credential carries no refresh token".into(),
			});
		}

		self.refresh_metrics.record_attempt();
		self.set_phase(CredentialPhase::Refreshing);

		let now = OffsetDateTime::now_utc();
		let exchanged = self.endpoint.refresh(&held.credential).await;

		match exchanged {
			Ok(grant) => {
				held.credential.apply_grant(grant, now);
				held.obtained_at = Some(now);
				held.persisted = false;

				self.set_phase(CredentialPhase::Loaded);
				self.bump_generation();

				if let Err(e) = self.persist_locked(held).await {
					self.refresh_metrics.record_failure();

					return Err(e);
				}

				let credential = held.credential.clone();

				tracing::info!(expires_at = ?credential.expires_at, "Refreshed credential.");
				self.refresh_metrics.record_success();

				Ok(credential)
			},
			Err(e) if e.is_authentication() => {
				tracing::warn!(error = %e, "Refresh token was rejected; discarding credential.");

				self.refresh_metrics.record_rejection();
				self.discard_locked(slot).await;

				Err(e)
			},
			Err(e) => {
				tracing::warn!(error = %e, "Refresh exchange failed; keeping credential loaded.");

				self.refresh_metrics.record_failure();
				self.set_phase(CredentialPhase::Loaded);

				Err(e)
			},
		}
	}
}
