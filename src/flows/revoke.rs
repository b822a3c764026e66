//! Revocation: remote invalidation, memory clear, and record deletion.

// self
use crate::{
	_prelude::*,
	flows::{CredentialManager, CredentialPhase, Slot},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl CredentialManager {
	/// Revokes the credential remotely (best effort), clears it from memory, and deletes the
	/// persisted record.
	///
	/// The phase is always [`CredentialPhase::Revoked`] afterwards. Remote failures are logged
	/// and swallowed; only a failure to delete the record is returned.
	pub async fn revoke(&self) -> Result<()> {
		const KIND: FlowKind = FlowKind::Revoke;

		let span = FlowSpan::new(KIND, "revoke");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let mut slot = self.slot.lock().await;
				let credential = match std::mem::replace(&mut *slot, Slot::Revoked) {
					Slot::Loaded(held) => Some(held.credential),
					Slot::Unloaded | Slot::Revoked =>
						self.load_from_store().await.unwrap_or_else(|e| {
							tracing::warn!(error = %e, "Could not read the credential to revoke.");

							None
						}),
				};

				self.set_phase(CredentialPhase::Revoked);
				self.bump_generation();

				let token = credential.as_ref().and_then(|credential| {
					credential.refresh_token.as_ref().or(credential.access_token.as_ref())
				});

				if let Some(token) = token
					&& let Err(e) = self.endpoint.revoke(token).await
				{
					tracing::warn!(error = %e, "Remote revocation failed; continuing locally.");
				}

				self.store.delete().await?;

				Ok(())
			})
			.await;

		super::record_outcome(KIND, &result);

		result
	}
}
