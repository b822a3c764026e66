//! Interactive acquisition of a brand-new credential.

// self
use crate::{
	_prelude::*,
	auth::Credential,
	flows::{CredentialManager, Held, Slot},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl CredentialManager {
	/// Runs the consent flow, persists the resulting credential, and binds it in memory.
	///
	/// Fails with [`Error::Authentication`] when no client configuration or consent flow is
	/// configured, or when the user cancels or denies consent. When the new credential cannot
	/// be persisted it stays in memory and the next [`get_valid`](Self::get_valid) retries the
	/// write before handing it out.
	pub async fn acquire(&self) -> Result<Credential> {
		let mut slot = self.slot.lock().await;

		self.acquire_locked(&mut slot).await
	}

	pub(crate) async fn acquire_locked(&self, slot: &mut Slot) -> Result<Credential> {
		const KIND: FlowKind = FlowKind::Acquire;

		let span = FlowSpan::new(KIND, "acquire_locked");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				if matches!(slot, Slot::Revoked)
					&& let Err(e) = self.store.delete().await
				{
					tracing::warn!(error = %e, "Revoked credential record is still present.");
				}

				let (Some(config), Some(consent)) = (&self.client_config, &self.consent) else {
					return Err(Error::Authentication {
						reason: "no usable credential is stored and interactive authorization \
							is not configured"
							.into(),
					});
				};

				tracing::info!("No usable credential; starting interactive authorization.");

				let credential = consent.acquire(config).await?;
				let held = Held {
					credential: credential.clone(),
					obtained_at: Some(OffsetDateTime::now_utc()),
					persisted: false,
				};

				self.install(slot, held);

				if let Slot::Loaded(held) = &mut *slot {
					self.persist_locked(held).await?;
				}

				tracing::info!(expires_at = ?credential.expires_at, "Acquired new credential.");

				Ok(credential)
			})
			.await;

		super::record_outcome(KIND, &result);

		result
	}
}
