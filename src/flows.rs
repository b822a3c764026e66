//! Credential lifecycle orchestration.
//!
//! [`CredentialManager`] owns the single in-memory credential behind an async mutex. That
//! mutex is the single-flight guard: a caller that arrives while a refresh is in flight waits
//! for the lock and then re-checks the credential instead of exchanging the refresh token a
//! second time. The phase snapshot and generation counter live outside the lock so status reads
//! never wait on a refresh.

pub mod acquire;
pub mod common;
pub mod consent;
pub mod refresh;
pub mod revoke;

pub use common::*;
pub use consent::*;
pub use refresh::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{ClientConfig, Credential},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	oauth::TokenEndpoint,
	store::{CredentialStore, StoreError},
};

/// Observable lifecycle phase of the managed credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialPhase {
	/// Nothing is held in memory; the next request reads the store.
	Unloaded,
	/// A credential is held in memory.
	Loaded,
	/// A refresh exchange is in flight.
	Refreshing,
	/// The credential was revoked; the next request behaves as [`CredentialPhase::Unloaded`].
	Revoked,
}
impl CredentialPhase {
	/// Returns a stable label suitable for span or log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialPhase::Unloaded => "unloaded",
			CredentialPhase::Loaded => "loaded",
			CredentialPhase::Refreshing => "refreshing",
			CredentialPhase::Revoked => "revoked",
		}
	}
}
impl Display for CredentialPhase {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

pub(crate) enum Slot {
	Unloaded,
	Loaded(Held),
	Revoked,
}

pub(crate) struct Held {
	pub(crate) credential: Credential,
	// Unknown for credentials read back from the store.
	pub(crate) obtained_at: Option<OffsetDateTime>,
	// False until the store holds exactly this credential.
	pub(crate) persisted: bool,
}

/// Loads, refreshes, persists, acquires, and revokes the one credential of this process.
pub struct CredentialManager {
	store: Arc<dyn CredentialStore>,
	endpoint: Arc<dyn TokenEndpoint>,
	client_config: Option<ClientConfig>,
	consent: Option<Arc<dyn ConsentFlow>>,
	refresh_policy: RefreshPolicy,
	refresh_metrics: Arc<RefreshMetrics>,
	slot: AsyncMutex<Slot>,
	phase: RwLock<CredentialPhase>,
	generation: AtomicU64,
}
impl CredentialManager {
	/// Creates a manager over `store` that refreshes through `endpoint`.
	///
	/// Without [`with_client_config`](Self::with_client_config) and
	/// [`with_consent_flow`](Self::with_consent_flow) the manager cannot acquire a new
	/// credential and reports [`Error::Authentication`] instead.
	pub fn new(store: Arc<dyn CredentialStore>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
		Self {
			store,
			endpoint,
			client_config: None,
			consent: None,
			refresh_policy: RefreshPolicy::default(),
			refresh_metrics: Default::default(),
			slot: AsyncMutex::new(Slot::Unloaded),
			phase: RwLock::new(CredentialPhase::Unloaded),
			generation: AtomicU64::new(0),
		}
	}

	/// Sets the client configuration used for interactive acquisition.
	pub fn with_client_config(mut self, config: ClientConfig) -> Self {
		self.client_config = Some(config);

		self
	}

	/// Sets the interactive acquisition flow.
	pub fn with_consent_flow(mut self, consent: Arc<dyn ConsentFlow>) -> Self {
		self.consent = Some(consent);

		self
	}

	/// Overrides the refresh policy (reactive five-minute margin by default).
	pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
		self.refresh_policy = policy;

		self
	}

	/// Refresh policy in effect.
	pub fn refresh_policy(&self) -> &RefreshPolicy {
		&self.refresh_policy
	}

	/// Counters describing refresh exchanges performed by this manager.
	pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
		self.refresh_metrics.clone()
	}

	/// Current lifecycle phase. Never waits on an in-flight refresh.
	pub fn phase(&self) -> CredentialPhase {
		*self.phase.read()
	}

	/// Counter bumped whenever the bound credential is replaced or discarded.
	///
	/// Clients built from an older generation are bound to a stale credential.
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::SeqCst)
	}

	/// Returns a credential whose access token is valid beyond the refresh margin.
	///
	/// Loads the persisted record on first use, refreshes when the policy says so, and falls
	/// back to interactive acquisition when no usable record exists.
	pub async fn get_valid(&self) -> Result<Credential> {
		self.get_valid_bound().await.map(|(credential, _)| credential)
	}

	/// Like [`get_valid`](Self::get_valid), also returning the generation the credential
	/// belongs to, read under the single-flight guard.
	pub(crate) async fn get_valid_bound(&self) -> Result<(Credential, u64)> {
		const KIND: FlowKind = FlowKind::GetValid;

		let span = FlowSpan::new(KIND, "get_valid");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let mut slot = self.slot.lock().await;
				let credential = if !matches!(*slot, Slot::Loaded(_))
					&& !self.load_locked(&mut slot).await?
				{
					self.acquire_locked(&mut slot).await?
				} else {
					self.ensure_fresh_locked(&mut slot).await?
				};

				Ok((credential, self.generation()))
			})
			.await;

		record_outcome(KIND, &result);

		result
	}

	/// Returns `true` when a credential is held in memory or present in the store.
	pub async fn is_authenticated(&self) -> bool {
		match self.phase() {
			CredentialPhase::Loaded | CredentialPhase::Refreshing => true,
			CredentialPhase::Revoked => false,
			CredentialPhase::Unloaded => match self.store.load().await {
				Ok(found) => found.is_some(),
				Err(e) => {
					tracing::debug!(error = %e, "Credential store lookup failed.");

					false
				},
			},
		}
	}

	async fn ensure_fresh_locked(&self, slot: &mut Slot) -> Result<Credential> {
		if let Slot::Loaded(held) = &mut *slot {
			if !held.persisted {
				self.persist_locked(held).await?;
			}

			let now = OffsetDateTime::now_utc();

			if !self.refresh_policy.needs_refresh(&held.credential, held.obtained_at, now) {
				return Ok(held.credential.clone());
			}
		}

		self.refresh_locked(slot).await
	}

	/// Moves `slot` to `Loaded` from the store. Returns `false` when nothing usable is stored.
	///
	/// A revoked slot never reads the store: a record that survived revocation is dead.
	async fn load_locked(&self, slot: &mut Slot) -> Result<bool> {
		if matches!(slot, Slot::Revoked) {
			return Ok(false);
		}

		let Some(credential) = self.load_from_store().await? else {
			return Ok(false);
		};

		tracing::debug!(expires_at = ?credential.expires_at, "Loaded persisted credential.");

		self.install(slot, Held { credential, obtained_at: None, persisted: true });

		Ok(true)
	}

	/// Writes the held credential to the store, keeping it marked unpersisted on failure.
	async fn persist_locked(&self, held: &mut Held) -> Result<()> {
		if let Err(e) = self.store.save(&held.credential).await {
			tracing::warn!(error = %e, "Failed to persist the held credential.");

			return Err(e.into());
		}

		held.persisted = true;

		Ok(())
	}

	async fn load_from_store(&self) -> Result<Option<Credential>> {
		match self.store.load().await {
			Ok(found) => Ok(found),
			Err(StoreError::CorruptRecord { message }) => {
				tracing::warn!(%message, "Persisted credential is corrupt; treating it as absent.");

				Ok(None)
			},
			Err(e) => Err(e.into()),
		}
	}

	fn install(&self, slot: &mut Slot, held: Held) {
		*slot = Slot::Loaded(held);

		self.set_phase(CredentialPhase::Loaded);
		self.bump_generation();
	}

	/// Drops the in-memory credential and deletes the dead persisted record.
	async fn discard_locked(&self, slot: &mut Slot) {
		*slot = Slot::Unloaded;

		self.set_phase(CredentialPhase::Unloaded);
		self.bump_generation();

		if let Err(e) = self.store.delete().await {
			tracing::warn!(error = %e, "Failed to delete the discarded credential record.");
		}
	}

	fn set_phase(&self, phase: CredentialPhase) {
		*self.phase.write() = phase;
	}

	fn bump_generation(&self) {
		self.generation.fetch_add(1, Ordering::SeqCst);
	}
}
impl Debug for CredentialManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialManager")
			.field("phase", &self.phase())
			.field("generation", &self.generation())
			.field("refresh_policy", &self.refresh_policy)
			.field("client_config", &self.client_config)
			.field("consent_configured", &self.consent.is_some())
			.finish()
	}
}

fn record_outcome<T>(kind: FlowKind, result: &Result<T>) {
	match result {
		Ok(_) => obs::record_flow_outcome(kind, FlowOutcome::Success),
		Err(_) => obs::record_flow_outcome(kind, FlowOutcome::Failure),
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// self
	use super::*;
	use crate::{_preludet::*, store::CredentialStore};

	fn with_consent(
		manager: CredentialManager,
		endpoint: &Arc<ScriptedTokenEndpoint>,
	) -> CredentialManager {
		let config = ClientConfig::from_json(TEST_CLIENT_JSON).expect("Client config should parse.");

		manager
			.with_client_config(config)
			.with_consent_flow(Arc::new(approving_consent(endpoint.clone(), "abc")))
	}

	async fn seed(store: &impl CredentialStore, credential: &Credential) {
		store.save(credential).await.expect("Seeding the store should succeed.");
	}

	fn access_token(credential: &Credential) -> &str {
		credential.access_token.as_ref().map(|token| token.expose()).unwrap_or_default()
	}

	#[tokio::test]
	async fn fresh_credential_is_reused_without_refresh() {
		let (manager, store, endpoint) = build_test_manager(ScriptedTokenEndpoint::granting("x"));

		seed(store.as_ref(), &credential_expiring_in(Duration::hours(1))).await;

		for _ in 0..3 {
			let credential = manager.get_valid().await.expect("Stored credential should be valid.");

			assert_eq!(access_token(&credential), "access-test");
		}

		assert_eq!(endpoint.refresh_calls(), 0);
		assert_eq!(store.save_count(), 1);
		assert_eq!(manager.phase(), CredentialPhase::Loaded);
	}

	#[tokio::test]
	async fn near_expiry_refreshes_once_and_persists() {
		let (manager, store, endpoint) =
			build_test_manager(ScriptedTokenEndpoint::granting("fresh"));

		seed(store.as_ref(), &credential_expiring_in(Duration::minutes(2))).await;

		let credential = manager.get_valid().await.expect("Refresh should succeed.");
		let persisted = store.snapshot().expect("Refreshed credential should be persisted.");

		assert_eq!(access_token(&credential), "fresh");
		assert_eq!(persisted, credential);
		assert_eq!(
			persisted.refresh_token.as_ref().map(|token| token.expose()),
			Some("refresh-test")
		);
		assert_eq!(endpoint.refresh_calls(), 1);

		manager.get_valid().await.expect("Refreshed credential should be reused.");

		assert_eq!(endpoint.refresh_calls(), 1);
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_refresh() {
		let (manager, store, endpoint) = build_test_manager(
			ScriptedTokenEndpoint::granting("fresh").with_delay(StdDuration::from_millis(50)),
		);
		let manager = Arc::new(manager);

		seed(store.as_ref(), &credential_expiring_in(Duration::seconds(30))).await;

		let handles = (0..8)
			.map(|_| {
				let manager = manager.clone();

				tokio::spawn(async move { manager.get_valid().await })
			})
			.collect::<Vec<_>>();

		for handle in handles {
			let credential = handle
				.await
				.expect("Task should not panic.")
				.expect("Every caller should receive a credential.");

			assert_eq!(access_token(&credential), "fresh");
		}

		assert_eq!(endpoint.refresh_calls(), 1);
		assert_eq!(manager.refresh_metrics().successes(), 1);
	}

	#[tokio::test]
	async fn record_without_expiry_is_refreshed_before_use() {
		let (manager, store, endpoint) =
			build_test_manager(ScriptedTokenEndpoint::granting("fresh"));

		seed(
			store.as_ref(),
			&Credential::new("client-test", "secret-test")
				.with_refresh_token("refresh-test")
				.with_access_token("stale"),
		)
		.await;

		let credential = manager.get_valid().await.expect("Refresh should succeed.");

		assert_eq!(access_token(&credential), "fresh");
		assert!(credential.expires_at.is_some());
		assert_eq!(endpoint.refresh_calls(), 1);
	}

	#[tokio::test]
	async fn rejected_refresh_discards_the_credential() {
		let (manager, store, _endpoint) = build_test_manager(ScriptedTokenEndpoint::rejecting());

		seed(store.as_ref(), &credential_expiring_in(Duration::minutes(1))).await;

		let generation = manager.generation();
		let err = manager.get_valid().await.expect_err("Rejected grant must fail.");

		assert!(matches!(err, Error::TokenExpired { .. }));
		assert!(err.is_authentication());
		assert_eq!(manager.phase(), CredentialPhase::Unloaded);
		assert!(manager.generation() > generation);
		assert!(!store.contains_record());
		assert_eq!(manager.refresh_metrics().rejections(), 1);
	}

	#[tokio::test]
	async fn corrupt_record_falls_back_to_consent() {
		let (manager, store, endpoint) = build_test_manager(ScriptedTokenEndpoint::granting("x"));
		let manager = with_consent(manager, &endpoint);

		store.put_raw(b"{ not json".to_vec());

		let credential = manager.get_valid().await.expect("Consent should produce a credential.");
		let persisted = store.snapshot().expect("Acquired credential should be persisted.");

		assert_eq!(access_token(&credential), "access-from-abc");
		assert_eq!(persisted, credential);
		assert_eq!(endpoint.refresh_calls(), 0);
		assert!(manager.is_authenticated().await);
	}

	#[tokio::test]
	async fn revoked_manager_requires_acquisition_again() {
		let (manager, store, endpoint) = build_test_manager(ScriptedTokenEndpoint::granting("x"));
		let manager = with_consent(manager, &endpoint);

		seed(store.as_ref(), &credential_expiring_in(Duration::hours(1))).await;
		manager.get_valid().await.expect("Stored credential should be valid.");
		manager.revoke().await.expect("Revocation should succeed.");

		assert!(!manager.is_authenticated().await);

		let credential = manager.get_valid().await.expect("Consent should run again.");

		assert_eq!(access_token(&credential), "access-from-abc");
		assert_eq!(store.snapshot(), Some(credential));
		assert_eq!(endpoint.refresh_calls(), 0);
	}

	#[tokio::test]
	async fn record_surviving_revocation_is_never_reused() {
		let (manager, store, endpoint) = build_faulty_manager(
			&credential_expiring_in(Duration::hours(1)),
			ScriptedTokenEndpoint::granting("x"),
		);

		manager.get_valid().await.expect("Stored credential should be valid.");
		store.fail_deletes(true);

		let err = manager.revoke().await.expect_err("Failed delete must surface.");

		assert!(matches!(err, Error::Storage(_)));
		assert!(store.inner().contains_record());
		assert!(!manager.is_authenticated().await);
		assert!(matches!(
			manager.get_valid().await.expect_err("Revoked record must not be loaded."),
			Error::Authentication { .. }
		));
		assert!(matches!(
			manager.refresh().await.expect_err("Revoked record must not be refreshed."),
			Error::Authentication { .. }
		));
		assert_eq!(endpoint.refresh_calls(), 0);

		store.fail_deletes(false);

		let manager = with_consent(manager, &endpoint);
		let credential = manager.get_valid().await.expect("Consent should replace the record.");

		assert_eq!(access_token(&credential), "access-from-abc");
		assert_eq!(store.inner().snapshot(), Some(credential));
	}

	#[tokio::test]
	async fn failed_refresh_write_is_retried_before_handing_out() {
		let (manager, store, endpoint) = build_faulty_manager(
			&credential_expiring_in(Duration::minutes(1)),
			ScriptedTokenEndpoint::with_script(RefreshScript::Grant {
				access_token: "rotated".into(),
				refresh_token: Some("refresh-rotated".into()),
				expires_in: Duration::hours(1),
			}),
		);

		store.fail_next_saves(1);

		let err = manager.get_valid().await.expect_err("Unpersisted refresh must not be used.");

		assert!(matches!(err, Error::Storage(_)));
		assert_eq!(store.inner().snapshot().as_ref().map(access_token), Some("access-test"));

		let credential = manager.get_valid().await.expect("Second write should succeed.");

		assert_eq!(access_token(&credential), "rotated");
		assert_eq!(store.inner().snapshot(), Some(credential));
		assert_eq!(endpoint.refresh_calls(), 1);
	}

	#[tokio::test]
	async fn failed_acquisition_write_is_retried_without_new_consent() {
		let (manager, store, endpoint) = build_faulty_manager(
			&credential_expiring_in(Duration::hours(1)),
			ScriptedTokenEndpoint::granting("x"),
		);

		store.inner().put_raw("corrupt");
		store.fail_next_saves(2);

		let manager = with_consent(manager, &endpoint);

		for _ in 0..2 {
			assert!(matches!(
				manager.get_valid().await.expect_err("Unpersisted credential must not be used."),
				Error::Storage(_)
			));
		}

		let credential = manager.get_valid().await.expect("Third write should succeed.");

		assert_eq!(access_token(&credential), "access-from-abc");
		assert_eq!(store.inner().snapshot(), Some(credential));
		assert_eq!(store.inner().save_count(), 1);
	}

	#[tokio::test]
	async fn is_authenticated_reads_the_store_before_loading() {
		let (manager, store, _endpoint) = build_test_manager(ScriptedTokenEndpoint::granting("x"));

		assert!(!manager.is_authenticated().await);

		seed(store.as_ref(), &credential_expiring_in(Duration::hours(1))).await;

		assert!(manager.is_authenticated().await);
		assert_eq!(manager.phase(), CredentialPhase::Unloaded);
	}
}
