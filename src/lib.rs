//! Single-credential OAuth 2.0 keeper: load, refresh, persist, and revoke one authorized-user
//! grant, and route every analytics API call through classification-aware retries.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod classify;
pub mod client;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod retry;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	// self
	use crate::{
		auth::{ClientConfig, Credential, ScopeSet, Secret},
		error::TransientError,
		flows::{CallbackConsentFlow, CredentialManager},
		http::ReqwestHttpClient,
		oauth::{EndpointFuture, TokenEndpoint, TokenGrant},
		store::{CredentialStore, MemoryStore, StoreError, StoreFuture},
	};

	/// Installed-app client configuration with a loopback redirect, for consent tests.
	pub const TEST_CLIENT_JSON: &str = r#"{"installed":{"client_id":"client-test","client_secret":"secret-test","redirect_uris":["http://localhost/"]}}"#;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds a credential fixture whose access token expires after `expires_in`.
	pub fn credential_expiring_in(expires_in: Duration) -> Credential {
		Credential::new("client-test", "secret-test")
			.with_refresh_token("refresh-test")
			.with_access_token("access-test")
			.with_expires_at(OffsetDateTime::now_utc() + expires_in)
	}

	/// Scripted outcome returned by [`ScriptedTokenEndpoint::refresh`].
	#[derive(Clone, Debug)]
	pub enum RefreshScript {
		/// Issue a new access token (and optionally rotate the refresh token).
		Grant {
			/// Access token to issue.
			access_token: String,
			/// Rotated refresh token, if any.
			refresh_token: Option<String>,
			/// Lifetime of the new access token.
			expires_in: Duration,
		},
		/// Reject the refresh token like an `invalid_grant` response.
		Reject,
		/// Fail like a token endpoint answering `503 Service Unavailable`.
		Unavailable,
	}

	/// In-process [`TokenEndpoint`] that counts calls and replays a fixed script.
	#[derive(Debug)]
	pub struct ScriptedTokenEndpoint {
		script: Mutex<RefreshScript>,
		delay: std::time::Duration,
		refresh_calls: AtomicUsize,
		revoke_calls: AtomicUsize,
		revoked: Mutex<Vec<String>>,
	}
	impl ScriptedTokenEndpoint {
		/// Creates an endpoint that issues `access_token` for one hour on every refresh.
		pub fn granting(access_token: impl Into<String>) -> Self {
			Self::with_script(RefreshScript::Grant {
				access_token: access_token.into(),
				refresh_token: None,
				expires_in: Duration::hours(1),
			})
		}

		/// Creates an endpoint that rejects every refresh.
		pub fn rejecting() -> Self {
			Self::with_script(RefreshScript::Reject)
		}

		/// Creates an endpoint replaying the provided script.
		pub fn with_script(script: RefreshScript) -> Self {
			Self {
				script: Mutex::new(script),
				delay: std::time::Duration::ZERO,
				refresh_calls: AtomicUsize::new(0),
				revoke_calls: AtomicUsize::new(0),
				revoked: Mutex::new(Vec::new()),
			}
		}

		/// Makes every refresh take `delay` before answering.
		pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
			self.delay = delay;

			self
		}

		/// Replaces the script used by subsequent refreshes.
		pub fn set_script(&self, script: RefreshScript) {
			*self.script.lock() = script;
		}

		/// Number of refresh exchanges performed so far.
		pub fn refresh_calls(&self) -> usize {
			self.refresh_calls.load(Ordering::SeqCst)
		}

		/// Number of remote revocations performed so far.
		pub fn revoke_calls(&self) -> usize {
			self.revoke_calls.load(Ordering::SeqCst)
		}

		/// Token values passed to [`TokenEndpoint::revoke`].
		pub fn revoked_tokens(&self) -> Vec<String> {
			self.revoked.lock().clone()
		}
	}
	impl TokenEndpoint for ScriptedTokenEndpoint {
		fn refresh<'a>(&'a self, _credential: &'a Credential) -> EndpointFuture<'a, TokenGrant> {
			Box::pin(async move {
				self.refresh_calls.fetch_add(1, Ordering::SeqCst);

				if !self.delay.is_zero() {
					tokio::time::sleep(self.delay).await;
				}

				let script = self.script.lock().clone();

				match script {
					RefreshScript::Grant { access_token, refresh_token, expires_in } =>
						Ok(TokenGrant {
							access_token: Secret::new(access_token),
							refresh_token: refresh_token.map(Secret::new),
							expires_in: Some(expires_in),
						}),
					RefreshScript::Reject => Err(Error::TokenExpired {
						reason: "token endpoint rejected the grant (invalid_grant)".into(),
					}),
					RefreshScript::Unavailable => Err(TransientError::TokenEndpoint {
						message: "temporarily_unavailable".into(),
						status: Some(503),
						retry_after: None,
					}
					.into()),
				}
			})
		}

		fn exchange_code<'a>(
			&'a self,
			_config: &'a ClientConfig,
			code: &'a str,
			_pkce_verifier: &'a str,
			_redirect_uri: &'a Url,
		) -> EndpointFuture<'a, TokenGrant> {
			Box::pin(async move {
				Ok(TokenGrant {
					access_token: Secret::new(format!("access-from-{code}")),
					refresh_token: Some(Secret::new(format!("refresh-from-{code}"))),
					expires_in: Some(Duration::hours(1)),
				})
			})
		}

		fn revoke<'a>(&'a self, token: &'a Secret) -> EndpointFuture<'a, ()> {
			Box::pin(async move {
				self.revoke_calls.fetch_add(1, Ordering::SeqCst);
				self.revoked.lock().push(token.expose().to_owned());

				Ok(())
			})
		}
	}

	/// Consent flow that approves at once, redirecting back with `code` and the issued state.
	pub fn approving_consent(
		endpoint: Arc<dyn TokenEndpoint>,
		code: &'static str,
	) -> CallbackConsentFlow {
		let scopes = ScopeSet::new(["https://www.googleapis.com/auth/analytics.readonly"])
			.expect("Scope fixture should be valid.");

		CallbackConsentFlow::new(endpoint, scopes, move |authorize_url: Url| async move {
			let state = authorize_url
				.query_pairs()
				.find(|(key, _)| key == "state")
				.map(|(_, value)| value.into_owned())
				.unwrap_or_default();

			Ok(Url::parse(&format!("http://localhost/?code={code}&state={state}"))
				.expect("Redirect fixture should parse."))
		})
	}

	/// [`MemoryStore`] wrapper that fails writes or deletes on demand.
	#[derive(Debug, Default)]
	pub struct FaultyStore {
		inner: MemoryStore,
		failing_saves: AtomicUsize,
		failing_deletes: AtomicBool,
	}
	impl FaultyStore {
		/// Wraps `inner`.
		pub fn new(inner: MemoryStore) -> Self {
			Self { inner, ..Default::default() }
		}

		/// Makes the next `count` saves fail with [`StoreError::Backend`].
		pub fn fail_next_saves(&self, count: usize) {
			self.failing_saves.store(count, Ordering::SeqCst);
		}

		/// Makes every delete fail (or succeed again) with [`StoreError::Backend`].
		pub fn fail_deletes(&self, failing: bool) {
			self.failing_deletes.store(failing, Ordering::SeqCst);
		}

		/// Wrapped store.
		pub fn inner(&self) -> &MemoryStore {
			&self.inner
		}

		fn backend_failure(operation: &str) -> StoreError {
			StoreError::Backend { message: format!("injected {operation} failure") }
		}
	}
	impl CredentialStore for FaultyStore {
		fn load(&self) -> StoreFuture<'_, Option<Credential>> {
			self.inner.load()
		}

		fn save<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, ()> {
			let failing = self
				.failing_saves
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
				.is_ok();

			if failing {
				return Box::pin(async { Err(Self::backend_failure("save")) });
			}

			self.inner.save(credential)
		}

		fn delete(&self) -> StoreFuture<'_, ()> {
			if self.failing_deletes.load(Ordering::SeqCst) {
				return Box::pin(async { Err(Self::backend_failure("delete")) });
			}

			self.inner.delete()
		}
	}

	/// Builds a [`CredentialManager`] over an in-memory store and a scripted endpoint.
	pub fn build_test_manager(
		endpoint: ScriptedTokenEndpoint,
	) -> (CredentialManager, Arc<MemoryStore>, Arc<ScriptedTokenEndpoint>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let endpoint = Arc::new(endpoint);
		let manager = CredentialManager::new(store, endpoint.clone());

		(manager, store_backend, endpoint)
	}

	/// Builds a [`CredentialManager`] over a [`FaultyStore`] seeded with `credential`.
	pub fn build_faulty_manager(
		credential: &Credential,
		endpoint: ScriptedTokenEndpoint,
	) -> (CredentialManager, Arc<FaultyStore>, Arc<ScriptedTokenEndpoint>) {
		let inner =
			MemoryStore::with_credential(credential).expect("Seeding the store should succeed.");
		let store_backend = Arc::new(FaultyStore::new(inner));
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let endpoint = Arc::new(endpoint);
		let manager = CredentialManager::new(store, endpoint.clone());

		(manager, store_backend, endpoint)
	}
}

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use tokio_util::sync::CancellationToken;
pub use url;
#[cfg(test)] use httpmock as _;
