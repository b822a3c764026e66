//! Caller-side policy tying the client cache to the retrying invoker.

// self
use crate::{
	_prelude::*,
	classify::RemoteFailure,
	client::{AuthenticatedClient, AuthenticatedClientCache},
	retry::ResilientInvoker,
};

/// Runs API calls with a cached client, bounded retries, and one re-authentication.
///
/// When a call fails terminally with an authentication-class failure, the session drops the
/// cached client, refreshes the rejected credential, rebuilds the client, and retries exactly
/// once. A second authentication failure is returned to the caller.
#[derive(Clone, Debug)]
pub struct ApiSession {
	cache: Arc<AuthenticatedClientCache>,
	invoker: ResilientInvoker,
}
impl ApiSession {
	/// Creates a session with the default retry policy.
	pub fn new(cache: Arc<AuthenticatedClientCache>) -> Self {
		Self { cache, invoker: ResilientInvoker::default() }
	}

	/// Replaces the invoker (retry policy, shutdown token).
	pub fn with_invoker(mut self, invoker: ResilientInvoker) -> Self {
		self.invoker = invoker;

		self
	}

	/// Client cache used by this session.
	pub fn cache(&self) -> &Arc<AuthenticatedClientCache> {
		&self.cache
	}

	/// Runs `op` against an authenticated client.
	pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
	where
		F: FnMut(Arc<AuthenticatedClient>) -> Fut,
		Fut: Future<Output = Result<T, RemoteFailure>>,
	{
		let client = self.cache.get().await?;
		let err = match self.invoker.invoke(|| op(client.clone())).await {
			Ok(value) => return Ok(value),
			Err(e) if e.is_auth_failure() => e,
			Err(e) => return Err(e),
		};

		tracing::info!(error = %err, "API rejected the access token; refreshing once.");

		self.cache.invalidate();
		self.cache.manager().refresh_rejected(client.credential()).await?;

		let client = self.cache.get().await?;

		self.invoker.invoke(|| op(client.clone())).await
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::{
		_preludet::*,
		store::{CredentialStore, MemoryStore},
	};

	fn session_over(
		endpoint: ScriptedTokenEndpoint,
	) -> (ApiSession, Arc<MemoryStore>, Arc<ScriptedTokenEndpoint>) {
		let (manager, store, endpoint) = build_test_manager(endpoint);
		let cache = AuthenticatedClientCache::new(
			Arc::new(manager),
			Url::parse("https://api.example.com/").expect("Base URL fixture should parse."),
		);

		(ApiSession::new(Arc::new(cache)), store, endpoint)
	}

	#[tokio::test]
	async fn auth_failure_refreshes_and_retries_once() {
		let (session, store, endpoint) = session_over(ScriptedTokenEndpoint::granting("fresh"));

		store
			.save(&credential_expiring_in(Duration::hours(1)))
			.await
			.expect("Seeding the store should succeed.");

		let calls = AtomicUsize::new(0);
		let token = session
			.call(|client| {
				let n = calls.fetch_add(1, Ordering::SeqCst);

				async move {
					if n == 0 {
						Err(RemoteFailure::new(401, "Invalid Credentials"))
					} else {
						Ok(client
							.credential()
							.access_token
							.as_ref()
							.map(|token| token.expose().to_owned()))
					}
				}
			})
			.await
			.expect("Second attempt should succeed.");

		assert_eq!(token.as_deref(), Some("fresh"));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert_eq!(endpoint.refresh_calls(), 1);
	}

	#[tokio::test]
	async fn repeated_auth_failure_surfaces_after_one_retry() {
		let (session, store, endpoint) = session_over(ScriptedTokenEndpoint::granting("fresh"));

		store
			.save(&credential_expiring_in(Duration::hours(1)))
			.await
			.expect("Seeding the store should succeed.");

		let calls = AtomicUsize::new(0);
		let err = session
			.call(|_client| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err::<(), _>(RemoteFailure::new(401, "Invalid Credentials")) }
			})
			.await
			.expect_err("Persistent 401 must surface.");

		assert!(err.is_auth_failure());
		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert_eq!(endpoint.refresh_calls(), 1);
	}
}
