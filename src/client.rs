//! API clients bound to one credential snapshot, and the cache that hands them out.

// crates.io
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::Credential,
	classify::RemoteFailure,
	flows::CredentialManager,
	http::ReqwestHttpClient,
};

/// reqwest handle that authorizes every request with one credential's access token.
///
/// Failures are reported as [`RemoteFailure`] so they can flow straight into
/// [`ResilientInvoker`](crate::retry::ResilientInvoker).
#[derive(Clone)]
pub struct AuthenticatedClient {
	http: ReqwestClient,
	base_url: Url,
	credential: Credential,
	generation: u64,
}
impl AuthenticatedClient {
	/// Binds `credential` to requests against `base_url`.
	///
	/// `generation` is the manager generation the credential was read under.
	pub fn new(
		http: ReqwestHttpClient,
		base_url: Url,
		credential: Credential,
		generation: u64,
	) -> Result<Self> {
		if credential.access_token.as_ref().is_none_or(|token| token.is_empty()) {
			return Err(Error::Authentication {
				reason: "the credential carries no access token".into(),
			});
		}

		Ok(Self { http: http.0, base_url, credential, generation })
	}

	/// Credential this client is bound to.
	pub fn credential(&self) -> &Credential {
		&self.credential
	}

	/// Manager generation this client was built for.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Base URL relative paths are resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Starts an authorized request for `path` (resolved against the base URL).
	pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteFailure> {
		let url = self.base_url.join(path).map_err(|e| {
			RemoteFailure::without_status(format!("invalid request path `{path}`: {e}"))
		})?;
		let token =
			self.credential.access_token.as_ref().map(|token| token.expose()).unwrap_or_default();

		Ok(self.http.request(method, url).bearer_auth(token))
	}

	/// Sends a prepared request and decodes a JSON success body.
	pub async fn send_json<T>(&self, request: RequestBuilder) -> Result<T, RemoteFailure>
	where
		T: DeserializeOwned,
	{
		let response = ensure_success(request.send().await?).await?;
		let bytes = response.bytes().await?;

		serde_json::from_slice(&bytes).map_err(|e| {
			RemoteFailure::without_status(format!("response body is not the expected JSON: {e}"))
		})
	}

	/// `GET path` decoding a JSON body.
	pub async fn get_json<T>(&self, path: &str) -> Result<T, RemoteFailure>
	where
		T: DeserializeOwned,
	{
		self.send_json(self.request(Method::GET, path)?).await
	}

	/// `POST path` with a JSON body, decoding a JSON body.
	pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RemoteFailure>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.send_json(self.request(Method::POST, path)?.json(body)).await
	}
}
impl Debug for AuthenticatedClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthenticatedClient")
			.field("base_url", &self.base_url)
			.field("expires_at", &self.credential.expires_at)
			.field("generation", &self.generation)
			.finish()
	}
}

/// Caches one [`AuthenticatedClient`] and rebuilds it whenever its credential goes stale.
///
/// A cached client is reused only while its generation matches the manager's and its
/// credential is not due for refresh, so [`get`](Self::get) never returns a client bound to a
/// credential known to be stale.
pub struct AuthenticatedClientCache {
	manager: Arc<CredentialManager>,
	http: ReqwestHttpClient,
	base_url: Url,
	cached: RwLock<Option<Arc<AuthenticatedClient>>>,
	build_lock: AsyncMutex<()>,
}
impl AuthenticatedClientCache {
	/// Creates an empty cache for clients talking to `base_url`.
	pub fn new(manager: Arc<CredentialManager>, base_url: Url) -> Self {
		Self {
			manager,
			http: ReqwestHttpClient::default(),
			base_url,
			cached: RwLock::new(None),
			build_lock: AsyncMutex::new(()),
		}
	}

	/// Replaces the HTTP client shared by every built client.
	pub fn with_http_client(mut self, http: ReqwestHttpClient) -> Self {
		self.http = http;

		self
	}

	/// Manager the cache validates credentials through.
	pub fn manager(&self) -> &Arc<CredentialManager> {
		&self.manager
	}

	/// Returns the cached client, or validates the credential and builds a new one.
	pub async fn get(&self) -> Result<Arc<AuthenticatedClient>> {
		if let Some(client) = self.fresh_cached() {
			return Ok(client);
		}

		let _build = self.build_lock.lock().await;

		if let Some(client) = self.fresh_cached() {
			return Ok(client);
		}

		let (credential, generation) = self.manager.get_valid_bound().await?;
		let client = Arc::new(AuthenticatedClient::new(
			self.http.clone(),
			self.base_url.clone(),
			credential,
			generation,
		)?);

		tracing::debug!(generation, "Built authenticated client.");

		*self.cached.write() = Some(client.clone());

		Ok(client)
	}

	/// Drops the cached client without touching the credential.
	pub fn invalidate(&self) {
		self.cached.write().take();
	}

	/// Returns `true` when a client is cached (fresh or not).
	pub fn is_cached(&self) -> bool {
		self.cached.read().is_some()
	}

	/// Revokes the credential through the manager and drops the cached client.
	pub async fn revoke(&self) -> Result<()> {
		self.invalidate();

		let result = self.manager.revoke().await;

		self.invalidate();

		result
	}

	fn fresh_cached(&self) -> Option<Arc<AuthenticatedClient>> {
		let client = self.cached.read().clone()?;

		if client.generation != self.manager.generation() {
			return None;
		}
		if self.manager.refresh_policy().needs_refresh(
			&client.credential,
			None,
			OffsetDateTime::now_utc(),
		) {
			return None;
		}

		Some(client)
	}
}
impl Debug for AuthenticatedClientCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthenticatedClientCache")
			.field("base_url", &self.base_url)
			.field("cached", &self.is_cached())
			.finish()
	}
}

#[derive(Deserialize)]
struct ErrorEnvelope {
	error: ErrorBody,
	#[serde(default)]
	error_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
	Detailed {
		#[serde(default)]
		message: Option<String>,
		#[serde(default)]
		errors: Vec<ErrorItem>,
	},
	Code(String),
}

#[derive(Deserialize)]
struct ErrorItem {
	#[serde(default)]
	reason: Option<String>,
}

async fn ensure_success(response: Response) -> Result<Response, RemoteFailure> {
	let status = response.status();

	if status.is_success() {
		return Ok(response);
	}

	let body = response.text().await.unwrap_or_default();
	let message = error_message(&body)
		.unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_owned());

	Err(RemoteFailure::new(status.as_u16(), message))
}

/// Extracts `message (reason, …)` from a provider error body; falls back to the raw body.
fn error_message(body: &str) -> Option<String> {
	let trimmed = body.trim();

	if trimmed.is_empty() {
		return None;
	}

	let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(trimmed) else {
		return Some(trimmed.to_owned());
	};
	let message = match envelope.error {
		ErrorBody::Detailed { message, errors } => {
			let reasons =
				errors.into_iter().filter_map(|item| item.reason).collect::<Vec<_>>().join(", ");

			match (message, reasons.is_empty()) {
				(Some(message), true) => message,
				(Some(message), false) => format!("{message} ({reasons})"),
				(None, false) => reasons,
				(None, true) => return Some(trimmed.to_owned()),
			}
		},
		ErrorBody::Code(code) => match envelope.error_description {
			Some(description) => format!("{code}: {description}"),
			None => code,
		},
	};

	Some(message)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::classify::ErrorKind;

	#[test]
	fn google_envelope_keeps_reasons_for_classification() {
		let body = r#"{"error":{"code":403,"message":"Quota exceeded for quota metric.","errors":[{"reason":"quotaExceeded"}],"status":"RESOURCE_EXHAUSTED"}}"#;
		let message = error_message(body).expect("Envelope should yield a message.");

		assert_eq!(message, "Quota exceeded for quota metric. (quotaExceeded)");
		assert_eq!(RemoteFailure::new(403, message).classify().kind, ErrorKind::QuotaExceeded);
	}

	#[test]
	fn oauth_style_and_plain_bodies_are_supported() {
		assert_eq!(
			error_message(r#"{"error":"invalid_token","error_description":"Token expired"}"#)
				.as_deref(),
			Some("invalid_token: Token expired")
		);
		assert_eq!(error_message("upstream timeout\n").as_deref(), Some("upstream timeout"));
		assert_eq!(error_message("  "), None);
	}

	#[test]
	fn client_requires_an_access_token() {
		let err = AuthenticatedClient::new(
			ReqwestHttpClient::default(),
			Url::parse("https://example.com/").expect("Base URL fixture should parse."),
			Credential::new("a", "b").with_refresh_token("r"),
			0,
		)
		.expect_err("A credential without access token cannot authorize requests.");

		assert!(err.is_authentication());
	}
}
