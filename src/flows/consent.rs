//! Interactive acquisition via the authorization-code grant with PKCE.
//!
//! The browser part of consent (opening the authorize URL and catching the redirect) lives
//! outside this crate. [`CallbackConsentFlow`] hands the authorize URL to a caller-supplied
//! async callback and expects the final redirect URL back.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ClientConfig, Credential, ScopeSet},
	oauth::TokenEndpoint,
};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Boxed future returned by [`ConsentFlow::acquire`].
pub type ConsentFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

/// Boxed future returned by an [`AuthorizationCallback`].
pub type RedirectFuture = Pin<Box<dyn Future<Output = Result<Url>> + Send>>;

/// Receives the authorize URL and resolves to the redirect URL the provider sent the user to.
pub type AuthorizationCallback = Arc<dyn Fn(Url) -> RedirectFuture + Send + Sync>;

/// External collaborator that obtains a fresh credential through user consent.
pub trait ConsentFlow
where
	Self: Send + Sync,
{
	/// Blocks until consent completes. Cancellation or denial yields
	/// [`Error::Authentication`].
	fn acquire<'a>(&'a self, config: &'a ClientConfig) -> ConsentFuture<'a>;
}

/// Supported PKCE challenge methods surfaced via [`AuthorizationSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// One authorization attempt: state, PKCE pair, and the authorize URL built from them.
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Opaque state value that must round-trip via the redirect.
	pub state: String,
	/// Redirect URI registered for the client.
	pub redirect_uri: Url,
	/// Authorize URL the user must visit.
	pub authorize_url: Url,
	pkce: PkcePair,
}
impl AuthorizationSession {
	/// Starts a session for `config`, requesting offline access to `scopes`.
	pub fn new(config: &ClientConfig, scopes: &ScopeSet, redirect_uri: Url) -> Self {
		let state = random_string(STATE_LEN);
		let pkce = PkcePair::generate();
		let authorize_url = build_authorize_url(config, &redirect_uri, scopes, &state, &pkce);

		Self { state, redirect_uri, authorize_url, pkce }
	}

	/// PKCE code challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// PKCE challenge method (currently always `S256`).
	pub fn code_challenge_method(&self) -> PkceCodeChallengeMethod {
		self.pkce.method
	}

	/// PKCE verifier to send with the code exchange.
	pub fn pkce_verifier(&self) -> &str {
		&self.pkce.verifier
	}

	/// Validates the `state` returned with the authorization redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		if returned_state == self.state {
			Ok(())
		} else {
			Err(Error::Authentication { reason: "authorization state mismatch".into() })
		}
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("redirect_uri", &self.redirect_uri)
			.field("authorize_url", &self.authorize_url)
			.field("code_challenge_method", &self.pkce.method)
			.finish()
	}
}

/// Parameters carried back by the authorization redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
	/// Authorization code to exchange.
	pub code: String,
	/// Returned state value.
	pub state: String,
}
impl AuthorizationResponse {
	/// Parses `code`/`state` from a redirect URL. An `error` parameter (user cancelled or
	/// denied consent) becomes [`Error::Authentication`].
	pub fn from_redirect(redirect: &Url) -> Result<Self> {
		let mut code = None;
		let mut state = None;
		let mut error = None;
		let mut description = None;

		for (key, value) in redirect.query_pairs() {
			match key.as_ref() {
				"code" => code = Some(value.into_owned()),
				"state" => state = Some(value.into_owned()),
				"error" => error = Some(value.into_owned()),
				"error_description" => description = Some(value.into_owned()),
				_ => {},
			}
		}

		if let Some(error) = error {
			let reason = match description {
				Some(description) =>
					format!("authorization was not granted ({error}: {description})"),
				None => format!("authorization was not granted ({error})"),
			};

			return Err(Error::Authentication { reason });
		}

		let code = code.filter(|code| !code.is_empty()).ok_or_else(|| Error::Authentication {
			reason: "authorization redirect carries no code".into(),
		})?;
		let state = state.ok_or_else(|| Error::Authentication {
			reason: "authorization redirect carries no state".into(),
		})?;

		Ok(Self { code, state })
	}
}
impl Debug for AuthorizationResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationResponse")
			.field("code", &"<redacted>")
			.field("state", &self.state)
			.finish()
	}
}

/// [`ConsentFlow`] driven by a caller-supplied redirect callback.
pub struct CallbackConsentFlow {
	endpoint: Arc<dyn TokenEndpoint>,
	scopes: ScopeSet,
	callback: AuthorizationCallback,
}
impl CallbackConsentFlow {
	/// Creates a flow that exchanges codes through `endpoint` and asks for `scopes`.
	pub fn new<F, Fut>(endpoint: Arc<dyn TokenEndpoint>, scopes: ScopeSet, callback: F) -> Self
	where
		F: 'static + Fn(Url) -> Fut + Send + Sync,
		Fut: 'static + Future<Output = Result<Url>> + Send,
	{
		let callback: AuthorizationCallback =
			Arc::new(move |url| -> RedirectFuture { Box::pin(callback(url)) });

		Self { endpoint, scopes, callback }
	}

	/// Scopes requested on every authorization.
	pub fn scopes(&self) -> &ScopeSet {
		&self.scopes
	}
}
impl ConsentFlow for CallbackConsentFlow {
	fn acquire<'a>(&'a self, config: &'a ClientConfig) -> ConsentFuture<'a> {
		Box::pin(async move {
			let redirect_uri = config.primary_redirect_uri()?.clone();
			let session = AuthorizationSession::new(config, &self.scopes, redirect_uri);

			tracing::debug!(scopes = %self.scopes, "Waiting for the authorization redirect.");

			let redirect = (self.callback)(session.authorize_url.clone()).await?;
			let response = AuthorizationResponse::from_redirect(&redirect)?;

			session.validate_state(&response.state)?;

			let verifier = session.pkce_verifier();
			let grant = self
				.endpoint
				.exchange_code(config, &response.code, verifier, &session.redirect_uri)
				.await?;

			Ok(Credential::from_grant(config, grant, OffsetDateTime::now_utc()))
		})
	}
}
impl Debug for CallbackConsentFlow {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CallbackConsentFlow").field("scopes", &self.scopes).finish()
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}

fn build_authorize_url(
	config: &ClientConfig,
	redirect_uri: &Url,
	scopes: &ScopeSet,
	state: &str,
	pkce: &PkcePair,
) -> Url {
	let mut url = config.endpoints.authorization.clone();

	url.query_pairs_mut()
		.append_pair("response_type", "code")
		.append_pair("client_id", &config.client_id)
		.append_pair("redirect_uri", redirect_uri.as_str())
		.append_pair("scope", &scopes.normalized())
		.append_pair("state", state)
		.append_pair("code_challenge", &pkce.challenge)
		.append_pair("code_challenge_method", pkce.method.as_str())
		.append_pair("access_type", "offline")
		.append_pair("prompt", "consent");

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
