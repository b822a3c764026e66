//! Token endpoint seam: refresh exchanges, authorization-code exchanges, and revocation.
//!
//! [`OAuth2TokenEndpoint`] is the production implementation built on the `oauth2` crate. Tests
//! and embedders can substitute any [`TokenEndpoint`].

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError,
	TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{ClientConfig, Credential, ProviderEndpoints, Secret},
	error::{ConfigError, TransientError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Boxed future returned by [`TokenEndpoint`] operations.
pub type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// OAuth error codes meaning the grant can no longer be used without user interaction.
const REJECTED_GRANT_CODES: [&str; 4] =
	["invalid_grant", "invalid_client", "unauthorized_client", "access_denied"];

/// Tokens issued by a refresh or authorization-code exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
	/// Newly issued access token.
	pub access_token: Secret,
	/// Rotated refresh token, if the provider issued one.
	pub refresh_token: Option<Secret>,
	/// Lifetime of the access token, when the provider reported it.
	pub expires_in: Option<Duration>,
}

/// Remote operations the credential manager needs from the authorization server.
pub trait TokenEndpoint
where
	Self: Send + Sync,
{
	/// Trades the credential's refresh token for a new access token.
	///
	/// A rejected grant yields [`Error::TokenExpired`]; temporary failures yield
	/// [`Error::Transient`] or [`Error::Transport`].
	fn refresh<'a>(&'a self, credential: &'a Credential) -> EndpointFuture<'a, TokenGrant>;

	/// Exchanges an authorization code (with its PKCE verifier) for tokens.
	fn exchange_code<'a>(
		&'a self,
		config: &'a ClientConfig,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a Url,
	) -> EndpointFuture<'a, TokenGrant>;

	/// Revokes a token with the authorization server (RFC 7009).
	fn revoke<'a>(&'a self, token: &'a Secret) -> EndpointFuture<'a, ()>;
}

/// [`TokenEndpoint`] backed by the `oauth2` crate and reqwest.
#[derive(Clone, Debug)]
pub struct OAuth2TokenEndpoint {
	endpoints: ProviderEndpoints,
	http_client: ReqwestHttpClient,
}
impl OAuth2TokenEndpoint {
	/// Creates an endpoint talking to `endpoints` with a default reqwest client.
	pub fn new(endpoints: ProviderEndpoints) -> Self {
		Self { endpoints, http_client: ReqwestHttpClient::default() }
	}

	/// Creates an endpoint from the endpoints declared in a client configuration.
	pub fn for_client(config: &ClientConfig) -> Self {
		Self::new(config.endpoints.clone())
	}

	/// Replaces the HTTP client used for every request.
	pub fn with_http_client(mut self, http_client: ReqwestHttpClient) -> Self {
		self.http_client = http_client;

		self
	}

	/// Endpoints this instance talks to.
	pub fn endpoints(&self) -> &ProviderEndpoints {
		&self.endpoints
	}

	fn oauth_client(
		&self,
		client_id: &str,
		client_secret: &Secret,
	) -> Result<ConfiguredBasicClient> {
		let auth_url = AuthUrl::new(self.endpoints.authorization.to_string()).map_err(|source| {
			ConfigError::InvalidEndpoint { endpoint: "authorization", source }
		})?;
		let token_url = TokenUrl::new(self.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "token", source })?;

		Ok(BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_client_secret(ClientSecret::new(client_secret.expose().to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url))
	}
}
impl TokenEndpoint for OAuth2TokenEndpoint {
	fn refresh<'a>(&'a self, credential: &'a Credential) -> EndpointFuture<'a, TokenGrant> {
		Box::pin(async move {
			let refresh_token = credential
				.refresh_token
				.as_ref()
				.filter(|token| !token.is_empty())
				.ok_or_else(|| Error::TokenExpired {
					reason: "the credential carries no refresh token".into(),
				})?;
			let client = self.oauth_client(&credential.client_id, &credential.client_secret)?;
			let meta = ResponseMetadataSlot::default();
			let instrumented = self.http_client.instrumented(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.expose().to_owned());
			let response = client
				.exchange_refresh_token(&refresh_secret)
				.request_async(&instrumented)
				.await
				.map_err(|e| map_request_error(meta.take(), e))?;

			map_token_response(response)
		})
	}

	fn exchange_code<'a>(
		&'a self,
		config: &'a ClientConfig,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a Url,
	) -> EndpointFuture<'a, TokenGrant> {
		Box::pin(async move {
			let client = self.oauth_client(&config.client_id, &config.client_secret)?;
			let redirect_url = RedirectUrl::new(redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "redirect", source })?;
			let meta = ResponseMetadataSlot::default();
			let instrumented = self.http_client.instrumented(meta.clone());
			let response = client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url))
				.request_async(&instrumented)
				.await
				.map_err(|e| map_request_error(meta.take(), e))?;

			map_token_response(response)
		})
	}

	fn revoke<'a>(&'a self, token: &'a Secret) -> EndpointFuture<'a, ()> {
		Box::pin(async move {
			let Some(revocation) = &self.endpoints.revocation else {
				tracing::debug!("No revocation endpoint configured; skipping remote revocation.");

				return Ok(());
			};
			let response = self
				.http_client
				.post(revocation.clone())
				.form(&[("token", token.expose())])
				.send()
				.await
				.map_err(map_reqwest_error)?;
			let status = response.status();

			if status.is_success() {
				return Ok(());
			}

			let retry_after = crate::http::parse_retry_after(response.headers());
			let body = response.text().await.unwrap_or_default();

			Err(TransientError::TokenEndpoint {
				message: format!("revocation rejected with HTTP {status}: {}", body.trim()),
				status: Some(status.as_u16()),
				retry_after,
			}
			.into())
		})
	}
}

fn map_token_response(response: BasicTokenResponse) -> Result<TokenGrant> {
	let expires_in = response
		.expires_in()
		.map(|lifetime| {
			let secs = i64::try_from(lifetime.as_secs())
				.map_err(|_| ConfigError::ExpiresInOutOfRange)?;

			if secs <= 0 {
				return Err(ConfigError::NonPositiveExpiresIn);
			}

			Ok(Duration::seconds(secs))
		})
		.transpose()?;

	Ok(TokenGrant {
		access_token: Secret::new(response.access_token().secret().to_owned()),
		refresh_token: response.refresh_token().map(|token| Secret::new(token.secret().to_owned())),
		expires_in,
	})
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> Error {
	let meta = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response_error(response, meta),
		RequestTokenError::Request(error) => map_transport_error(meta, error),
		RequestTokenError::Parse(source, _body) =>
			TransientError::TokenResponseParse { source, status: meta_status(meta) }.into(),
		RequestTokenError::Other(message) => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn map_server_response_error(
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let code = response.error().as_ref();
	let message = match response.error_description() {
		Some(description) => format!("{code}: {description}"),
		None => code.to_owned(),
	};

	if REJECTED_GRANT_CODES.contains(&code) {
		return Error::TokenExpired {
			reason: format!("token endpoint rejected the grant ({message})"),
		};
	}

	TransientError::TokenEndpoint {
		message,
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn map_transport_error(
	meta: Option<&ResponseMetadata>,
	err: HttpClientError<ReqwestError>,
) -> Error {
	match err {
		HttpClientError::Reqwest(inner) => {
			let inner = *inner;

			if inner.is_timeout() {
				return TransientError::TokenEndpoint {
					message: "request timed out".into(),
					status: meta_status(meta),
					retry_after: meta_retry_after(meta),
				}
				.into();
			}

			map_reqwest_error(inner)
		},
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
		_ => TransientError::TokenEndpoint {
			message: "HTTP client error".into(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn map_reqwest_error(err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}

	TransportError::from(err).into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
