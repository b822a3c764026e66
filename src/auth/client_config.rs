//! Client configuration file (`installed`/`web` OAuth client JSON) and provider endpoints.
//!
//! The file is read-only input: the keeper parses it to drive interactive acquisition and
//! never writes it back. Endpoints default to Google's OAuth 2.0 service when the file omits
//! them.

// std
use std::{fs, path::Path, sync::LazyLock};
// crates.io
use url::Host;
// self
use crate::{_prelude::*, auth::Secret, error::ConfigError};

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";

// The defaults are constant HTTPS URLs; parsing them cannot fail.
static GOOGLE_ENDPOINTS: LazyLock<ProviderEndpoints> = LazyLock::new(|| {
	ProviderEndpoints::new(DEFAULT_AUTH_URI, DEFAULT_TOKEN_URI, Some(DEFAULT_REVOKE_URI))
		.expect("Built-in Google endpoints should be valid HTTPS URLs.")
});

/// Endpoint set used for authorization, token exchange, and revocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint the user is sent to for consent.
	pub authorization: Url,
	/// Token endpoint used for code exchanges and refreshes.
	pub token: Url,
	/// Optional revocation endpoint (RFC 7009).
	pub revocation: Option<Url>,
}
impl ProviderEndpoints {
	/// Parses and validates an endpoint set. Endpoints must use HTTPS unless they point at a
	/// loopback host.
	pub fn new(
		authorization: &str,
		token: &str,
		revocation: Option<&str>,
	) -> Result<Self, ConfigError> {
		Ok(Self {
			authorization: parse_endpoint("authorization", authorization)?,
			token: parse_endpoint("token", token)?,
			revocation: revocation.map(|url| parse_endpoint("revocation", url)).transpose()?,
		})
	}

	/// Google's OAuth 2.0 endpoints.
	pub fn google() -> Self {
		GOOGLE_ENDPOINTS.clone()
	}
}
impl Default for ProviderEndpoints {
	fn default() -> Self {
		Self::google()
	}
}

/// OAuth client registration loaded from the client configuration file.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: Secret,
	/// Registered redirect URIs; the first one is used for consent.
	pub redirect_uris: Vec<Url>,
	/// Endpoints declared by (or defaulted for) the client.
	pub endpoints: ProviderEndpoints,
}
impl ClientConfig {
	/// Reads and parses a client configuration file.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let raw = fs::read_to_string(path).map_err(|source| ConfigError::ClientConfigRead {
			path: path.display().to_string(),
			source,
		})?;

		Self::from_json(&raw)
	}

	/// Parses a client configuration document with either an `installed` or `web` section.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(json);
		let file: ClientConfigFile = serde_path_to_error::deserialize(de).map_err(|e| {
			ConfigError::ClientConfigParse {
				path: e.path().to_string(),
				message: e.inner().to_string(),
			}
		})?;
		let section =
			file.installed.or(file.web).ok_or(ConfigError::MissingClientSection)?;

		section.try_into()
	}

	/// Redirect URI used when starting a consent session.
	pub fn primary_redirect_uri(&self) -> Result<&Url, ConfigError> {
		self.redirect_uris.first().ok_or(ConfigError::MissingRedirectUri)
	}
}
impl Debug for ClientConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.field("redirect_uris", &self.redirect_uris)
			.field("endpoints", &self.endpoints)
			.finish()
	}
}

#[derive(Deserialize)]
struct ClientConfigFile {
	installed: Option<ClientSection>,
	web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
	client_id: String,
	client_secret: Secret,
	#[serde(default)]
	redirect_uris: Vec<String>,
	#[serde(default = "default_auth_uri")]
	auth_uri: String,
	#[serde(default = "default_token_uri")]
	token_uri: String,
	#[serde(default = "default_revoke_uri")]
	revoke_uri: Option<String>,
}
impl TryFrom<ClientSection> for ClientConfig {
	type Error = ConfigError;

	fn try_from(section: ClientSection) -> Result<Self, Self::Error> {
		let endpoints = ProviderEndpoints::new(
			&section.auth_uri,
			&section.token_uri,
			section.revoke_uri.as_deref(),
		)?;
		// Redirect URIs are not validated for HTTPS; loopback `http://localhost` is the norm for
		// installed applications.
		let redirect_uris = section
			.redirect_uris
			.iter()
			.map(|uri| {
				Url::parse(uri)
					.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "redirect", source })
			})
			.collect::<Result<Vec<_>, _>>()?;

		if redirect_uris.is_empty() {
			return Err(ConfigError::MissingRedirectUri);
		}

		Ok(Self {
			client_id: section.client_id,
			client_secret: section.client_secret,
			redirect_uris,
			endpoints,
		})
	}
}

fn default_auth_uri() -> String {
	DEFAULT_AUTH_URI.into()
}

fn default_token_uri() -> String {
	DEFAULT_TOKEN_URI.into()
}

fn default_revoke_uri() -> Option<String> {
	Some(DEFAULT_REVOKE_URI.into())
}

fn parse_endpoint(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	let url =
		Url::parse(raw).map_err(|source| ConfigError::InvalidEndpoint { endpoint: name, source })?;

	if url.scheme() == "https" || is_loopback(&url) {
		Ok(url)
	} else {
		Err(ConfigError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(Host::Ipv4(ip)) => ip.is_loopback(),
		Some(Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	}
}
