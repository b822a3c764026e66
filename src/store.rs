//! Storage contract for the single persisted credential and its on-disk record format.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{Credential, Secret},
};

const RECORD_TYPE: &str = "authorized_user";

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable persistence of exactly one credential record.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Reads the persisted credential; `Ok(None)` when no record exists.
	///
	/// A record that exists but cannot be parsed yields [`StoreError::CorruptRecord`].
	fn load(&self) -> StoreFuture<'_, Option<Credential>>;

	/// Serializes the full record, replacing any previous one.
	fn save<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, ()>;

	/// Removes the record. Absence is not an error.
	fn delete(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// A record exists but is not a valid `authorized_user` document.
	#[error("Persisted credential record is corrupt: {message}.")]
	CorruptRecord {
		/// Human-readable error payload.
		message: String,
	},
	/// The credential could not be serialized.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure (filesystem, permissions).
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// On-disk form of a [`Credential`]:
/// `{"type":"authorized_user","client_id",…,"expiry_date"?}` with `expiry_date` in epoch
/// milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedUserRecord {
	/// Fixed discriminator, always `authorized_user`.
	#[serde(rename = "type")]
	pub kind: String,
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: Secret,
	/// Refresh token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<Secret>,
	/// Access token, if one has been issued.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_token: Option<Secret>,
	/// Access-token expiry in milliseconds since the Unix epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expiry_date: Option<i64>,
}
impl AuthorizedUserRecord {
	/// Parses a serialized record into a credential.
	pub fn decode(bytes: &[u8]) -> Result<Credential, StoreError> {
		let record: Self = serde_json::from_slice(bytes)
			.map_err(|e| StoreError::CorruptRecord { message: e.to_string() })?;

		record.try_into()
	}

	/// Serializes a credential into the pretty-printed record format.
	pub fn encode(credential: &Credential) -> Result<Vec<u8>, StoreError> {
		serde_json::to_vec_pretty(&Self::from(credential))
			.map_err(|e| StoreError::Serialization { message: e.to_string() })
	}
}
impl From<&Credential> for AuthorizedUserRecord {
	fn from(credential: &Credential) -> Self {
		Self {
			kind: RECORD_TYPE.into(),
			client_id: credential.client_id.clone(),
			client_secret: credential.client_secret.clone(),
			refresh_token: credential.refresh_token.clone(),
			access_token: credential.access_token.clone(),
			expiry_date: credential
				.expires_at
				.map(|instant| (instant.unix_timestamp_nanos() / 1_000_000) as i64),
		}
	}
}
impl TryFrom<AuthorizedUserRecord> for Credential {
	type Error = StoreError;

	fn try_from(record: AuthorizedUserRecord) -> Result<Self, Self::Error> {
		if record.kind != RECORD_TYPE {
			return Err(StoreError::CorruptRecord {
				message: format!("unexpected record type `{}`", record.kind),
			});
		}

		let expires_at = record
			.expiry_date
			.map(|millis| {
				OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).map_err(
					|e| StoreError::CorruptRecord { message: format!("invalid expiry_date: {e}") },
				)
			})
			.transpose()?;

		Ok(Credential {
			client_id: record.client_id,
			client_secret: record.client_secret,
			refresh_token: record.refresh_token,
			access_token: record.access_token,
			expires_at,
		})
	}
}
