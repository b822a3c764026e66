//! File-backed [`CredentialStore`] writing an owner-only JSON record.

// std
use std::{
	fs::{self, File, OpenOptions},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
};
#[cfg(unix)] use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{AuthorizedUserRecord, CredentialStore, StoreError, StoreFuture},
};

#[cfg(unix)]
const OWNER_ONLY: u32 = 0o600;

/// Persists the credential record to a JSON file, replacing it atomically on every save.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
}
impl FileStore {
	/// Creates a store for the provided path. Nothing is read or written until first use.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Location of the credential record.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_now(&self) -> Result<Option<Credential>, StoreError> {
		let bytes = match fs::read(&self.path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => {
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", self.path.display()),
				});
			},
		};

		if bytes.iter().all(u8::is_ascii_whitespace) {
			return Ok(None);
		}

		AuthorizedUserRecord::decode(&bytes).map(Some)
	}

	fn save_now(&self, credential: &Credential) -> Result<(), StoreError> {
		self.ensure_parent_exists()?;

		let serialized = AuthorizedUserRecord::encode(credential)?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = open_owner_only(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})?;

		restrict_permissions(&self.path)
	}

	fn delete_now(&self) -> Result<(), StoreError> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Backend {
				message: format!("Failed to delete {}: {e}", self.path.display()),
			}),
		}
	}

	fn ensure_parent_exists(&self) -> Result<(), StoreError> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}
}
impl CredentialStore for FileStore {
	fn load(&self) -> StoreFuture<'_, Option<Credential>> {
		Box::pin(async move { self.load_now() })
	}

	fn save<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.save_now(credential) })
	}

	fn delete(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.delete_now() })
	}
}

fn open_owner_only(path: &Path) -> std::io::Result<File> {
	let mut options = OpenOptions::new();

	options.write(true).create(true).truncate(true);

	#[cfg(unix)]
	options.mode(OWNER_ONLY);

	options.open(path)
}

// `mode` only applies on creation, so an existing file keeps its old bits without this.
fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
	#[cfg(unix)]
	{
		fs::set_permissions(path, fs::Permissions::from_mode(OWNER_ONLY)).map_err(|e| {
			StoreError::Backend {
				message: format!("Failed to restrict permissions on {}: {e}", path.display()),
			}
		})?;
	}
	#[cfg(not(unix))]
	{
		let _ = path;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;

	fn temp_path(tag: &str) -> PathBuf {
		let unique = format!(
			"oauth2_keeper_file_store_{tag}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn fixture() -> Credential {
		Credential::new("client-demo", "secret-demo")
			.with_refresh_token("refresh-demo")
			.with_access_token("access-demo")
			.with_expires_at(OffsetDateTime::now_utc() + Duration::hours(1))
	}

	#[tokio::test]
	async fn save_and_load_round_trip() {
		let path = temp_path("round_trip");
		let store = FileStore::new(&path);
		let credential = fixture();

		store.save(&credential).await.expect("Failed to save fixture credential.");

		let loaded = FileStore::new(&path)
			.load()
			.await
			.expect("Failed to load fixture credential.")
			.expect("File store lost the credential.");

		assert_eq!(loaded, credential);

		store.delete().await.expect("Failed to delete fixture credential.");
	}

	#[tokio::test]
	async fn missing_or_empty_file_loads_as_absent() {
		let path = temp_path("absent");
		let store = FileStore::new(&path);

		assert_eq!(store.load().await.expect("Missing file should not error."), None);

		fs::write(&path, b"").expect("Failed to create empty record.");

		assert_eq!(store.load().await.expect("Empty file should not error."), None);

		store.delete().await.expect("Failed to delete empty record.");
	}

	#[tokio::test]
	async fn unparsable_file_is_corrupt() {
		let path = temp_path("corrupt");
		let store = FileStore::new(&path);

		fs::write(&path, b"{\"type\":").expect("Failed to write corrupt record.");

		let err = store.load().await.expect_err("Corrupt record should fail to load.");

		assert!(matches!(err, StoreError::CorruptRecord { .. }));

		store.delete().await.expect("Failed to delete corrupt record.");
	}

	#[tokio::test]
	async fn delete_is_idempotent() {
		let store = FileStore::new(temp_path("delete"));

		store.save(&fixture()).await.expect("Failed to save fixture credential.");
		store.delete().await.expect("First delete should succeed.");
		store.delete().await.expect("Second delete should succeed.");

		assert!(!store.path().exists());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn every_save_restricts_permissions() {
		let path = temp_path("permissions");
		let store = FileStore::new(&path);

		fs::write(&path, b"").expect("Failed to pre-create record.");
		fs::set_permissions(&path, fs::Permissions::from_mode(0o644))
			.expect("Failed to loosen permissions.");
		store.save(&fixture()).await.expect("Failed to save fixture credential.");

		let mode = fs::metadata(&path).expect("Record metadata should exist.").permissions().mode();

		assert_eq!(mode & 0o777, OWNER_ONLY);

		store.delete().await.expect("Failed to delete fixture credential.");
	}
}
