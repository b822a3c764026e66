//! In-memory [`CredentialStore`] for tests and embedding.
//!
//! Records are kept in their serialized form so the memory store exercises the same encoding
//! and corruption rules as the file store.

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{AuthorizedUserRecord, CredentialStore, StoreError, StoreFuture},
};

/// Thread-safe storage backend that keeps the serialized record in-process.
#[derive(Debug, Default)]
pub struct MemoryStore {
	record: RwLock<Option<Vec<u8>>>,
	saves: AtomicUsize,
}
impl MemoryStore {
	/// Creates a store pre-populated with `credential`.
	pub fn with_credential(credential: &Credential) -> Result<Self, StoreError> {
		let store = Self::default();

		*store.record.write() = Some(AuthorizedUserRecord::encode(credential)?);

		Ok(store)
	}

	/// Replaces the stored bytes verbatim (useful to seed hand-written or corrupt records).
	pub fn put_raw(&self, bytes: impl Into<Vec<u8>>) {
		*self.record.write() = Some(bytes.into());
	}

	/// Returns the decoded credential currently stored, if any.
	pub fn snapshot(&self) -> Option<Credential> {
		self.record.read().as_deref().and_then(|bytes| AuthorizedUserRecord::decode(bytes).ok())
	}

	/// Returns `true` when a record is present.
	pub fn contains_record(&self) -> bool {
		self.record.read().is_some()
	}

	/// Number of successful [`CredentialStore::save`] calls.
	pub fn save_count(&self) -> usize {
		self.saves.load(Ordering::SeqCst)
	}
}
impl CredentialStore for MemoryStore {
	fn load(&self) -> StoreFuture<'_, Option<Credential>> {
		Box::pin(async move {
			match self.record.read().as_deref() {
				Some(bytes) => AuthorizedUserRecord::decode(bytes).map(Some),
				None => Ok(None),
			}
		})
	}

	fn save<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let bytes = AuthorizedUserRecord::encode(credential)?;

			*self.record.write() = Some(bytes);
			self.saves.fetch_add(1, Ordering::SeqCst);

			Ok(())
		})
	}

	fn delete(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.record.write().take();

			Ok(())
		})
	}
}
