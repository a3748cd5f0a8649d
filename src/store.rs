//! Durable key/value storage contract plus built-in backends.
//!
//! The session core treats [`Storage`] as the source of truth for credential fields.
//! Platform adapters (keychains, secure preferences, browser storage) implement the
//! trait; [`MemoryStorage`] and [`FileStorage`] cover tests and desktop tooling.

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

// self
use crate::_prelude::*;

/// Boxed future returned by every [`Storage`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// String key/value storage backend.
///
/// Implementations must tolerate repeated calls with the same arguments; removing a
/// missing key is not an error.
pub trait Storage
where
	Self: Send + Sync,
{
	/// Reads the value stored under `key`, if any.
	fn get_item<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Stores `value` under `key`, replacing any previous value.
	fn set_item<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

	/// Removes `key` if present.
	fn remove_item<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`Storage`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Stored data could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
