//! Credential pair model, lifecycle helpers, and its storage encoding.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::ConfigError,
	store::{Storage, StoreError},
};

/// Access/refresh token values as issued by login or refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
	/// Bearer token attached to API requests.
	pub access_token: TokenSecret,
	/// Long-lived token exchanged for a new pair.
	pub refresh_token: TokenSecret,
}
impl TokenPair {
	/// Creates a pair from raw token values.
	pub fn new(access_token: impl Into<TokenSecret>, refresh_token: impl Into<TokenSecret>) -> Self {
		Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
	}
}
impl Debug for TokenPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenPair")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.finish()
	}
}

/// Lifecycle status of a [`CredentialPair`] at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
	/// Access token is valid and outside the refresh margin.
	Active,
	/// Access token is still valid but within the refresh margin.
	Expiring,
	/// Access token expired; the refresh token is still usable.
	AccessExpired,
	/// Refresh token expired; the session cannot be renewed.
	RefreshExpired,
}

/// Token pair plus the derived expiry instants.
///
/// `access_expires_at <= refresh_expires_at` always holds for values produced by
/// [`CredentialPair::issue`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
	/// Token values.
	pub tokens: TokenPair,
	/// Instant after which the access token is rejected.
	pub access_expires_at: OffsetDateTime,
	/// Instant after which the refresh token is rejected.
	pub refresh_expires_at: OffsetDateTime,
}
impl CredentialPair {
	/// Derives expiry instants for freshly issued tokens.
	///
	/// The access expiry is clamped to the refresh expiry.
	pub fn issue(
		tokens: TokenPair,
		issued_at: OffsetDateTime,
		access_lifetime: Duration,
		refresh_lifetime: Duration,
	) -> Result<Self, ConfigError> {
		if !access_lifetime.is_positive() {
			return Err(ConfigError::NonPositiveExpiresIn);
		}

		let access_expires_at =
			issued_at.checked_add(access_lifetime).ok_or(ConfigError::ExpiresInOutOfRange)?;
		let refresh_expires_at =
			issued_at.checked_add(refresh_lifetime).ok_or(ConfigError::ExpiresInOutOfRange)?;

		Ok(Self {
			tokens,
			access_expires_at: access_expires_at.min(refresh_expires_at),
			refresh_expires_at,
		})
	}

	/// Access token value.
	pub fn access_token(&self) -> &TokenSecret {
		&self.tokens.access_token
	}

	/// Refresh token value.
	pub fn refresh_token(&self) -> &TokenSecret {
		&self.tokens.refresh_token
	}

	/// Computes the lifecycle status at `now` using the provided refresh margin.
	pub fn status_at(&self, now: OffsetDateTime, margin: Duration) -> CredentialStatus {
		if now >= self.refresh_expires_at {
			return CredentialStatus::RefreshExpired;
		}
		if now >= self.access_expires_at {
			return CredentialStatus::AccessExpired;
		}
		if self.access_expires_at - now <= margin {
			return CredentialStatus::Expiring;
		}

		CredentialStatus::Active
	}

	/// Returns `true` when the access token has expired at `now`.
	pub fn is_access_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.access_expires_at
	}

	/// Returns `true` when the refresh token has expired at `now`.
	pub fn is_refresh_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.refresh_expires_at
	}

	/// Instant at which a proactive refresh should run.
	pub fn refresh_due_at(&self, margin: Duration) -> OffsetDateTime {
		self.access_expires_at - margin
	}
}
impl Debug for CredentialPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialPair")
			.field("tokens", &self.tokens)
			.field("access_expires_at", &self.access_expires_at)
			.field("refresh_expires_at", &self.refresh_expires_at)
			.finish()
	}
}

/// Storage keys holding the individual credential fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialKeys {
	access_token: String,
	refresh_token: String,
	access_expires_at: String,
	refresh_expires_at: String,
}
impl CredentialKeys {
	/// Builds the key set, prefixing each field name with `prefix`.
	pub fn with_prefix(prefix: &str) -> Self {
		Self {
			access_token: format!("{prefix}access_token"),
			refresh_token: format!("{prefix}refresh_token"),
			access_expires_at: format!("{prefix}access_expires_at"),
			refresh_expires_at: format!("{prefix}refresh_expires_at"),
		}
	}

	/// Every key in write order.
	pub fn all(&self) -> [&str; 4] {
		[
			self.access_token.as_str(),
			self.refresh_token.as_str(),
			self.access_expires_at.as_str(),
			self.refresh_expires_at.as_str(),
		]
	}

	/// Writes every field of `pair`.
	pub async fn save(&self, storage: &dyn Storage, pair: &CredentialPair) -> Result<(), StoreError> {
		storage.set_item(&self.access_token, pair.access_token().expose().to_owned()).await?;
		storage.set_item(&self.refresh_token, pair.refresh_token().expose().to_owned()).await?;
		storage.set_item(&self.access_expires_at, encode_instant(pair.access_expires_at)).await?;
		storage.set_item(&self.refresh_expires_at, encode_instant(pair.refresh_expires_at)).await
	}

	/// Reads and reconstructs a pair.
	///
	/// Returns `Ok(None)` when no token is stored or when the record is incomplete.
	pub async fn load(&self, storage: &dyn Storage) -> Result<Option<CredentialPair>, StoreError> {
		let access = storage.get_item(&self.access_token).await?;
		let refresh = storage.get_item(&self.refresh_token).await?;
		let access_expires_at = storage.get_item(&self.access_expires_at).await?;
		let refresh_expires_at = storage.get_item(&self.refresh_expires_at).await?;

		match (access, refresh, access_expires_at, refresh_expires_at) {
			(None, None, None, None) => Ok(None),
			(Some(access), Some(refresh), Some(access_at), Some(refresh_at)) => Ok(Some(CredentialPair {
				tokens: TokenPair::new(access, refresh),
				access_expires_at: decode_instant(&access_at)?,
				refresh_expires_at: decode_instant(&refresh_at)?,
			})),
			_ => {
				tracing::warn!("Ignoring incomplete credential record in storage.");

				Ok(None)
			},
		}
	}

	/// Removes every credential field.
	pub async fn clear(&self, storage: &dyn Storage) -> Result<(), StoreError> {
		for key in self.all() {
			storage.remove_item(key).await?;
		}

		Ok(())
	}
}
impl Default for CredentialKeys {
	fn default() -> Self {
		Self::with_prefix("")
	}
}

fn encode_instant(instant: OffsetDateTime) -> String {
	instant.unix_timestamp_nanos().to_string()
}

fn decode_instant(raw: &str) -> Result<OffsetDateTime, StoreError> {
	raw.parse::<i128>()
		.ok()
		.and_then(|nanos| OffsetDateTime::from_unix_timestamp_nanos(nanos).ok())
		.ok_or_else(|| StoreError::Serialization {
			message: format!("Invalid stored expiry instant `{raw}`"),
		})
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::store::MemoryStorage;

	fn issued() -> CredentialPair {
		CredentialPair::issue(
			TokenPair::new("access", "refresh"),
			macros::datetime!(2025-01-01 00:00 UTC),
			Duration::minutes(15),
			Duration::days(7),
		)
		.expect("Credential fixture should be valid.")
	}

	#[test]
	fn status_transitions_cover_all_states() {
		let pair = issued();
		let margin = Duration::minutes(5);

		assert_eq!(
			pair.status_at(macros::datetime!(2025-01-01 00:05 UTC), margin),
			CredentialStatus::Active
		);
		assert_eq!(
			pair.status_at(macros::datetime!(2025-01-01 00:11 UTC), margin),
			CredentialStatus::Expiring
		);
		assert_eq!(
			pair.status_at(macros::datetime!(2025-01-01 00:15 UTC), margin),
			CredentialStatus::AccessExpired
		);
		assert_eq!(
			pair.status_at(macros::datetime!(2025-01-08 00:00 UTC), margin),
			CredentialStatus::RefreshExpired
		);
	}

	#[test]
	fn access_expiry_never_exceeds_refresh_expiry() {
		let pair = CredentialPair::issue(
			TokenPair::new("a", "r"),
			macros::datetime!(2025-01-01 00:00 UTC),
			Duration::days(30),
			Duration::days(7),
		)
		.expect("Long-lived access tokens should be clamped, not rejected.");

		assert_eq!(pair.access_expires_at, pair.refresh_expires_at);
	}

	#[test]
	fn non_positive_lifetimes_are_rejected() {
		let err = CredentialPair::issue(
			TokenPair::new("a", "r"),
			macros::datetime!(2025-01-01 00:00 UTC),
			Duration::ZERO,
			Duration::days(7),
		)
		.expect_err("Zero lifetimes should be rejected.");

		assert!(matches!(err, ConfigError::NonPositiveExpiresIn));
	}

	#[tokio::test]
	async fn storage_round_trip_preserves_pair() {
		let storage = MemoryStorage::default();
		let keys = CredentialKeys::with_prefix("bookmarks.");
		let pair = issued();

		keys.save(&storage, &pair).await.expect("Saving credentials should succeed.");

		assert_eq!(storage.keys().len(), 4);

		let loaded = keys
			.load(&storage)
			.await
			.expect("Loading credentials should succeed.")
			.expect("Credentials should be present after saving.");

		assert_eq!(loaded, pair);

		keys.clear(&storage).await.expect("Clearing credentials should succeed.");

		assert!(storage.is_empty());
	}

	#[tokio::test]
	async fn incomplete_records_read_as_absent() {
		let storage = MemoryStorage::default();
		let keys = CredentialKeys::default();

		storage.set_item("access_token", "orphan".into()).await.expect("Set should succeed.");

		assert!(keys.load(&storage).await.expect("Load should succeed.").is_none());
	}

	#[tokio::test]
	async fn corrupt_expiry_is_a_serialization_error() {
		let storage = MemoryStorage::default();
		let keys = CredentialKeys::default();

		keys.save(&storage, &issued()).await.expect("Saving credentials should succeed.");
		storage.set_item("access_expires_at", "soon".into()).await.expect("Set should succeed.");

		let err = keys.load(&storage).await.expect_err("Corrupt expiries should be rejected.");

		assert!(matches!(err, StoreError::Serialization { .. }));
	}
}
