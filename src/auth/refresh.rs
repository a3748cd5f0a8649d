//! Refresh collaborator contract and the strict refresh-response shape.
//!
//! The network collaborator returns [`RefreshOutcome::Issued`] with a validated
//! [`TokenGrant`], [`RefreshOutcome::Rejected`] when the refresh token is invalid or
//! expired, or an [`Error`] for transient failures (network, timeouts, server faults).
//! Response bodies are parsed once, at the boundary, into a flat grant; alternative
//! envelopes are rejected instead of guessed at.

// self
use crate::{
	_prelude::*,
	auth::{TokenPair, TokenSecret},
	error::TransientError,
	store::StoreError,
};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<RefreshOutcome>> + 'a + Send>>;

/// Network collaborator that exchanges a refresh token for a new pair.
pub trait TokenRefresher
where
	Self: Send + Sync,
{
	/// Exchanges `refresh_token` for a new grant.
	///
	/// `Err` values are treated as transient; definitive rejections must be reported
	/// through [`RefreshOutcome::Rejected`].
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a>;
}

/// Result of a completed refresh exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// The endpoint issued a new grant.
	Issued(TokenGrant),
	/// The endpoint rejected the refresh token.
	Rejected {
		/// Endpoint- or adapter-supplied reason.
		reason: String,
	},
}

/// Validated refresh response.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenGrant {
	/// Newly issued access token.
	#[serde(alias = "accessToken")]
	pub access_token: TokenSecret,
	/// Newly issued (possibly rotated) refresh token.
	#[serde(alias = "refreshToken")]
	pub refresh_token: TokenSecret,
	/// Access-token lifetime in seconds, when reported.
	#[serde(default, alias = "expiresIn")]
	pub expires_in: Option<i64>,
	/// Token type reported by the endpoint, when present.
	#[serde(default, alias = "tokenType")]
	pub token_type: Option<String>,
}
impl TokenGrant {
	/// Creates a grant from raw values.
	pub fn new(
		access_token: impl Into<TokenSecret>,
		refresh_token: impl Into<TokenSecret>,
		expires_in: Option<i64>,
	) -> Self {
		Self {
			access_token: access_token.into(),
			refresh_token: refresh_token.into(),
			expires_in,
			token_type: None,
		}
	}

	/// Parses and validates a refresh response body.
	pub fn from_json_slice(body: &[u8], status: Option<u16>) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_slice(body);
		let grant: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| TransientError::RefreshResponseParse { source, status })?;

		if grant.access_token.is_empty() || grant.refresh_token.is_empty() {
			return Err(TransientError::Upstream {
				message: "Refresh endpoint returned an empty token".into(),
				status,
				retry_after: None,
			}
			.into());
		}

		Ok(grant)
	}

	/// Splits the grant into the token pair and the reported lifetime.
	pub fn into_parts(self) -> (TokenPair, Option<i64>) {
		(
			TokenPair { access_token: self.access_token, refresh_token: self.refresh_token },
			self.expires_in,
		)
	}
}
impl Debug for TokenGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenGrant")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("expires_in", &self.expires_in)
			.field("token_type", &self.token_type)
			.finish()
	}
}

/// Failure of a coordinated refresh, shared by every caller that joined it.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// No credentials were stored when the refresh started.
	#[error("No stored credentials are available to refresh.")]
	NoCredential,
	/// The refresh token expired locally; the session was cleared.
	#[error("Refresh token has expired.")]
	RefreshExpired,
	/// The endpoint rejected the refresh token; the session was cleared.
	#[error("Refresh token was rejected: {reason}.")]
	Rejected {
		/// Endpoint- or adapter-supplied reason.
		reason: String,
	},
	/// Network-level failure; stored credentials were kept.
	#[error("Refresh failed transiently: {message}.")]
	Transient {
		/// Rendered transport or upstream error.
		message: String,
	},
	/// Reading or writing credentials failed.
	#[error("{0}")]
	Storage(#[from] StoreError),
	/// The endpoint issued a grant that could not be stored.
	#[error("Refresh endpoint issued an unusable grant: {message}.")]
	InvalidGrant {
		/// Validation failure.
		message: String,
	},
}
impl RefreshError {
	/// Returns `true` when the session is gone and the user must log in again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::NoCredential | Self::RefreshExpired | Self::Rejected { .. })
	}
}
