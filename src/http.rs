//! HTTP adapter for the refresh endpoint.
//!
//! [`ReqwestRefresher`] implements [`TokenRefresher`] on top of reqwest. Responses are
//! classified once, at the boundary: success bodies must match the flat [`TokenGrant`]
//! shape, `400`/`401`/`403` become [`RefreshOutcome::Rejected`], throttling and server
//! faults become transient errors carrying any `Retry-After` hint, and connection
//! failures surface as [`TransportError`](crate::error::TransportError).

// crates.io
#[cfg(feature = "reqwest")] use reqwest::{
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	auth::{RefreshOutcome, TokenGrant},
};
#[cfg(feature = "reqwest")]
use crate::{
	auth::{RefreshFuture, TokenRefresher, TokenSecret},
	error::{ConfigError, TransportError},
};

/// Status and retry hint captured from one HTTP response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the endpoint.
	pub status: u16,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Maps a refresh-endpoint response onto the refresh contract.
pub fn classify_refresh_response(meta: ResponseMetadata, body: &[u8]) -> Result<RefreshOutcome> {
	match meta.status {
		200..=299 => TokenGrant::from_json_slice(body, Some(meta.status)).map(RefreshOutcome::Issued),
		400 | 401 | 403 => Ok(RefreshOutcome::Rejected { reason: error_message(meta.status, body) }),
		status => Err(Error::from_status(status, error_message(status, body), meta.retry_after)),
	}
}

fn error_message(status: u16, body: &[u8]) -> String {
	#[derive(Deserialize)]
	struct ErrorBody {
		#[serde(alias = "error_description", alias = "error")]
		message: String,
	}

	if let Ok(ErrorBody { message }) = serde_json::from_slice::<ErrorBody>(body) {
		return message;
	}

	let text = String::from_utf8_lossy(body);
	let text = text.trim();

	if text.is_empty() { format!("HTTP {status}") } else { text.chars().take(200).collect() }
}

/// Refresh collaborator that POSTs `{"refreshToken": ...}` to a fixed endpoint.
///
/// Redirects are never followed; the endpoint must answer directly.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestRefresher {
	client: ReqwestClient,
	endpoint: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestRefresher {
	/// Builds a refresher with a dedicated client that does not follow redirects.
	pub fn new(endpoint: Url) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self { client, endpoint })
	}

	/// Reuses an existing client; configure it not to follow redirects.
	pub fn with_client(client: ReqwestClient, endpoint: Url) -> Self {
		Self { client, endpoint }
	}

	/// Refresh endpoint this adapter calls.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}
}
#[cfg(feature = "reqwest")]
impl TokenRefresher for ReqwestRefresher {
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		#[derive(Serialize)]
		#[serde(rename_all = "camelCase")]
		struct RefreshRequest<'r> {
			refresh_token: &'r str,
		}

		Box::pin(async move {
			let response = self
				.client
				.post(self.endpoint.clone())
				.json(&RefreshRequest { refresh_token: refresh_token.expose() })
				.send()
				.await
				.map_err(TransportError::from)?;
			let meta = ResponseMetadata {
				status: response.status().as_u16(),
				retry_after: parse_retry_after(response.headers()),
			};
			let body = response.bytes().await.map_err(TransportError::from)?;

			tracing::debug!(status = meta.status, "Refresh endpoint responded.");

			classify_refresh_response(meta, &body)
		})
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(i64::from(secs)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
