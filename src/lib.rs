//! Client-side session and resilience core for the bookmark API.
//!
//! The [`session::AuthCoordinator`] owns the credential lifecycle and collapses concurrent
//! refreshes into one network call. [`resilience`] wraps outbound calls with a circuit
//! breaker, a token-bucket limiter, and jittered retries; [`batch`] groups independent
//! writes into windowed bulk requests.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod batch;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod obs;
pub mod resilience;
pub mod session;
pub mod singleflight;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use crate::{
		auth::{RefreshFuture, RefreshOutcome, TokenGrant, TokenRefresher, TokenSecret},
		clock::{Clock, ManualClock},
		config::SessionConfig,
		error::TransportError,
		session::AuthCoordinator,
		store::{MemoryStorage, Storage},
	};

	/// Scripted behavior for [`ScriptedRefresher`].
	#[derive(Clone, Debug)]
	pub enum RefreshScript {
		/// Issue `"{prefix}-{n}"` access/refresh tokens with the given lifetime in seconds.
		Issue {
			/// Prefix used when minting token values.
			prefix: String,
			/// Lifetime reported through `expires_in`.
			expires_in: Option<i64>,
		},
		/// Reject the refresh token as invalid.
		Reject,
		/// Fail with a network-level error.
		Fail,
	}

	/// In-process [`TokenRefresher`] that counts calls and follows a [`RefreshScript`].
	#[derive(Debug)]
	pub struct ScriptedRefresher {
		script: Mutex<RefreshScript>,
		calls: AtomicUsize,
		delay: std::time::Duration,
	}
	impl ScriptedRefresher {
		/// Creates a refresher that mints tokens with the provided prefix and lifetime.
		pub fn issuing(prefix: &str, expires_in: Option<i64>) -> Self {
			Self::new(RefreshScript::Issue { prefix: prefix.into(), expires_in })
		}

		/// Creates a refresher that follows the provided script.
		pub fn new(script: RefreshScript) -> Self {
			Self {
				script: Mutex::new(script),
				calls: AtomicUsize::new(0),
				delay: std::time::Duration::from_millis(20),
			}
		}

		/// Replaces the script for subsequent calls.
		pub fn set_script(&self, script: RefreshScript) {
			*self.script.lock() = script;
		}

		/// Returns how many times the network collaborator was invoked.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl TokenRefresher for ScriptedRefresher {
		fn refresh<'a>(&'a self, _refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
			Box::pin(async move {
				let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
				let script = self.script.lock().clone();

				// Keep the flight open long enough for concurrent callers to join it.
				tokio::time::sleep(self.delay).await;

				match script {
					RefreshScript::Issue { prefix, expires_in } =>
						Ok(RefreshOutcome::Issued(TokenGrant::new(
							format!("{prefix}-access-{n}"),
							format!("{prefix}-refresh-{n}"),
							expires_in,
						))),
					RefreshScript::Reject =>
						Ok(RefreshOutcome::Rejected { reason: "refresh token revoked".into() }),
					RefreshScript::Fail => Err(TransportError::network(std::io::Error::new(
						std::io::ErrorKind::ConnectionReset,
						"connection reset by peer",
					))
					.into()),
				}
			})
		}
	}

	/// Fixture bundle returned by [`build_test_coordinator`].
	pub struct TestSession {
		/// Coordinator under test.
		pub coordinator: AuthCoordinator,
		/// Backing storage shared with the coordinator.
		pub storage: Arc<MemoryStorage>,
		/// Scripted refresh collaborator.
		pub refresher: Arc<ScriptedRefresher>,
		/// Manual clock driving expiry decisions.
		pub clock: ManualClock,
	}

	/// Builds a coordinator backed by in-memory storage, a manual clock, and a scripted refresher.
	///
	/// Proactive refresh timers are disabled so tests drive refreshes explicitly.
	pub fn build_test_coordinator(refresher: ScriptedRefresher) -> TestSession {
		let storage = Arc::new(MemoryStorage::default());
		let refresher = Arc::new(refresher);
		let clock = ManualClock::at(time::macros::datetime!(2025-06-01 12:00 UTC));
		let storage_dyn: Arc<dyn Storage> = storage.clone();
		let refresher_dyn: Arc<dyn TokenRefresher> = refresher.clone();
		let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
		let coordinator = AuthCoordinator::builder(storage_dyn, refresher_dyn)
			.config(SessionConfig::default().with_proactive_refresh(false))
			.clock(clock_dyn)
			.build()
			.expect("Failed to build coordinator for tests.");

		TestSession { coordinator, storage, refresher, clock }
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		sync::{Arc, Weak},
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
