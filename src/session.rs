//! Session coordinator owning the credential lifecycle.
//!
//! [`AuthCoordinator`] is the single shared session instance of a process. It is
//! constructed explicitly and passed to every consumer; clones share state.
//!
//! - Reads go to [`Storage`], the durable source of truth.
//! - Every refresh, reactive or proactive, runs through one [`SingleFlight`] key, so any
//!   number of concurrent callers cause at most one network refresh.
//! - Terminal refresh failures clear the session and emit [`AuthEvent::AuthError`];
//!   transient failures keep the stored pair and hand out the stale access token.

mod events;
mod metrics;

pub use events::*;
pub use metrics::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::{runtime::Handle, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	auth::{
		CredentialKeys, CredentialPair, CredentialStatus, RefreshError, RefreshOutcome,
		TokenPair, TokenRefresher, TokenSecret,
	},
	clock::{self, Clock},
	config::SessionConfig,
	error::ConfigError,
	obs::{self, CoreOp, OpOutcome, OpSpan},
	singleflight::SingleFlight,
	store::{StoreError, Storage},
};

const REFRESH_KEY: &str = "refresh";
const MIN_REFRESH_DELAY: Duration = Duration::seconds(1);

type RefreshResult = Result<TokenSecret, RefreshError>;

/// Builder for [`AuthCoordinator`].
pub struct AuthCoordinatorBuilder {
	storage: Arc<dyn Storage>,
	refresher: Arc<dyn TokenRefresher>,
	config: SessionConfig,
	clock: Option<Arc<dyn Clock>>,
}
impl AuthCoordinatorBuilder {
	/// Overrides the session settings.
	pub fn config(mut self, config: SessionConfig) -> Self {
		self.config = config;

		self
	}

	/// Overrides the time source; defaults to the system clock.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Validates the settings and builds the coordinator.
	pub fn build(self) -> Result<AuthCoordinator, ConfigError> {
		self.config.validate()?;

		let keys = CredentialKeys::with_prefix(&self.config.storage_prefix);

		Ok(AuthCoordinator {
			inner: Arc::new(Inner {
				storage: self.storage,
				refresher: self.refresher,
				clock: self.clock.unwrap_or_else(clock::system),
				config: self.config,
				keys,
				writes: AsyncMutex::new(()),
				epoch: AtomicU64::new(0),
				flight: SingleFlight::new(),
				listeners: Listeners::default(),
				timer: Mutex::new(None),
				timer_ids: AtomicU64::new(0),
				metrics: RefreshMetrics::default(),
			}),
		})
	}
}
impl Debug for AuthCoordinatorBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthCoordinatorBuilder").field("config", &self.config).finish()
	}
}

/// Explicitly constructed, cheaply clonable session handle.
#[derive(Clone)]
pub struct AuthCoordinator {
	inner: Arc<Inner>,
}
impl AuthCoordinator {
	/// Starts building a coordinator over `storage` and `refresher`.
	pub fn builder(
		storage: Arc<dyn Storage>,
		refresher: Arc<dyn TokenRefresher>,
	) -> AuthCoordinatorBuilder {
		AuthCoordinatorBuilder { storage, refresher, config: SessionConfig::default(), clock: None }
	}

	/// Session settings in effect.
	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	/// Refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.inner.metrics
	}

	/// Returns a usable access token, refreshing first when it is within the margin.
	///
	/// Returns `Ok(None)` when no session exists or when a refresh failed terminally. A
	/// transient refresh failure yields the stored, possibly stale, token so the caller's
	/// own request can fail and be handled there.
	pub async fn get_access_token(&self) -> Result<Option<TokenSecret>> {
		let Some(pair) = self.inner.load().await? else {
			return Ok(None);
		};

		match pair.status_at(self.inner.clock.now(), self.inner.config.refresh_margin) {
			CredentialStatus::Active => Ok(Some(pair.tokens.access_token)),
			status => {
				tracing::debug!(?status, "Access token needs a refresh.");

				match self.refresh_shared(false).await {
					Ok(token) => Ok(Some(token)),
					Err(err) if err.is_terminal() => Ok(None),
					Err(err) => {
						tracing::warn!(error = %err, "Refresh failed; returning the stored access token.");

						Ok(Some(pair.tokens.access_token))
					},
				}
			},
		}
	}

	/// Like [`get_access_token`](Self::get_access_token) but fails with
	/// [`Error::NoCredential`] when no token is available.
	pub async fn require_access_token(&self) -> Result<TokenSecret> {
		self.get_access_token().await?.ok_or(Error::NoCredential)
	}

	/// Stores a freshly issued pair and reschedules the proactive refresh.
	///
	/// The access expiry is `now + expires_in` seconds, or the configured default lifetime
	/// when `expires_in` is `None`; the refresh expiry is `now` plus the configured
	/// refresh-token lifetime.
	///
	/// A refresh still in flight when this runs is discarded instead of overwriting the pair.
	pub async fn set_tokens(&self, tokens: TokenPair, expires_in: Option<i64>) -> Result<CredentialPair> {
		self.inner.store(tokens, expires_in, Commit::Login).await?.ok_or(Error::NoCredential)
	}

	/// Refreshes now, regardless of the margin. Joins a refresh already in progress.
	pub async fn force_refresh(&self) -> Result<TokenSecret> {
		Ok(self.refresh_shared(true).await?)
	}

	/// Returns `true` when a pair is stored and neither token has expired.
	pub async fn is_authenticated(&self) -> Result<bool> {
		let now = self.inner.clock.now();

		Ok(self
			.inner
			.load()
			.await?
			.is_some_and(|pair| !pair.is_access_expired_at(now) && !pair.is_refresh_expired_at(now)))
	}

	/// Snapshot of the stored pair.
	pub async fn credentials(&self) -> Result<Option<CredentialPair>> {
		Ok(self.inner.load().await?)
	}

	/// Loads a pair persisted by an earlier process and arms the proactive refresh for it.
	pub async fn resume(&self) -> Result<Option<CredentialPair>> {
		let pair = self.inner.load().await?;

		if let Some(pair) = &pair {
			self.inner.schedule(pair);
		}

		Ok(pair)
	}

	/// Cancels the pending proactive refresh and removes every credential field.
	pub async fn clear_tokens(&self) -> Result<()> {
		Ok(self.inner.clear().await?)
	}

	/// Clears the session and emits [`AuthEvent::LoggedOut`].
	pub async fn logout(&self) -> Result<()> {
		self.clear_tokens().await?;

		tracing::info!("Session logged out.");
		self.inner.listeners.emit(&AuthEvent::LoggedOut);

		Ok(())
	}

	/// Registers `listener`; it runs synchronously on every [`AuthEvent`].
	pub fn subscribe<F>(&self, listener: F) -> ListenerId
	where
		F: 'static + Fn(&AuthEvent) + Send + Sync,
	{
		self.inner.listeners.subscribe(Arc::new(listener))
	}

	/// Removes a listener; returns `false` when it was not registered.
	pub fn unsubscribe(&self, id: ListenerId) -> bool {
		self.inner.listeners.unsubscribe(id)
	}

	/// Returns `true` while a proactive refresh timer is armed.
	pub fn has_scheduled_refresh(&self) -> bool {
		self.inner.timer.lock().as_ref().is_some_and(|(_, task)| !task.is_finished())
	}

	/// Joins the refresh in flight or starts one. Unless `force` is set, the started
	/// refresh returns the stored token when another refresh already renewed it.
	async fn refresh_shared(&self, force: bool) -> RefreshResult {
		let inner = Arc::downgrade(&self.inner);

		self.inner
			.flight
			.run(REFRESH_KEY, move || async move {
				match inner.upgrade() {
					Some(inner) => inner.refresh_tokens(force).await,
					None => Err(RefreshError::NoCredential),
				}
			})
			.await
	}
}
impl Debug for AuthCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthCoordinator")
			.field("config", &self.inner.config)
			.field("refreshing", &self.inner.flight.is_in_flight(&REFRESH_KEY))
			.field("listeners", &self.inner.listeners)
			.finish()
	}
}

#[derive(Clone, Copy, Debug)]
enum Commit {
	/// New credentials from a login; supersede any refresh in flight.
	Login,
	/// Refresh result, valid only while the session epoch is unchanged.
	Refresh { epoch: u64 },
}

struct Inner {
	storage: Arc<dyn Storage>,
	refresher: Arc<dyn TokenRefresher>,
	clock: Arc<dyn Clock>,
	config: SessionConfig,
	keys: CredentialKeys,
	// Serializes multi-key credential writes.
	writes: AsyncMutex<()>,
	// Bumped on every clear and login; refreshes started under an older epoch are discarded.
	epoch: AtomicU64,
	flight: SingleFlight<&'static str, RefreshResult>,
	listeners: Listeners,
	timer: Mutex<Option<(u64, JoinHandle<()>)>>,
	timer_ids: AtomicU64,
	metrics: RefreshMetrics,
}
impl Inner {
	async fn load(&self) -> Result<Option<CredentialPair>, StoreError> {
		self.keys.load(self.storage.as_ref()).await
	}

	/// Performs one refresh exchange. Callers reach this only through the shared flight.
	async fn refresh_tokens(self: Arc<Self>, force: bool) -> RefreshResult {
		let span = OpSpan::new(CoreOp::Refresh, "refresh_tokens");

		span.instrument(async move {
			self.metrics.record_attempt();
			obs::record_outcome(CoreOp::Refresh, OpOutcome::Attempt);

			let result = self.exchange(force).await;

			match &result {
				Ok(_) => {
					self.metrics.record_success();
					obs::record_outcome(CoreOp::Refresh, OpOutcome::Success);
				},
				Err(err) => {
					self.metrics.record_failure();
					obs::record_outcome(CoreOp::Refresh, OpOutcome::Failure);

					match err {
						// Nothing to clear and nothing to report.
						RefreshError::NoCredential => tracing::debug!("No stored session to refresh."),
						err if err.is_terminal() => self.fail_terminal(err).await,
						err => tracing::warn!(error = %err, "Token refresh failed transiently."),
					}
				},
			}

			result
		})
		.await
	}

	async fn exchange(self: &Arc<Self>, force: bool) -> RefreshResult {
		let epoch = self.epoch.load(Ordering::SeqCst);
		let Some(current) = self.load().await? else {
			return Err(RefreshError::NoCredential);
		};

		match current.status_at(self.clock.now(), self.config.refresh_margin) {
			CredentialStatus::RefreshExpired => return Err(RefreshError::RefreshExpired),
			CredentialStatus::Active if !force => {
				tracing::debug!("Stored access token is already fresh; skipping the exchange.");

				return Ok(current.tokens.access_token);
			},
			_ => {},
		}

		self.metrics.record_network_call();

		let grant = match self.refresher.refresh(current.refresh_token()).await {
			Ok(RefreshOutcome::Issued(grant)) => grant,
			Ok(RefreshOutcome::Rejected { reason }) => return Err(RefreshError::Rejected { reason }),
			Err(Error::Refresh(err)) => return Err(err),
			Err(err) => return Err(RefreshError::Transient { message: err.to_string() }),
		};
		let (tokens, expires_in) = grant.into_parts();
		let stored = self.store(tokens, expires_in, Commit::Refresh { epoch }).await.map_err(
			|err| match err {
				Error::Storage(err) => RefreshError::Storage(err),
				err => RefreshError::InvalidGrant { message: err.to_string() },
			},
		)?;

		if let Some(pair) = stored {
			tracing::info!("Token refresh succeeded.");

			return Ok(pair.tokens.access_token);
		}

		// A logout or login that raced the exchange wins; hand out whatever it left behind.
		match self.load().await? {
			Some(pair) => Ok(pair.tokens.access_token),
			None => Err(RefreshError::NoCredential),
		}
	}

	/// Writes a new pair. Refresh results are dropped when a clear or login happened after
	/// their epoch was observed.
	async fn store(
		self: &Arc<Self>,
		tokens: TokenPair,
		expires_in: Option<i64>,
		commit: Commit,
	) -> Result<Option<CredentialPair>> {
		let lifetime = match expires_in {
			Some(seconds) if seconds <= 0 => return Err(ConfigError::NonPositiveExpiresIn.into()),
			Some(seconds) => Duration::seconds(seconds),
			None => self.config.access_token_lifetime,
		};
		let pair = {
			let _writes = self.writes.lock().await;

			match commit {
				Commit::Login => {
					self.epoch.fetch_add(1, Ordering::SeqCst);
				},
				Commit::Refresh { epoch } if self.epoch.load(Ordering::SeqCst) != epoch => {
					tracing::debug!("Discarding tokens refreshed for a superseded session.");

					return Ok(None);
				},
				Commit::Refresh { .. } => {},
			}

			let pair = CredentialPair::issue(
				tokens,
				self.clock.now(),
				lifetime,
				self.config.refresh_token_lifetime,
			)?;

			self.keys.save(self.storage.as_ref(), &pair).await?;

			pair
		};

		self.listeners.emit(&AuthEvent::TokensUpdated { access_expires_at: pair.access_expires_at });
		self.schedule(&pair);

		Ok(Some(pair))
	}

	async fn clear(&self) -> Result<(), StoreError> {
		self.cancel_timer();

		let _writes = self.writes.lock().await;

		self.epoch.fetch_add(1, Ordering::SeqCst);
		self.keys.clear(self.storage.as_ref()).await
	}

	async fn fail_terminal(&self, err: &RefreshError) {
		tracing::warn!(error = %err, "Token refresh failed terminally; clearing the session.");

		if let Err(clear_err) = self.clear().await {
			tracing::error!(error = %clear_err, "Failed to clear credentials after a terminal refresh failure.");
		}

		self.listeners.emit(&AuthEvent::AuthError);
	}

	/// Arms the proactive refresh for `pair`, replacing any pending timer.
	fn schedule(self: &Arc<Self>, pair: &CredentialPair) {
		if !self.config.proactive_refresh {
			return;
		}

		let Ok(runtime) = Handle::try_current() else {
			tracing::debug!("No async runtime available; proactive refresh is not scheduled.");

			return;
		};
		let now = self.clock.now();
		// Lifetimes inside the margin would otherwise fire at once after every refresh.
		let delay = (pair.refresh_due_at(self.config.refresh_margin) - now)
			.max((pair.access_expires_at - now) / 2)
			.max(MIN_REFRESH_DELAY);
		let id = self.timer_ids.fetch_add(1, Ordering::Relaxed);
		let weak = Arc::downgrade(self);
		let task = runtime.spawn(async move {
			tokio::time::sleep(clock::to_std(delay)).await;

			let Some(inner) = weak.upgrade() else { return };

			// Detach from the slot so the refresh's own reschedule cannot abort this task.
			{
				let mut timer = inner.timer.lock();

				if timer.as_ref().is_some_and(|(current, _)| *current == id) {
					timer.take();
				}
			}

			tracing::debug!("Running proactive token refresh.");

			let _ = AuthCoordinator { inner }.refresh_shared(true).await;
		});

		tracing::debug!(delay_ms = delay.whole_milliseconds() as i64, "Scheduled proactive refresh.");

		if let Some((_, previous)) = self.timer.lock().replace((id, task)) {
			previous.abort();
		}
	}

	fn cancel_timer(&self) {
		if let Some((_, task)) = self.timer.lock().take() {
			task.abort();
		}
	}
}
impl Drop for Inner {
	fn drop(&mut self) {
		self.cancel_timer();
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// self
	use super::*;
	use crate::{_preludet::*, clock::ManualClock, store::MemoryStorage};

	fn pair(access: &str, refresh: &str) -> TokenPair {
		TokenPair::new(access, refresh)
	}

	#[tokio::test]
	async fn set_then_get_returns_token_without_refresh() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));

		session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");

		let token = session
			.coordinator
			.get_access_token()
			.await
			.expect("Reading the token should succeed.")
			.expect("A token should be stored.");

		assert_eq!(token.expose(), "a-1");
		assert_eq!(session.refresher.calls(), 0);
		assert!(session.coordinator.is_authenticated().await.expect("Storage should be readable."));
	}

	#[tokio::test]
	async fn no_session_yields_none_and_require_fails() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));

		assert!(session.coordinator.get_access_token().await.expect("Read should succeed.").is_none());
		assert!(matches!(
			session.coordinator.require_access_token().await,
			Err(Error::NoCredential)
		));
		assert!(matches!(
			session.coordinator.force_refresh().await,
			Err(Error::Refresh(RefreshError::NoCredential))
		));
	}

	#[tokio::test]
	async fn concurrent_callers_inside_margin_refresh_once() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));

		session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		session.clock.advance(Duration::seconds(700));

		let calls = (0..8).map(|_| session.coordinator.get_access_token());
		let tokens = futures::future::join_all(calls).await;

		for token in tokens {
			let token = token.expect("Read should succeed.").expect("A token should be returned.");

			assert_eq!(token.expose(), "next-access-1");
		}

		assert_eq!(session.refresher.calls(), 1);
		assert_eq!(session.coordinator.metrics().attempts(), 1);
		assert_eq!(session.coordinator.metrics().network_calls(), 1);
	}

	#[tokio::test]
	async fn refresh_expiry_is_measured_from_completion() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));
		let login = session.clock.now();

		session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		session.clock.advance(Duration::seconds(895));

		let refreshed_at = session.clock.now();
		let token = session
			.coordinator
			.get_access_token()
			.await
			.expect("Read should succeed.")
			.expect("A token should be returned.");
		let stored = session
			.coordinator
			.credentials()
			.await
			.expect("Storage should be readable.")
			.expect("Refreshed pair should be stored.");

		assert_eq!(token.expose(), "next-access-1");
		assert_eq!(stored.refresh_token().expose(), "next-refresh-1");
		assert_eq!(stored.access_expires_at, refreshed_at + Duration::seconds(900));
		assert_ne!(stored.access_expires_at, login + Duration::seconds(900));
	}

	#[tokio::test]
	async fn rejected_refresh_clears_session_and_emits_auth_error() {
		let session = build_test_coordinator(ScriptedRefresher::new(RefreshScript::Reject));
		let events = Arc::new(Mutex::new(Vec::new()));

		session.coordinator.subscribe({
			let events = events.clone();

			move |event: &AuthEvent| events.lock().push(event.clone())
		});
		session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		session.clock.advance(Duration::seconds(800));

		let token = session.coordinator.get_access_token().await.expect("Read should succeed.");

		assert!(token.is_none());
		assert!(session.storage.is_empty());
		assert_eq!(events.lock().last(), Some(&AuthEvent::AuthError));
		assert!(!session.coordinator.is_authenticated().await.expect("Storage should be readable."));
	}

	#[tokio::test]
	async fn expired_refresh_token_clears_without_network_call() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));
		let auth_errors = Arc::new(AtomicUsize::new(0));

		session.coordinator.subscribe({
			let auth_errors = auth_errors.clone();

			move |event: &AuthEvent| {
				if *event == AuthEvent::AuthError {
					auth_errors.fetch_add(1, Ordering::SeqCst);
				}
			}
		});
		session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		session.clock.advance(Duration::days(8));

		let err = session.coordinator.force_refresh().await.expect_err("Refresh should fail.");

		assert!(matches!(err, Error::Refresh(RefreshError::RefreshExpired)));
		assert_eq!(session.refresher.calls(), 0);
		assert_eq!(auth_errors.load(Ordering::SeqCst), 1);
		assert!(session.storage.is_empty());
	}

	#[tokio::test]
	async fn transient_failure_returns_stale_token_and_keeps_session() {
		let session = build_test_coordinator(ScriptedRefresher::new(RefreshScript::Fail));
		let events = Arc::new(Mutex::new(Vec::new()));

		session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		session.coordinator.subscribe({
			let events = events.clone();

			move |event: &AuthEvent| events.lock().push(event.clone())
		});
		session.clock.advance(Duration::seconds(700));

		let token = session
			.coordinator
			.get_access_token()
			.await
			.expect("Read should succeed.")
			.expect("The stale token should be returned.");

		assert_eq!(token.expose(), "a-1");
		assert!(events.lock().is_empty());
		assert!(!session.storage.is_empty());
		assert_eq!(session.coordinator.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn stored_pair_round_trips_through_storage() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));
		let stored = session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), None)
			.await
			.expect("Storing tokens should succeed.");
		let read_back = CredentialKeys::default()
			.load(session.storage.as_ref())
			.await
			.expect("Storage should be readable.")
			.expect("The pair should be stored.");

		assert_eq!(read_back, stored);
		assert_eq!(read_back.tokens, pair("a-1", "r-1"));
		assert_eq!(stored.access_expires_at, session.clock.now() + Duration::minutes(15));
		assert_eq!(stored.refresh_expires_at, session.clock.now() + Duration::days(7));
	}

	#[tokio::test]
	async fn non_positive_expires_in_is_rejected() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));
		let err = session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(0))
			.await
			.expect_err("Zero lifetimes should be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::NonPositiveExpiresIn)));
		assert!(session.storage.is_empty());
	}

	#[tokio::test]
	async fn logout_clears_storage_and_notifies() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));
		let events = Arc::new(Mutex::new(Vec::new()));

		session.coordinator.subscribe({
			let events = events.clone();

			move |event: &AuthEvent| events.lock().push(event.clone())
		});
		session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		session.coordinator.logout().await.expect("Logout should succeed.");

		assert!(session.storage.is_empty());
		assert_eq!(events.lock().len(), 2);
		assert_eq!(events.lock()[1], AuthEvent::LoggedOut);
	}

	fn proactive_session(
		expires_in: Option<i64>,
	) -> (AuthCoordinator, Arc<ScriptedRefresher>, Arc<MemoryStorage>) {
		let storage = Arc::new(MemoryStorage::default());
		let refresher = Arc::new(ScriptedRefresher::issuing("timer", expires_in));
		let clock: Arc<dyn Clock> =
			Arc::new(ManualClock::at(time::macros::datetime!(2025-06-01 12:00 UTC)));
		let coordinator = AuthCoordinator::builder(storage.clone(), refresher.clone())
			.clock(clock)
			.build()
			.expect("Default session config should be valid.");

		(coordinator, refresher, storage)
	}

	#[tokio::test(start_paused = true)]
	async fn proactive_timer_refreshes_before_expiry() {
		let (coordinator, refresher, _) = proactive_session(Some(900));

		coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");

		assert!(coordinator.has_scheduled_refresh());

		tokio::time::sleep(std::time::Duration::from_secs(601)).await;

		assert_eq!(refresher.calls(), 1);
		assert!(coordinator.has_scheduled_refresh());
	}

	#[tokio::test(start_paused = true)]
	async fn logout_cancels_the_proactive_timer() {
		let (coordinator, refresher, storage) = proactive_session(Some(900));

		coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		coordinator.logout().await.expect("Logout should succeed.");

		assert!(!coordinator.has_scheduled_refresh());

		tokio::time::sleep(std::time::Duration::from_secs(1_000)).await;

		assert_eq!(refresher.calls(), 0);
		assert!(storage.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn resume_arms_timer_for_persisted_pair() {
		let (first, _, storage) = proactive_session(Some(900));

		first
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		drop(first);

		let refresher = Arc::new(ScriptedRefresher::issuing("resumed", Some(900)));
		let clock: Arc<dyn Clock> =
			Arc::new(ManualClock::at(time::macros::datetime!(2025-06-01 12:00 UTC)));
		let second = AuthCoordinator::builder(storage, refresher.clone())
			.clock(clock)
			.build()
			.expect("Default session config should be valid.");
		let resumed = second.resume().await.expect("Storage should be readable.");

		assert!(resumed.is_some());
		assert!(second.has_scheduled_refresh());
	}

	#[tokio::test(start_paused = true)]
	async fn lifetime_inside_margin_does_not_spin_the_timer() {
		let (coordinator, refresher, _) = proactive_session(Some(60));

		coordinator
			.set_tokens(pair("a-1", "r-1"), Some(60))
			.await
			.expect("Storing tokens should succeed.");
		tokio::time::sleep(std::time::Duration::from_secs(1)).await;

		assert_eq!(refresher.calls(), 0);

		tokio::time::sleep(std::time::Duration::from_secs(30)).await;

		assert_eq!(refresher.calls(), 1);

		tokio::time::sleep(std::time::Duration::from_secs(30)).await;

		assert_eq!(refresher.calls(), 2);
		assert!(coordinator.has_scheduled_refresh());
	}

	#[tokio::test(start_paused = true)]
	async fn login_during_refresh_keeps_the_new_session() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("stale", Some(900)));

		session
			.coordinator
			.set_tokens(pair("old-access", "old-refresh"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		session.clock.advance(Duration::seconds(700));

		let login = async {
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
			session
				.coordinator
				.set_tokens(pair("new-access", "new-refresh"), Some(900))
				.await
				.expect("Login should succeed.")
		};
		let (token, _) = tokio::join!(session.coordinator.get_access_token(), login);
		let token = token.expect("Read should succeed.").expect("A token should be returned.");
		let stored = session
			.coordinator
			.credentials()
			.await
			.expect("Storage should be readable.")
			.expect("The login should be stored.");

		assert_eq!(session.refresher.calls(), 1);
		assert_eq!(token.expose(), "new-access");
		assert_eq!(stored.tokens, pair("new-access", "new-refresh"));
	}

	#[tokio::test]
	async fn refreshing_without_a_session_raises_no_auth_error() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("next", Some(900)));
		let events = Arc::new(Mutex::new(Vec::new()));

		session.coordinator.subscribe({
			let events = events.clone();

			move |event: &AuthEvent| events.lock().push(event.clone())
		});

		assert!(matches!(
			session.coordinator.force_refresh().await,
			Err(Error::Refresh(RefreshError::NoCredential))
		));
		assert!(session.coordinator.get_access_token().await.expect("Read should succeed.").is_none());
		assert!(events.lock().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn logout_during_refresh_only_reports_the_logout() {
		let session = build_test_coordinator(ScriptedRefresher::issuing("late", Some(900)));
		let events = Arc::new(Mutex::new(Vec::new()));

		session
			.coordinator
			.set_tokens(pair("a-1", "r-1"), Some(900))
			.await
			.expect("Storing tokens should succeed.");
		session.coordinator.subscribe({
			let events = events.clone();

			move |event: &AuthEvent| events.lock().push(event.clone())
		});

		let logout = async {
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
			session.coordinator.logout().await.expect("Logout should succeed.");
		};
		let (refreshed, _) = tokio::join!(session.coordinator.force_refresh(), logout);

		assert!(matches!(refreshed, Err(Error::Refresh(RefreshError::NoCredential))));
		assert!(session.storage.is_empty());
		assert_eq!(*events.lock(), vec![AuthEvent::LoggedOut]);
	}
}
