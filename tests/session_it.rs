// std
use std::{env, process};
// self
use bookmark_client_core::{
	_preludet::*,
	auth::{TokenPair, TokenRefresher},
	clock::{Clock, ManualClock},
	config::SessionConfig,
	session::{AuthCoordinator, AuthEvent},
	store::{FileStorage, Storage},
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_callers_share_one_refresh() {
	let session = build_test_coordinator(ScriptedRefresher::issuing("bulk", Some(900)));

	session
		.coordinator
		.set_tokens(TokenPair::new("a-0", "r-0"), Some(900))
		.await
		.expect("Login should store tokens.");
	session.clock.advance(Duration::minutes(12));

	let tasks = (0..32)
		.map(|_| {
			let coordinator = session.coordinator.clone();

			tokio::spawn(async move { coordinator.get_access_token().await })
		})
		.collect::<Vec<_>>();

	for task in tasks {
		let token = task
			.await
			.expect("Task should not panic.")
			.expect("Read should succeed.")
			.expect("A token should be returned.");

		assert_eq!(token.expose(), "bulk-access-1");
	}

	assert_eq!(session.refresher.calls(), 1);
}

#[tokio::test]
async fn login_refresh_logout_lifecycle() {
	let session = build_test_coordinator(ScriptedRefresher::issuing("cycle", Some(900)));
	let events = Arc::new(Mutex::new(Vec::new()));

	session.coordinator.subscribe({
		let events = events.clone();

		move |event: &AuthEvent| events.lock().push(event.clone())
	});

	let login = session
		.coordinator
		.set_tokens(TokenPair::new("a-0", "r-0"), Some(900))
		.await
		.expect("Login should store tokens.");

	session.clock.advance(Duration::seconds(895));

	let refreshed_at = session.clock.now();
	let token = session
		.coordinator
		.require_access_token()
		.await
		.expect("A refreshed token should be available.");

	assert_eq!(token.expose(), "cycle-access-1");
	assert_eq!(session.refresher.calls(), 1);

	let current = session
		.coordinator
		.credentials()
		.await
		.expect("Storage should be readable.")
		.expect("The refreshed pair should be stored.");

	assert_eq!(current.access_expires_at, refreshed_at + Duration::seconds(900));
	assert!(current.access_expires_at > login.access_expires_at);

	session.coordinator.logout().await.expect("Logout should succeed.");

	assert!(session.storage.is_empty());
	assert_eq!(*events.lock(), vec![
		AuthEvent::TokensUpdated { access_expires_at: login.access_expires_at },
		AuthEvent::TokensUpdated { access_expires_at: current.access_expires_at },
		AuthEvent::LoggedOut,
	]);
}

#[tokio::test]
async fn revoked_refresh_token_forces_logout_once() {
	let session = build_test_coordinator(ScriptedRefresher::new(RefreshScript::Reject));
	let auth_errors = Arc::new(Mutex::new(0_usize));

	session.coordinator.subscribe({
		let auth_errors = auth_errors.clone();

		move |event: &AuthEvent| {
			if *event == AuthEvent::AuthError {
				*auth_errors.lock() += 1;
			}
		}
	});
	session
		.coordinator
		.set_tokens(TokenPair::new("a-0", "r-0"), Some(900))
		.await
		.expect("Login should store tokens.");
	session.clock.advance(Duration::minutes(14));

	let (a, b, c) = tokio::join!(
		session.coordinator.get_access_token(),
		session.coordinator.get_access_token(),
		session.coordinator.get_access_token(),
	);

	for token in [a, b, c] {
		assert!(token.expect("Reads should succeed.").is_none());
	}

	assert_eq!(session.refresher.calls(), 1);
	assert_eq!(*auth_errors.lock(), 1);
	assert!(matches!(session.coordinator.require_access_token().await, Err(Error::NoCredential)));
}

#[tokio::test]
async fn recovers_after_transient_outage() {
	let session = build_test_coordinator(ScriptedRefresher::new(RefreshScript::Fail));

	session
		.coordinator
		.set_tokens(TokenPair::new("a-0", "r-0"), Some(900))
		.await
		.expect("Login should store tokens.");
	session.clock.advance(Duration::minutes(11));

	let stale = session
		.coordinator
		.require_access_token()
		.await
		.expect("The stale token should be returned.");

	assert_eq!(stale.expose(), "a-0");

	session.refresher.set_script(RefreshScript::Issue { prefix: "back".into(), expires_in: None });

	let fresh = session
		.coordinator
		.require_access_token()
		.await
		.expect("The refreshed token should be returned.");

	assert_eq!(fresh.expose(), "back-access-2");
	assert_eq!(session.refresher.calls(), 2);
}

#[tokio::test]
async fn file_storage_session_survives_restart() {
	let path = env::temp_dir().join(format!(
		"bookmark_client_session_{}_{}.json",
		process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos(),
	));
	let clock = ManualClock::at(time::macros::datetime!(2025-06-01 12:00 UTC));
	let build = |storage: FileStorage| {
		let storage: Arc<dyn Storage> = Arc::new(storage);
		let refresher: Arc<dyn TokenRefresher> =
			Arc::new(ScriptedRefresher::issuing("disk", Some(900)));
		let clock: Arc<dyn Clock> = Arc::new(clock.clone());

		AuthCoordinator::builder(storage, refresher)
			.config(
				SessionConfig::default().with_proactive_refresh(false).with_storage_prefix("bm."),
			)
			.clock(clock)
			.build()
			.expect("Session config should be valid.")
	};
	let first = build(FileStorage::open(&path).expect("Storage should open."));
	let stored = first
		.set_tokens(TokenPair::new("a-0", "r-0"), Some(900))
		.await
		.expect("Login should store tokens.");

	drop(first);

	let second = build(FileStorage::open(&path).expect("Storage should reopen."));
	let restored = second
		.resume()
		.await
		.expect("Storage should be readable.")
		.expect("The pair should survive a restart.");

	assert_eq!(restored, stored);
	assert!(second.is_authenticated().await.expect("Storage should be readable."));

	second.clear_tokens().await.expect("Clearing should succeed.");

	assert!(second.credentials().await.expect("Storage should be readable.").is_none());

	let _ = std::fs::remove_file(&path);
}
