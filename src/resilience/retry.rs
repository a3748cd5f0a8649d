//! Exponential backoff with jitter for transient failures.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	clock,
	config::RetryConfig,
	error::{ConfigError, Retryable},
	obs::{self, CoreOp, OpOutcome},
};

/// Declares whether an operation may be repeated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrySafety {
	/// The operation is naturally idempotent (reads, PUT-style writes).
	Idempotent,
	/// The operation carries an idempotency key the API deduplicates on.
	IdempotencyKey(String),
	/// The operation must run at most once.
	Unsafe,
}
impl RetrySafety {
	/// Returns `true` when the operation may be attempted more than once.
	pub fn allows_retry(&self) -> bool {
		!matches!(self, Self::Unsafe)
	}

	fn key(&self) -> Option<&str> {
		match self {
			Self::IdempotencyKey(key) => Some(key),
			_ => None,
		}
	}
}

/// Context handed to each invocation of a retried operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryAttempt {
	/// One-based attempt number.
	pub number: u32,
	/// Idempotency key to send with the request, if any.
	pub idempotency_key: Option<String>,
	/// Rendered error of the previous attempt.
	pub last_error: Option<String>,
	/// Delay waited before this attempt.
	pub waited: Duration,
}

/// Retry decision function wrapping arbitrary operations.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
	config: RetryConfig,
}
impl RetryPolicy {
	/// Creates a policy from validated settings.
	pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
		config.validate()?;

		Ok(Self { config })
	}

	/// Settings backing this policy.
	pub fn config(&self) -> &RetryConfig {
		&self.config
	}

	/// Pre-jitter delay after the zero-based failed attempt `attempt`:
	/// `base_delay * 2^attempt`, capped at `max_delay`.
	pub fn backoff_for(&self, attempt: u32) -> Duration {
		let factor = 2_i32.checked_pow(attempt).unwrap_or(i32::MAX);

		self.config.base_delay.checked_mul(factor).unwrap_or(self.config.max_delay).min(self.config.max_delay)
	}

	/// Runs `operation`, retrying retryable failures while attempts remain.
	///
	/// Non-retryable errors and the error of the final attempt are returned unchanged.
	/// Operations declared [`RetrySafety::Unsafe`] run exactly once.
	pub async fn execute<T, E, F, Fut>(&self, safety: RetrySafety, mut operation: F) -> Result<T, E>
	where
		F: FnMut(RetryAttempt) -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: Retryable + Display,
	{
		let max_attempts = if safety.allows_retry() { self.config.max_attempts } else { 1 };
		let mut attempt = RetryAttempt {
			number: 1,
			idempotency_key: safety.key().map(ToOwned::to_owned),
			last_error: None,
			waited: Duration::ZERO,
		};

		loop {
			let err = match operation(attempt.clone()).await {
				Ok(value) => return Ok(value),
				Err(err) => err,
			};

			if !err.is_retryable() || attempt.number >= max_attempts {
				if attempt.number > 1 {
					obs::record_outcome(CoreOp::Retry, OpOutcome::Failure);
				}

				return Err(err);
			}

			let delay = self.delay_for(attempt.number - 1, err.retry_after());

			tracing::warn!(
				attempt = attempt.number,
				max_attempts,
				delay_ms = delay.whole_milliseconds() as i64,
				error = %err,
				"Retrying after a transient failure."
			);
			obs::record_outcome(CoreOp::Retry, OpOutcome::Attempt);

			tokio::time::sleep(clock::to_std(delay)).await;

			attempt.number += 1;
			attempt.last_error = Some(err.to_string());
			attempt.waited = delay;
		}
	}

	fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
		let backoff = self.backoff_for(attempt) + self.jitter();

		match hint {
			Some(hint) if hint > backoff => hint,
			_ => backoff,
		}
	}

	fn jitter(&self) -> Duration {
		let span = self.config.base_delay.whole_milliseconds();

		if !self.config.jitter || span <= 0 {
			return Duration::ZERO;
		}

		let span = i64::try_from(span).unwrap_or(i64::MAX);

		Duration::milliseconds(rand::rng().random_range(0..span))
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { config: RetryConfig::default() }
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use tokio::time::Instant;
	// self
	use super::*;
	use crate::error::TransportError;

	fn policy() -> RetryPolicy {
		RetryPolicy::new(RetryConfig::default().with_jitter(false))
			.expect("Retry config should be valid.")
	}

	fn network_error() -> Error {
		TransportError::network(std::io::Error::other("connection refused")).into()
	}

	#[test]
	fn backoff_doubles_and_caps() {
		let policy = policy();

		assert_eq!(policy.backoff_for(0), Duration::milliseconds(100));
		assert_eq!(policy.backoff_for(1), Duration::milliseconds(200));
		assert_eq!(policy.backoff_for(2), Duration::milliseconds(400));
		assert!(policy.backoff_for(0) < policy.backoff_for(1));
		assert_eq!(policy.backoff_for(40), Duration::seconds(10));
	}

	#[tokio::test(start_paused = true)]
	async fn non_retryable_error_runs_once() {
		let counter = AtomicU32::new(0);
		let calls = &counter;
		let result = policy()
			.execute(RetrySafety::Idempotent, |_| async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(Error::from_status(404, "missing", None))
			})
			.await;

		assert!(matches!(result, Err(Error::Application { status: 404, .. })));
		assert_eq!(counter.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn retryable_error_exhausts_attempts_with_growing_delays() {
		let stamps = Mutex::new(Vec::new());
		let result = policy()
			.execute(RetrySafety::Idempotent, |attempt| {
				stamps.lock().push((attempt.number, Instant::now()));

				async { Err::<(), _>(network_error()) }
			})
			.await;

		assert!(matches!(result, Err(Error::Transport(_))));

		let stamps = stamps.into_inner();

		assert_eq!(stamps.len(), 3);

		let first_gap = stamps[1].1 - stamps[0].1;
		let second_gap = stamps[2].1 - stamps[1].1;

		assert_eq!(first_gap, std::time::Duration::from_millis(100));
		assert_eq!(second_gap, std::time::Duration::from_millis(200));
	}

	#[tokio::test(start_paused = true)]
	async fn recovers_after_transient_failure_and_reports_context() {
		let seen = Mutex::new(Vec::new());
		let result = policy()
			.execute(RetrySafety::IdempotencyKey("bookmark-42".into()), |attempt| {
				let first = attempt.number == 1;

				seen.lock().push(attempt);

				async move { if first { Err(network_error()) } else { Ok("saved") } }
			})
			.await;

		assert_eq!(result.expect("Second attempt should succeed."), "saved");

		let seen = seen.into_inner();

		assert_eq!(seen.len(), 2);
		assert_eq!(seen[1].idempotency_key.as_deref(), Some("bookmark-42"));
		assert!(seen[1].last_error.is_some());
		assert_eq!(seen[1].waited, Duration::milliseconds(100));
	}

	#[tokio::test(start_paused = true)]
	async fn unsafe_operations_are_never_repeated() {
		let counter = AtomicU32::new(0);
		let calls = &counter;
		let result = policy()
			.execute(RetrySafety::Unsafe, |_| async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(network_error())
			})
			.await;

		assert!(result.is_err());
		assert_eq!(counter.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn retry_after_hint_extends_the_delay() {
		let stamps = Mutex::new(Vec::new());
		let _ = policy()
			.execute(RetrySafety::Idempotent, |_| {
				stamps.lock().push(Instant::now());

				async { Err::<(), _>(Error::from_status(503, "busy", Some(Duration::seconds(2)))) }
			})
			.await;

		let stamps = stamps.into_inner();

		assert_eq!(stamps[1] - stamps[0], std::time::Duration::from_secs(2));
	}
}
