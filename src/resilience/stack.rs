//! Retry, admission, and circuit composed into one call wrapper.

// self
use crate::{
	_prelude::*,
	clock::{self, Clock},
	config::CoreConfig,
	error::{ConfigError, Retryable},
	resilience::{CircuitBreaker, RateLimiter, RetryAttempt, RetryPolicy, RetrySafety},
};

/// Shared resilience layers for one upstream.
#[derive(Debug)]
pub struct ResilienceStack {
	limiter: RateLimiter,
	breaker: CircuitBreaker,
	retry: RetryPolicy,
}
impl ResilienceStack {
	/// Builds the layers from `config` using the system clock.
	pub fn new(name: impl Into<String>, config: &CoreConfig) -> Result<Self, ConfigError> {
		Self::with_clock(name, config, clock::system())
	}

	/// Builds the layers from `config`; the limiter and breaker read time from `clock`.
	pub fn with_clock(
		name: impl Into<String>,
		config: &CoreConfig,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		Ok(Self {
			limiter: RateLimiter::with_clock(config.rate_limit.clone(), clock.clone())?,
			breaker: CircuitBreaker::with_clock(name, config.circuit.clone(), clock)?,
			retry: RetryPolicy::new(config.retry.clone())?,
		})
	}

	/// Token bucket consulted before every attempt.
	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	/// Circuit guarding the upstream.
	pub fn breaker(&self) -> &CircuitBreaker {
		&self.breaker
	}

	/// Policy deciding whether and when to retry.
	pub fn retry(&self) -> &RetryPolicy {
		&self.retry
	}

	/// Runs `operation` through every layer.
	///
	/// Each attempt first takes a limiter token, then passes the circuit. Only retryable
	/// errors count against the circuit, and any `Retry-After` hint pauses the limiter so
	/// unrelated calls back off as well.
	pub async fn execute<T, F, Fut>(&self, safety: RetrySafety, mut operation: F) -> Result<T>
	where
		F: FnMut(RetryAttempt) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		self.retry
			.execute(safety, |attempt| {
				let call = operation(attempt);

				async move {
					if let Err(err) = self.limiter.acquire() {
						return Err(err);
					}

					let result =
						self.breaker.execute_classified(|| call, |err: &Error| err.is_retryable()).await;

					if let Some(hint) = result.as_ref().err().and_then(Retryable::retry_after) {
						self.limiter.pause_for(hint);
					}

					result
				}
			})
			.await
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		clock::ManualClock,
		config::RetryConfig,
		error::TransportError,
		resilience::{CircuitState, RateLimitDecision},
	};

	fn stack() -> ResilienceStack {
		let clock = ManualClock::at(macros::datetime!(2025-03-01 09:00 UTC));
		let config = CoreConfig {
			retry: RetryConfig::default().with_jitter(false),
			..Default::default()
		};

		ResilienceStack::with_clock("bookmarks", &config, Arc::new(clock))
			.expect("Default resilience config should be valid.")
	}

	#[tokio::test(start_paused = true)]
	async fn successful_call_consumes_one_token() {
		let stack = stack();
		let value = stack
			.execute(RetrySafety::Idempotent, |_| async { Ok(5) })
			.await
			.expect("Call should succeed.");

		assert_eq!(value, 5);
		assert_eq!(stack.limiter().available_tokens(), 9);
		assert_eq!(stack.breaker().state(), CircuitState::Closed);
	}

	#[tokio::test(start_paused = true)]
	async fn exhausted_retries_open_the_circuit_and_later_calls_fail_fast() {
		let stack = stack();
		let counter = AtomicU32::new(0);
		let calls = &counter;
		let failing = |_: RetryAttempt| async move {
			calls.fetch_add(1, Ordering::SeqCst);

			Err::<(), Error>(TransportError::Timeout.into())
		};
		let err = stack
			.execute(RetrySafety::Idempotent, failing)
			.await
			.expect_err("Every attempt fails.");

		assert!(matches!(err, Error::Transport(TransportError::Timeout)));
		assert_eq!(counter.load(Ordering::SeqCst), 3);
		assert_eq!(stack.breaker().state(), CircuitState::Open);

		let err = stack
			.execute(RetrySafety::Idempotent, failing)
			.await
			.expect_err("Open circuit should reject.");

		assert!(matches!(err, Error::CircuitOpen(_)));
		assert_eq!(counter.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn application_errors_neither_retry_nor_trip_the_circuit() {
		let stack = stack();

		for _ in 0..5 {
			let _ = stack
				.execute(RetrySafety::Idempotent, |_| async {
					Err::<(), _>(Error::from_status(422, "invalid url", None))
				})
				.await;
		}

		assert_eq!(stack.breaker().state(), CircuitState::Closed);
		assert_eq!(stack.breaker().stats().failures, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn retry_after_hint_pauses_the_limiter() {
		let clock = ManualClock::at(macros::datetime!(2025-03-01 09:00 UTC));
		let config = CoreConfig {
			retry: RetryConfig::default().with_max_attempts(1),
			..Default::default()
		};
		let stack = ResilienceStack::with_clock("bookmarks", &config, Arc::new(clock.clone()))
			.expect("Resilience config should be valid.");
		let _ = stack
			.execute(RetrySafety::Idempotent, |_| async {
				Err::<(), _>(Error::from_status(429, "slow down", Some(Duration::seconds(30))))
			})
			.await;
		let RateLimitDecision::Delay(directive) = stack.limiter().try_acquire() else {
			panic!("Limiter should be paused after a Retry-After hint.");
		};

		assert_eq!(directive.recommended_backoff, Duration::seconds(30));

		clock.advance(Duration::seconds(30));

		assert!(stack.limiter().try_acquire().is_allowed());
	}
}
