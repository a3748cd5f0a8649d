//! Token-bucket admission control for outbound requests.
//!
//! The bucket starts full, every admitted call consumes one token, and whole refill
//! intervals add tokens back up to capacity. Server `Retry-After` hints pause the
//! bucket entirely until the hint elapses.

// self
use crate::{
	_prelude::*,
	clock::{self, Clock},
	config::RateLimiterConfig,
	error::ConfigError,
	obs::{self, CoreOp, OpOutcome},
};

/// Result of consulting the [`RateLimiter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The request may proceed immediately; one token was consumed.
	Allow,
	/// The request should be delayed.
	Delay(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow)
	}
}

/// Advises callers when to retry after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when it is safe to retry.
	pub earliest_retry_at: OffsetDateTime,
	/// Suggested backoff duration.
	pub recommended_backoff: Duration,
	/// Optional descriptive string.
	pub reason: Option<String>,
}
impl RetryDirective {
	/// Creates a new directive with the provided timing metadata.
	pub fn new(earliest_retry_at: OffsetDateTime, recommended_backoff: Duration) -> Self {
		Self { earliest_retry_at, recommended_backoff, reason: None }
	}

	/// Adds a human-readable reason.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}
}

/// Mutable bucket state; `0 <= tokens <= capacity`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct TokenBucket {
	tokens: u32,
	last_refill_at: OffsetDateTime,
	paused_until: Option<OffsetDateTime>,
}

/// Client-side token-bucket rate limiter.
pub struct RateLimiter {
	config: RateLimiterConfig,
	bucket: Mutex<TokenBucket>,
	clock: Arc<dyn Clock>,
}
impl RateLimiter {
	/// Creates a full bucket using the system clock.
	pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
		Self::with_clock(config, clock::system())
	}

	/// Creates a full bucket driven by `clock`.
	pub fn with_clock(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
		config.validate()?;

		let bucket = TokenBucket {
			tokens: config.capacity,
			last_refill_at: clock.now(),
			paused_until: None,
		};

		Ok(Self { config, bucket: Mutex::new(bucket), clock })
	}

	/// Attempts to consume one token without waiting.
	pub fn try_acquire(&self) -> RateLimitDecision {
		let now = self.clock.now();
		let mut bucket = self.bucket.lock();

		if let Some(until) = bucket.paused_until {
			if now < until {
				obs::record_outcome(CoreOp::RateLimit, OpOutcome::Rejected);

				return RateLimitDecision::Delay(
					RetryDirective::new(until, until - now)
						.with_reason("Server requested a pause via Retry-After."),
				);
			}

			bucket.paused_until = None;
		}

		self.refill(&mut bucket, now);

		if bucket.tokens > 0 {
			bucket.tokens -= 1;

			return RateLimitDecision::Allow;
		}

		let next_refill_at = bucket.last_refill_at + self.config.refill_interval;

		tracing::debug!(
			capacity = self.config.capacity,
			retry_in_ms = (next_refill_at - now).whole_milliseconds() as i64,
			"Rate limiter bucket is empty."
		);
		obs::record_outcome(CoreOp::RateLimit, OpOutcome::Rejected);

		RateLimitDecision::Delay(
			RetryDirective::new(next_refill_at, next_refill_at - now)
				.with_reason("Local request budget exhausted."),
		)
	}

	/// Consumes one token or fails with [`Error::RateLimited`].
	pub fn acquire(&self) -> Result<()> {
		match self.try_acquire() {
			RateLimitDecision::Allow => Ok(()),
			RateLimitDecision::Delay(directive) => Err(Error::RateLimited(directive)),
		}
	}

	/// Waits until a token is available, then consumes it.
	pub async fn wait_for_token(&self) {
		loop {
			match self.try_acquire() {
				RateLimitDecision::Allow => return,
				RateLimitDecision::Delay(directive) => {
					// Never spin: even a zero hint yields for one millisecond.
					let wait = directive.recommended_backoff.max(Duration::milliseconds(1));

					tokio::time::sleep(clock::to_std(wait)).await;
				},
			}
		}
	}

	/// Rejects every acquisition until `retry_after` elapses.
	///
	/// A shorter hint never shortens a pause that is already in effect.
	pub fn pause_for(&self, retry_after: Duration) {
		if !retry_after.is_positive() {
			return;
		}

		let until = self.clock.now() + retry_after;
		let mut bucket = self.bucket.lock();

		if bucket.paused_until.is_none_or(|current| current < until) {
			tracing::warn!(
				retry_after_ms = retry_after.whole_milliseconds() as i64,
				"Pausing local admissions after a Retry-After hint."
			);

			bucket.paused_until = Some(until);
		}
	}

	/// Tokens available right now, after applying elapsed refills.
	pub fn available_tokens(&self) -> u32 {
		let now = self.clock.now();
		let mut bucket = self.bucket.lock();

		self.refill(&mut bucket, now);

		bucket.tokens
	}

	fn refill(&self, bucket: &mut TokenBucket, now: OffsetDateTime) {
		let elapsed = now - bucket.last_refill_at;

		if elapsed < self.config.refill_interval {
			return;
		}

		let interval_nanos = self.config.refill_interval.whole_nanoseconds();
		let intervals = elapsed.whole_nanoseconds() / interval_nanos;
		let added = intervals.saturating_mul(i128::from(self.config.refill_amount));
		let capacity = i128::from(self.config.capacity);

		bucket.tokens = (i128::from(bucket.tokens) + added).min(capacity) as u32;
		// Advance by whole intervals so partial progress toward the next refill is kept.
		bucket.last_refill_at = match i32::try_from(intervals) {
			Ok(steps) => bucket.last_refill_at + self.config.refill_interval * steps,
			Err(_) => now,
		};
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("config", &self.config)
			.field("tokens", &self.bucket.lock().tokens)
			.finish()
	}
}
