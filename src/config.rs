//! Tunables for the session core and the resilience primitives.
//!
//! Every setting has a default and can be overridden through `with_*` builders or by
//! deserializing a JSON document. Durations are expressed in milliseconds on the wire.

// self
use crate::{_prelude::*, error::ConfigError};

/// Aggregate configuration for every component in the crate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
	/// Session/token lifecycle settings.
	pub session: SessionConfig,
	/// Circuit breaker settings.
	pub circuit: CircuitBreakerConfig,
	/// Token bucket settings.
	pub rate_limit: RateLimiterConfig,
	/// Retry policy settings.
	pub retry: RetryConfig,
	/// Batch window settings.
	pub batch: BatchConfig,
}
impl CoreConfig {
	/// Parses a JSON document, reporting the path of the first invalid field.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::Parse { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Validates every section.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.session.validate()?;
		self.circuit.validate()?;
		self.rate_limit.validate()?;
		self.retry.validate()?;
		self.batch.validate()
	}
}

/// Session/token lifecycle settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
	/// Refresh when the access token expires within this window.
	#[serde(with = "duration_ms")]
	pub refresh_margin: Duration,
	/// Access-token lifetime assumed when the issuer omits `expires_in`.
	#[serde(with = "duration_ms")]
	pub access_token_lifetime: Duration,
	/// Refresh-token lifetime measured from the moment tokens are stored.
	#[serde(with = "duration_ms")]
	pub refresh_token_lifetime: Duration,
	/// Schedules a background refresh ahead of access-token expiry.
	pub proactive_refresh: bool,
	/// Prefix applied to every storage key holding credential fields.
	pub storage_prefix: String,
}
impl SessionConfig {
	/// Overrides the refresh margin.
	pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
		self.refresh_margin = margin;

		self
	}

	/// Overrides the default access-token lifetime.
	pub fn with_access_token_lifetime(mut self, lifetime: Duration) -> Self {
		self.access_token_lifetime = lifetime;

		self
	}

	/// Overrides the refresh-token lifetime.
	pub fn with_refresh_token_lifetime(mut self, lifetime: Duration) -> Self {
		self.refresh_token_lifetime = lifetime;

		self
	}

	/// Enables or disables the proactive refresh timer.
	pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
		self.proactive_refresh = enabled;

		self
	}

	/// Overrides the storage key prefix.
	pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.storage_prefix = prefix.into();

		self
	}

	/// Validates the session settings.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.refresh_margin.is_negative() {
			return Err(ConfigError::NonPositiveDuration { field: "refresh_margin" });
		}

		positive("access_token_lifetime", self.access_token_lifetime)?;
		positive("refresh_token_lifetime", self.refresh_token_lifetime)?;

		if self.refresh_margin >= self.access_token_lifetime {
			return Err(ConfigError::MarginExceedsLifetime);
		}

		Ok(())
	}
}
impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			refresh_margin: Duration::minutes(5),
			access_token_lifetime: Duration::minutes(15),
			refresh_token_lifetime: Duration::days(7),
			proactive_refresh: true,
			storage_prefix: String::new(),
		}
	}
}

/// Circuit breaker settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
	/// Consecutive failures that open a closed circuit.
	pub failure_threshold: u32,
	/// Cooldown before an open circuit admits probes.
	#[serde(with = "duration_ms")]
	pub reset_timeout: Duration,
	/// Consecutive probe successes that close a half-open circuit.
	pub success_threshold: u32,
	/// Probes allowed in flight at once while half-open.
	pub half_open_max_attempts: u32,
}
impl CircuitBreakerConfig {
	/// Overrides the failure threshold.
	pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
		self.failure_threshold = threshold;

		self
	}

	/// Overrides the reset timeout.
	pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
		self.reset_timeout = timeout;

		self
	}

	/// Overrides the half-open success threshold.
	pub fn with_success_threshold(mut self, threshold: u32) -> Self {
		self.success_threshold = threshold;

		self
	}

	/// Overrides how many probes may run concurrently while half-open.
	pub fn with_half_open_max_attempts(mut self, attempts: u32) -> Self {
		self.half_open_max_attempts = attempts;

		self
	}

	/// Validates the circuit settings.
	pub fn validate(&self) -> Result<(), ConfigError> {
		non_zero("failure_threshold", self.failure_threshold)?;
		non_zero("success_threshold", self.success_threshold)?;
		non_zero("half_open_max_attempts", self.half_open_max_attempts)?;
		positive("reset_timeout", self.reset_timeout)
	}
}
impl Default for CircuitBreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: 3,
			reset_timeout: Duration::seconds(30),
			success_threshold: 2,
			half_open_max_attempts: 1,
		}
	}
}

/// Token bucket settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimiterConfig {
	/// Maximum tokens the bucket holds; the bucket starts full.
	pub capacity: u32,
	/// Tokens added per elapsed interval.
	pub refill_amount: u32,
	/// Length of one refill interval.
	#[serde(with = "duration_ms")]
	pub refill_interval: Duration,
}
impl RateLimiterConfig {
	/// Overrides the bucket capacity.
	pub fn with_capacity(mut self, capacity: u32) -> Self {
		self.capacity = capacity;

		self
	}

	/// Overrides the refill amount and interval.
	pub fn with_refill(mut self, amount: u32, interval: Duration) -> Self {
		self.refill_amount = amount;
		self.refill_interval = interval;

		self
	}

	/// Validates the bucket settings.
	pub fn validate(&self) -> Result<(), ConfigError> {
		non_zero("capacity", self.capacity)?;
		non_zero("refill_amount", self.refill_amount)?;
		positive("refill_interval", self.refill_interval)
	}
}
impl Default for RateLimiterConfig {
	fn default() -> Self {
		Self { capacity: 10, refill_amount: 10, refill_interval: Duration::seconds(10) }
	}
}

/// Retry policy settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	/// Delay before the first retry; doubles on every further retry.
	#[serde(with = "duration_ms")]
	pub base_delay: Duration,
	/// Upper bound for a single pre-jitter delay.
	#[serde(with = "duration_ms")]
	pub max_delay: Duration,
	/// Apply random jitter in `[0, base_delay)` to each delay.
	pub jitter: bool,
}
impl RetryConfig {
	/// Overrides the attempt budget.
	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = attempts;

		self
	}

	/// Overrides the base delay.
	pub fn with_base_delay(mut self, delay: Duration) -> Self {
		self.base_delay = delay;

		self
	}

	/// Overrides the delay cap.
	pub fn with_max_delay(mut self, delay: Duration) -> Self {
		self.max_delay = delay;

		self
	}

	/// Enables or disables jitter.
	pub fn with_jitter(mut self, jitter: bool) -> Self {
		self.jitter = jitter;

		self
	}

	/// Validates the retry settings.
	pub fn validate(&self) -> Result<(), ConfigError> {
		non_zero("max_attempts", self.max_attempts)?;

		if self.base_delay.is_negative() {
			return Err(ConfigError::NonPositiveDuration { field: "base_delay" });
		}

		positive("max_delay", self.max_delay)
	}
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::milliseconds(100),
			max_delay: Duration::seconds(10),
			jitter: true,
		}
	}
}

/// Batch window settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
	/// How long a window stays open after its first item arrives.
	#[serde(with = "duration_ms")]
	pub window: Duration,
	/// Item count that flushes a window early.
	pub max_batch_size: usize,
}
impl BatchConfig {
	/// Overrides the window length.
	pub fn with_window(mut self, window: Duration) -> Self {
		self.window = window;

		self
	}

	/// Overrides the maximum batch size.
	pub fn with_max_batch_size(mut self, size: usize) -> Self {
		self.max_batch_size = size;

		self
	}

	/// Validates the batch settings.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_batch_size == 0 {
			return Err(ConfigError::ZeroValue { field: "max_batch_size" });
		}

		positive("window", self.window)
	}
}
impl Default for BatchConfig {
	fn default() -> Self {
		Self { window: Duration::seconds(2), max_batch_size: 50 }
	}
}

fn non_zero(field: &'static str, value: u32) -> Result<(), ConfigError> {
	if value == 0 { Err(ConfigError::ZeroValue { field }) } else { Ok(()) }
}

fn positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() { Ok(()) } else { Err(ConfigError::NonPositiveDuration { field }) }
}

mod duration_ms {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let millis = i64::try_from(value.whole_milliseconds()).unwrap_or(i64::MAX);

		serializer.serialize_i64(millis)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::milliseconds)
	}
}
