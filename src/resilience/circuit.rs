//! Three-state health circuit guarding calls to a failing backend.

// self
use crate::{
	_prelude::*,
	clock::{self, Clock},
	config::CircuitBreakerConfig,
	error::ConfigError,
	obs::{self, CoreOp, OpOutcome, OpSpan},
};

/// Circuit states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
	/// Calls pass through and failures are counted.
	Closed,
	/// Calls are rejected without being attempted.
	Open,
	/// A limited number of probe calls test whether the backend recovered.
	HalfOpen,
}
impl CircuitState {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CircuitState::Closed => "closed",
			CircuitState::Open => "open",
			CircuitState::HalfOpen => "half_open",
		}
	}
}
impl Display for CircuitState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Counters owned by one breaker; reset whenever the circuit closes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CircuitStats {
	/// Failures observed since the circuit last closed.
	pub failures: u64,
	/// Successes observed since the circuit last closed.
	pub successes: u64,
	/// Failures since the last success.
	pub consecutive_failures: u32,
	/// Successes since the last failure.
	pub consecutive_successes: u32,
	/// Calls rejected while open (or over the probe limit).
	pub rejected: u64,
	/// Instant of the most recent failure.
	pub last_failure_at: Option<OffsetDateTime>,
}

/// Returned when a call is rejected because the circuit is open.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Circuit is open; retry in {}ms.", .retry_in.whole_milliseconds())]
pub struct CircuitOpenError {
	/// Time left until the circuit admits probes.
	pub retry_in: Duration,
}

#[derive(Debug)]
struct CircuitCore {
	state: CircuitState,
	stats: CircuitStats,
	opened_at: Option<OffsetDateTime>,
	probes_in_flight: u32,
	// Bumped on every transition; probe slots from an older generation are already void.
	generation: u64,
}
impl CircuitCore {
	fn new() -> Self {
		Self {
			state: CircuitState::Closed,
			stats: CircuitStats::default(),
			opened_at: None,
			probes_in_flight: 0,
			generation: 0,
		}
	}
}

/// Admission ticket for one call; tells the breaker whether the call was a probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Permit {
	probe: bool,
	generation: u64,
}

/// Holds a [`Permit`] while the guarded call runs and hands its probe slot back if the
/// call is dropped before completing.
struct PermitGuard<'a> {
	breaker: &'a CircuitBreaker,
	permit: Option<Permit>,
}
impl PermitGuard<'_> {
	fn settle(mut self) -> Option<Permit> {
		self.permit.take()
	}
}
impl Drop for PermitGuard<'_> {
	fn drop(&mut self) {
		if let Some(permit) = self.permit.take() {
			if permit.probe {
				tracing::debug!(circuit = %self.breaker.name, "Probe call was cancelled.");
			}

			self.breaker.release(permit);
		}
	}
}

/// Health gate that stops calling a failing dependency for a cooldown period.
///
/// The open-to-half-open transition is evaluated lazily against the injected
/// [`Clock`] whenever the breaker is consulted, so no timer task is needed.
pub struct CircuitBreaker {
	name: String,
	config: CircuitBreakerConfig,
	core: Mutex<CircuitCore>,
	clock: Arc<dyn Clock>,
}
impl CircuitBreaker {
	/// Creates a breaker using the system clock.
	pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
		Self::with_clock(name, config, clock::system())
	}

	/// Creates a breaker driven by `clock`.
	pub fn with_clock(
		name: impl Into<String>,
		config: CircuitBreakerConfig,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		Ok(Self { name: name.into(), config, core: Mutex::new(CircuitCore::new()), clock })
	}

	/// Breaker name used in logs.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Current state, after applying any elapsed cooldown.
	pub fn state(&self) -> CircuitState {
		let mut core = self.core.lock();

		self.refresh_state(&mut core);

		core.state
	}

	/// Snapshot of the counters.
	pub fn stats(&self) -> CircuitStats {
		self.core.lock().stats.clone()
	}

	/// Forces the circuit open, restarting the cooldown.
	pub fn open(&self) {
		let mut core = self.core.lock();
		let now = self.clock.now();

		self.transition(&mut core, CircuitState::Open, now);
	}

	/// Forces the circuit closed and resets its counters.
	pub fn close(&self) {
		let mut core = self.core.lock();
		let now = self.clock.now();

		self.transition(&mut core, CircuitState::Closed, now);
	}

	/// Runs `operation` unless the circuit is open. Every error counts as a failure.
	pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: From<CircuitOpenError>,
	{
		self.execute_classified(operation, |_| true).await
	}

	/// Runs `operation` unless the circuit is open; only errors for which `is_failure`
	/// returns `true` count against the circuit.
	///
	/// Errors that do not count are still returned to the caller and leave the counters
	/// untouched, except that a half-open probe slot is released.
	pub async fn execute_classified<T, E, F, Fut, P>(
		&self,
		operation: F,
		is_failure: P,
	) -> Result<T, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: From<CircuitOpenError>,
		P: FnOnce(&E) -> bool,
	{
		let permit = self.admit().inspect_err(|_| {
			obs::record_outcome(CoreOp::Circuit, OpOutcome::Rejected);
		})?;
		let guard = PermitGuard { breaker: self, permit: Some(permit) };
		let result = operation().await;
		let Some(permit) = guard.settle() else { return result };

		match &result {
			Ok(_) => self.on_success(permit),
			Err(err) if is_failure(err) => self.on_failure(permit),
			Err(_) => self.release(permit),
		}

		result
	}

	fn admit(&self) -> Result<Permit, CircuitOpenError> {
		let mut core = self.core.lock();
		let now = self.clock.now();

		self.refresh_state(&mut core);

		match core.state {
			CircuitState::Closed => Ok(Permit { probe: false, generation: core.generation }),
			CircuitState::HalfOpen if core.probes_in_flight < self.config.half_open_max_attempts => {
				core.probes_in_flight += 1;

				Ok(Permit { probe: true, generation: core.generation })
			},
			CircuitState::HalfOpen => {
				core.stats.rejected += 1;

				Err(CircuitOpenError { retry_in: Duration::ZERO })
			},
			CircuitState::Open => {
				core.stats.rejected += 1;

				let reopen_at = core.opened_at.unwrap_or(now) + self.config.reset_timeout;

				Err(CircuitOpenError { retry_in: (reopen_at - now).max(Duration::ZERO) })
			},
		}
	}

	fn on_success(&self, permit: Permit) {
		let mut core = self.core.lock();
		let now = self.clock.now();

		Self::release_probe(&mut core, permit);

		core.stats.successes += 1;
		core.stats.consecutive_successes = core.stats.consecutive_successes.saturating_add(1);
		core.stats.consecutive_failures = 0;

		if core.state == CircuitState::HalfOpen
			&& core.stats.consecutive_successes >= self.config.success_threshold
		{
			self.transition(&mut core, CircuitState::Closed, now);
		}
	}

	fn on_failure(&self, permit: Permit) {
		let mut core = self.core.lock();
		let now = self.clock.now();

		Self::release_probe(&mut core, permit);

		core.stats.failures += 1;
		core.stats.consecutive_failures = core.stats.consecutive_failures.saturating_add(1);
		core.stats.consecutive_successes = 0;
		core.stats.last_failure_at = Some(now);

		match core.state {
			CircuitState::Closed
				if core.stats.consecutive_failures >= self.config.failure_threshold =>
				self.transition(&mut core, CircuitState::Open, now),
			CircuitState::HalfOpen => self.transition(&mut core, CircuitState::Open, now),
			_ => {},
		}
	}

	fn release(&self, permit: Permit) {
		Self::release_probe(&mut self.core.lock(), permit);
	}

	fn release_probe(core: &mut CircuitCore, permit: Permit) {
		if permit.probe && permit.generation == core.generation {
			core.probes_in_flight = core.probes_in_flight.saturating_sub(1);
		}
	}

	fn refresh_state(&self, core: &mut CircuitCore) {
		if core.state != CircuitState::Open {
			return;
		}

		let now = self.clock.now();

		if core.opened_at.is_some_and(|at| now - at >= self.config.reset_timeout) {
			self.transition(core, CircuitState::HalfOpen, now);
		}
	}

	fn transition(&self, core: &mut CircuitCore, to: CircuitState, now: OffsetDateTime) {
		let from = core.state;
		let _span = OpSpan::new(CoreOp::Circuit, "transition").entered();

		core.state = to;
		core.generation = core.generation.wrapping_add(1);

		match to {
			CircuitState::Closed => {
				core.stats = CircuitStats::default();
				core.opened_at = None;
				core.probes_in_flight = 0;
			},
			CircuitState::Open => {
				core.opened_at = Some(now);
				core.probes_in_flight = 0;
			},
			CircuitState::HalfOpen => {
				core.stats.consecutive_successes = 0;
				core.probes_in_flight = 0;
			},
		}

		if from != to {
			tracing::info!(
				circuit = %self.name,
				from = from.as_str(),
				to = to.as_str(),
				failures = core.stats.failures,
				"Circuit state changed."
			);
		}
	}
}
impl Debug for CircuitBreaker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let core = self.core.lock();

		f.debug_struct("CircuitBreaker")
			.field("name", &self.name)
			.field("state", &core.state)
			.field("stats", &core.stats)
			.finish()
	}
}
