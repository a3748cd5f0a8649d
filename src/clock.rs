//! Injectable wall clock so expiry and cooldown decisions can be driven deterministically.

// self
use crate::_prelude::*;

/// Source of the current instant for every time-based decision in the crate.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current UTC instant.
	fn now(&self) -> OffsetDateTime;
}

/// Clock backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same instant, so a test can hand one clone to a component and
/// advance another.
#[derive(Clone, Debug)]
pub struct ManualClock(Arc<Mutex<OffsetDateTime>>);
impl ManualClock {
	/// Creates a clock frozen at the provided instant.
	pub fn at(instant: OffsetDateTime) -> Self {
		Self(Arc::new(Mutex::new(instant)))
	}

	/// Moves the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		*self.0.lock() += delta;
	}

	/// Jumps the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}
}
impl Default for ManualClock {
	fn default() -> Self {
		Self::at(OffsetDateTime::now_utc())
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}

/// Default shared clock used when callers do not inject one.
pub(crate) fn system() -> Arc<dyn Clock> {
	Arc::new(SystemClock)
}

/// Converts a possibly negative duration into a sleepable [`std::time::Duration`].
pub(crate) fn to_std(duration: Duration) -> std::time::Duration {
	if duration.is_positive() { duration.unsigned_abs() } else { std::time::Duration::ZERO }
}
