//! Observability helpers shared by the session core and the resilience layers.
//!
//! # Feature Flags
//!
//! - Spans named `bookmark_client.op` carry the `op` (component) and `stage` (call site)
//!   fields and are always emitted through `tracing`.
//! - Enable `metrics` to increment the `bookmark_client_op_total` counter for every
//!   attempt/success/failure/rejection, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Components observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoreOp {
	/// Coordinated token refresh.
	Refresh,
	/// Circuit breaker admission.
	Circuit,
	/// Token-bucket admission.
	RateLimit,
	/// Retry policy.
	Retry,
	/// Batch window flush.
	Batch,
}
impl CoreOp {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CoreOp::Refresh => "refresh",
			CoreOp::Circuit => "circuit",
			CoreOp::RateLimit => "rate_limit",
			CoreOp::Retry => "retry",
			CoreOp::Batch => "batch",
		}
	}
}
impl Display for CoreOp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded per operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// The operation started.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Admission control refused the call before it ran.
	Rejected,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
			OpOutcome::Rejected => "rejected",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
