//! Observability helpers shared by every sync-core component.
//!
//! # Feature Flags
//!
//! - `tracing` (default-enabled) emits structured spans named `sync_core.<component>` carrying
//!   the fields each component design calls for (`tenant`, `operation`, `strategy`, `priority`,
//!   `attempt`, `classification`, `job_id`, ...).
//! - `metrics` increments counters for the observability surface described below
//!   (`stale-writes-ignored`, attempt counters, job outcomes).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Components that emit spans and counters through `obs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
	/// C1 Credential Store.
	Credentials,
	/// C2 Rate-Limited Transport.
	Transport,
	/// C3 Sync Orchestrator.
	Orchestrator,
	/// C4 Mirror Store.
	Mirror,
	/// C5 Transaction Log.
	TransactionLog,
	/// C7 Sync Service.
	SyncService,
	/// C8 Background Job Runner.
	Jobs,
}
impl ComponentKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ComponentKind::Credentials => "credentials",
			ComponentKind::Transport => "transport",
			ComponentKind::Orchestrator => "orchestrator",
			ComponentKind::Mirror => "mirror",
			ComponentKind::TransactionLog => "transaction_log",
			ComponentKind::SyncService => "sync_service",
			ComponentKind::Jobs => "jobs",
		}
	}
}
impl Display for ComponentKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to a sync-core operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// A write was dropped because its sync token was not newer than the stored one.
	StaleWriteIgnored,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
			Outcome::StaleWriteIgnored => "stale_write_ignored",
		}
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
