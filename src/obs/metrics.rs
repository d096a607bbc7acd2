// self
use crate::obs::{ComponentKind, Outcome};

/// Records a component outcome via the global metrics recorder (when enabled).
pub fn record_outcome(component: ComponentKind, outcome: Outcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"sync_core_operation_total",
			"component" => component.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (component, outcome);
	}
}

/// Records a retry attempt count for a logical call once it settles.
pub fn record_attempts(component: ComponentKind, attempts: u32) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!("sync_core_attempts", "component" => component.as_str())
			.record(attempts as f64);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (component, attempts);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_outcome_noop_without_metrics() {
		record_outcome(ComponentKind::Transport, Outcome::Failure);
		record_attempts(ComponentKind::Transport, 4);
	}
}
