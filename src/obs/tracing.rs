// self
use crate::{_prelude::*, obs::ComponentKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// A span builder used by every sync-core component.
#[derive(Clone, Debug)]
pub struct ComponentSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl ComponentSpan {
	/// Creates a new span tagged with the provided component kind and stage.
	pub fn new(component: ComponentKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"sync_core.call",
				component = component.as_str(),
				stage,
				tenant = tracing::field::Empty,
				operation = tracing::field::Empty,
				strategy = tracing::field::Empty,
				priority = tracing::field::Empty,
				attempt = tracing::field::Empty,
				classification = tracing::field::Empty,
				job_id = tracing::field::Empty,
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (component, stage);

			Self {}
		}
	}

	/// Records a field on the span after construction (tenant id, job id, attempt count, ...).
	pub fn record(&self, field: &'static str, value: &str) -> &Self {
		#[cfg(feature = "tracing")]
		{
			self.span.record(field, value);
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (field, value);
		}

		self
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> ComponentSpanGuard {
		#[cfg(feature = "tracing")]
		{
			ComponentSpanGuard { guard: self.span.entered() }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = self;

			ComponentSpanGuard {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// RAII guard returned by [`ComponentSpan::entered`].
pub struct ComponentSpanGuard {
	#[cfg(feature = "tracing")]
	#[allow(dead_code)]
	guard: tracing::span::EnteredSpan,
}
impl Debug for ComponentSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ComponentSpanGuard(..)")
	}
}
