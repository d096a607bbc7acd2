//! Cooperative cancellation signal threaded through every long-running C2/C3/C7 call path (§5:
//! "every long-running operation accepts a cancellation signal").

// crates.io
use tokio_util::sync::CancellationToken;

/// Cloneable cancellation signal. Cancelling any clone cancels every clone derived from it.
///
/// Call sites that race an in-flight await against cancellation use [`Self::cancelled`] inside a
/// `tokio::select!`; call sites that only need a cheap pre-flight check use
/// [`Self::is_cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken(CancellationToken);
impl CancelToken {
	/// Builds a token that has not been cancelled.
	pub fn new() -> Self {
		Self::default()
	}

	/// Signals cancellation to this token and every clone of it.
	pub fn cancel(&self) {
		self.0.cancel();
	}

	/// Returns `true` once [`Self::cancel`] has been called on this token or an ancestor it was
	/// derived from via [`Self::child_token`].
	pub fn is_cancelled(&self) -> bool {
		self.0.is_cancelled()
	}

	/// Resolves once [`Self::cancel`] fires; awaited inside `tokio::select!` to abort an
	/// in-flight operation.
	pub async fn cancelled(&self) {
		self.0.cancelled().await;
	}

	/// Builds a child token: cancelled whenever `self` is, but independently cancellable without
	/// affecting `self` or its other children.
	pub fn child_token(&self) -> Self {
		Self(self.0.child_token())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn fresh_token_is_not_cancelled() {
		assert!(!CancelToken::new().is_cancelled());
	}

	#[test]
	fn cancel_is_observed_by_every_clone() {
		let token = CancelToken::new();
		let clone = token.clone();

		token.cancel();

		assert!(clone.is_cancelled());
	}

	#[test]
	fn child_token_observes_parent_cancellation() {
		let parent = CancelToken::new();
		let child = parent.child_token();

		parent.cancel();

		assert!(child.is_cancelled());
	}

	#[tokio::test]
	async fn cancelled_future_resolves_after_cancel() {
		let token = CancelToken::new();
		let waiter = token.clone();

		tokio::spawn(async move {
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
			waiter.cancel();
		});

		token.cancelled().await;

		assert!(token.is_cancelled());
	}
}
