//! Exercises the sync orchestrator (C3) across strategy/caching/priority boundaries the way a
//! real C7 caller would: through [`SyncOrchestrator::dispatch`] only, never touching its private
//! cache/singleflight state directly.

use std::sync::{
	atomic::{AtomicU32, Ordering},
	Arc,
};

use ledger_sync_core::{
	auth::TenantId,
	cancel::CancelToken,
	config::SyncCoreConfig,
	error::{Error, TransientError},
	orchestrator::{SyncOrchestrator, SyncPriority, SyncStrategy},
};

fn tenant(id: &str) -> TenantId {
	TenantId::new(id).expect("Tenant fixture should be valid.")
}

fn orchestrator() -> SyncOrchestrator {
	SyncOrchestrator::new(SyncCoreConfig::builder().build().expect("Default config should validate."))
}

#[tokio::test]
async fn data_fetch_caches_across_tenants_independently() {
	let orchestrator = orchestrator();
	let calls = Arc::new(AtomicU32::new(0));

	for t in ["t1", "t2"] {
		let calls = calls.clone();
		let call = move || {
			let calls = calls.clone();

			async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Ok::<_, Error>(1_u32)
			}
		};

		orchestrator
			.dispatch(&tenant(t), "list_invoices", 0, SyncStrategy::DataFetch, SyncPriority::Medium, &CancelToken::new(), call)
			.await
			.expect("Dispatch should succeed.");
	}

	// Two distinct tenants share no cache slot: each was actually called once.
	assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn data_sync_dedups_concurrent_identical_calls_but_does_not_cache_afterward() {
	let orchestrator = Arc::new(orchestrator());
	let calls = Arc::new(AtomicU32::new(0));
	let make_call = |calls: Arc<AtomicU32>| {
		move || {
			let calls = calls.clone();

			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				tokio::time::sleep(std::time::Duration::from_millis(20)).await;

				Ok::<_, Error>(7_u32)
			}
		}
	};

	let first = {
		let orchestrator = orchestrator.clone();
		let calls = calls.clone();

		tokio::spawn(async move {
			orchestrator
				.dispatch(&tenant("t1"), "list_vendors", 0, SyncStrategy::DataSync, SyncPriority::Medium, &CancelToken::new(), make_call(calls))
				.await
		})
	};
	let second = {
		let orchestrator = orchestrator.clone();
		let calls = calls.clone();

		tokio::spawn(async move {
			orchestrator
				.dispatch(&tenant("t1"), "list_vendors", 0, SyncStrategy::DataSync, SyncPriority::Medium, &CancelToken::new(), make_call(calls))
				.await
		})
	};

	let (r1, r2) = tokio::join!(first, second);

	assert_eq!(r1.expect("Task should not panic.").expect("Dispatch should succeed."), 7);
	assert_eq!(r2.expect("Task should not panic.").expect("Dispatch should succeed."), 7);
	assert_eq!(calls.load(Ordering::SeqCst), 1, "concurrent identical data-sync calls should singleflight");

	// `data-sync` never caches, so a later call after both finish executes again.
	orchestrator
		.dispatch(&tenant("t1"), "list_vendors", 0, SyncStrategy::DataSync, SyncPriority::Medium, &CancelToken::new(), make_call(calls.clone()))
		.await
		.expect("Dispatch should succeed.");

	assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_failure_retries_up_to_configured_budget_then_succeeds() {
	let orchestrator = orchestrator();
	let attempts = Arc::new(AtomicU32::new(0));
	let attempts_clone = attempts.clone();
	let call = move || {
		let attempts = attempts_clone.clone();

		async move {
			let n = attempts.fetch_add(1, Ordering::SeqCst);

			if n < 2 {
				Err(Error::Transient(TransientError::LedgerResponse {
					message: "temporary".into(),
					status: Some(503),
					retry_after: None,
				}))
			} else {
				Ok::<_, Error>(99_u32)
			}
		}
	};

	let result = orchestrator
		.dispatch(&tenant("t1"), "get_company_info", 0, SyncStrategy::Immediate, SyncPriority::High, &CancelToken::new(), call)
		.await
		.expect("Dispatch should eventually succeed within the retry budget.");

	assert_eq!(result, 99);
	assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_failure_is_surfaced_immediately_without_retry() {
	let orchestrator = orchestrator();
	let attempts = Arc::new(AtomicU32::new(0));
	let attempts_clone = attempts.clone();
	let call = move || {
		let attempts = attempts_clone.clone();

		async move {
			attempts.fetch_add(1, Ordering::SeqCst);

			Err::<u32, _>(Error::Permanent { reason: "mapper rejected the payload".into() })
		}
	};

	let err = orchestrator
		.dispatch(&tenant("t1"), "update_bill", 0, SyncStrategy::Immediate, SyncPriority::High, &CancelToken::new(), call)
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Permanent { .. }));
	assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
