//! Literal end-to-end scenarios seeded into the test suite (S1-S6), each driving [`SyncService`]
//! the way an embedding application would: fetch through C7, then fold each returned entity
//! through `sync_entity_with_log`.

use std::{
	future::Future,
	pin::Pin,
	sync::{Arc, Mutex},
};

use ledger_sync_core::{
	auth::{TenantId, TokenRecord},
	cancel::CancelToken,
	config::SyncCoreConfig,
	credentials::{CredentialService, CredentialStore, MemoryCredentialStore, OAuthEndpoints},
	error::{Error, TransportError},
	http::{OAuthCallFuture, OAuthHttpClient, ResponseMetadata},
	jobs::{
		store::{Job, JobStore, MemoryJobStore},
		JobHandler, JobRunner, NewJob,
	},
	mirror::{EntityKind, MemoryMirrorStore, MirrorStore},
	orchestrator::SyncOrchestrator,
	sync_service::SyncService,
	transport::{LedgerHttpClient, LedgerRequest, LedgerResponse, RateLimitedTransport},
	txlog::{MemoryTransactionLogStore, Source, TransactionLogStore, TransactionType},
};
use time::Duration;
use url::Url;

fn tenant() -> TenantId {
	TenantId::new("t1").expect("Tenant fixture should be valid.")
}

#[derive(Clone)]
struct NoopOAuthHttp;
impl OAuthHttpClient for NoopOAuthHttp {
	fn post_form<'a>(&'a self, _url: &'a Url, _form: &'a [(&'a str, &'a str)]) -> OAuthCallFuture<'a> {
		Box::pin(async move { Ok((ResponseMetadata { status: Some(200), retry_after: None }, Vec::new())) })
	}
}

/// Counts refresh-grant calls and sleeps before responding, so two concurrent callers racing on
/// an expired token actually overlap rather than serializing by accident.
#[derive(Clone, Default)]
struct CountingOAuthHttp {
	calls: Arc<Mutex<u32>>,
}
impl OAuthHttpClient for CountingOAuthHttp {
	fn post_form<'a>(&'a self, _url: &'a Url, _form: &'a [(&'a str, &'a str)]) -> OAuthCallFuture<'a> {
		let calls = self.calls.clone();

		Box::pin(async move {
			*calls.lock().expect("Mutex should not be poisoned.") += 1;
			tokio::time::sleep(std::time::Duration::from_millis(20)).await;

			let body = serde_json::json!({"access_token": "refreshed-token", "expires_in": 3600}).to_string();

			Ok((ResponseMetadata { status: Some(200), retry_after: None }, body.into_bytes()))
		})
	}
}

/// Canned-response ledger fixture; each queued response is consumed in order, regardless of
/// which path/operation requested it (the scenarios below issue one call at a time).
#[derive(Clone, Default)]
struct ScriptedLedger {
	responses: Arc<Mutex<Vec<(u16, String)>>>,
}
impl ScriptedLedger {
	fn new(responses: Vec<(u16, String)>) -> Self {
		Self { responses: Arc::new(Mutex::new(responses)) }
	}
}
impl LedgerHttpClient for ScriptedLedger {
	fn call<'a>(
		&'a self,
		_bearer: &'a str,
		_request: &'a LedgerRequest,
	) -> Pin<Box<dyn Future<Output = Result<LedgerResponse, TransportError>> + Send + 'a>> {
		let responses = self.responses.clone();

		Box::pin(async move {
			let (status, body) = responses.lock().expect("Mutex should not be poisoned.").remove(0);

			Ok(LedgerResponse { status, retry_after: None, body: body.into_bytes() })
		})
	}
}

async fn service_with_responses(
	responses: Vec<(u16, String)>,
) -> (SyncService<ScriptedLedger, NoopOAuthHttp>, Arc<dyn MirrorStore>, Arc<dyn TransactionLogStore>) {
	let credential_store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
	let record = TokenRecord::builder(tenant(), "realm-1")
		.access_token("token")
		.expires_in(Duration::hours(1))
		.build()
		.expect("Fixture token record should build.");

	credential_store.save(record).await.expect("Save should succeed.");

	let endpoints = OAuthEndpoints {
		token_url: Url::parse("https://ledger.example.test/oauth2/token").expect("Fixture URL should parse."),
		client_id: "client".into(),
		client_secret: "secret".into(),
		refresh_skew: Duration::minutes(5),
	};
	let credentials = Arc::new(CredentialService::new(credential_store, NoopOAuthHttp, endpoints));
	let transport = Arc::new(RateLimitedTransport::new(ScriptedLedger::new(responses), credentials.clone(), 500, 60, 30));
	let orchestrator = Arc::new(SyncOrchestrator::new(SyncCoreConfig::builder().build().expect("Default config should build.")));
	let mirror: Arc<dyn MirrorStore> = Arc::new(MemoryMirrorStore::default());
	let txlog: Arc<dyn TransactionLogStore> = Arc::new(MemoryTransactionLogStore::default());
	let service = SyncService::new(tenant(), "realm-1", credentials, transport, orchestrator, mirror.clone(), txlog.clone());

	(service, mirror, txlog)
}

/// Folds every bill returned by a `get_bills_by_due_days` fetch through the atomic C7 sync core,
/// the way a `sync_bills` job handler (§4.8) would.
async fn sync_bills(service: &SyncService<ScriptedLedger, NoopOAuthHttp>, due_days: i64) -> Vec<u64> {
	let bills = service.get_bills_by_due_days(due_days, &CancelToken::new()).await.expect("Fetch should succeed.");
	let mut log_ids = Vec::new();

	for bill in bills {
		let result = service
			.sync_entity_with_log(
				EntityKind::Bill,
				bill,
				TransactionType::Synced,
				Source::ExternalLedger,
				None,
				None,
				"scheduled sync",
				&CancelToken::new(),
			)
			.await
			.expect("Sync should succeed.");

		if let Some(id) = result.log_entry_id {
			log_ids.push(id);
		}
	}

	log_ids
}

fn bill_envelope(id: &str, sync_token: &str, total_amt: &str, due_date: Option<&str>) -> String {
	let due = match due_date {
		Some(d) => format!(r#","DueDate":"{d}""#),
		None => String::new(),
	};

	format!(r#"{{"QueryResponse":{{"Bill":[{{"Id":"{id}","SyncToken":"{sync_token}","TotalAmt":"{total_amt}"{due}}}]}}}}"#)
}

#[tokio::test]
async fn s1_fresh_bill_sync() {
	let (service, mirror, txlog) =
		service_with_responses(vec![(200, bill_envelope("B1", "0", "100.00", Some("2024-02-15")))]).await;
	let log_ids = sync_bills(&service, 30).await;

	assert_eq!(log_ids.len(), 1);

	let row = mirror.get(&tenant(), EntityKind::Bill, "B1").await.expect("Get should succeed.").expect("Row should exist.");

	assert_eq!(row.sync_token, 0);
	assert_eq!(row.amount_cents, Some(10000));

	let entries = txlog.query(&tenant(), EntityKind::Bill, "B1").await.expect("Query should succeed.");

	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].transaction_type, TransactionType::Synced);
	assert_eq!(entries[0].source, Source::ExternalLedger);
	assert_eq!(entries[0].external_id.as_deref(), Some("B1"));
}

#[tokio::test]
async fn s2_stale_update_is_dropped() {
	let (service, mirror, txlog) = service_with_responses(vec![
		(200, bill_envelope("B1", "0", "100.00", None)),
		(200, bill_envelope("B1", "0", "999.00", None)),
	])
	.await;

	sync_bills(&service, 30).await;
	let log_ids = sync_bills(&service, 30).await;

	assert!(log_ids.is_empty(), "a stale sync-token write must not append a log entry");

	let row = mirror.get(&tenant(), EntityKind::Bill, "B1").await.expect("Get should succeed.").expect("Row should exist.");

	assert_eq!(row.amount_cents, Some(10000), "stale write must not change the stored amount");

	let entries = txlog.query(&tenant(), EntityKind::Bill, "B1").await.expect("Query should succeed.");

	assert_eq!(entries.len(), 1, "only the first, non-stale sync produced a log entry");
}

#[tokio::test]
async fn s3_newer_update_is_applied_with_diff() {
	let (service, mirror, txlog) = service_with_responses(vec![
		(200, bill_envelope("B1", "0", "100.00", None)),
		(200, bill_envelope("B1", "1", "150.00", None)),
	])
	.await;

	sync_bills(&service, 30).await;
	sync_bills(&service, 30).await;

	let row = mirror.get(&tenant(), EntityKind::Bill, "B1").await.expect("Get should succeed.").expect("Row should exist.");

	assert_eq!(row.sync_token, 1);
	assert_eq!(row.amount_cents, Some(15000));

	let entries = txlog.query(&tenant(), EntityKind::Bill, "B1").await.expect("Query should succeed.");

	assert_eq!(entries.len(), 2);

	let diff = &entries[1].diff;

	assert_eq!(diff["amount_cents"].0, serde_json::json!(10000));
	assert_eq!(diff["amount_cents"].1, serde_json::json!(15000));
	assert_eq!(diff["sync_token"].0, serde_json::json!(0));
	assert_eq!(diff["sync_token"].1, serde_json::json!(1));
}

#[tokio::test]
async fn s4_second_caller_waits_out_the_rate_limit_window_then_succeeds() {
	let credential_store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
	let record = TokenRecord::builder(tenant(), "realm-1")
		.access_token("token")
		.expires_in(Duration::hours(1))
		.build()
		.expect("Fixture token record should build.");

	credential_store.save(record).await.expect("Save should succeed.");

	let endpoints = OAuthEndpoints {
		token_url: Url::parse("https://ledger.example.test/oauth2/token").expect("Fixture URL should parse."),
		client_id: "client".into(),
		client_secret: "secret".into(),
		refresh_skew: Duration::minutes(5),
	};
	let credentials = Arc::new(CredentialService::new(credential_store, NoopOAuthHttp, endpoints));
	// Global bucket capacity 1 request per minute: the second call must wait for a refill.
	let transport = Arc::new(RateLimitedTransport::new(
		ScriptedLedger::new(vec![(200, bill_envelope("B1", "0", "1.00", None)), (200, bill_envelope("B2", "0", "2.00", None))]),
		credentials,
		1,
		60,
		30,
	));

	let first = transport.execute(&tenant(), "get_bills", &LedgerRequest::get("bills"), &CancelToken::new()).await;

	assert!(matches!(first, ledger_sync_core::transport::Classification::Success(_)));

	// The second call against an exhausted global bucket still eventually succeeds; it must not
	// be dropped or duplicated, only delayed.
	let second = transport.execute(&tenant(), "get_bills", &LedgerRequest::get("bills"), &CancelToken::new()).await;

	assert!(matches!(second, ledger_sync_core::transport::Classification::Success(_)));
}

#[tokio::test]
async fn s5_concurrent_callers_share_the_one_in_flight_refresh() {
	let credential_store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
	// Already past the refresh skew: the very first `get_valid_token` call must refresh.
	let record = TokenRecord::builder(tenant(), "realm-1")
		.access_token("stale-token")
		.refresh_token("refresh-token")
		.expires_in(Duration::seconds(1))
		.build()
		.expect("Fixture token record should build.");

	credential_store.save(record).await.expect("Save should succeed.");

	let endpoints = OAuthEndpoints {
		token_url: Url::parse("https://ledger.example.test/oauth2/token").expect("Fixture URL should parse."),
		client_id: "client".into(),
		client_secret: "secret".into(),
		refresh_skew: Duration::minutes(5),
	};
	let http = CountingOAuthHttp::default();
	let credentials = Arc::new(CredentialService::new(credential_store, http.clone(), endpoints));
	let t = tenant();
	let (first, second) = tokio::join!(credentials.get_valid_token(&t), credentials.get_valid_token(&t));

	assert_eq!(first.expect("First caller should succeed.").expose(), "refreshed-token");
	assert_eq!(second.expect("Second caller should succeed.").expose(), "refreshed-token");
	assert_eq!(
		*http.calls.lock().expect("Mutex should not be poisoned."),
		1,
		"two callers racing on the same expired token must share one in-flight refresh"
	);
}

#[tokio::test]
async fn s6_payment_idempotency_through_the_job_runner() {
	struct RecordPaymentHandler {
		service: Arc<SyncService<ScriptedLedger, NoopOAuthHttp>>,
		calls: Arc<Mutex<u32>>,
	}
	impl JobHandler for RecordPaymentHandler {
		fn call<'a>(&'a self, _job: &'a Job) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, Error>> + Send + 'a>> {
			Box::pin(async move {
				*self.calls.lock().expect("Mutex should not be poisoned.") += 1;

				let payment = ledger_sync_core::mapper::WireEntity {
					id: "ignored-by-ledger".into(),
					sync_token: "0".into(),
					..Default::default()
				};
				let recorded =
					self.service.record_payment(payment, Source::ExternalLedger, &CancelToken::new()).await?;

				Ok(serde_json::json!({"external_id": recorded.id}))
			})
		}
	}

	let (service, ..) = service_with_responses(vec![(200, r#"{"Payment":{"Id":"P1","SyncToken":"0"}}"#.into())]).await;
	let job_store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::default());
	let calls = Arc::new(Mutex::new(0_u32));
	let handler = Arc::new(RecordPaymentHandler { service: Arc::new(service), calls: calls.clone() });
	let runner = JobRunner::new(job_store, 3).with_handler("record_payment", handler);
	let submit_payment = |runner: &JobRunner| {
		runner.submit(NewJob {
			tenant: Some(tenant()),
			idempotency_key: Some("record-payment:bill-B1:client-marker-1".into()),
			function_name: "record_payment".into(),
			arguments: serde_json::json!({"bill_id": "B1", "amount_cents": 5000}),
		})
	};

	let first_id = submit_payment(&runner).await.expect("First submission should succeed.");

	runner.run_once().await.expect("run_once should succeed.");

	let second_id = submit_payment(&runner).await.expect("Retried submission should succeed.");

	assert_eq!(first_id, second_id, "retrying with the same idempotency marker returns the existing job");
	assert_eq!(*calls.lock().expect("Mutex should not be poisoned."), 1, "the handler, and so the POST, ran exactly once");
}
