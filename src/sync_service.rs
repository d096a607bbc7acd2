//! Sync Service (C7): a per-tenant facade composing credentials (C1), transport (C2), the
//! orchestrator (C3), the mirror (C4), the transaction log (C5), and the mapper (C6) into one
//! atomic map → diff → upsert → log call per entity operation (§4.7).

// self
use crate::{
	_prelude::*,
	auth::TenantId,
	credentials::CredentialService,
	error::{Error, TransientError},
	http::OAuthHttpClient,
	mapper::{self, WireEntity},
	mirror::{EntityKind, MirrorRow, MirrorStore, UpsertOutcome},
	obs::{self, ComponentKind, ComponentSpan, Outcome},
	orchestrator::{SyncOrchestrator, SyncPriority, SyncStrategy},
	transport::{Classification, LedgerHttpClient, LedgerRequest, LedgerResponse, RateLimitedTransport},
	txlog::{NewTransactionLogEntry, Source, TransactionLogStore, TransactionType},
};

/// Outcome of [`SyncService::sync_entity_with_log`]: the stored row plus the audit entry that
/// recorded it. `log_entry_id` is `None` only when the mirror dropped the write as stale
/// (§4.4) — nothing mutated, so nothing was logged.
#[derive(Clone, Debug)]
pub struct SyncResult {
	/// The mirror row as it now stands.
	pub row: MirrorRow,
	/// Id of the transaction log entry recording this sync, if a mutation actually occurred.
	pub log_entry_id: Option<u64>,
}

/// C7: the per-tenant entry point higher layers call into.
pub struct SyncService<C: LedgerHttpClient, H: OAuthHttpClient> {
	tenant: TenantId,
	realm: String,
	#[allow(dead_code)]
	credentials: Arc<CredentialService<H>>,
	transport: Arc<RateLimitedTransport<C, CredentialService<H>>>,
	orchestrator: Arc<SyncOrchestrator>,
	mirror: Arc<dyn MirrorStore>,
	txlog: Arc<dyn TransactionLogStore>,
}
impl<C, H> SyncService<C, H>
where
	C: LedgerHttpClient + 'static,
	H: OAuthHttpClient + 'static,
{
	/// Builds a facade bound to one tenant and realm, backed by the given shared components.
	pub fn new(
		tenant: TenantId,
		realm: impl Into<String>,
		credentials: Arc<CredentialService<H>>,
		transport: Arc<RateLimitedTransport<C, CredentialService<H>>>,
		orchestrator: Arc<SyncOrchestrator>,
		mirror: Arc<dyn MirrorStore>,
		txlog: Arc<dyn TransactionLogStore>,
	) -> Self {
		Self { tenant, realm: realm.into(), credentials, transport, orchestrator, mirror, txlog }
	}

	/// *get-bills-by-due-days(due-days)*: bills due within `due_days`; strategy = data-fetch,
	/// priority = high.
	pub async fn get_bills_by_due_days(&self, due_days: i64, cancel: &CancelToken) -> Result<Vec<WireEntity>, Error> {
		let cutoff = (OffsetDateTime::now_utc() + Duration::days(due_days)).date();
		let query = format!("SELECT * FROM Bill WHERE DueDate <= '{cutoff}' ORDER BY DueDate ASC");
		let args_hash = SyncOrchestrator::hash_args(&query);
		let request = LedgerRequest::get(EntityKind::Bill.as_str()).with_query(query);

		self
			.call_list(
				"get_bills_by_due_days",
				"Bill",
				SyncStrategy::DataFetch,
				SyncPriority::High,
				args_hash,
				request,
				cancel,
			)
			.await
	}

	/// Lists every active invoice; strategy = data-sync.
	pub async fn list_invoices(&self, cancel: &CancelToken) -> Result<Vec<WireEntity>, Error> {
		let request = LedgerRequest::get(EntityKind::Invoice.as_str());

		self
			.call_list("list_invoices", "Invoice", SyncStrategy::DataSync, SyncPriority::Medium, 0, request, cancel)
			.await
	}

	/// Lists every active vendor; strategy = data-sync.
	pub async fn list_vendors(&self, cancel: &CancelToken) -> Result<Vec<WireEntity>, Error> {
		let request = LedgerRequest::get(EntityKind::Vendor.as_str());

		self
			.call_list("list_vendors", "Vendor", SyncStrategy::DataSync, SyncPriority::Medium, 0, request, cancel)
			.await
	}

	/// Lists every active customer; strategy = data-sync.
	pub async fn list_customers(&self, cancel: &CancelToken) -> Result<Vec<WireEntity>, Error> {
		let request = LedgerRequest::get(EntityKind::Customer.as_str());

		self
			.call_list("list_customers", "Customer", SyncStrategy::DataSync, SyncPriority::Medium, 0, request, cancel)
			.await
	}

	/// Lists the chart of accounts; strategy = scheduled (changes rarely).
	pub async fn list_accounts(&self, cancel: &CancelToken) -> Result<Vec<WireEntity>, Error> {
		let request = LedgerRequest::get(EntityKind::Account.as_str());

		self
			.call_list("list_accounts", "Account", SyncStrategy::Scheduled, SyncPriority::Low, 0, request, cancel)
			.await
	}

	/// Fetches the tenant's company info record; strategy = data-fetch.
	pub async fn get_company_info(&self, cancel: &CancelToken) -> Result<WireEntity, Error> {
		let request = LedgerRequest::get(format!("companyinfo/{}", self.realm));

		self
			.call_single(
				"get_company_info",
				"CompanyInfo",
				SyncStrategy::DataFetch,
				SyncPriority::Medium,
				0,
				request,
				cancel,
			)
			.await
	}

	/// *record-payment(payment-data)*: creates a payment; strategy = immediate, priority = high.
	/// Rejects `source`s with no wired transport (§9: `payment-rail`/`bank-rail`) before issuing
	/// any HTTP call.
	pub async fn record_payment(
		&self,
		payment: WireEntity,
		source: Source,
		cancel: &CancelToken,
	) -> Result<WireEntity, Error> {
		ensure_source_routable(source)?;

		let args_hash = SyncOrchestrator::hash_args(&payment.id);
		let body = serde_json::to_vec(&payment)
			.map_err(|e| Error::Validation { reason: format!("payment payload could not be encoded: {e}") })?;
		let request = LedgerRequest::post("payments", body);

		self
			.call_single(
				"record_payment",
				"Payment",
				SyncStrategy::Immediate,
				SyncPriority::High,
				args_hash,
				request,
				cancel,
			)
			.await
	}

	/// Fetches one payment by id; strategy = on-demand.
	pub async fn get_payment(&self, payment_id: &str, cancel: &CancelToken) -> Result<WireEntity, Error> {
		let args_hash = SyncOrchestrator::hash_args(payment_id);
		let request = LedgerRequest::get(format!("payments/{payment_id}"));

		self
			.call_single(
				"get_payment",
				"Payment",
				SyncStrategy::OnDemand,
				SyncPriority::Medium,
				args_hash,
				request,
				cancel,
			)
			.await
	}

	/// Voids a previously recorded payment; strategy = immediate, priority = high.
	pub async fn void_payment(&self, payment_id: &str, cancel: &CancelToken) -> Result<WireEntity, Error> {
		let args_hash = SyncOrchestrator::hash_args(payment_id);
		let request = LedgerRequest::post(format!("payments/{payment_id}/void"), Vec::new());

		self
			.call_single(
				"void_payment",
				"Payment",
				SyncStrategy::Immediate,
				SyncPriority::High,
				args_hash,
				request,
				cancel,
			)
			.await
	}

	/// Approves or updates a bill; strategy = immediate, priority = high.
	pub async fn update_bill(
		&self,
		bill_id: &str,
		bill: WireEntity,
		cancel: &CancelToken,
	) -> Result<WireEntity, Error> {
		let args_hash = SyncOrchestrator::hash_args(bill_id);
		let body = serde_json::to_vec(&bill)
			.map_err(|e| Error::Validation { reason: format!("bill payload could not be encoded: {e}") })?;
		let request = LedgerRequest::put(format!("bills/{bill_id}"), body);

		self
			.call_single(
				"update_bill",
				"Bill",
				SyncStrategy::Immediate,
				SyncPriority::High,
				args_hash,
				request,
				cancel,
			)
			.await
	}

	/// *health-check()*: probes the ledger via company info; strategy = on-demand. Ledger-level
	/// rejections (bad credentials, permanent errors) resolve to `Ok(false)` rather than an
	/// error — only transport/configuration failures propagate.
	pub async fn health_check(&self, cancel: &CancelToken) -> Result<bool, Error> {
		match self.get_company_info(cancel).await {
			Ok(_) => Ok(true),
			Err(Error::Permanent { .. })
			| Err(Error::TokenInvalid { .. })
			| Err(Error::CredentialsUnavailable { .. })
			| Err(Error::RateLimited { .. }) => Ok(false),
			Err(other) => Err(other),
		}
	}

	/// *sync-X-with-log*: maps `wire_payload`, upserts it into the mirror, and appends exactly
	/// one transaction log entry for the resulting mutation. This is the atomic core every
	/// write-path sync method composes (§4.7, §4.5).
	pub async fn sync_entity_with_log(
		&self,
		kind: EntityKind,
		wire_payload: WireEntity,
		transaction_type: TransactionType,
		source: Source,
		actor_user_id: Option<String>,
		session_id: Option<String>,
		reason: impl Into<String>,
		cancel: &CancelToken,
	) -> Result<SyncResult, Error> {
		ensure_source_routable(source)?;

		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let span = ComponentSpan::new(ComponentKind::SyncService, "sync_entity_with_log");

		span.record("tenant", self.tenant.as_ref());
		span.record("operation", kind.as_str());

		let _entered = span.entered();

		let new_row = mapper::from_wire(&self.tenant, kind, &wire_payload)?;
		let wire_json = serde_json::to_value(&wire_payload).unwrap_or(serde_json::Value::Null);
		let external_id = new_row.external_id.clone();
		let sync_token = new_row.sync_token;

		// The mirror write and the log append are not joined in one storage transaction — the
		// mirror and transaction-log backends can be entirely different storage engines. Instead,
		// a failed append (or a cancellation observed after the mirror write already committed) is
		// compensated by reverting the mirror to its pre-upsert state via `MirrorStore::revert`.
		let outcome = self.mirror.upsert(new_row).await?;
		let revert_outcome = outcome.clone();

		let (row, diff) = match outcome {
			UpsertOutcome::Inserted(row) => (row, BTreeMap::new()),
			UpsertOutcome::Updated { before, after } => {
				let diff = mapper::diff(&before, &after);

				(after, diff)
			},
			UpsertOutcome::StaleIgnored { current } => {
				obs::record_outcome(ComponentKind::Mirror, Outcome::StaleWriteIgnored);

				return Ok(SyncResult { row: current, log_entry_id: None });
			},
		};

		if cancel.is_cancelled() {
			self.mirror.revert(revert_outcome).await?;

			return Err(Error::Cancelled);
		}

		let append = self
			.txlog
			.append(NewTransactionLogEntry {
				tenant: self.tenant.clone(),
				entity_kind: kind,
				entity_local_id: external_id,
				transaction_type,
				source,
				external_id: Some(row.external_id.clone()),
				external_sync_token: Some(sync_token),
				wire_payload: wire_json,
				diff,
				actor_user_id,
				session_id,
				reason: reason.into(),
				metadata: serde_json::json!({}),
			})
			.await;

		let entry = match append {
			Ok(entry) => entry,
			Err(error) => {
				self.mirror.revert(revert_outcome).await?;

				return Err(error.into());
			},
		};

		obs::record_outcome(ComponentKind::SyncService, Outcome::Success);

		Ok(SyncResult { row, log_entry_id: Some(entry.entry_id) })
	}

	async fn call_list(
		&self,
		operation: &'static str,
		collection_key: &'static str,
		strategy: SyncStrategy,
		priority: SyncPriority,
		args_hash: u64,
		request: LedgerRequest,
		cancel: &CancelToken,
	) -> Result<Vec<WireEntity>, Error> {
		let transport = self.transport.clone();
		let tenant = self.tenant.clone();
		let call_cancel = cancel.clone();

		self
			.orchestrator
			.dispatch(&self.tenant, operation, args_hash, strategy, priority, cancel, move || {
				let transport = transport.clone();
				let tenant = tenant.clone();
				let request = request.clone();
				let cancel = call_cancel.clone();

				async move {
					let response = fetch_once(&transport, &tenant, operation, &request, &cancel).await?;

					unwrap_collection(&response.body, collection_key, response.status)
				}
			})
			.await
	}

	async fn call_single(
		&self,
		operation: &'static str,
		entity_key: &'static str,
		strategy: SyncStrategy,
		priority: SyncPriority,
		args_hash: u64,
		request: LedgerRequest,
		cancel: &CancelToken,
	) -> Result<WireEntity, Error> {
		let transport = self.transport.clone();
		let tenant = self.tenant.clone();
		let call_cancel = cancel.clone();

		self
			.orchestrator
			.dispatch(&self.tenant, operation, args_hash, strategy, priority, cancel, move || {
				let transport = transport.clone();
				let tenant = tenant.clone();
				let request = request.clone();
				let cancel = call_cancel.clone();

				async move {
					let response = fetch_once(&transport, &tenant, operation, &request, &cancel).await?;

					unwrap_entity(&response.body, entity_key, response.status)
				}
			})
			.await
	}
}

fn ensure_source_routable(source: Source) -> Result<(), Error> {
	match source {
		Source::PaymentRail => Err(rail_not_wired("payment-rail")),
		Source::BankRail => Err(rail_not_wired("bank-rail")),
		Source::ExternalLedger | Source::User | Source::System => Ok(()),
	}
}

fn rail_not_wired(rail: &str) -> Error {
	Error::Permanent { reason: format!("{rail} not wired: no transport implementation exists for this source") }
}

async fn fetch_once<C: LedgerHttpClient, H: OAuthHttpClient>(
	transport: &RateLimitedTransport<C, CredentialService<H>>,
	tenant: &TenantId,
	operation: &'static str,
	request: &LedgerRequest,
	cancel: &CancelToken,
) -> Result<LedgerResponse, Error> {
	match transport.execute(tenant, operation, request, cancel).await {
		Classification::Success(response) => Ok(response),
		classification => {
			Err(Option::<Error>::from(classification)
				.unwrap_or_else(|| Error::Permanent { reason: "ledger returned an unclassified response".into() }))
		},
	}
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8], status: u16) -> Result<T, Error> {
	let mut deserializer = serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| Error::Transient(TransientError::ResponseParse { source, status: Some(status) }))
}

fn unwrap_collection(body: &[u8], key: &str, status: u16) -> Result<Vec<WireEntity>, Error> {
	let envelope: serde_json::Value = parse_json(body, status)?;
	let items = envelope
		.get("QueryResponse")
		.and_then(|qr| qr.get(key))
		.cloned()
		.unwrap_or_else(|| serde_json::Value::Array(Vec::new()));

	serde_json::from_value(items)
		.map_err(|e| Error::Permanent { reason: format!("malformed `{key}` entity in ledger response: {e}") })
}

fn unwrap_entity(body: &[u8], key: &str, status: u16) -> Result<WireEntity, Error> {
	let envelope: serde_json::Value = parse_json(body, status)?;
	let entity = envelope.get(key).cloned().unwrap_or(envelope);

	serde_json::from_value(entity)
		.map_err(|e| Error::Permanent { reason: format!("malformed `{key}` payload in ledger response: {e}") })
}
