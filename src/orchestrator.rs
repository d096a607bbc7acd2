//! Sync Orchestrator (C3): decides, per logical call, how aggressively to attempt it and
//! whether a cached result suffices. Every C7 method routes through [`SyncOrchestrator::dispatch`]
//! rather than calling C2 directly (§9 redesign: "Scattered retry policy").

// std
use std::collections::BinaryHeap;
// self
use crate::{
	_prelude::*,
	auth::TenantId,
	config::SyncCoreConfig,
	error::Error,
	obs::{self, ComponentKind, ComponentSpan, Outcome},
	transport::backoff_delay,
};

/// How aggressively a call is cached and deduplicated (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
	/// No caching, no delay. Writes and status probes.
	Immediate,
	/// No caching, deduplicated against in-flight identical requests.
	DataSync,
	/// Cached with the default (`cache_ttl_data_fetch`) TTL. Bulk reads.
	DataFetch,
	/// Cached with a short, fixed TTL. Reports.
	OnDemand,
	/// Cached with the long (`cache_ttl_scheduled`) TTL. Used by the background job runner.
	Scheduled,
}
impl SyncStrategy {
	/// Fixed TTL for the `on-demand` strategy; not configurable, per §4.3.
	const ON_DEMAND_TTL: Duration = Duration::seconds(15);

	fn is_cacheable(self) -> bool {
		matches!(self, SyncStrategy::DataFetch | SyncStrategy::OnDemand | SyncStrategy::Scheduled)
	}

	/// Whether concurrent identical calls should be coalesced into one in-flight attempt.
	/// Writes (`immediate`) are never coalesced: duplicate payment submissions must not merge.
	fn dedups(self) -> bool {
		!matches!(self, SyncStrategy::Immediate)
	}

	fn ttl(self, config: &SyncCoreConfig) -> Option<Duration> {
		match self {
			SyncStrategy::DataFetch => Some(config.cache_ttl_data_fetch()),
			SyncStrategy::OnDemand => Some(Self::ON_DEMAND_TTL),
			SyncStrategy::Scheduled => Some(config.cache_ttl_scheduled()),
			SyncStrategy::Immediate | SyncStrategy::DataSync => None,
		}
	}

	const fn as_str(self) -> &'static str {
		match self {
			SyncStrategy::Immediate => "immediate",
			SyncStrategy::DataSync => "data-sync",
			SyncStrategy::DataFetch => "data-fetch",
			SyncStrategy::OnDemand => "on-demand",
			SyncStrategy::Scheduled => "scheduled",
		}
	}
}

/// Scheduling preference among contending calls; does not bypass the underlying rate-limit
/// quota (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPriority {
	/// Dispatched ahead of `medium`/`low` callers queued behind the same admission gate.
	High,
	/// Default priority.
	Medium,
	/// Dispatched last among contending callers.
	Low,
}
impl SyncPriority {
	fn rank(self) -> u8 {
		match self {
			SyncPriority::High => 2,
			SyncPriority::Medium => 1,
			SyncPriority::Low => 0,
		}
	}
}

#[derive(Debug, Eq, PartialEq)]
struct Waiter {
	priority: SyncPriority,
	seq: u64,
}
impl Ord for Waiter {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		// Higher priority sorts first; within a priority, the earlier arrival (smaller seq)
		// sorts first, hence the reversed seq comparison (BinaryHeap is a max-heap).
		self.priority.rank().cmp(&other.priority.rank()).then_with(|| other.seq.cmp(&self.seq))
	}
}
impl PartialOrd for Waiter {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

#[derive(Debug)]
struct GateState {
	available: usize,
	next_seq: u64,
	queue: BinaryHeap<Waiter>,
}

/// Admission gate bounding in-flight dispatches, ordering waiters by [`SyncPriority`] rather
/// than strict arrival order. The quota itself (who may call the ledger at all) still lives in
/// C2's token buckets; this only governs dispatch order among orchestrator callers.
#[derive(Debug)]
struct PriorityGate {
	state: Mutex<GateState>,
}
impl PriorityGate {
	fn new(capacity: usize) -> Self {
		Self { state: Mutex::new(GateState { available: capacity, next_seq: 0, queue: BinaryHeap::new() }) }
	}

	async fn acquire(&self, priority: SyncPriority) -> PriorityPermit<'_> {
		let seq = {
			let mut state = self.state.lock();
			let seq = state.next_seq;

			state.next_seq += 1;
			state.queue.push(Waiter { priority, seq });

			seq
		};
		// Dropping this future before it resolves (e.g. a `tokio::select!` picking a
		// cancellation branch instead) must still pull `seq` back out of the queue, or it sits
		// there forever and nothing behind it in priority order can ever reach the front again.
		let mut abandon_on_drop = AbandonGuard { gate: self, seq, granted: false };

		loop {
			{
				let mut state = self.state.lock();
				let at_front = state.queue.peek().map(|w| w.seq) == Some(seq);

				if at_front && state.available > 0 {
					state.queue.pop();
					state.available -= 1;
					abandon_on_drop.granted = true;

					return PriorityPermit { gate: self };
				}
			}

			tokio::time::sleep(std::time::Duration::from_millis(2)).await;
		}
	}

	fn release(&self) {
		self.state.lock().available += 1;
	}

	fn abandon(&self, seq: u64) {
		let mut state = self.state.lock();

		state.queue = std::mem::take(&mut state.queue).into_iter().filter(|w| w.seq != seq).collect();
	}
}

struct AbandonGuard<'a> {
	gate: &'a PriorityGate,
	seq: u64,
	granted: bool,
}
impl Drop for AbandonGuard<'_> {
	fn drop(&mut self) {
		if !self.granted {
			self.gate.abandon(self.seq);
		}
	}
}

struct PriorityPermit<'a> {
	gate: &'a PriorityGate,
}
impl Drop for PriorityPermit<'_> {
	fn drop(&mut self) {
		self.gate.release();
	}
}

type CacheKey = (TenantId, &'static str, u64);

#[derive(Clone)]
struct CacheSlot {
	value: serde_json::Value,
	expires_at: OffsetDateTime,
}

/// Error half of a cached [`SingleflightOutcome`]. `Error` isn't `Clone`, so the leader's result
/// is flattened into this before followers read it back; `Cancelled` is kept distinct so a
/// follower sees [`Error::Cancelled`] only when that's genuinely what happened, not whenever the
/// leader's own (possibly unrelated) cancel token fired.
#[derive(Clone, Debug)]
enum StoredError {
	Cancelled,
	Other(String),
}

type SingleflightOutcome = Result<serde_json::Value, StoredError>;

/// C3: caches, deduplicates, and retries calls made against the external ledger.
pub struct SyncOrchestrator {
	config: SyncCoreConfig,
	cache: Mutex<HashMap<CacheKey, CacheSlot>>,
	inflight: Mutex<HashMap<CacheKey, Arc<AsyncMutex<Option<SingleflightOutcome>>>>>,
	gate: PriorityGate,
}
impl SyncOrchestrator {
	/// Maximum number of calls admitted concurrently, regardless of priority. Not part of
	/// [`SyncCoreConfig`]: it bounds orchestrator fan-out, not the ledger's own rate limit.
	const MAX_CONCURRENT_DISPATCHES: usize = 32;

	/// Builds an orchestrator backed by the given configuration's TTLs and retry budget.
	pub fn new(config: SyncCoreConfig) -> Self {
		Self {
			config,
			cache: Mutex::new(HashMap::new()),
			inflight: Mutex::new(HashMap::new()),
			gate: PriorityGate::new(Self::MAX_CONCURRENT_DISPATCHES),
		}
	}

	/// Hashes caller-supplied arguments into the cache/dedup key component. Callers hash their
	/// own typed arguments (e.g. via [`std::hash::Hash`]) before calling [`Self::dispatch`].
	pub fn hash_args(args: impl Hash) -> u64 {
		let mut hasher = DefaultHasher::new();

		args.hash(&mut hasher);
		hasher.finish()
	}

	fn cache_get(&self, key: &CacheKey) -> Option<serde_json::Value> {
		let cache = self.cache.lock();
		let slot = cache.get(key)?;

		if slot.expires_at > OffsetDateTime::now_utc() { Some(slot.value.clone()) } else { None }
	}

	fn cache_put(&self, key: CacheKey, value: serde_json::Value, ttl: Option<Duration>) {
		if let Some(ttl) = ttl {
			self.cache.lock().insert(key, CacheSlot { value, expires_at: OffsetDateTime::now_utc() + ttl });
		}
	}

	/// *dispatch(tenant, operation, args_hash, strategy, priority, cancel, call)*: applies
	/// caching, deduplication, admission ordering, and the retry policy of §4.3 around `call`.
	/// Honors `cancel` per §5: checked before the cache lookup, before and during admission, and
	/// during every retry wait, always surfacing [`Error::Cancelled`].
	pub async fn dispatch<F, Fut, T>(
		&self,
		tenant: &TenantId,
		operation: &'static str,
		args_hash: u64,
		strategy: SyncStrategy,
		priority: SyncPriority,
		cancel: &CancelToken,
		call: F,
	) -> Result<T, Error>
	where
		F: Fn() -> Fut + Send + Sync,
		Fut: Future<Output = Result<T, Error>> + Send,
		T: Serialize + serde::de::DeserializeOwned + Send + 'static,
	{
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let key: CacheKey = (tenant.clone(), operation, args_hash);

		if strategy.is_cacheable() {
			if let Some(cached) = self.cache_get(&key) {
				return decode(cached);
			}
		}

		if !strategy.dedups() {
			let permit = tokio::select! {
				_ = cancel.cancelled() => return Err(Error::Cancelled),
				permit = self.gate.acquire(priority) => permit,
			};
			let result = self.call_with_retry(tenant, operation, strategy, cancel, &call).await;

			drop(permit);

			return result;
		}

		let (slot, is_leader) = self.singleflight_slot(key.clone());
		let mut guard = slot.lock().await;

		if let Some(outcome) = guard.as_ref() {
			return decode_singleflight(outcome.clone());
		}

		debug_assert!(is_leader, "Non-leader dispatch observed an empty singleflight slot.");

		let permit = tokio::select! {
			_ = cancel.cancelled() => None,
			permit = self.gate.acquire(priority) => Some(permit),
		};
		let result = match permit {
			Some(permit) => {
				let result = self.call_with_retry(tenant, operation, strategy, cancel, &call).await;

				drop(permit);

				result
			},
			None => Err(Error::Cancelled),
		};

		let stored: SingleflightOutcome = match &result {
			Ok(value) => serde_json::to_value(value)
				.map_err(|e| StoredError::Other(format!("failed to cache dispatch result: {e}"))),
			Err(Error::Cancelled) => Err(StoredError::Cancelled),
			Err(err) => Err(StoredError::Other(err.to_string())),
		};

		*guard = Some(stored.clone());
		drop(guard);
		self.inflight.lock().remove(&key);

		if strategy.is_cacheable() {
			if let Ok(value) = &stored {
				self.cache_put(key, value.clone(), strategy.ttl(&self.config));
			}
		}

		result
	}

	fn singleflight_slot(
		&self,
		key: CacheKey,
	) -> (Arc<AsyncMutex<Option<SingleflightOutcome>>>, bool) {
		let mut inflight = self.inflight.lock();

		if let Some(existing) = inflight.get(&key) {
			return (existing.clone(), false);
		}

		let created = Arc::new(AsyncMutex::new(None));

		inflight.insert(key, created.clone());

		(created, true)
	}

	/// Retry policy over [`Error`] classifications surfaced by C2, per §4.3:
	/// - transient: retried up to `transport_max_attempts_default`, with [`backoff_delay`].
	/// - rate-limited: waits out the hint, then retries without consuming the retry budget.
	/// - token-invalid: retried exactly once (C1/C2 already forced one refresh internally).
	/// - permanent (and everything else): surfaced immediately, no retry.
	async fn call_with_retry<F, Fut, T>(
		&self,
		tenant: &TenantId,
		operation: &'static str,
		strategy: SyncStrategy,
		cancel: &CancelToken,
		call: &F,
	) -> Result<T, Error>
	where
		F: Fn() -> Fut + Send + Sync,
		Fut: Future<Output = Result<T, Error>> + Send,
	{
		let span = ComponentSpan::new(ComponentKind::Orchestrator, "dispatch");

		span.record("tenant", tenant.as_ref());
		span.record("operation", operation);
		span.record("strategy", strategy.as_str());

		let _entered = span.entered();

		let max_attempts = self.config.transport_max_attempts_default;
		let mut transient_attempts: u32 = 0;
		let mut token_retried = false;

		loop {
			if cancel.is_cancelled() {
				return Err(Error::Cancelled);
			}

			let outcome = tokio::select! {
				_ = cancel.cancelled() => Err(Error::Cancelled),
				outcome = call() => outcome,
			};

			match &outcome {
				Ok(_) => {
					obs::record_outcome(ComponentKind::Orchestrator, Outcome::Success);

					return outcome;
				},
				Err(Error::Cancelled) => {
					return outcome;
				},
				Err(Error::RateLimited { wait_ms }) => {
					tokio::select! {
						_ = cancel.cancelled() => return Err(Error::Cancelled),
						_ = tokio::time::sleep(std::time::Duration::from_millis(*wait_ms)) => {},
					}

					continue;
				},
				Err(Error::TokenInvalid { .. }) if !token_retried => {
					token_retried = true;

					continue;
				},
				Err(Error::Transient(_)) | Err(Error::Transport(_))
					if transient_attempts + 1 < max_attempts =>
				{
					transient_attempts += 1;

					tokio::select! {
						_ = cancel.cancelled() => return Err(Error::Cancelled),
						_ = tokio::time::sleep(
							backoff_delay(transient_attempts, Duration::seconds(60)).unsigned_abs(),
						) => {},
					}

					continue;
				},
				Err(_) => {
					obs::record_outcome(ComponentKind::Orchestrator, Outcome::Failure);
					obs::record_attempts(ComponentKind::Orchestrator, transient_attempts + 1);

					return outcome;
				},
			}
		}
	}
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, Error> {
	serde_json::from_value(value)
		.map_err(|e| Error::Validation { reason: format!("cached dispatch result decode failed: {e}") })
}

fn decode_singleflight<T: serde::de::DeserializeOwned>(
	outcome: SingleflightOutcome,
) -> Result<T, Error> {
	match outcome {
		Ok(value) => decode(value),
		Err(StoredError::Cancelled) => Err(Error::Cancelled),
		Err(StoredError::Other(message)) => Err(Error::Permanent { reason: message }),
	}
}
