//! Transaction log entry shape.

// self
use crate::{_prelude::*, auth::TenantId, mirror::EntityKind};

/// What kind of mutation a log entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
	/// A new mirror row was inserted.
	Created,
	/// An existing mirror row was updated.
	Updated,
	/// A mirror row was soft-deleted.
	Deleted,
	/// A row was synced from the ledger without a local field change being attributable to a
	/// single mutation (e.g. the first sync of an entity).
	Synced,
	/// A write action against the ledger was executed (e.g. a payment create).
	Executed,
	/// A write action against the ledger failed.
	Failed,
}

/// Attribution for where a mutation originated, per §3's supplemented source list. `payment-rail`
/// and `bank-rail` are kept as first-class variants with no transport implementation (§9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
	/// The external ledger-of-record (the only wired transport today).
	ExternalLedger,
	/// A parked payment-rail integration point; no transport is implemented.
	PaymentRail,
	/// A parked bank-rail integration point; no transport is implemented.
	BankRail,
	/// A human actor acting through the consumer interface.
	User,
	/// The system itself (e.g. a background job).
	System,
}

/// One immutable entry in the append-only transaction log (§3, §4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionLogEntry {
	/// Monotonically increasing identifier; reflects commit order.
	pub entry_id: u64,
	/// Tenant this entry belongs to.
	pub tenant: TenantId,
	/// Entity family the mutation applies to.
	pub entity_kind: EntityKind,
	/// Local mirror identifier (the external id, since the mirror has no separate surrogate key).
	pub entity_local_id: String,
	/// What kind of mutation this entry records.
	pub transaction_type: TransactionType,
	/// Where the mutation originated.
	pub source: Source,
	/// External id, when the mutation is attributable to a specific ledger entity.
	pub external_id: Option<String>,
	/// External sync token observed at the time of this mutation.
	pub external_sync_token: Option<u64>,
	/// Raw wire payload as received from (or sent to) the source system.
	pub wire_payload: serde_json::Value,
	/// Field-level diff: field name -> (old, new).
	pub diff: BTreeMap<String, (serde_json::Value, serde_json::Value)>,
	/// Human actor responsible, if any.
	pub actor_user_id: Option<String>,
	/// Session identifier, if the mutation occurred within a user session.
	pub session_id: Option<String>,
	/// Free-text justification.
	pub reason: String,
	/// Arbitrary structured metadata.
	pub metadata: serde_json::Value,
	/// Commit instant.
	pub created_at: OffsetDateTime,
}
