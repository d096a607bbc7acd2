//! Mirror row shape shared by every external entity family.

// self
use crate::{_prelude::*, auth::TenantId};

/// External entity kinds mirrored locally (§3 "MirrorRow (family)").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
	/// A payable bill from a vendor.
	Bill,
	/// A receivable invoice to a customer.
	Invoice,
	/// A vendor (payee) master record.
	Vendor,
	/// A customer (payer) master record.
	Customer,
	/// A payment applied against a bill or invoice.
	Payment,
	/// A chart-of-accounts account.
	Account,
	/// A computed balance snapshot.
	Balance,
}
impl EntityKind {
	/// Returns a stable label, also used as the ledger's collection path segment.
	pub const fn as_str(self) -> &'static str {
		match self {
			EntityKind::Bill => "bills",
			EntityKind::Invoice => "invoices",
			EntityKind::Vendor => "vendors",
			EntityKind::Customer => "customers",
			EntityKind::Payment => "payments",
			EntityKind::Account => "accounts",
			EntityKind::Balance => "balances",
		}
	}
}
impl Display for EntityKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Arena-style reference to a related entity by its external id rather than a pointer, per the
/// §9 redesign note on cyclic entity references (Bill ↔ Vendor ↔ Payment).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
	/// External id of the referenced entity.
	pub external_id: String,
	/// Display name captured at sync time, for UI convenience only.
	pub name: Option<String>,
}

/// Normalized representation of one external entity, independent of wire shape (C6 output).
///
/// Domain-specific fields that are not common across every entity kind (line items, due dates,
/// vendor/customer refs, document numbers) live in `fields` as a JSON object; the fields
/// invariant to every kind (identity, sync token, amount, timestamps, soft-delete) are typed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorRow {
	/// Tenant this row belongs to.
	pub tenant: TenantId,
	/// Entity kind/family this row belongs to.
	pub kind: EntityKind,
	/// External ledger id, unique per (tenant, kind).
	pub external_id: String,
	/// Monotonic sync token assigned by the external ledger.
	pub sync_token: u64,
	/// Primary amount in integer minor units (cents), when applicable.
	pub amount_cents: Option<i64>,
	/// Domain-specific fields not common to every entity kind.
	pub fields: serde_json::Value,
	/// `false` once the row has been soft-deleted.
	pub is_active: bool,
	/// Sync token recorded immediately before a soft-delete, for audit purposes.
	pub deactivated_at_sync_token: Option<u64>,
	/// Instant this row was last synced from the ledger.
	pub last_synced_at: OffsetDateTime,
}
impl MirrorRow {
	/// Computes a diff of changed top-level fields between two rows of the same identity,
	/// as `field -> (old, new)`. Used by C5 to populate the log entry's `diff`.
	pub fn diff(old: &MirrorRow, new: &MirrorRow) -> BTreeMap<String, (serde_json::Value, serde_json::Value)> {
		let mut out = BTreeMap::new();

		if old.amount_cents != new.amount_cents {
			out.insert(
				"amount_cents".to_owned(),
				(serde_json::json!(old.amount_cents), serde_json::json!(new.amount_cents)),
			);
		}
		if old.sync_token != new.sync_token {
			out.insert(
				"sync_token".to_owned(),
				(serde_json::json!(old.sync_token), serde_json::json!(new.sync_token)),
			);
		}
		if old.is_active != new.is_active {
			out.insert(
				"is_active".to_owned(),
				(serde_json::json!(old.is_active), serde_json::json!(new.is_active)),
			);
		}
		if old.fields != new.fields {
			out.insert("fields".to_owned(), (old.fields.clone(), new.fields.clone()));
		}

		out
	}
}
