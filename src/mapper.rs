//! Entity Mapper (C6): pure, stateless functions translating between the external ledger's wire
//! format and the mirror schema. This is the *only* place wire-shape knowledge exists — every
//! other component consumes [`MirrorRow`] (§9 redesign: "Dynamic typing of wire payloads").

// self
use crate::{
	_prelude::*,
	auth::TenantId,
	error::Error,
	mirror::{EntityKind, MirrorRow},
};

/// A vendor/customer reference carried by wire payloads, kept as an external-id pointer rather
/// than a Rust reference (§9: cyclic entity references resolved by indexed lookup, not pointers).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRef {
	/// External id of the referenced entity.
	pub value: String,
	/// Display name captured at sync time.
	pub name: Option<String>,
}

/// Wire-format entity payload as the external ledger emits it (§6).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireEntity {
	/// External id.
	#[serde(rename = "Id")]
	pub id: String,
	/// External sync token, as a decimal string.
	#[serde(rename = "SyncToken")]
	pub sync_token: String,
	/// Transaction date, ISO-8601.
	#[serde(rename = "TxnDate", skip_serializing_if = "Option::is_none")]
	pub txn_date: Option<String>,
	/// Due date, ISO-8601.
	#[serde(rename = "DueDate", skip_serializing_if = "Option::is_none")]
	pub due_date: Option<String>,
	/// Total amount, decimal string.
	#[serde(rename = "TotalAmt", skip_serializing_if = "Option::is_none")]
	pub total_amt: Option<String>,
	/// Outstanding balance, decimal string.
	#[serde(rename = "Balance", skip_serializing_if = "Option::is_none")]
	pub balance: Option<String>,
	/// Vendor reference, for payables.
	#[serde(rename = "VendorRef", skip_serializing_if = "Option::is_none")]
	pub vendor_ref: Option<WireRef>,
	/// Customer reference, for receivables.
	#[serde(rename = "CustomerRef", skip_serializing_if = "Option::is_none")]
	pub customer_ref: Option<WireRef>,
	/// Human-facing document number.
	#[serde(rename = "DocNumber", skip_serializing_if = "Option::is_none")]
	pub doc_number: Option<String>,
	/// Free-text note.
	#[serde(rename = "PrivateNote", skip_serializing_if = "Option::is_none")]
	pub private_note: Option<String>,
	/// Entity-specific line items and any field this mapper does not otherwise model, preserved
	/// verbatim so `to_wire(from_wire(p))` round-trips modulo key ordering.
	#[serde(flatten)]
	pub extra: serde_json::Map<String, serde_json::Value>,
}

/// *from-wire(payload)*: normalizes one wire entity into a [`MirrorRow`].
pub fn from_wire(
	tenant: &TenantId,
	kind: EntityKind,
	payload: &WireEntity,
) -> Result<MirrorRow, Error> {
	let sync_token: u64 = payload
		.sync_token
		.parse()
		.map_err(|_| invalid_wire_format(format!("SyncToken `{}`", payload.sync_token)))?;
	let amount_cents = match &payload.total_amt {
		Some(raw) => Some(from_wire_amount(raw)?.0),
		None => None,
	};
	let mut fields = serde_json::Map::new();

	if let Some(txn_date) = &payload.txn_date {
		fields.insert(
			"txn_date".into(),
			serde_json::json!(format_wire_date(parse_wire_date(txn_date)?)),
		);
	}
	if let Some(due_date) = &payload.due_date {
		fields.insert(
			"due_date".into(),
			serde_json::json!(format_wire_date(parse_wire_date(due_date)?)),
		);
	}
	if let Some(balance) = &payload.balance {
		fields.insert("balance_cents".into(), serde_json::json!(from_wire_amount(balance)?.0));
	}
	if let Some(vendor_ref) = &payload.vendor_ref {
		fields.insert("vendor_ref".into(), serde_json::json!(vendor_ref));
	}
	if let Some(customer_ref) = &payload.customer_ref {
		fields.insert("customer_ref".into(), serde_json::json!(customer_ref));
	}
	if let Some(doc_number) = &payload.doc_number {
		fields.insert("doc_number".into(), serde_json::json!(doc_number));
	}
	if let Some(private_note) = &payload.private_note {
		fields.insert("private_note".into(), serde_json::json!(private_note));
	}
	for (key, value) in &payload.extra {
		fields.insert(key.clone(), value.clone());
	}

	Ok(MirrorRow {
		tenant: tenant.clone(),
		kind,
		external_id: payload.id.clone(),
		sync_token,
		amount_cents,
		fields: serde_json::Value::Object(fields),
		is_active: true,
		deactivated_at_sync_token: None,
		last_synced_at: OffsetDateTime::now_utc(),
	})
}

/// *to-wire(entity)*: reconstructs the wire payload for a [`MirrorRow`].
pub fn to_wire(row: &MirrorRow) -> Result<WireEntity, Error> {
	let mut extra = match row.fields.as_object() {
		Some(map) => map.clone(),
		None => serde_json::Map::new(),
	};
	let txn_date = take_field(&mut extra, "txn_date");
	let due_date = take_field(&mut extra, "due_date");
	let balance = match extra.remove("balance_cents") {
		Some(value) => value.as_i64().map(to_wire_amount),
		None => None,
	};
	let vendor_ref = take_ref(&mut extra, "vendor_ref")?;
	let customer_ref = take_ref(&mut extra, "customer_ref")?;
	let doc_number = take_field(&mut extra, "doc_number");
	let private_note = take_field(&mut extra, "private_note");

	Ok(WireEntity {
		id: row.external_id.clone(),
		sync_token: row.sync_token.to_string(),
		txn_date,
		due_date,
		total_amt: row.amount_cents.map(to_wire_amount),
		balance,
		vendor_ref,
		customer_ref,
		doc_number,
		private_note,
		extra,
	})
}

fn take_field(map: &mut serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
	map.remove(key).and_then(|v| v.as_str().map(str::to_owned))
}

fn take_ref(
	map: &mut serde_json::Map<String, serde_json::Value>,
	key: &str,
) -> Result<Option<WireRef>, Error> {
	match map.remove(key) {
		Some(value) => serde_json::from_value(value)
			.map(Some)
			.map_err(|e| invalid_wire_format(format!("{key}: {e}"))),
		None => Ok(None),
	}
}

/// *diff(old, new)*: map of changed field → (old value, new value). Delegates to
/// [`MirrorRow::diff`], which is where the comparison actually lives since it needs no wire
/// knowledge once both sides are normalized.
pub fn diff(
	old: &MirrorRow,
	new: &MirrorRow,
) -> BTreeMap<String, (serde_json::Value, serde_json::Value)> {
	MirrorRow::diff(old, new)
}

fn invalid_wire_format(detail: impl Into<String>) -> Error {
	Error::Permanent { reason: format!("invalid-wire-format: {}", detail.into()) }
}

/// Parses a decimal amount string into integer minor units (cents) plus a flag indicating
/// whether rounding was lossy (more than two fractional digits were present).
///
/// Amounts with more than two fractional digits round half-to-even to the nearest cent (the
/// resolved rounding rule): a blanket truncation (`int(amount * 100)`) would violate the
/// round-trip law for values like `1.005`.
pub fn from_wire_amount(raw: &str) -> Result<(i64, bool), Error> {
	let raw = raw.trim();
	let negative = raw.starts_with('-');
	let unsigned = raw.strip_prefix('-').unwrap_or(raw);
	let (int_part, frac_part) = match unsigned.split_once('.') {
		Some((i, f)) => (i, f),
		None => (unsigned, ""),
	};

	if int_part.is_empty()
		|| !int_part.bytes().all(|b| b.is_ascii_digit())
		|| !frac_part.bytes().all(|b| b.is_ascii_digit())
	{
		return Err(invalid_wire_format(format!("amount `{raw}`")));
	}

	let int_value: i64 =
		int_part.parse().map_err(|_| invalid_wire_format(format!("amount `{raw}`")))?;
	let mut cents = int_value
		.checked_mul(100)
		.ok_or_else(|| invalid_wire_format(format!("amount `{raw}` overflows")))?;
	let mut lossy = false;

	match frac_part.len() {
		0 => {},
		1 => cents += (frac_part.as_bytes()[0] - b'0') as i64 * 10,
		2 => cents += frac_part.parse::<i64>().unwrap_or(0),
		_ => {
			let base_cents: i64 = frac_part[..2].parse().unwrap_or(0);
			let remainder = &frac_part[2..];
			let remainder_value: u128 = remainder.parse().unwrap_or(0);
			let half: u128 = format!("5{}", "0".repeat(remainder.len() - 1)).parse().unwrap_or(0);
			let round_up = match remainder_value.cmp(&half) {
				std::cmp::Ordering::Greater => true,
				std::cmp::Ordering::Less => false,
				std::cmp::Ordering::Equal => base_cents % 2 != 0,
			};

			cents += base_cents + i64::from(round_up);
			lossy = true;
		},
	}

	Ok((if negative { -cents } else { cents }, lossy))
}

/// *to-wire-amount*: formats integer minor units back into a two-fractional-digit decimal
/// string.
pub fn to_wire_amount(cents: i64) -> String {
	let negative = cents < 0;
	let magnitude = cents.unsigned_abs();

	format!("{}{}.{:02}", if negative { "-" } else { "" }, magnitude / 100, magnitude % 100)
}

/// Parses an ISO-8601 date or date-time string into a UTC instant, rejecting malformed input
/// with `invalid-wire-format`.
pub fn parse_wire_date(raw: &str) -> Result<OffsetDateTime, Error> {
	if let Ok(dt) = OffsetDateTime::parse(raw, &time::format_description::well_known::Iso8601::DEFAULT)
	{
		return Ok(dt);
	}

	let date_only = time::macros::format_description!("[year]-[month]-[day]");

	if let Ok(date) = time::Date::parse(raw, &date_only) {
		return Ok(date.midnight().assume_utc());
	}

	Err(invalid_wire_format(format!("date `{raw}`")))
}

fn format_wire_date(instant: OffsetDateTime) -> String {
	instant
		.format(&time::format_description::well_known::Rfc3339)
		.unwrap_or_else(|_| instant.to_string())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn tenant() -> TenantId {
		TenantId::new("t1").expect("Tenant fixture should be valid.")
	}

	#[test]
	fn from_wire_builds_expected_mirror_row() {
		let payload = WireEntity {
			id: "B1".into(),
			sync_token: "0".into(),
			total_amt: Some("100.00".into()),
			due_date: Some("2024-02-15".into()),
			..Default::default()
		};
		let row = from_wire(&tenant(), EntityKind::Bill, &payload)
			.expect("from_wire should succeed for a well-formed payload.");

		assert_eq!(row.external_id, "B1");
		assert_eq!(row.sync_token, 0);
		assert_eq!(row.amount_cents, Some(10000));
		assert_eq!(
			row.fields.get("due_date").and_then(|v| v.as_str()),
			Some("2024-02-15T00:00:00Z")
		);
	}

	#[test]
	fn from_wire_rejects_malformed_sync_token() {
		let payload = WireEntity { id: "B1".into(), sync_token: "not-a-number".into(), ..Default::default() };
		let err = from_wire(&tenant(), EntityKind::Bill, &payload).unwrap_err();

		assert!(matches!(err, Error::Permanent { .. }));
	}

	#[test]
	fn amount_round_trip_holds_for_two_fractional_digits() {
		for raw in ["0.00", "100.00", "1.01", "-5.25", "999999.99"] {
			let (cents, lossy) =
				from_wire_amount(raw).unwrap_or_else(|_| panic!("{raw} should parse."));

			assert!(!lossy);
			assert_eq!(to_wire_amount(cents), raw);
		}
	}

	#[test]
	fn amount_rounds_half_to_even_beyond_two_digits() {
		let (cents, lossy) = from_wire_amount("1.005").expect("Should parse.");

		assert!(lossy);
		assert_eq!(cents, 100); // 1.005 is exactly halfway; 1.00 has an even last digit.

		let (cents, _) = from_wire_amount("1.015").expect("Should parse.");

		assert_eq!(cents, 102); // 1.01 has an odd last digit, rounds up to 1.02.

		let (cents, _) = from_wire_amount("1.004").expect("Should parse.");

		assert_eq!(cents, 100);

		let (cents, _) = from_wire_amount("1.006").expect("Should parse.");

		assert_eq!(cents, 101);
	}

	#[test]
	fn rejects_garbage_amount() {
		assert!(from_wire_amount("abc").is_err());
		assert!(from_wire_amount("1.2.3").is_err());
	}

	#[test]
	fn rejects_malformed_date() {
		assert!(parse_wire_date("not-a-date").is_err());
	}

	#[test]
	fn diff_reports_amount_and_sync_token_changes() {
		let payload_old = WireEntity {
			id: "B1".into(),
			sync_token: "0".into(),
			total_amt: Some("100.00".into()),
			..Default::default()
		};
		let payload_new = WireEntity {
			id: "B1".into(),
			sync_token: "1".into(),
			total_amt: Some("150.00".into()),
			..Default::default()
		};
		let old = from_wire(&tenant(), EntityKind::Bill, &payload_old).expect("Should build old row.");
		let new = from_wire(&tenant(), EntityKind::Bill, &payload_new).expect("Should build new row.");
		let delta = diff(&old, &new);

		assert_eq!(delta["amount_cents"].0, serde_json::json!(10000));
		assert_eq!(delta["amount_cents"].1, serde_json::json!(15000));
		assert_eq!(delta["sync_token"].0, serde_json::json!(0));
		assert_eq!(delta["sync_token"].1, serde_json::json!(1));
	}
}
