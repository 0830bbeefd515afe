//! Batch sync messages.
//!
//! A device pushes a [`SyncBatch`] of unsynced records; the reconciler
//! answers with a [`BatchResponse`] listing per-class counts and per-record
//! errors. One bad record never fails the batch, so decoding is lenient:
//! records that do not parse become [`RecordError`]s alongside the records
//! that do.

use crate::error::{ProtocolError, ProtocolResult, ValidationError};
use crate::ids::{ClientId, EntityClass};
use crate::records::{Account, Entity, LedgerEntry, Payment, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A set of unsynced records pushed in one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    /// Accounts, applied first.
    #[serde(default, alias = "customers")]
    pub accounts: Vec<Account>,
    /// Transactions.
    #[serde(default, alias = "invoices")]
    pub transactions: Vec<Transaction>,
    /// Ledger entries.
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
    /// Payments.
    #[serde(default)]
    pub payments: Vec<Payment>,
}

impl SyncBatch {
    /// Returns true if the batch carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len() + self.transactions.len() + self.ledger.len() + self.payments.len()
    }

    /// Encodes the batch as JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a batch, keeping the records that parse.
    ///
    /// Fails only if the payload is not a JSON object of arrays.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<DecodedBatch> {
        let raw: RawBatch = serde_json::from_slice(bytes)?;
        let mut rejected = Vec::new();
        let batch = SyncBatch {
            accounts: decode_each(raw.accounts, &mut rejected),
            transactions: decode_each(raw.transactions, &mut rejected),
            ledger: decode_each(raw.ledger, &mut rejected),
            payments: decode_each(raw.payments, &mut rejected),
        };
        Ok(DecodedBatch { batch, rejected })
    }
}

/// Result of lenient batch decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    /// Records that parsed.
    pub batch: SyncBatch,
    /// Records that did not, as validation errors.
    pub rejected: Vec<RecordError>,
}

#[derive(Deserialize)]
struct RawBatch {
    #[serde(default, alias = "customers")]
    accounts: Vec<serde_json::Value>,
    #[serde(default, alias = "invoices")]
    transactions: Vec<serde_json::Value>,
    #[serde(default)]
    ledger: Vec<serde_json::Value>,
    #[serde(default)]
    payments: Vec<serde_json::Value>,
}

fn decode_each<T: Entity + DeserializeOwned>(
    values: Vec<serde_json::Value>,
    rejected: &mut Vec<RecordError>,
) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let client_id = value
            .get("clientId")
            .and_then(serde_json::Value::as_str)
            .map(ClientId::from)
            .unwrap_or_else(|| ClientId::new(""));
        match serde_json::from_value::<T>(value) {
            Ok(record) => out.push(record),
            Err(e) => rejected.push(RecordError::validation(
                T::CLASS,
                client_id,
                &ValidationError::Malformed(e.to_string()),
            )),
        }
    }
    out
}

/// Why a single record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordErrorKind {
    /// The record itself is invalid.
    Validation,
    /// The record refers to something the remote does not know.
    Reference,
}

impl fmt::Display for RecordErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordErrorKind::Validation => f.write_str("validation"),
            RecordErrorKind::Reference => f.write_str("reference"),
        }
    }
}

/// A per-record failure reported in a [`BatchResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    /// Class of the failed record.
    #[serde(alias = "type")]
    pub class: EntityClass,
    /// Identity of the failed record.
    pub client_id: ClientId,
    /// Failure category.
    pub kind: RecordErrorKind,
    /// Human readable message.
    pub error: String,
}

impl RecordError {
    /// A validation failure.
    pub fn validation(class: EntityClass, client_id: ClientId, err: &ValidationError) -> Self {
        Self {
            class,
            client_id,
            kind: RecordErrorKind::Validation,
            error: err.to_string(),
        }
    }

    /// A dangling reference.
    pub fn reference(class: EntityClass, client_id: ClientId, error: impl Into<String>) -> Self {
        Self {
            class,
            client_id,
            kind: RecordErrorKind::Reference,
            error: error.into(),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): {}",
            self.class, self.client_id, self.kind, self.error
        )
    }
}

/// Per-class count of records the remote accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedCounts {
    /// Accounts accepted.
    #[serde(default, alias = "customers")]
    pub accounts: u32,
    /// Transactions accepted.
    #[serde(default, alias = "invoices")]
    pub transactions: u32,
    /// Ledger entries accepted.
    #[serde(default)]
    pub ledger: u32,
    /// Payments accepted.
    #[serde(default)]
    pub payments: u32,
}

impl SyncedCounts {
    /// Counts one accepted record of `class`.
    pub fn bump(&mut self, class: EntityClass) {
        let slot = match class {
            EntityClass::Account => &mut self.accounts,
            EntityClass::Transaction => &mut self.transactions,
            EntityClass::LedgerEntry => &mut self.ledger,
            EntityClass::Payment => &mut self.payments,
        };
        *slot = slot.saturating_add(1);
    }

    /// Sum over all classes.
    #[must_use]
    pub fn total(&self) -> u64 {
        u64::from(self.accounts)
            + u64::from(self.transactions)
            + u64::from(self.ledger)
            + u64::from(self.payments)
    }
}

/// The reconciler's answer to a [`SyncBatch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// Accepted counts.
    #[serde(default)]
    pub synced: SyncedCounts,
    /// Accepted transactions whose notification has not been sent.
    #[serde(default, alias = "invoicesNeedingWhatsApp")]
    pub transactions_needing_notification: Vec<ClientId>,
    /// Per-record failures.
    #[serde(default)]
    pub errors: Vec<RecordError>,
}

impl BatchResponse {
    /// Encodes the response as JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a response.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let response: Self = serde_json::from_slice(bytes)?;
        Ok(response)
    }

    /// Identities of rejected records, keyed by class.
    #[must_use]
    pub fn failed(&self) -> HashSet<(EntityClass, ClientId)> {
        self.errors
            .iter()
            .map(|e| (e.class, e.client_id.clone()))
            .collect()
    }

    /// Returns true if nothing was rejected.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Server-side balance derived from the ledger, for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceReport {
    /// The account.
    #[serde(alias = "customerId")]
    pub account_id: ClientId,
    /// Signed sum of the account's ledger entries.
    pub balance: i64,
    /// Number of entries summed.
    pub entry_count: u64,
}

impl BalanceReport {
    /// Encodes the report as JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a report.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Direction, EntrySource};

    #[test]
    fn empty_batch() {
        let batch = SyncBatch::default();
        assert!(batch.is_empty());
        let decoded = SyncBatch::decode(&batch.encode().unwrap()).unwrap();
        assert!(decoded.batch.is_empty());
        assert!(decoded.rejected.is_empty());
    }

    #[test]
    fn lenient_decode_keeps_good_records() {
        let json = br#"{
            "accounts": [
                {"clientId": "A1", "name": "Ravi"},
                {"clientId": "A2"}
            ],
            "ledger": [
                {"clientId": "L1", "accountId": "A1", "type": "credit", "amount": 500},
                {"clientId": "L2", "accountId": "A1", "type": "sideways", "amount": 5}
            ]
        }"#;
        let decoded = SyncBatch::decode(json).unwrap();
        assert_eq!(decoded.batch.accounts.len(), 1);
        assert_eq!(decoded.batch.ledger.len(), 1);
        assert_eq!(decoded.batch.ledger[0].source, EntrySource::Transaction);
        assert_eq!(decoded.rejected.len(), 2);
        assert_eq!(decoded.rejected[0].class, EntityClass::Account);
        assert_eq!(decoded.rejected[0].client_id.as_str(), "A2");
        assert_eq!(decoded.rejected[1].client_id.as_str(), "L2");
        assert!(decoded
            .rejected
            .iter()
            .all(|e| e.kind == RecordErrorKind::Validation));
    }

    #[test]
    fn non_object_payload_fails_whole_decode() {
        assert!(SyncBatch::decode(b"[1,2,3]").is_err());
        assert!(SyncBatch::decode(b"not json").is_err());
    }

    #[test]
    fn response_failed_set() {
        let response = BatchResponse {
            synced: SyncedCounts {
                accounts: 1,
                ..SyncedCounts::default()
            },
            transactions_needing_notification: vec!["T1".into()],
            errors: vec![RecordError::reference(
                EntityClass::Payment,
                "P1".into(),
                "unknown account A9",
            )],
        };
        let decoded = BatchResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded
            .failed()
            .contains(&(EntityClass::Payment, ClientId::from("P1"))));
        assert!(!decoded.is_clean());
        assert_eq!(decoded.synced.total(), 1);
    }

    #[test]
    fn record_error_wire_shape() {
        let err = RecordError::reference(EntityClass::LedgerEntry, "L1".into(), "unknown account");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["class"], "ledger");
        assert!(json.get("type").is_none());
        assert_eq!(json["clientId"], "L1");
        assert_eq!(json["kind"], "reference");
        assert_eq!(json["error"], "unknown account");
    }

    #[test]
    fn record_error_accepts_legacy_type_key() {
        let legacy: RecordError = serde_json::from_value(serde_json::json!({
            "type": "transaction",
            "clientId": "T2",
            "kind": "reference",
            "error": "unknown account"
        }))
        .unwrap();
        assert_eq!(legacy.class, EntityClass::Transaction);

        let response = BatchResponse {
            errors: vec![legacy],
            ..BatchResponse::default()
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["errors"][0]["class"], "transaction");
        assert_eq!(json["errors"][0]["clientId"], "T2");
    }

    #[test]
    fn counts_bump_per_class() {
        let mut counts = SyncedCounts::default();
        for class in EntityClass::APPLY_ORDER {
            counts.bump(class);
        }
        counts.bump(EntityClass::LedgerEntry);
        assert_eq!(counts.ledger, 2);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn batch_len_counts_all_classes() {
        let entry = LedgerEntry::new(
            "L1".into(),
            "A1".into(),
            Direction::Credit,
            10,
            EntrySource::Manual,
        )
        .unwrap();
        let batch = SyncBatch {
            accounts: vec![Account::new("A1".into(), "Ravi")],
            ledger: vec![entry],
            ..SyncBatch::default()
        };
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }
}
