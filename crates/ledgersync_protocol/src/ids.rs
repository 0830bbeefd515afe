//! Identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier assigned by the originating device before any server contact.
///
/// It is the durable de-duplication key for sync: two records of the same
/// class with the same `ClientId` are the same logical record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The classes of records that travel through sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    /// A customer or supplier.
    Account,
    /// An invoice-like sale or purchase.
    Transaction,
    /// An immutable ledger entry.
    #[serde(rename = "ledger")]
    LedgerEntry,
    /// A payment received or made.
    Payment,
}

impl EntityClass {
    /// All classes in the order a batch is applied: accounts first, because
    /// everything else references them.
    pub const APPLY_ORDER: [EntityClass; 4] = [
        EntityClass::Account,
        EntityClass::Transaction,
        EntityClass::LedgerEntry,
        EntityClass::Payment,
    ];

    /// Wire name of the class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityClass::Account => "account",
            EntityClass::Transaction => "transaction",
            EntityClass::LedgerEntry => "ledger",
            EntityClass::Payment => "payment",
        }
    }

    /// Returns true for classes that are write-once (append-dedupe).
    #[must_use]
    pub const fn is_append_only(self) -> bool {
        matches!(self, EntityClass::LedgerEntry | EntityClass::Payment)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" | "customer" => Ok(EntityClass::Account),
            "transaction" | "invoice" => Ok(EntityClass::Transaction),
            "ledger" => Ok(EntityClass::LedgerEntry),
            "payment" => Ok(EntityClass::Payment),
            other => Err(format!("unknown entity class: {other}")),
        }
    }
}
