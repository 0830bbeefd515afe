//! Outbox: local mutations awaiting remote acknowledgement.
//!
//! Items are enqueued in the same write transaction as the mutation they
//! describe and are removed only after a completed sync run has been told
//! the record was accepted.

use chrono::{DateTime, Utc};
use ledgersync_protocol::{ClientId, EntityClass};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Monotonically increasing outbox item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(u64);

impl OutboxId {
    /// Creates an outbox id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OutboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened to the record locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxAction {
    /// The record was created.
    Create,
    /// The record was changed.
    Update,
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxItem {
    /// Queue position.
    pub id: OutboxId,
    /// Class of the mutated record.
    pub class: EntityClass,
    /// Identity of the mutated record.
    pub client_id: ClientId,
    /// Kind of mutation.
    pub action: OutboxAction,
    /// When the mutation was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

/// Highest id among `items`, i.e. the point a sync snapshot covers.
pub fn watermark<'a>(items: impl IntoIterator<Item = &'a OutboxItem>) -> Option<OutboxId> {
    items.into_iter().map(|item| item.id).max()
}

/// Items a finished sync run may clear: everything at or below the
/// watermark except items for records the remote rejected.
pub fn consumable<'a>(
    items: impl IntoIterator<Item = &'a OutboxItem>,
    watermark: OutboxId,
    failed: &HashSet<(EntityClass, ClientId)>,
) -> Vec<OutboxId> {
    items
        .into_iter()
        .filter(|item| item.id <= watermark)
        .filter(|item| !failed.contains(&(item.class, item.client_id.clone())))
        .map(|item| item.id)
        .collect()
}
