//! Inventory store boundary.
//!
//! The store holds the only state that needs transactional discipline: item
//! ownership, transfer request rows and item reservations. Keeping all three in
//! one substrate is what lets `approve` check "still owned by the source team"
//! and "still reserved by this request" in the same atomic write.
//!
//! The trait is synchronous; adapters needing async IO bridge internally.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use lotsync_core::{BatchId, TeamId, TransferId, UserId};
use lotsync_events::Mutation;
use lotsync_inventory::{InventoryItem, ItemId, ItemStatus, TransferRequest, TransferStatus};

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;

/// Store operation error.
///
/// `Unavailable` and `Timeout` are transient: the same call may succeed if
/// re-issued. Everything else is permanent for the given input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate row: {0}")]
    Duplicate(String),

    #[error("item {item} is reserved by transfer {holder}")]
    ReservationConflict { item: ItemId, holder: TransferId },

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Filter for [`InventoryStore::query_items`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub team_id: Option<TeamId>,
    pub item_ids: Option<Vec<ItemId>>,
    pub batch_id: Option<BatchId>,
    pub assigned_to: Option<UserId>,
    pub statuses: Vec<ItemStatus>,
}

impl ItemQuery {
    pub fn team(team_id: TeamId) -> Self {
        Self {
            team_id: Some(team_id),
            ..Self::default()
        }
    }

    pub fn ids(item_ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            item_ids: Some(item_ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &InventoryItem) -> bool {
        self.team_id.is_none_or(|t| t == item.team_id)
            && self.item_ids.as_ref().is_none_or(|ids| ids.contains(&item.id))
            && self.batch_id.is_none_or(|b| b == item.batch_id)
            && self.assigned_to.is_none_or(|u| item.assigned_to == Some(u))
            && (self.statuses.is_empty() || self.statuses.contains(&item.status))
    }
}

/// Filter for [`InventoryStore::list_transfers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferQuery {
    /// Matches either side of the transfer.
    pub team_id: Option<TeamId>,
    pub status: Option<TransferStatus>,
    pub requester_id: Option<UserId>,
    pub limit: Option<usize>,
}

impl TransferQuery {
    pub fn matches(&self, transfer: &TransferRequest) -> bool {
        self.team_id
            .is_none_or(|t| transfer.source_team() == t || transfer.dest_team() == t)
            && self.status.is_none_or(|s| transfer.status() == s)
            && self.requester_id.is_none_or(|u| transfer.requester_id() == u)
    }
}

/// A precondition checked inside a [`ConditionalUpdate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    ItemOwnedBy { item: ItemId, team: TeamId },
    ItemReservedBy { item: ItemId, transfer: TransferId },
    /// The stored request row is at exactly this version.
    TransferAt { transfer: TransferId, version: u64 },
}

/// A row write applied by a [`ConditionalUpdate`] when every expectation holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWrite {
    SetItemTeam { item: ItemId, team: TeamId },
    /// Replace the stored request row.
    PutTransfer(TransferRequest),
}

/// Atomic multi-row write: all expectations are checked and all writes applied
/// together, or nothing happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalUpdate {
    pub expect: Vec<Expectation>,
    pub writes: Vec<RowWrite>,
    /// Drop every reservation held by this transfer as part of the same write.
    pub release: Option<TransferId>,
    pub at: DateTime<Utc>,
}

/// The first expectation that did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    ItemMissing {
        item: ItemId,
    },
    ItemOwnership {
        item: ItemId,
        expected: TeamId,
        actual: TeamId,
    },
    Reservation {
        item: ItemId,
        expected: TransferId,
        actual: Option<TransferId>,
    },
    TransferVersion {
        transfer: TransferId,
        expected: u64,
        actual: Option<u64>,
    },
}

/// `success | conflict` of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    Rejected(Violation),
}

/// Receives every committed row change, in commit order.
///
/// Called before the next write can commit, so implementations must be quick
/// and must not call back into the store.
pub trait ChangeSink: Send + Sync {
    fn record(&self, mutation: Mutation);
}

impl<S> ChangeSink for Arc<S>
where
    S: ChangeSink + ?Sized,
{
    fn record(&self, mutation: Mutation) {
        (**self).record(mutation)
    }
}

/// Transactional inventory store.
pub trait InventoryStore: Send + Sync {
    /// One consistent snapshot of the matching items.
    fn query_items(&self, query: &ItemQuery) -> Result<Vec<InventoryItem>, StoreError>;

    /// Insert or replace item rows (seeding, and status changes made outside
    /// the transfer workflow).
    fn upsert_items(&self, items: Vec<InventoryItem>) -> Result<(), StoreError>;

    /// Claim every item for `transfer`, all or nothing.
    ///
    /// Items are claimed in sorted order, so overlapping calls conflict
    /// instead of deadlocking. Items already held by the same transfer are
    /// accepted.
    fn reserve(&self, transfer: TransferId, items: &[ItemId]) -> Result<(), StoreError>;

    /// Drop every reservation held by `transfer`; returns how many were held.
    fn release(&self, transfer: TransferId) -> Result<usize, StoreError>;

    fn reservation_holder(&self, item: &ItemId) -> Result<Option<TransferId>, StoreError>;

    fn insert_transfer(&self, transfer: &TransferRequest) -> Result<(), StoreError>;

    /// Reserve the request's items and insert its row in one atomic write.
    ///
    /// On any error neither the reservations nor the row exist.
    fn open_transfer(&self, transfer: &TransferRequest) -> Result<(), StoreError>;

    fn get_transfer(&self, id: TransferId) -> Result<Option<TransferRequest>, StoreError>;

    /// Newest first.
    fn list_transfers(&self, query: &TransferQuery) -> Result<Vec<TransferRequest>, StoreError>;

    fn conditional_update(&self, update: ConditionalUpdate) -> Result<UpdateOutcome, StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn query_items(&self, query: &ItemQuery) -> Result<Vec<InventoryItem>, StoreError> {
        (**self).query_items(query)
    }

    fn upsert_items(&self, items: Vec<InventoryItem>) -> Result<(), StoreError> {
        (**self).upsert_items(items)
    }

    fn reserve(&self, transfer: TransferId, items: &[ItemId]) -> Result<(), StoreError> {
        (**self).reserve(transfer, items)
    }

    fn release(&self, transfer: TransferId) -> Result<usize, StoreError> {
        (**self).release(transfer)
    }

    fn reservation_holder(&self, item: &ItemId) -> Result<Option<TransferId>, StoreError> {
        (**self).reservation_holder(item)
    }

    fn insert_transfer(&self, transfer: &TransferRequest) -> Result<(), StoreError> {
        (**self).insert_transfer(transfer)
    }

    fn open_transfer(&self, transfer: &TransferRequest) -> Result<(), StoreError> {
        (**self).open_transfer(transfer)
    }

    fn get_transfer(&self, id: TransferId) -> Result<Option<TransferRequest>, StoreError> {
        (**self).get_transfer(id)
    }

    fn list_transfers(&self, query: &TransferQuery) -> Result<Vec<TransferRequest>, StoreError> {
        (**self).list_transfers(query)
    }

    fn conditional_update(&self, update: ConditionalUpdate) -> Result<UpdateOutcome, StoreError> {
        (**self).conditional_update(update)
    }
}

/// Sorted, duplicate-free copy of `items`: the order every adapter claims rows in.
pub(crate) fn lock_order(items: &[ItemId]) -> Vec<ItemId> {
    let mut sorted = items.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}

/// Serialize a row for a change event.
pub(crate) fn row_json<T: Serialize>(row: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(row).map_err(|e| StoreError::Corrupt(format!("row serialization failed: {e}")))
}
