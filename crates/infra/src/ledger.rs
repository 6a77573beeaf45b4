//! Item reservations: which pending transfer holds which item.
//!
//! Backed by the inventory store rather than process memory, so the claim
//! survives restarts and holds across instances, and so `approve` can check
//! reservation and ownership inside the same transaction.

use thiserror::Error;
use tracing::{debug, info};

use lotsync_core::TransferId;
use lotsync_inventory::{ItemId, TransferRequest};

use crate::store::{InventoryStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("item {item} is already reserved by transfer {holder}")]
    Conflict { item: ItemId, holder: TransferId },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::ReservationConflict { item, holder } => LedgerError::Conflict { item, holder },
            other => LedgerError::Store(other),
        }
    }
}

/// Multi-key mutual exclusion over item ids.
#[derive(Debug, Clone)]
pub struct ReservationLedger<S> {
    store: S,
}

impl<S> ReservationLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> ReservationLedger<S>
where
    S: InventoryStore,
{
    /// Claim every item for `transfer`, or none of them.
    ///
    /// Re-reserving items already held by `transfer` succeeds without change.
    pub fn reserve(&self, transfer: TransferId, items: &[ItemId]) -> Result<(), LedgerError> {
        if items.is_empty() {
            return Ok(());
        }
        self.store.reserve(transfer, items)?;
        debug!(transfer_id = %transfer, item_count = items.len(), "items reserved");
        Ok(())
    }

    /// Claim the request's items and record the request in the same write.
    ///
    /// A request row never exists without its claims, and no claim is ever
    /// held by a request that was not recorded.
    pub fn open(&self, request: &TransferRequest) -> Result<(), LedgerError> {
        self.store.open_transfer(request)?;
        debug!(
            transfer_id = %request.id_typed(),
            item_count = request.item_ids().len(),
            "items reserved"
        );
        Ok(())
    }

    /// Drop every claim held by `transfer`. Unknown or already-released ids are a no-op.
    pub fn release(&self, transfer: TransferId) -> Result<usize, StoreError> {
        let released = self.store.release(transfer)?;
        if released > 0 {
            info!(transfer_id = %transfer, released, "reservation released");
        }
        Ok(released)
    }

    pub fn holder(&self, item: &ItemId) -> Result<Option<TransferId>, StoreError> {
        self.store.reservation_holder(item)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use lotsync_core::{Aggregate, TeamId, UserId};
    use lotsync_inventory::{OpenTransfer, TransferCommand};

    use super::*;
    use crate::store::InMemoryInventoryStore;

    fn serial(s: &str) -> ItemId {
        ItemId::parse(s).unwrap()
    }

    fn ledger() -> ReservationLedger<Arc<InMemoryInventoryStore>> {
        ReservationLedger::new(Arc::new(InMemoryInventoryStore::new()))
    }

    #[test]
    fn conflict_names_item_and_holder_and_reserves_nothing() {
        let ledger = ledger();
        let first = TransferId::new();
        let second = TransferId::new();
        ledger.reserve(first, &[serial("s1"), serial("s2")]).unwrap();

        let err = ledger.reserve(second, &[serial("s3"), serial("s2")]).unwrap_err();

        assert_eq!(
            err,
            LedgerError::Conflict {
                item: serial("s2"),
                holder: first
            }
        );
        assert_eq!(ledger.holder(&serial("s3")).unwrap(), None);
    }

    #[test]
    fn release_is_idempotent_and_frees_items() {
        let ledger = ledger();
        let first = TransferId::new();
        ledger.reserve(first, &[serial("s1")]).unwrap();

        assert_eq!(ledger.release(first).unwrap(), 1);
        assert_eq!(ledger.release(first).unwrap(), 0);
        assert_eq!(ledger.release(TransferId::new()).unwrap(), 0);

        let next = TransferId::new();
        ledger.reserve(next, &[serial("s1")]).unwrap();
        assert_eq!(ledger.holder(&serial("s1")).unwrap(), Some(next));
    }

    fn pending(serials: &[&str]) -> TransferRequest {
        let id = TransferId::new();
        let mut request = TransferRequest::empty(id);
        request
            .execute(&TransferCommand::Open(OpenTransfer {
                transfer_id: id,
                source_team: TeamId::new(),
                dest_team: TeamId::new(),
                item_ids: serials.iter().map(|s| serial(s)).collect(),
                requester_id: UserId::new(),
                reason: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        request
    }

    #[test]
    fn open_claims_items_and_records_the_request() {
        let ledger = ledger();
        let first = pending(&["s1", "s2"]);
        ledger.open(&first).unwrap();

        let second = pending(&["s3", "s2"]);
        let err = ledger.open(&second).unwrap_err();

        assert_eq!(
            err,
            LedgerError::Conflict {
                item: serial("s2"),
                holder: first.id_typed()
            }
        );
        assert!(ledger.store().get_transfer(first.id_typed()).unwrap().is_some());
        assert!(ledger.store().get_transfer(second.id_typed()).unwrap().is_none());
        assert_eq!(ledger.holder(&serial("s3")).unwrap(), None);
    }

    #[test]
    fn same_transfer_can_reserve_twice() {
        let ledger = ledger();
        let t = TransferId::new();
        ledger.reserve(t, &[serial("s1"), serial("s2")]).unwrap();
        ledger.reserve(t, &[serial("s1"), serial("s2")]).unwrap();
        assert_eq!(ledger.holder(&serial("s2")).unwrap(), Some(t));
    }
}
