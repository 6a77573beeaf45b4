use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lotsync_core::{AggregateRoot, TransferId};
use lotsync_events::{EntityType, Mutation};
use lotsync_inventory::{InventoryItem, ItemId, TransferRequest};

use super::{
    ChangeSink, ConditionalUpdate, Expectation, InventoryStore, ItemQuery, RowWrite, StoreError,
    TransferQuery, UpdateOutcome, Violation, lock_order, row_json,
};

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<ItemId, InventoryItem>,
    transfers: HashMap<TransferId, TransferRequest>,
    reservations: HashMap<ItemId, TransferId>,
}

impl State {
    fn check(&self, expectation: &Expectation) -> Option<Violation> {
        match expectation {
            Expectation::ItemOwnedBy { item, team } => match self.items.get(item) {
                None => Some(Violation::ItemMissing { item: item.clone() }),
                Some(row) if row.team_id != *team => Some(Violation::ItemOwnership {
                    item: item.clone(),
                    expected: *team,
                    actual: row.team_id,
                }),
                Some(_) => None,
            },
            Expectation::ItemReservedBy { item, transfer } => {
                let actual = self.reservations.get(item).copied();
                (actual != Some(*transfer)).then(|| Violation::Reservation {
                    item: item.clone(),
                    expected: *transfer,
                    actual,
                })
            }
            Expectation::TransferAt { transfer, version } => {
                let actual = self.transfers.get(transfer).map(|t| t.version());
                (actual != Some(*version)).then_some(Violation::TransferVersion {
                    transfer: *transfer,
                    expected: *version,
                    actual,
                })
            }
        }
    }

    /// Claim `items` for `transfer`, in sorted order, all or nothing.
    fn reserve(&mut self, transfer: TransferId, items: &[ItemId]) -> Result<(), StoreError> {
        let items = lock_order(items);
        for item in &items {
            match self.reservations.get(item) {
                Some(holder) if *holder != transfer => {
                    return Err(StoreError::ReservationConflict {
                        item: item.clone(),
                        holder: *holder,
                    });
                }
                _ => {}
            }
        }

        for item in items {
            self.reservations.insert(item, transfer);
        }
        Ok(())
    }
}

/// In-memory inventory store.
///
/// Intended for tests/dev. One lock over items, transfers and reservations,
/// so every operation is trivially atomic.
#[derive(Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
    sink: Option<Arc<dyn ChangeSink>>,
}

impl core::fmt::Debug for InMemoryInventoryStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryInventoryStore")
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report committed row changes to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn emit(&self, mutations: Vec<Mutation>) {
        if let Some(sink) = &self.sink {
            for m in mutations {
                sink.record(m);
            }
        }
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn query_items(&self, query: &ItemQuery) -> Result<Vec<InventoryItem>, StoreError> {
        let state = self.read()?;
        Ok(state
            .items
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect())
    }

    fn upsert_items(&self, items: Vec<InventoryItem>) -> Result<(), StoreError> {
        let mut state = self.write()?;

        let mut mutations = Vec::with_capacity(items.len());
        for item in &items {
            let row = row_json(item)?;
            let entity_id = item.id.to_string();
            mutations.push(match state.items.get(&item.id) {
                Some(old) => Mutation::update(EntityType::InventoryItem, entity_id, row, Some(row_json(old)?)),
                None => Mutation::insert(EntityType::InventoryItem, entity_id, row),
            });
        }

        for item in items {
            state.items.insert(item.id.clone(), item);
        }
        self.emit(mutations);
        Ok(())
    }

    fn reserve(&self, transfer: TransferId, items: &[ItemId]) -> Result<(), StoreError> {
        self.write()?.reserve(transfer, items)
    }

    fn release(&self, transfer: TransferId) -> Result<usize, StoreError> {
        let mut state = self.write()?;
        let before = state.reservations.len();
        state.reservations.retain(|_, holder| *holder != transfer);
        Ok(before - state.reservations.len())
    }

    fn reservation_holder(&self, item: &ItemId) -> Result<Option<TransferId>, StoreError> {
        Ok(self.read()?.reservations.get(item).copied())
    }

    fn insert_transfer(&self, transfer: &TransferRequest) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let id = transfer.id_typed();
        if state.transfers.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("transfer {id}")));
        }

        let row = row_json(transfer)?;
        state.transfers.insert(id, transfer.clone());
        self.emit(vec![Mutation::insert(EntityType::TransferRequest, id.to_string(), row)]);
        Ok(())
    }

    fn open_transfer(&self, transfer: &TransferRequest) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let id = transfer.id_typed();
        if state.transfers.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("transfer {id}")));
        }

        let row = row_json(transfer)?;
        state.reserve(id, transfer.item_ids())?;
        state.transfers.insert(id, transfer.clone());
        self.emit(vec![Mutation::insert(EntityType::TransferRequest, id.to_string(), row)]);
        Ok(())
    }

    fn get_transfer(&self, id: TransferId) -> Result<Option<TransferRequest>, StoreError> {
        Ok(self.read()?.transfers.get(&id).cloned())
    }

    fn list_transfers(&self, query: &TransferQuery) -> Result<Vec<TransferRequest>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<_> = state
            .transfers
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn conditional_update(&self, update: ConditionalUpdate) -> Result<UpdateOutcome, StoreError> {
        let mut state = self.write()?;

        if let Some(violation) = update.expect.iter().find_map(|e| state.check(e)) {
            return Ok(UpdateOutcome::Rejected(violation));
        }

        // Build every new row first so a failure leaves the state untouched.
        let mut item_rows = Vec::new();
        let mut transfer_rows = Vec::new();
        let mut mutations = Vec::with_capacity(update.writes.len());
        for write in &update.writes {
            match write {
                RowWrite::SetItemTeam { item, team } => {
                    let Some(old) = state.items.get(item) else {
                        return Ok(UpdateOutcome::Rejected(Violation::ItemMissing { item: item.clone() }));
                    };
                    let new = old.moved_to(*team, update.at);
                    mutations.push(Mutation::update(
                        EntityType::InventoryItem,
                        item.to_string(),
                        row_json(&new)?,
                        Some(row_json(old)?),
                    ));
                    item_rows.push(new);
                }
                RowWrite::PutTransfer(transfer) => {
                    let id = transfer.id_typed();
                    let old = state
                        .transfers
                        .get(&id)
                        .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))?;
                    mutations.push(Mutation::update(
                        EntityType::TransferRequest,
                        id.to_string(),
                        row_json(transfer)?,
                        Some(row_json(old)?),
                    ));
                    transfer_rows.push(transfer.clone());
                }
            }
        }

        for item in item_rows {
            state.items.insert(item.id.clone(), item);
        }
        for transfer in transfer_rows {
            state.transfers.insert(transfer.id_typed(), transfer);
        }
        if let Some(holder) = update.release {
            state.reservations.retain(|_, h| *h != holder);
        }

        self.emit(mutations);
        Ok(UpdateOutcome::Applied)
    }
}
