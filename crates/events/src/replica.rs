//! Client-side live copy of one entity table, kept current from hub events.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::cursor::{Admission, MutationCursor};
use crate::entity::{EntityType, MutationOp};
use crate::mutation::MutationEvent;

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("event for {found} applied to a {expected} collection")]
    WrongEntityType {
        expected: EntityType,
        found: EntityType,
    },

    #[error("row for {entity_id} could not be decoded: {source}")]
    Decode {
        entity_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Rows keyed by entity id, updated by applying [`MutationEvent`]s.
///
/// Applying is idempotent: re-delivered events are skipped by sequence. When a
/// gap is detected the event is still applied, and [`needs_resync`] turns on
/// until the caller supplies a fresh snapshot through [`resync`].
///
/// [`needs_resync`]: LiveCollection::needs_resync
/// [`resync`]: LiveCollection::resync
#[derive(Debug, Clone)]
pub struct LiveCollection<R> {
    entity_type: EntityType,
    rows: BTreeMap<String, R>,
    cursor: MutationCursor,
    needs_resync: bool,
}

impl<R> LiveCollection<R>
where
    R: DeserializeOwned,
{
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            rows: BTreeMap::new(),
            cursor: MutationCursor::new(),
            needs_resync: false,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn apply(&mut self, event: &MutationEvent) -> Result<Admission, ReplicaError> {
        if event.entity_type() != self.entity_type {
            return Err(ReplicaError::WrongEntityType {
                expected: self.entity_type,
                found: event.entity_type(),
            });
        }

        // Decode before touching the cursor so a bad row can be retried.
        let row = match event.op() {
            MutationOp::Insert | MutationOp::Update => Some(
                serde_json::from_value::<R>(event.row().clone()).map_err(|source| ReplicaError::Decode {
                    entity_id: event.entity_id().to_string(),
                    source,
                })?,
            ),
            MutationOp::Delete => None,
        };

        let admission = self.cursor.admit(event);
        match admission {
            Admission::Duplicate => return Ok(admission),
            Admission::Gap { .. } => self.needs_resync = true,
            Admission::Apply => {}
        }

        match row {
            Some(row) => {
                self.rows.insert(event.entity_id().to_string(), row);
            }
            None => {
                self.rows.remove(event.entity_id());
            }
        }
        Ok(admission)
    }

    /// Replace every row with a snapshot read from the store.
    pub fn resync(&mut self, snapshot: impl IntoIterator<Item = (String, R)>) {
        self.rows = snapshot.into_iter().collect();
        self.cursor.reset(self.entity_type);
        self.needs_resync = false;
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn get(&self, entity_id: &str) -> Option<&R> {
        self.rows.get(entity_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &R)> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::hub::SyncHub;
    use crate::mutation::Mutation;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Row {
        team: String,
    }

    fn row(team: &str) -> serde_json::Value {
        json!({ "team": team })
    }

    #[test]
    fn follows_insert_update_delete() {
        let hub = SyncHub::new();
        let mut items = LiveCollection::<Row>::new(EntityType::InventoryItem);

        let a = hub.publish(Mutation::insert(EntityType::InventoryItem, "s1", row("red")));
        let b = hub.publish(Mutation::update(
            EntityType::InventoryItem,
            "s1",
            row("blue"),
            Some(row("red")),
        ));
        items.apply(&a).unwrap();
        items.apply(&b).unwrap();
        assert_eq!(items.get("s1").unwrap().team, "blue");

        let c = hub.publish(Mutation::delete(EntityType::InventoryItem, "s1", row("blue")));
        items.apply(&c).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn redelivered_update_does_not_regress_state() {
        let hub = SyncHub::new();
        let mut items = LiveCollection::<Row>::new(EntityType::InventoryItem);

        let first = hub.publish(Mutation::update(EntityType::InventoryItem, "s1", row("red"), None));
        let second = hub.publish(Mutation::update(EntityType::InventoryItem, "s1", row("blue"), None));
        items.apply(&first).unwrap();
        items.apply(&second).unwrap();

        assert_eq!(items.apply(&first).unwrap(), Admission::Duplicate);
        assert_eq!(items.get("s1").unwrap().team, "blue");
    }

    #[test]
    fn gap_flags_resync_until_snapshot() {
        let hub = SyncHub::new();
        let mut items = LiveCollection::<Row>::new(EntityType::InventoryItem);

        let first = hub.publish(Mutation::insert(EntityType::InventoryItem, "s1", row("red")));
        let _missed = hub.publish(Mutation::insert(EntityType::InventoryItem, "s2", row("red")));
        let third = hub.publish(Mutation::insert(EntityType::InventoryItem, "s3", row("red")));

        items.apply(&first).unwrap();
        items.apply(&third).unwrap();
        assert!(items.needs_resync());

        items.resync(vec![
            ("s1".to_string(), Row { team: "red".into() }),
            ("s2".to_string(), Row { team: "red".into() }),
            ("s3".to_string(), Row { team: "red".into() }),
        ]);
        assert!(!items.needs_resync());
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn rejects_other_entity_types() {
        let hub = SyncHub::new();
        let mut items = LiveCollection::<Row>::new(EntityType::InventoryItem);
        let ev = hub.publish(Mutation::insert(EntityType::Team, "t1", row("red")));

        assert!(matches!(
            items.apply(&ev),
            Err(ReplicaError::WrongEntityType { .. })
        ));
    }
}
