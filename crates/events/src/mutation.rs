use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::entity::{EntityType, MutationOp};

/// A row change reported by a write path, before the hub sequences it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub entity_type: EntityType,
    pub op: MutationOp,
    pub entity_id: String,
    /// New row snapshot (for deletes: the deleted row).
    pub row: JsonValue,
    /// Previous row snapshot, when the writer knows it.
    pub old_row: Option<JsonValue>,
}

impl Mutation {
    pub fn insert(entity_type: EntityType, entity_id: impl Into<String>, row: JsonValue) -> Self {
        Self {
            entity_type,
            op: MutationOp::Insert,
            entity_id: entity_id.into(),
            row,
            old_row: None,
        }
    }

    pub fn update(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        row: JsonValue,
        old_row: Option<JsonValue>,
    ) -> Self {
        Self {
            entity_type,
            op: MutationOp::Update,
            entity_id: entity_id.into(),
            row,
            old_row,
        }
    }

    pub fn delete(entity_type: EntityType, entity_id: impl Into<String>, row: JsonValue) -> Self {
        Self {
            entity_type,
            op: MutationOp::Delete,
            entity_id: entity_id.into(),
            row: row.clone(),
            old_row: Some(row),
        }
    }
}

/// Envelope for a sequenced entity mutation, as delivered to subscribers.
///
/// Notes:
/// - `sequence` is strictly increasing **per entity type** within one hub.
/// - Delivery is at-least-once: consumers dedupe on `(entity_id, sequence)`.
/// - Transient: never persisted, never replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    event_id: Uuid,
    entity_type: EntityType,
    op: MutationOp,
    entity_id: String,
    row: JsonValue,
    old_row: Option<JsonValue>,

    /// Position in the per-entity-type stream of the publishing hub.
    sequence: u64,

    /// Instance id of the process whose write produced this event.
    origin: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl MutationEvent {
    pub fn new(
        event_id: Uuid,
        mutation: Mutation,
        sequence: u64,
        origin: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            entity_type: mutation.entity_type,
            op: mutation.op,
            entity_id: mutation.entity_id,
            row: mutation.row,
            old_row: mutation.old_row,
            sequence,
            origin,
            occurred_at,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn op(&self) -> MutationOp {
        self.op
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn row(&self) -> &JsonValue {
        &self.row
    }

    pub fn old_row(&self) -> Option<&JsonValue> {
        self.old_row.as_ref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// The un-sequenced mutation carried by this event.
    pub fn to_mutation(&self) -> Mutation {
        Mutation {
            entity_type: self.entity_type,
            op: self.op,
            entity_id: self.entity_id.clone(),
            row: self.row.clone(),
            old_row: self.old_row.clone(),
        }
    }
}
