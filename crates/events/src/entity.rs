use serde::{Deserialize, Serialize};

/// Entity types whose mutations are tracked and fanned out to subscribers.
///
/// Closed on purpose: adding a tracked table means adding a variant, and every
/// `match` over it is checked by the compiler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    InventoryItem,
    TransferRequest,
    Notification,
    Batch,
    Team,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::InventoryItem,
        EntityType::TransferRequest,
        EntityType::Notification,
        EntityType::Batch,
        EntityType::Team,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::InventoryItem => "inventory_item",
            EntityType::TransferRequest => "transfer_request",
            EntityType::Notification => "notification",
            EntityType::Batch => "batch",
            EntityType::Team => "team",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl core::fmt::Display for EntityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-level mutation kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationOp {
    Insert,
    Update,
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_variant() {
        for t in EntityType::ALL {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EntityType::parse("staff"), None);
    }

    #[test]
    fn op_serializes_uppercase() {
        let json = serde_json::to_value(MutationOp::Delete).unwrap();
        assert_eq!(json, serde_json::json!("DELETE"));
    }
}
