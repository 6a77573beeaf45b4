use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotsync_core::{BatchId, DomainError, TeamId, UserId};

/// SIM serial number: the identity of an inventory item.
///
/// Non-empty, surrounding whitespace trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("ItemId: serial cannot be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ItemId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ItemId> for String {
    fn from(value: ItemId) -> Self {
        value.0
    }
}

/// Lifecycle of a SIM in the field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// In the team's stock, not handed out.
    Available,
    /// Handed to a field agent.
    Assigned,
    /// Sold and activated on the network.
    Active,
    Retired,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 4] = [
        ItemStatus::Available,
        ItemStatus::Assigned,
        ItemStatus::Active,
        ItemStatus::Retired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "AVAILABLE",
            ItemStatus::Assigned => "ASSIGNED",
            ItemStatus::Active => "ACTIVE",
            ItemStatus::Retired => "RETIRED",
        }
    }
}

impl core::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::validation(format!("unknown item status: {wanted}")))
    }
}

/// An inventory row: one SIM, owned by exactly one team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: ItemId,
    pub status: ItemStatus,
    pub team_id: TeamId,
    pub batch_id: BatchId,
    /// Field agent currently holding the SIM, if any.
    pub assigned_to: Option<UserId>,
    pub activated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// A fresh, unassigned item in `team_id`'s stock.
    pub fn new(id: ItemId, team_id: TeamId, batch_id: BatchId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: ItemStatus::Available,
            team_id,
            batch_id,
            assigned_to: None,
            activated_at: None,
            updated_at: now,
        }
    }

    pub fn assign(mut self, user: UserId) -> Self {
        self.status = ItemStatus::Assigned;
        self.assigned_to = Some(user);
        self
    }

    pub fn activate(mut self, at: DateTime<Utc>) -> Self {
        self.status = ItemStatus::Active;
        self.activated_at = Some(at);
        self
    }

    /// Copy of this row owned by `team_id`. Status and assignee are untouched.
    pub fn moved_to(&self, team_id: TeamId, now: DateTime<Utc>) -> Self {
        Self {
            team_id,
            updated_at: now,
            ..self.clone()
        }
    }
}
