use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use lotsync_core::{BatchId, DomainError, TeamId, TransferId, UserId};
use lotsync_infra::TransferQuery;
use lotsync_inventory::{ItemId, ItemStatus, StatsFilter, StatsRange, TransferRequest, TransferStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub source_team: TeamId,
    pub dest_team: TeamId,
    pub item_ids: Vec<String>,
    pub reason: Option<String>,
}

impl CreateTransferRequest {
    /// Serials as typed ids; a blank serial is a validation error.
    pub fn parsed_item_ids(&self) -> Result<Vec<ItemId>, DomainError> {
        self.item_ids.iter().map(|raw| ItemId::parse(raw)).collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct ApproveTransferRequest {
    pub approver_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct RejectTransferRequest {
    pub approver_id: UserId,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelTransferRequest {
    pub requester_id: UserId,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTransfersQuery {
    pub team_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

impl ListTransfersQuery {
    pub fn to_query(&self) -> Result<TransferQuery, DomainError> {
        let team_id = non_blank(&self.team_id).map(str::parse::<TeamId>).transpose()?;
        let status = non_blank(&self.status)
            .map(|raw| {
                TransferStatus::parse(raw)
                    .ok_or_else(|| DomainError::validation(format!("unknown transfer status: {raw}")))
            })
            .transpose()?;
        Ok(TransferQuery {
            team_id,
            status,
            requester_id: None,
            limit: self.limit,
        })
    }
}

/// `GET /teams/:id/stats` query string.
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub range: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub batch_id: Option<String>,
    pub assigned_to: Option<String>,
    /// Comma-separated item statuses.
    pub status: Option<String>,
}

impl StatsQuery {
    pub fn range(&self) -> Result<StatsRange, DomainError> {
        StatsRange::parse(self.range.as_deref(), self.from, self.to)
    }

    pub fn filter(&self) -> Result<StatsFilter, DomainError> {
        let batch = non_blank(&self.batch_id).map(str::parse::<BatchId>).transpose()?;
        let assigned_to = non_blank(&self.assigned_to).map(str::parse::<UserId>).transpose()?;
        let statuses = match non_blank(&self.status) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse::<ItemStatus>)
                .collect::<Result<BTreeSet<_>, _>>()?,
            None => BTreeSet::new(),
        };
        Ok(StatsFilter {
            batch,
            assigned_to,
            statuses,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct TransferStatusResponse {
    pub id: TransferId,
    pub status: TransferStatus,
}

impl From<&TransferRequest> for TransferStatusResponse {
    fn from(value: &TransferRequest) -> Self {
        Self {
            id: value.id_typed(),
            status: value.status(),
        }
    }
}
