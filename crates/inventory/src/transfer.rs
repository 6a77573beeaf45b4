use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use lotsync_core::{Aggregate, AggregateRoot, DomainError, TeamId, TransferId, UserId};
use lotsync_events::Event;

use crate::item::ItemId;

/// Transfer request lifecycle. Everything but `Pending` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Conflict,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Approved => "APPROVED",
            TransferStatus::Rejected => "REJECTED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::Conflict => "CONFLICT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            TransferStatus::Pending,
            TransferStatus::Approved,
            TransferStatus::Rejected,
            TransferStatus::Cancelled,
            TransferStatus::Conflict,
        ]
        .into_iter()
        .find(|st| st.as_str() == s)
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from transfer decision logic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferRuleError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The request already left `Pending`.
    #[error("transfer {id} is already {status}")]
    AlreadyDecided { id: TransferId, status: TransferStatus },
}

/// Aggregate root: TransferRequest.
///
/// Persisted as a row (never deleted); `version` is bumped once per applied
/// event and doubles as the optimistic-concurrency token for that row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    id: TransferId,
    source_team: TeamId,
    dest_team: TeamId,
    item_ids: Vec<ItemId>,
    status: TransferStatus,
    requester_id: UserId,
    approver_id: Option<UserId>,
    reason: Option<String>,
    /// Rejection reason or conflict description.
    decision_note: Option<String>,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    version: u64,
}

impl TransferRequest {
    /// Create an empty, not-yet-opened aggregate instance.
    pub fn empty(id: TransferId) -> Self {
        let nil = Uuid::nil();
        Self {
            id,
            source_team: TeamId::from_uuid(nil),
            dest_team: TeamId::from_uuid(nil),
            item_ids: Vec::new(),
            status: TransferStatus::Pending,
            requester_id: UserId::from_uuid(nil),
            approver_id: None,
            reason: None,
            decision_note: None,
            created_at: DateTime::<Utc>::default(),
            decided_at: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn source_team(&self) -> TeamId {
        self.source_team
    }

    pub fn dest_team(&self) -> TeamId {
        self.dest_team
    }

    /// Requested items, in request order.
    pub fn item_ids(&self) -> &[ItemId] {
        &self.item_ids
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn requester_id(&self) -> UserId {
        self.requester_id
    }

    pub fn approver_id(&self) -> Option<UserId> {
        self.approver_id
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn decision_note(&self) -> Option<&str> {
        self.decision_note.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        self.decided_at
    }

    pub fn is_opened(&self) -> bool {
        self.version > 0
    }

    /// Both teams touched by this request.
    pub fn teams(&self) -> [TeamId; 2] {
        [self.source_team, self.dest_team]
    }
}

impl AggregateRoot for TransferRequest {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTransfer {
    pub transfer_id: TransferId,
    pub source_team: TeamId,
    pub dest_team: TeamId,
    pub item_ids: Vec<ItemId>,
    pub requester_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveTransfer {
    pub approver_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectTransfer {
    pub approver_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub requester_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkConflict (ownership drifted between reservation and approval).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkConflict {
    pub approver_id: UserId,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Open(OpenTransfer),
    Approve(ApproveTransfer),
    Reject(RejectTransfer),
    Cancel(CancelTransfer),
    MarkConflict(MarkConflict),
}

/// Event: TransferOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOpened {
    pub transfer_id: TransferId,
    pub source_team: TeamId,
    pub dest_team: TeamId,
    pub item_ids: Vec<ItemId>,
    pub requester_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub transfer_id: TransferId,
    pub approver_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRejected {
    pub transfer_id: TransferId,
    pub approver_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub transfer_id: TransferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConflicted {
    pub transfer_id: TransferId,
    pub approver_id: UserId,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    Opened(TransferOpened),
    Approved(TransferApproved),
    Rejected(TransferRejected),
    Cancelled(TransferCancelled),
    Conflicted(TransferConflicted),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Opened(_) => "transfer.opened",
            TransferEvent::Approved(_) => "transfer.approved",
            TransferEvent::Rejected(_) => "transfer.rejected",
            TransferEvent::Cancelled(_) => "transfer.cancelled",
            TransferEvent::Conflicted(_) => "transfer.conflicted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Opened(e) => e.occurred_at,
            TransferEvent::Approved(e) => e.occurred_at,
            TransferEvent::Rejected(e) => e.occurred_at,
            TransferEvent::Cancelled(e) => e.occurred_at,
            TransferEvent::Conflicted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TransferRequest {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = TransferRuleError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::Opened(e) => {
                self.id = e.transfer_id;
                self.source_team = e.source_team;
                self.dest_team = e.dest_team;
                self.item_ids = e.item_ids.clone();
                self.requester_id = e.requester_id;
                self.reason = e.reason.clone();
                self.status = TransferStatus::Pending;
                self.created_at = e.occurred_at;
            }
            TransferEvent::Approved(e) => {
                self.status = TransferStatus::Approved;
                self.approver_id = Some(e.approver_id);
                self.decided_at = Some(e.occurred_at);
            }
            TransferEvent::Rejected(e) => {
                self.status = TransferStatus::Rejected;
                self.approver_id = Some(e.approver_id);
                self.decision_note = e.reason.clone();
                self.decided_at = Some(e.occurred_at);
            }
            TransferEvent::Cancelled(e) => {
                self.status = TransferStatus::Cancelled;
                self.decided_at = Some(e.occurred_at);
            }
            TransferEvent::Conflicted(e) => {
                self.status = TransferStatus::Conflict;
                self.approver_id = Some(e.approver_id);
                self.decision_note = Some(e.note.clone());
                self.decided_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Open(cmd) => self.handle_open(cmd),
            TransferCommand::Approve(cmd) => self.handle_approve(cmd),
            TransferCommand::Reject(cmd) => self.handle_reject(cmd),
            TransferCommand::Cancel(cmd) => self.handle_cancel(cmd),
            TransferCommand::MarkConflict(cmd) => self.handle_mark_conflict(cmd),
        }
    }
}

fn normalize_note(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Validate a requested item list: non-empty, no repeated serials.
pub fn validate_item_ids(item_ids: &[ItemId]) -> Result<(), DomainError> {
    if item_ids.is_empty() {
        return Err(DomainError::validation("item_ids cannot be empty"));
    }
    let mut seen = HashSet::with_capacity(item_ids.len());
    for id in item_ids {
        if !seen.insert(id) {
            return Err(DomainError::validation(format!("duplicate item id: {id}")));
        }
    }
    Ok(())
}

impl TransferRequest {
    fn ensure_pending(&self) -> Result<(), TransferRuleError> {
        if !self.is_opened() {
            return Err(DomainError::not_found(format!("transfer {}", self.id)).into());
        }
        if self.status.is_terminal() {
            return Err(TransferRuleError::AlreadyDecided {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenTransfer) -> Result<Vec<TransferEvent>, TransferRuleError> {
        if self.is_opened() {
            return Err(DomainError::conflict(format!("transfer {} already exists", self.id)).into());
        }
        if cmd.transfer_id != self.id {
            return Err(DomainError::invariant("transfer_id mismatch").into());
        }
        if cmd.source_team == cmd.dest_team {
            return Err(DomainError::validation("source and destination team must differ").into());
        }
        validate_item_ids(&cmd.item_ids)?;

        Ok(vec![TransferEvent::Opened(TransferOpened {
            transfer_id: cmd.transfer_id,
            source_team: cmd.source_team,
            dest_team: cmd.dest_team,
            item_ids: cmd.item_ids.clone(),
            requester_id: cmd.requester_id,
            reason: normalize_note(&cmd.reason),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveTransfer) -> Result<Vec<TransferEvent>, TransferRuleError> {
        self.ensure_pending()?;
        Ok(vec![TransferEvent::Approved(TransferApproved {
            transfer_id: self.id,
            approver_id: cmd.approver_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectTransfer) -> Result<Vec<TransferEvent>, TransferRuleError> {
        self.ensure_pending()?;
        Ok(vec![TransferEvent::Rejected(TransferRejected {
            transfer_id: self.id,
            approver_id: cmd.approver_id,
            reason: normalize_note(&cmd.reason),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<TransferEvent>, TransferRuleError> {
        if self.is_opened() && cmd.requester_id != self.requester_id {
            return Err(DomainError::forbidden("only the original requester may cancel").into());
        }
        self.ensure_pending()?;
        Ok(vec![TransferEvent::Cancelled(TransferCancelled {
            transfer_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_conflict(&self, cmd: &MarkConflict) -> Result<Vec<TransferEvent>, TransferRuleError> {
        self.ensure_pending()?;
        Ok(vec![TransferEvent::Conflicted(TransferConflicted {
            transfer_id: self.id,
            approver_id: cmd.approver_id,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
