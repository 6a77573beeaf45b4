//! Who may approve or reject a transfer.

use std::collections::{HashMap, HashSet};

use lotsync_core::{DomainError, TeamId, UserId};
use lotsync_inventory::TransferRequest;

/// A decision an approver can make on a pending request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

pub trait ApprovalPolicy: Send + Sync {
    /// `Err(DomainError::Forbidden)` if `actor` may not make `decision` on `request`.
    fn authorize(&self, decision: Decision, request: &TransferRequest, actor: UserId) -> Result<(), DomainError>;
}

/// Anyone except the requester.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeparationOfDuties;

impl ApprovalPolicy for SeparationOfDuties {
    fn authorize(&self, decision: Decision, request: &TransferRequest, actor: UserId) -> Result<(), DomainError> {
        if actor == request.requester_id() {
            return Err(DomainError::forbidden(format!(
                "requester may not {} their own transfer",
                decision.as_str()
            )));
        }
        Ok(())
    }
}

/// Explicit approvers per source team, on top of separation of duties.
#[derive(Debug, Default, Clone)]
pub struct ApproverRoster {
    approvers: HashMap<TeamId, HashSet<UserId>>,
}

impl ApproverRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, team_id: TeamId, user_id: UserId) -> Self {
        self.approvers.entry(team_id).or_default().insert(user_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.approvers.is_empty()
    }
}

impl FromIterator<(TeamId, UserId)> for ApproverRoster {
    fn from_iter<I: IntoIterator<Item = (TeamId, UserId)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ApproverRoster::new(), |roster, (team, user)| roster.allow(team, user))
    }
}

impl ApprovalPolicy for ApproverRoster {
    fn authorize(&self, decision: Decision, request: &TransferRequest, actor: UserId) -> Result<(), DomainError> {
        SeparationOfDuties.authorize(decision, request, actor)?;

        let team = request.source_team();
        let listed = self.approvers.get(&team).is_some_and(|users| users.contains(&actor));
        if !listed {
            return Err(DomainError::forbidden(format!(
                "user {actor} may not {} transfers out of team {team}",
                decision.as_str()
            )));
        }
        Ok(())
    }
}
