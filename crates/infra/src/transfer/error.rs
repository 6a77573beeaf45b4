use thiserror::Error;

use lotsync_core::{DomainError, TeamId, TransferId};
use lotsync_inventory::{ItemId, TransferRuleError, TransferStatus};

use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Failure of a transfer operation.
///
/// `Validation`, `Forbidden` and `NotFound` are never retried. The conflict
/// variants are recoverable by re-issuing `create` with a corrected item set.
/// `ServiceUnavailable` is only produced by transient store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Another pending request holds one of the items.
    #[error("item {item} is reserved by transfer {holder}")]
    ReservationConflict { item: ItemId, holder: TransferId },

    /// An item left the source team between reservation and approval.
    /// `actual` is `None` when the item row no longer exists.
    #[error("item {item} is no longer owned by team {expected}")]
    OwnershipConflict {
        item: ItemId,
        expected: TeamId,
        actual: Option<TeamId>,
    },

    /// An item's reservation vanished while the request was still pending.
    #[error("reservation on item {item} was lost")]
    ReservationLost { item: ItemId },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("transfer {id} is already {status}")]
    AlreadyDecided { id: TransferId, status: TransferStatus },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Permanent store failure (corrupt row, unexpected duplicate).
    #[error("store failure: {0}")]
    Store(StoreError),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<DomainError> for TransferError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => TransferError::Validation(msg),
            DomainError::NotFound(what) => TransferError::NotFound(what),
            DomainError::Forbidden(msg) => TransferError::Forbidden(msg),
            DomainError::Conflict(msg) | DomainError::InvariantViolation(msg) => {
                TransferError::InvariantViolation(msg)
            }
        }
    }
}

impl From<TransferRuleError> for TransferError {
    fn from(value: TransferRuleError) -> Self {
        match value {
            TransferRuleError::Domain(err) => err.into(),
            TransferRuleError::AlreadyDecided { id, status } => TransferError::AlreadyDecided { id, status },
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(value: StoreError) -> Self {
        match value {
            err if err.is_transient() => TransferError::ServiceUnavailable(err.to_string()),
            StoreError::NotFound(what) => TransferError::NotFound(what),
            StoreError::ReservationConflict { item, holder } => TransferError::ReservationConflict { item, holder },
            other => TransferError::Store(other),
        }
    }
}

impl From<LedgerError> for TransferError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Conflict { item, holder } => TransferError::ReservationConflict { item, holder },
            LedgerError::Store(err) => err.into(),
        }
    }
}
