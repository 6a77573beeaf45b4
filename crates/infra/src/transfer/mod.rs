//! Transfer request workflow.
//!
//! `TransferRequestManager` composes the pure `TransferRequest` state machine
//! with the inventory store:
//!
//! ```text
//! create  : validate → check items → reserve + insert row (one write)
//! approve : authorize → one conditional write
//!             expect  row version, source ownership, reservation (per item)
//!             write   item.team = dest (per item), row = APPROVED
//!             release reservation
//!           → invalidate stats (both teams) → notify requester
//! reject  : authorize → conditional write (version, row = REJECTED, release)
//! cancel  : requester only → conditional write (version, row = CANCELLED, release)
//! ```
//!
//! Every terminal transition releases the reservation in the same write that
//! moves the row, so a request is pending exactly while it holds its items.
//!
//! Row changes reach the sync hub through the store's change sink, in commit
//! order; the manager never publishes directly.

mod error;
mod policy;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use lotsync_core::{Aggregate, AggregateRoot, TeamId, TransferId, UserId};
use lotsync_events::Event;
use lotsync_inventory::{
    ApproveTransfer, CancelTransfer, ItemId, MarkConflict, OpenTransfer, RejectTransfer,
    TransferCommand, TransferRequest, TransferStatus,
};

use crate::ledger::ReservationLedger;
use crate::notify::{NotificationDispatcher, TransferOutcome};
use crate::stats_cache::StatsInvalidation;
use crate::store::{
    ConditionalUpdate, Expectation, InventoryStore, ItemQuery, RowWrite, TransferQuery, UpdateOutcome,
    Violation,
};

pub use error::TransferError;
pub use policy::{ApprovalPolicy, ApproverRoster, Decision, SeparationOfDuties};

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Upper bound on how long `approve` may wait for row locks.
    pub approve_timeout: Duration,
    /// Automatic re-attempts of `approve` after a transient store failure.
    pub approve_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            approve_timeout: Duration::from_secs(5),
            approve_retries: 1,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Input of [`TransferRequestManager::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub source_team: TeamId,
    pub dest_team: TeamId,
    pub item_ids: Vec<ItemId>,
    pub requester_id: UserId,
    pub reason: Option<String>,
}

/// Owns the transfer state machine.
pub struct TransferRequestManager<S> {
    ledger: ReservationLedger<S>,
    policy: Arc<dyn ApprovalPolicy>,
    stats: Option<Arc<dyn StatsInvalidation>>,
    notifier: Option<Arc<NotificationDispatcher>>,
    config: TransferConfig,
}

impl<S> core::fmt::Debug for TransferRequestManager<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransferRequestManager")
            .field("config", &self.config)
            .field("invalidates_stats", &self.stats.is_some())
            .field("notifies", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}

impl<S> TransferRequestManager<S>
where
    S: InventoryStore,
{
    pub fn new(store: S, config: TransferConfig) -> Self {
        Self {
            ledger: ReservationLedger::new(store),
            policy: Arc::new(SeparationOfDuties),
            stats: None,
            notifier: None,
            config,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Invalidate both teams' cached stats after every approval.
    pub fn with_stats(mut self, stats: Arc<dyn StatsInvalidation>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn ledger(&self) -> &ReservationLedger<S> {
        &self.ledger
    }

    fn store(&self) -> &S {
        self.ledger.store()
    }

    /// Open a PENDING request and reserve its items.
    ///
    /// Fails without side effects on invalid input, on an item that is missing
    /// or not owned by the source team, or on an item reserved by another
    /// pending request.
    #[instrument(skip(self, input), fields(source_team = %input.source_team, dest_team = %input.dest_team), err)]
    pub fn create(&self, input: NewTransfer) -> Result<TransferRequest, TransferError> {
        let transfer_id = TransferId::new();
        let mut request = TransferRequest::empty(transfer_id);
        let events = request.execute(&TransferCommand::Open(OpenTransfer {
            transfer_id,
            source_team: input.source_team,
            dest_team: input.dest_team,
            item_ids: input.item_ids,
            requester_id: input.requester_id,
            reason: input.reason,
            occurred_at: Utc::now(),
        }))?;

        let found = self
            .store()
            .query_items(&ItemQuery::ids(request.item_ids().iter().cloned()))?;
        for id in request.item_ids() {
            match found.iter().find(|item| &item.id == id) {
                None => return Err(TransferError::NotFound(format!("item {id}"))),
                Some(item) if item.team_id != request.source_team() => {
                    return Err(TransferError::Validation(format!(
                        "item {id} is not owned by team {}",
                        request.source_team()
                    )));
                }
                Some(_) => {}
            }
        }

        self.ledger.open(&request)?;

        committed(transfer_id, &events);
        Ok(request)
    }

    /// Move every item to the destination team and mark the request APPROVED.
    ///
    /// Replaying an approval of an already-APPROVED request returns it
    /// unchanged. A transient store failure is retried `approve_retries` times
    /// before surfacing as `ServiceUnavailable`, with the request left PENDING.
    #[instrument(skip(self), err)]
    pub fn approve(&self, transfer_id: TransferId, approver_id: UserId) -> Result<TransferRequest, TransferError> {
        let mut attempt = 0;
        loop {
            match self.approve_once(transfer_id, approver_id) {
                Err(TransferError::ServiceUnavailable(reason)) if attempt < self.config.approve_retries => {
                    attempt += 1;
                    warn!(transfer_id = %transfer_id, attempt, %reason, "transient failure during approve; retrying");
                    thread::sleep(self.config.retry_backoff);
                }
                other => return other,
            }
        }
    }

    fn approve_once(&self, transfer_id: TransferId, approver_id: UserId) -> Result<TransferRequest, TransferError> {
        let current = self.get(transfer_id)?;
        self.policy.authorize(Decision::Approve, &current, approver_id)?;

        if current.status() == TransferStatus::Approved {
            // A retry after an ambiguous commit lands here too, so the side
            // effects of the approval are repeated. Both are idempotent.
            debug!(transfer_id = %transfer_id, "transfer already approved");
            self.invalidate_stats(&current);
            self.notify(&current, TransferOutcome::Approved);
            return Ok(current);
        }

        let now = Utc::now();
        let mut approved = current.clone();
        let events = approved.execute(&TransferCommand::Approve(ApproveTransfer {
            approver_id,
            occurred_at: now,
        }))?;

        let source = current.source_team();
        let dest = current.dest_team();
        let mut expect = vec![Expectation::TransferAt {
            transfer: transfer_id,
            version: current.version(),
        }];
        let mut writes = Vec::with_capacity(current.item_ids().len() + 1);
        for item in current.item_ids() {
            expect.push(Expectation::ItemOwnedBy {
                item: item.clone(),
                team: source,
            });
            expect.push(Expectation::ItemReservedBy {
                item: item.clone(),
                transfer: transfer_id,
            });
            writes.push(RowWrite::SetItemTeam {
                item: item.clone(),
                team: dest,
            });
        }
        writes.push(RowWrite::PutTransfer(approved.clone()));

        let outcome = self.store().conditional_update(ConditionalUpdate {
            expect,
            writes,
            release: Some(transfer_id),
            at: now,
        })?;

        match outcome {
            UpdateOutcome::Applied => {
                committed(transfer_id, &events);
                debug!(
                    transfer_id = %transfer_id,
                    source_team = %source,
                    dest_team = %dest,
                    item_count = approved.item_ids().len(),
                    "items moved"
                );
                self.invalidate_stats(&approved);
                self.notify(&approved, TransferOutcome::Approved);
                Ok(approved)
            }
            UpdateOutcome::Rejected(Violation::TransferVersion { .. }) => {
                let latest = self.get(transfer_id)?;
                if latest.status() == TransferStatus::Approved {
                    return Ok(latest);
                }
                Err(TransferError::AlreadyDecided {
                    id: transfer_id,
                    status: latest.status(),
                })
            }
            UpdateOutcome::Rejected(Violation::ItemOwnership { item, expected, actual }) => {
                let note = format!("item {item} moved from team {expected} to team {actual}");
                self.mark_conflict(&current, approver_id, note)?;
                Err(TransferError::OwnershipConflict {
                    item,
                    expected,
                    actual: Some(actual),
                })
            }
            UpdateOutcome::Rejected(Violation::ItemMissing { item }) => {
                let note = format!("item {item} no longer exists");
                self.mark_conflict(&current, approver_id, note)?;
                Err(TransferError::OwnershipConflict {
                    item,
                    expected: source,
                    actual: None,
                })
            }
            UpdateOutcome::Rejected(Violation::Reservation { item, actual, .. }) => {
                let note = match actual {
                    Some(holder) => format!("reservation on item {item} is held by transfer {holder}"),
                    None => format!("reservation on item {item} was lost"),
                };
                self.mark_conflict(&current, approver_id, note)?;
                Err(TransferError::ReservationLost { item })
            }
        }
    }

    /// Record a CONFLICT outcome and free the items; the caller must re-create.
    fn mark_conflict(
        &self,
        current: &TransferRequest,
        approver_id: UserId,
        note: String,
    ) -> Result<TransferRequest, TransferError> {
        warn!(transfer_id = %current.id_typed(), %note, "transfer conflicted");
        let conflicted = self.close(
            current,
            TransferCommand::MarkConflict(MarkConflict {
                approver_id,
                note,
                occurred_at: Utc::now(),
            }),
        )?;
        self.notify(&conflicted, TransferOutcome::Conflict);
        Ok(conflicted)
    }

    /// Mark a PENDING request REJECTED. No ownership change.
    #[instrument(skip(self, reason), err)]
    pub fn reject(
        &self,
        transfer_id: TransferId,
        approver_id: UserId,
        reason: Option<String>,
    ) -> Result<TransferRequest, TransferError> {
        let current = self.get(transfer_id)?;
        self.policy.authorize(Decision::Reject, &current, approver_id)?;

        let rejected = self.close(
            &current,
            TransferCommand::Reject(RejectTransfer {
                approver_id,
                reason,
                occurred_at: Utc::now(),
            }),
        )?;

        self.notify(&rejected, TransferOutcome::Rejected);
        Ok(rejected)
    }

    /// Withdraw a PENDING request. Only the original requester may cancel.
    #[instrument(skip(self), err)]
    pub fn cancel(&self, transfer_id: TransferId, requester_id: UserId) -> Result<TransferRequest, TransferError> {
        let current = self.get(transfer_id)?;
        let cancelled = self.close(
            &current,
            TransferCommand::Cancel(CancelTransfer {
                requester_id,
                occurred_at: Utc::now(),
            }),
        )?;

        Ok(cancelled)
    }

    /// Current state of a request, terminal or not.
    pub fn get(&self, transfer_id: TransferId) -> Result<TransferRequest, TransferError> {
        self.store()
            .get_transfer(transfer_id)?
            .ok_or_else(|| TransferError::NotFound(format!("transfer {transfer_id}")))
    }

    pub fn list(&self, query: &TransferQuery) -> Result<Vec<TransferRequest>, TransferError> {
        Ok(self.store().list_transfers(query)?)
    }

    /// Apply a terminal command that leaves items where they are: one write
    /// guarded by the row version that stores the new row and releases the
    /// reservation.
    fn close(&self, current: &TransferRequest, command: TransferCommand) -> Result<TransferRequest, TransferError> {
        let transfer_id = current.id_typed();
        let mut next = current.clone();
        let events = next.execute(&command)?;

        let outcome = self.store().conditional_update(ConditionalUpdate {
            expect: vec![Expectation::TransferAt {
                transfer: transfer_id,
                version: current.version(),
            }],
            writes: vec![RowWrite::PutTransfer(next.clone())],
            release: Some(transfer_id),
            at: Utc::now(),
        })?;

        match outcome {
            UpdateOutcome::Applied => {
                committed(transfer_id, &events);
                Ok(next)
            }
            UpdateOutcome::Rejected(Violation::TransferVersion { .. }) => {
                let latest = self.get(transfer_id)?;
                Err(TransferError::AlreadyDecided {
                    id: transfer_id,
                    status: latest.status(),
                })
            }
            UpdateOutcome::Rejected(other) => Err(TransferError::InvariantViolation(format!(
                "unexpected violation closing transfer {transfer_id}: {other:?}"
            ))),
        }
    }

    fn invalidate_stats(&self, request: &TransferRequest) {
        if let Some(stats) = &self.stats {
            for team in request.teams() {
                stats.invalidate_team(team);
            }
        }
    }

    /// Best effort: a failed delivery is logged and never undoes the decision.
    fn notify(&self, request: &TransferRequest, outcome: TransferOutcome) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(err) = notifier.notify(request.id_typed(), request.requester_id(), outcome) {
            warn!(
                transfer_id = %request.id_typed(),
                recipient_id = %request.requester_id(),
                ?outcome,
                error = %err,
                "notification failed"
            );
        }
    }
}

/// Log the decision events of a write that has committed.
fn committed<E: Event>(transfer_id: TransferId, events: &[E]) {
    for event in events {
        info!(
            transfer_id = %transfer_id,
            event_type = event.event_type(),
            event_version = event.version(),
            occurred_at = %event.occurred_at(),
            "transfer event committed"
        );
    }
}
