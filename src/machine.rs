//! Approval state machine. The only component that changes `approval_status`.
//!
//! ```text
//!  PENDING ──────────┬──approve──► APPROVED
//!     │ bulk review  │
//!     ▼              │
//!  REVIEW_REQUIRED ──┴─risk reject─► REJECTED
//! ```
//!
//! Each transition reads the current status and writes the new one through a
//! compare-and-set on the store. When the store reports that someone else got
//! there first, the record is re-read and the transition re-evaluated.
use crate::audit::TransitionKind;
use crate::error::{ValidationError, WorkflowError};
use crate::requisition::{Amount, ApprovalStatus, Requisition, RequisitionId};
use crate::store::{CasOutcome, RequisitionStore};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Upper bound on compare-and-set attempts for one call.
const MAX_CAS_ATTEMPTS: usize = 16;

/// A status transition as handed to the store. Only this module can build
/// one, which keeps every status write behind the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    to: ApprovalStatus,
    kind: TransitionKind,
}

impl StatusChange {
    pub(crate) fn approve() -> Self {
        Self {
            to: ApprovalStatus::Approved,
            kind: TransitionKind::Approved,
        }
    }
    pub(crate) fn risk_reject(reason: String) -> Self {
        Self {
            to: ApprovalStatus::Rejected,
            kind: TransitionKind::RiskRejected { reason },
        }
    }
    pub(crate) fn bulk_review(threshold: Amount) -> Self {
        Self {
            to: ApprovalStatus::ReviewRequired,
            kind: TransitionKind::BulkReviewed { threshold },
        }
    }
    pub fn to(&self) -> ApprovalStatus {
        self.to
    }
    pub fn kind(&self) -> &TransitionKind {
        &self.kind
    }
}

/// What a single record transition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub requisition: Requisition,
    /// False when the record was already in the target state.
    pub changed: bool,
}

// how a transition treats the status it finds
enum Guard {
    Apply,
    AlreadyDone,
    Refuse,
}

pub struct ApprovalStateMachine {
    store: Arc<dyn RequisitionStore>,
}

impl ApprovalStateMachine {
    pub fn new(store: Arc<dyn RequisitionStore>) -> Self {
        Self { store }
    }

    /// `PENDING | REVIEW_REQUIRED -> APPROVED`. Approving an approved record
    /// is a no-op; approving a rejected one is a conflict.
    #[instrument(skip_all, fields(requisition_id = %id))]
    pub fn approve(&self, id: &RequisitionId) -> Result<TransitionOutcome, WorkflowError> {
        self.transition(id, "approve", &StatusChange::approve(), |status| match status {
            ApprovalStatus::Pending | ApprovalStatus::ReviewRequired => Guard::Apply,
            ApprovalStatus::Approved => Guard::AlreadyDone,
            ApprovalStatus::Rejected => Guard::Refuse,
        })
    }

    /// Any non-terminal status `-> REJECTED`, recording `reason`.
    #[instrument(skip_all, fields(requisition_id = %id))]
    pub fn risk_reject(
        &self,
        id: &RequisitionId,
        reason: impl Into<String>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }
        let change = StatusChange::risk_reject(reason);
        self.transition(id, "reject", &change, |status| match status {
            ApprovalStatus::Pending | ApprovalStatus::ReviewRequired => Guard::Apply,
            ApprovalStatus::Rejected => Guard::AlreadyDone,
            ApprovalStatus::Approved => Guard::Refuse,
        })
    }

    /// Move every `PENDING` record with `amount >= threshold` to
    /// `REVIEW_REQUIRED` in one atomic store operation.
    #[instrument(skip_all, fields(threshold = %threshold))]
    pub fn bulk_review(&self, threshold: Amount) -> Result<usize, WorkflowError> {
        let changed = self.store.bulk_transition(
            ApprovalStatus::Pending,
            threshold,
            &StatusChange::bulk_review(threshold),
        )?;
        info!(updated_count = changed, "bulk review applied");
        Ok(changed)
    }

    fn transition<G>(
        &self,
        id: &RequisitionId,
        attempted: &'static str,
        change: &StatusChange,
        guard: G,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        G: Fn(ApprovalStatus) -> Guard,
    {
        let mut current = self
            .store
            .get(id)?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let from = current.approval_status;
            match guard(from) {
                Guard::AlreadyDone => {
                    debug!(status = %from, "transition already applied");
                    return Ok(TransitionOutcome {
                        requisition: current,
                        changed: false,
                    });
                }
                Guard::Refuse => {
                    return Err(WorkflowError::Conflict {
                        id: id.clone(),
                        current: from,
                        attempted,
                    });
                }
                Guard::Apply => {}
            }

            match self.store.compare_and_set_status(id, from, change)? {
                CasOutcome::Applied(requisition) => {
                    info!(%from, to = %change.to(), "transition applied");
                    return Ok(TransitionOutcome {
                        requisition,
                        changed: true,
                    });
                }
                CasOutcome::Mismatch(latest) => {
                    debug!(attempt, expected = %from, found = %latest.approval_status, "lost compare-and-set, re-evaluating");
                    current = latest;
                }
                CasOutcome::Missing => return Err(WorkflowError::NotFound(id.clone())),
            }
        }

        Err(WorkflowError::Conflict {
            id: id.clone(),
            current: current.approval_status,
            attempted,
        })
    }
}
