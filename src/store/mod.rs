//! Durable keyed storage for requisitions.
//!
//! Status writes only happen through [`RequisitionStore::compare_and_set_status`]
//! and [`RequisitionStore::bulk_transition`], and both take a
//! [`StatusChange`] which only the approval state machine can construct.
use crate::audit::TransitionRecord;
use crate::error::StoreError;
use crate::machine::StatusChange;
use crate::requisition::{Amount, ApprovalStatus, NewRequisition, Requisition, RequisitionId};
use crate::validation::ValidatedDraft;

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Result of a guarded single record write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The guard held and the write was committed.
    Applied(Requisition),
    /// The record was not in the expected status; carries what was found.
    Mismatch(Requisition),
    Missing,
}

pub trait RequisitionStore: Send + Sync {
    /// Short backend name, reported by diagnostics.
    fn backend(&self) -> &'static str;

    /// Persist a freshly derived requisition, stamping `created_at` and
    /// `updated_at`. Fails if the id is already taken.
    fn insert(&self, new: NewRequisition) -> Result<Requisition, StoreError>;

    fn get(&self, id: &RequisitionId) -> Result<Option<Requisition>, StoreError>;

    /// All requisitions, oldest first.
    fn list(&self) -> Result<Vec<Requisition>, StoreError>;

    fn find_by_vendor(&self, vendor_id: &str) -> Result<Vec<Requisition>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.vendor_id == vendor_id)
            .collect())
    }

    /// Audit trail for one requisition, oldest first.
    fn history(&self, id: &RequisitionId) -> Result<Vec<TransitionRecord>, StoreError>;

    /// Apply `change` only if the record is currently in `expected`. The read
    /// and the write are one atomic unit.
    fn compare_and_set_status(
        &self,
        id: &RequisitionId,
        expected: ApprovalStatus,
        change: &StatusChange,
    ) -> Result<CasOutcome, StoreError>;

    /// Apply `change` to every record in `from` whose amount is at least
    /// `min_amount`, all or nothing. Returns the number of rows changed.
    fn bulk_transition(
        &self,
        from: ApprovalStatus,
        min_amount: Amount,
        change: &StatusChange,
    ) -> Result<usize, StoreError>;

    /// Replace the editable fields if the record is still in `expected`.
    fn update_details(
        &self,
        id: &RequisitionId,
        expected: ApprovalStatus,
        details: &ValidatedDraft,
    ) -> Result<CasOutcome, StoreError>;

    /// Record an advisory risk score. Writing the score a record already has
    /// is a no-op.
    fn record_risk_score(
        &self,
        id: &RequisitionId,
        score: u8,
    ) -> Result<Option<Requisition>, StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub(crate) fn sort_oldest_first(records: &mut [Requisition]) {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
