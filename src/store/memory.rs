use super::{CasOutcome, RequisitionStore, sort_oldest_first};
use crate::audit::TransitionRecord;
use crate::error::StoreError;
use crate::machine::StatusChange;
use crate::requisition::{
    Amount, ApprovalStatus, NewRequisition, Requisition, RequisitionId, TimeStamp,
};
use crate::validation::ValidatedDraft;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reference store kept entirely in memory. One lock covers every record, so
/// each operation, bulk ones included, is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<RequisitionId, Requisition>,
    history: Vec<TransitionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl RequisitionStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn insert(&self, new: NewRequisition) -> Result<Requisition, StoreError> {
        let mut inner = self.write()?;
        if inner.records.contains_key(new.id()) {
            return Err(StoreError::DuplicateId(new.id().clone()));
        }

        let (requisition, record) = new.into_requisition(TimeStamp::new());
        inner.records.insert(requisition.id.clone(), requisition.clone());
        inner.history.push(record);

        Ok(requisition)
    }

    fn get(&self, id: &RequisitionId) -> Result<Option<Requisition>, StoreError> {
        Ok(self.read()?.records.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Requisition>, StoreError> {
        let mut records: Vec<Requisition> = self.read()?.records.values().cloned().collect();
        sort_oldest_first(&mut records);
        Ok(records)
    }

    fn history(&self, id: &RequisitionId) -> Result<Vec<TransitionRecord>, StoreError> {
        Ok(self
            .read()?
            .history
            .iter()
            .filter(|r| &r.requisition_id == id)
            .cloned()
            .collect())
    }

    fn compare_and_set_status(
        &self,
        id: &RequisitionId,
        expected: ApprovalStatus,
        change: &StatusChange,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.write()?;
        let Some(current) = inner.records.get_mut(id) else {
            return Ok(CasOutcome::Missing);
        };
        if current.approval_status != expected {
            return Ok(CasOutcome::Mismatch(current.clone()));
        }

        let record = current.apply(change, TimeStamp::new());
        let updated = current.clone();
        inner.history.push(record);

        Ok(CasOutcome::Applied(updated))
    }

    fn bulk_transition(
        &self,
        from: ApprovalStatus,
        min_amount: Amount,
        change: &StatusChange,
    ) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let at = TimeStamp::new();

        let mut records = Vec::new();
        for current in inner.records.values_mut() {
            if current.approval_status == from && current.amount >= min_amount {
                records.push(current.apply(change, at));
            }
        }
        let changed = records.len();
        inner.history.extend(records);

        Ok(changed)
    }

    fn update_details(
        &self,
        id: &RequisitionId,
        expected: ApprovalStatus,
        details: &ValidatedDraft,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.write()?;
        let Some(current) = inner.records.get_mut(id) else {
            return Ok(CasOutcome::Missing);
        };
        if current.approval_status != expected {
            return Ok(CasOutcome::Mismatch(current.clone()));
        }

        let record = current.apply_details(details, TimeStamp::new());
        let updated = current.clone();
        inner.history.push(record);

        Ok(CasOutcome::Applied(updated))
    }

    fn record_risk_score(
        &self,
        id: &RequisitionId,
        score: u8,
    ) -> Result<Option<Requisition>, StoreError> {
        let mut inner = self.write()?;
        let Some(current) = inner.records.get_mut(id) else {
            return Ok(None);
        };
        if current.risk_score == score {
            return Ok(Some(current.clone()));
        }

        let record = current.apply_risk_score(score, TimeStamp::new());
        let updated = current.clone();
        inner.history.push(record);

        Ok(Some(updated))
    }
}
