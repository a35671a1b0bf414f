use super::{CasOutcome, RequisitionStore, sort_oldest_first};
use crate::audit::{TransitionRecord, history_prefix};
use crate::error::StoreError;
use crate::machine::StatusChange;
use crate::requisition::{
    Amount, ApprovalStatus, NewRequisition, Requisition, RequisitionId, TimeStamp,
};
use crate::validation::ValidatedDraft;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree,
};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::debug;

const REQUISITIONS_TREE: &str = "requisitions";
const TRANSITIONS_TREE: &str = "transitions";

/// Sled backed store. Records live in one tree keyed by id, the audit trail in
/// another keyed by `<id>/<seq>/<digest>`. Every write spans both trees in a
/// single sled transaction so a record never changes without its audit entry.
pub struct SledStore {
    db: Arc<sled::Db>,
    requisitions: sled::Tree,
    transitions: sled::Tree,
    // reads, inserts and detail edits hold this shared; bulk transitions hold
    // it exclusively so no reader sees a half applied bulk and no new
    // qualifying row appears mid bulk
    bulk_gate: RwLock<()>,
}

impl SledStore {
    pub fn new(db: Arc<sled::Db>) -> Result<Self, StoreError> {
        let requisitions = db.open_tree(REQUISITIONS_TREE)?;
        let transitions = db.open_tree(TRANSITIONS_TREE)?;

        Ok(Self {
            db,
            requisitions,
            transitions,
            bulk_gate: RwLock::new(()),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }

    /// Store backed by a throwaway database that is removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::new(Arc::new(db))
    }

    fn shared_gate(&self) -> Result<RwLockReadGuard<'_, ()>, StoreError> {
        self.bulk_gate.read().map_err(|_| StoreError::Poisoned)
    }

    // callers must hold the bulk gate
    fn decode_all(&self) -> Result<Vec<Requisition>, StoreError> {
        let mut records = Vec::new();
        for item in self.requisitions.iter() {
            let (_, value) = item?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }

    /// Single record guarded read-modify-write. `mutate` returns `None` when
    /// the guard fails, leaving the record untouched.
    fn guarded_write<F>(&self, id: &RequisitionId, mutate: F) -> Result<CasOutcome, StoreError>
    where
        F: Fn(&mut Requisition, TimeStamp) -> Option<TransitionRecord>,
    {
        let key = id.as_str().as_bytes();
        let db = &self.db;
        settle((&self.requisitions, &self.transitions).transaction(
            |(reqs, log)| -> ConflictableTransactionResult<CasOutcome, StoreError> {
                let Some(bytes) = reqs.get(key)? else {
                    return Ok(CasOutcome::Missing);
                };
                let mut current = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;

                match mutate(&mut current, TimeStamp::new()) {
                    Some(record) => {
                        write(db, reqs, log, &current, &record)?;
                        Ok(CasOutcome::Applied(current))
                    }
                    None => Ok(CasOutcome::Mismatch(current)),
                }
            },
        ))
    }
}

impl RequisitionStore for SledStore {
    fn backend(&self) -> &'static str {
        "sled"
    }

    fn insert(&self, new: NewRequisition) -> Result<Requisition, StoreError> {
        let _gate = self.shared_gate()?;

        let (requisition, record) = new.into_requisition(TimeStamp::new());
        let key = requisition.id.as_str().as_bytes();
        let db = &self.db;

        settle((&self.requisitions, &self.transitions).transaction(
            |(reqs, log)| -> ConflictableTransactionResult<(), StoreError> {
                if reqs.get(key)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(StoreError::DuplicateId(
                        requisition.id.clone(),
                    )));
                }
                write(db, reqs, log, &requisition, &record)
            },
        ))?;

        Ok(requisition)
    }

    fn get(&self, id: &RequisitionId) -> Result<Option<Requisition>, StoreError> {
        let _gate = self.shared_gate()?;
        match self.requisitions.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<Requisition>, StoreError> {
        let mut records = {
            let _gate = self.shared_gate()?;
            self.decode_all()?
        };
        sort_oldest_first(&mut records);
        Ok(records)
    }

    fn history(&self, id: &RequisitionId) -> Result<Vec<TransitionRecord>, StoreError> {
        let _gate = self.shared_gate()?;

        // keys carry a write sequence, so scan order is history order
        let mut records = Vec::new();
        for item in self.transitions.scan_prefix(history_prefix(id)) {
            let (_, value) = item?;
            let record: TransitionRecord = minicbor::decode(&value)?;
            records.push(record);
        }
        Ok(records)
    }

    fn compare_and_set_status(
        &self,
        id: &RequisitionId,
        expected: ApprovalStatus,
        change: &StatusChange,
    ) -> Result<CasOutcome, StoreError> {
        self.guarded_write(id, |current, at| {
            (current.approval_status == expected).then(|| current.apply(change, at))
        })
    }

    fn bulk_transition(
        &self,
        from: ApprovalStatus,
        min_amount: Amount,
        change: &StatusChange,
    ) -> Result<usize, StoreError> {
        let _gate = self.bulk_gate.write().map_err(|_| StoreError::Poisoned)?;

        let qualifies = |r: &Requisition| r.approval_status == from && r.amount >= min_amount;
        let candidates: Vec<RequisitionId> = self
            .decode_all()?
            .into_iter()
            .filter(|r| qualifies(r))
            .map(|r| r.id)
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }
        debug!(candidates = candidates.len(), "bulk transition scan complete");

        // candidates are re-read inside the transaction; single record
        // transitions may have moved some of them since the scan
        let db = &self.db;
        settle((&self.requisitions, &self.transitions).transaction(
            |(reqs, log)| -> ConflictableTransactionResult<usize, StoreError> {
                let at = TimeStamp::new();
                let mut changed = 0;
                for id in &candidates {
                    let Some(bytes) = reqs.get(id.as_str().as_bytes())? else {
                        continue;
                    };
                    let mut current =
                        decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                    if !qualifies(&current) {
                        continue;
                    }
                    let record = current.apply(change, at);
                    write(db, reqs, log, &current, &record)?;
                    changed += 1;
                }
                Ok(changed)
            },
        ))
    }

    fn update_details(
        &self,
        id: &RequisitionId,
        expected: ApprovalStatus,
        details: &ValidatedDraft,
    ) -> Result<CasOutcome, StoreError> {
        let _gate = self.shared_gate()?;

        self.guarded_write(id, |current, at| {
            (current.approval_status == expected).then(|| current.apply_details(details, at))
        })
    }

    fn record_risk_score(
        &self,
        id: &RequisitionId,
        score: u8,
    ) -> Result<Option<Requisition>, StoreError> {
        let outcome = self.guarded_write(id, |current, at| {
            (current.risk_score != score).then(|| current.apply_risk_score(score, at))
        })?;

        Ok(match outcome {
            CasOutcome::Applied(r) | CasOutcome::Mismatch(r) => Some(r),
            CasOutcome::Missing => None,
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<Requisition, StoreError> {
    Ok(minicbor::decode(bytes)?)
}

fn write(
    _db: &sled::Db,
    reqs: &TransactionalTree,
    log: &TransactionalTree,
    requisition: &Requisition,
    record: &TransitionRecord,
) -> ConflictableTransactionResult<(), StoreError> {
    let value = minicbor::to_vec(requisition)
        .map_err(|e| ConflictableTransactionError::Abort(StoreError::Encode(e.to_string())))?;
    let seq = reqs
        .generate_id()
        .map_err(|e| ConflictableTransactionError::Abort(StoreError::Sled(e)))?;
    let (log_key, log_value) = record
        .storage_key(seq)
        .map_err(|e| ConflictableTransactionError::Abort(StoreError::Encode(e.to_string())))?;

    reqs.insert(requisition.id.as_str().as_bytes(), value)?;
    log.insert(log_key, log_value)?;
    Ok(())
}

fn settle<T>(result: TransactionResult<T, StoreError>) -> Result<T, StoreError> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    })
}
