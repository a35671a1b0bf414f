//! Ordered stages a requisition passes through before it is stored.
//!
//! Creation runs `validate -> derive -> persist`; editing runs
//! `validate -> persist`, so the high value flag and status picked at creation
//! are never recomputed.
use crate::derivation;
use crate::error::WorkflowError;
use crate::requisition::{NewRequisition, Requisition, RequisitionDraft, RequisitionId};
use crate::store::{CasOutcome, RequisitionStore};
use crate::validation::{ValidatedDraft, ValidationEngine};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, info_span};

const MAX_UPDATE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Derive,
    Persist,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Derive => "derive",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub const CREATE_STAGES: [Stage; 3] = [Stage::Validate, Stage::Derive, Stage::Persist];
pub const UPDATE_STAGES: [Stage; 2] = [Stage::Validate, Stage::Persist];

// value carried between stages
enum Carry {
    Draft(RequisitionDraft),
    Valid(ValidatedDraft),
    Derived(NewRequisition),
    Stored(Requisition),
}

pub struct RequisitionPipeline {
    validation: ValidationEngine,
    store: Arc<dyn RequisitionStore>,
}

impl RequisitionPipeline {
    pub fn new(validation: ValidationEngine, store: Arc<dyn RequisitionStore>) -> Self {
        Self { validation, store }
    }

    /// Create a requisition from a draft.
    pub fn create(&self, draft: RequisitionDraft) -> Result<Requisition, WorkflowError> {
        let mut carry = Carry::Draft(draft);
        for stage in CREATE_STAGES {
            let _span = info_span!("pipeline", stage = stage.name()).entered();
            carry = self.run_stage(stage, carry)?;
        }

        match carry {
            Carry::Stored(requisition) => {
                info!(
                    requisition_id = %requisition.id,
                    status = %requisition.approval_status,
                    high_value = requisition.high_value_flag,
                    "requisition created"
                );
                Ok(requisition)
            }
            _ => Err(anyhow::anyhow!("creation pipeline ended before persisting").into()),
        }
    }

    /// Edit the user supplied fields of a non-terminal requisition. Fields
    /// left unset in `draft` keep their current value.
    pub fn update(
        &self,
        id: &RequisitionId,
        draft: RequisitionDraft,
    ) -> Result<Requisition, WorkflowError> {
        let mut current = self
            .store
            .get(id)?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))?;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let expected = current.approval_status;
            if expected.is_terminal() {
                return Err(WorkflowError::Conflict {
                    id: id.clone(),
                    current: expected,
                    attempted: "update",
                });
            }

            let details = {
                let _span = info_span!("pipeline", stage = Stage::Validate.name()).entered();
                self.validation
                    .validate(&draft.clone().merged_onto(&current))?
            };

            let _span = info_span!("pipeline", stage = Stage::Persist.name()).entered();
            match self.store.update_details(id, expected, &details)? {
                CasOutcome::Applied(updated) => {
                    info!(requisition_id = %id, "requisition updated");
                    return Ok(updated);
                }
                CasOutcome::Mismatch(latest) => {
                    debug!(attempt, found = %latest.approval_status, "status moved during update, retrying");
                    current = latest;
                }
                CasOutcome::Missing => return Err(WorkflowError::NotFound(id.clone())),
            }
        }

        Err(WorkflowError::Conflict {
            id: id.clone(),
            current: current.approval_status,
            attempted: "update",
        })
    }

    fn run_stage(&self, stage: Stage, carry: Carry) -> Result<Carry, WorkflowError> {
        match (stage, carry) {
            (Stage::Validate, Carry::Draft(draft)) => {
                Ok(Carry::Valid(self.validation.validate(&draft)?))
            }
            (Stage::Derive, Carry::Valid(details)) => {
                let derived = derivation::derive(details.amount());
                let id = RequisitionId::generate()?;
                debug!(requisition_id = %id, high_value = derived.high_value_flag, "derived initial flags");
                Ok(Carry::Derived(NewRequisition::new(
                    id,
                    details,
                    derived.initial_status,
                    derived.high_value_flag,
                )))
            }
            (Stage::Persist, Carry::Derived(new)) => Ok(Carry::Stored(self.store.insert(new)?)),
            (stage, _) => Err(anyhow::anyhow!("stage {stage} received out of order input").into()),
        }
    }
}

impl fmt::Debug for RequisitionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequisitionPipeline")
            .field("validation", &self.validation)
            .field("store", &self.store.backend())
            .finish()
    }
}
