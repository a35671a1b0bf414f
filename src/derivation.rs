//! High value policy applied once, when a requisition is created.
use crate::requisition::{Amount, ApprovalStatus};

/// Requisitions at or above this amount require mandatory review.
pub const HIGH_VALUE_THRESHOLD: Amount = Amount::from_minor(50_000_00);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derivation {
    pub high_value_flag: bool,
    pub initial_status: ApprovalStatus,
}

pub fn derive(amount: Amount) -> Derivation {
    if amount >= HIGH_VALUE_THRESHOLD {
        Derivation {
            high_value_flag: true,
            initial_status: ApprovalStatus::ReviewRequired,
        }
    } else {
        Derivation {
            high_value_flag: false,
            initial_status: ApprovalStatus::Pending,
        }
    }
}
