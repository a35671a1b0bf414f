use crate::requisition::{ApprovalStatus, RequisitionId};
use serde::Serialize;
use std::fmt;

/// One failed field rule.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount is required")]
    MissingAmount,
    #[error("amount must be greater than zero, got {0}")]
    NonPositiveAmount(crate::requisition::Amount),
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("currency is required")]
    MissingCurrency,
    #[error("currency must be a 3-letter code, got {0:?}")]
    InvalidCurrency(String),
    #[error("reason must not be empty")]
    EmptyReason,
    #[error("requisition belongs to vendor {actual:?}, not {requested:?}")]
    VendorMismatch { requested: String, actual: String },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingAmount | ValidationError::NonPositiveAmount(_) => "amount",
            ValidationError::EmptyDescription => "description",
            ValidationError::MissingCurrency | ValidationError::InvalidCurrency(_) => "currency",
            ValidationError::EmptyReason => "reason",
            ValidationError::VendorMismatch { .. } => "vendorId",
        }
    }
}

/// Every failed rule for one candidate, in rule order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }
    pub fn fields(&self) -> Vec<&'static str> {
        self.0.iter().map(ValidationError::field).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(value: ValidationError) -> Self {
        Self(vec![value])
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sled failure: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("requisition {0} already exists")]
    DuplicateId(RequisitionId),
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("malformed command: {0}")]
    InvalidCommand(String),
    #[error("requisition {0} not found")]
    NotFound(RequisitionId),
    #[error("cannot {attempted} requisition {id}: it is {current}")]
    Conflict {
        id: RequisitionId,
        current: ApprovalStatus,
        attempted: &'static str,
    },
    #[error("risk service unavailable: {0}")]
    ExternalService(String),
    #[error("command {command} exceeded its {ceiling_ms}ms latency ceiling")]
    Timeout { command: &'static str, ceiling_ms: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Stable machine readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Validation(_) => "VALIDATION_ERROR",
            WorkflowError::InvalidCommand(_) => "INVALID_COMMAND",
            WorkflowError::NotFound(_) => "NOT_FOUND",
            WorkflowError::Conflict { .. } => "CONFLICT",
            WorkflowError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            WorkflowError::Timeout { .. } => "TIMEOUT",
            WorkflowError::Store(_) => "STORE_ERROR",
            WorkflowError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        let fields = match self {
            WorkflowError::Validation(errors) => errors
                .iter()
                .map(|e| FieldFailure {
                    field: e.field(),
                    message: e.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };
        ErrorEnvelope {
            error: ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
                fields,
            },
        }
    }
}

impl From<ValidationErrors> for WorkflowError {
    fn from(value: ValidationErrors) -> Self {
        WorkflowError::Validation(value)
    }
}

impl From<ValidationError> for WorkflowError {
    fn from(value: ValidationError) -> Self {
        WorkflowError::Validation(value.into())
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldFailure>,
}

#[derive(Serialize, Debug)]
pub struct FieldFailure {
    pub field: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requisition::Amount;

    #[test]
    fn envelope_lists_field_failures() {
        let err = WorkflowError::from(ValidationErrors(vec![
            ValidationError::NonPositiveAmount(Amount::from_minor(0)),
            ValidationError::EmptyDescription,
        ]));
        let json = serde_json::to_value(err.to_envelope()).unwrap();

        assert_eq!(json["error"]["kind"], "VALIDATION_ERROR");
        assert_eq!(json["error"]["fields"][0]["field"], "amount");
        assert_eq!(json["error"]["fields"][1]["field"], "description");
    }

    #[test]
    fn conflict_message_names_state() {
        let err = WorkflowError::Conflict {
            id: RequisitionId::from("req1a"),
            current: ApprovalStatus::Rejected,
            attempted: "approve",
        };

        assert_eq!(err.kind(), "CONFLICT");
        assert_eq!(err.to_string(), "cannot approve requisition req1a: it is REJECTED");
        assert!(err.to_envelope().error.fields.is_empty());
    }
}
