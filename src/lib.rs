//! Purchase requisition approval workflow.
//!
//! Requisitions are validated and derived by [`pipeline::RequisitionPipeline`],
//! persisted through a [`store::RequisitionStore`], moved between statuses only
//! by [`machine::ApprovalStateMachine`], and reached from the outside through
//! [`gateway::CommandGateway`].

pub mod audit;
pub mod config;
pub mod derivation;
pub mod error;
pub mod gateway;
pub mod machine;
pub mod pipeline;
pub mod requisition;
pub mod risk;
pub mod store;
pub mod telemetry;
pub mod utils;
pub mod validation;

pub use error::{StoreError, ValidationError, ValidationErrors, WorkflowError};
pub use gateway::{Command, CommandGateway, CommandResponse};
pub use requisition::{Amount, ApprovalStatus, Requisition, RequisitionDraft, RequisitionId};
