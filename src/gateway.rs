//! Command surface shared by the CLI and automation callers.
//!
//! Commands arrive as tagged JSON objects (`{"command": "approve", "id": ..}`)
//! or as [`Command`] values. Each one runs under a latency ceiling and maps
//! onto the creation pipeline, the state machine or the risk client.
use crate::audit::TransitionRecord;
use crate::error::{ValidationError, WorkflowError};
use crate::machine::ApprovalStateMachine;
use crate::pipeline::RequisitionPipeline;
use crate::requisition::{Amount, ApprovalStatus, Requisition, RequisitionDraft, RequisitionId};
use crate::risk::{Freshness, FreshnessPolicy, RiskEnrichmentClient, VendorRisk};
use crate::store::RequisitionStore;
use crate::validation::ValidationEngine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, info_span, warn};

pub const DEFAULT_LATENCY_CEILING: Duration = Duration::from_millis(1000);

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    CreateRequisition(RequisitionDraft),
    UpdateRequisition {
        id: RequisitionId,
        #[serde(flatten)]
        changes: RequisitionDraft,
    },
    Approve {
        id: RequisitionId,
    },
    BulkReview {
        threshold_amount: Amount,
    },
    FetchVendorRisk {
        vendor_id: String,
        #[serde(default)]
        requisition_id: Option<RequisitionId>,
        #[serde(default)]
        require_fresh: bool,
    },
    RiskReject {
        id: RequisitionId,
        reason: String,
    },
    GetRequisition {
        id: RequisitionId,
    },
    ListRequisitions {
        #[serde(default)]
        status: Option<ApprovalStatus>,
    },
    History {
        id: RequisitionId,
    },
    Diagnostics,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateRequisition(_) => "createRequisition",
            Command::UpdateRequisition { .. } => "updateRequisition",
            Command::Approve { .. } => "approve",
            Command::BulkReview { .. } => "bulkReview",
            Command::FetchVendorRisk { .. } => "fetchVendorRisk",
            Command::RiskReject { .. } => "riskReject",
            Command::GetRequisition { .. } => "getRequisition",
            Command::ListRequisitions { .. } => "listRequisitions",
            Command::History { .. } => "history",
            Command::Diagnostics => "diagnostics",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandResponse {
    Requisition(Requisition),
    Requisitions(Vec<Requisition>),
    Success {
        success: bool,
    },
    BulkReview {
        #[serde(rename = "updatedCount")]
        updated_count: usize,
    },
    VendorRisk(VendorRiskReport),
    History(Vec<TransitionRecord>),
    Diagnostics(Diagnostics),
}

impl CommandResponse {
    fn success() -> Self {
        CommandResponse::Success { success: true }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VendorRiskReport {
    #[serde(flatten)]
    pub risk: VendorRisk,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub risk_rejections: Vec<RiskRejection>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RiskRejection {
    pub requisition_id: RequisitionId,
    pub outcome: RejectionOutcome,
    /// Status observed once the reject attempt finished.
    pub status: ApprovalStatus,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionOutcome {
    Rejected,
    Unchanged,
    Conflict,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub version: String,
    pub store_backend: String,
    pub status_counts: BTreeMap<String, usize>,
    pub risk_timeout_ms: u64,
    pub latency_ceiling_ms: u64,
}

pub struct CommandGateway {
    store: Arc<dyn RequisitionStore>,
    pipeline: RequisitionPipeline,
    machine: ApprovalStateMachine,
    risk: RiskEnrichmentClient,
    latency_ceiling: Duration,
}

impl CommandGateway {
    pub fn new(
        store: Arc<dyn RequisitionStore>,
        validation: ValidationEngine,
        risk: RiskEnrichmentClient,
    ) -> Self {
        Self {
            pipeline: RequisitionPipeline::new(validation, store.clone()),
            machine: ApprovalStateMachine::new(store.clone()),
            store,
            risk,
            latency_ceiling: DEFAULT_LATENCY_CEILING,
        }
    }

    pub fn with_latency_ceiling(mut self, ceiling: Duration) -> Self {
        self.latency_ceiling = ceiling;
        self
    }

    /// Run one command. Fails with [`WorkflowError::Timeout`] if it is still
    /// waiting on the risk scorer when the latency ceiling passes.
    ///
    /// Store work is synchronous and cannot be interrupted: a write that
    /// overruns the ceiling is committed and reported as a success, with a
    /// warning logged.
    pub async fn dispatch(&self, command: Command) -> Result<CommandResponse, WorkflowError> {
        let name = command.name();
        let span = info_span!("command", command = name);
        let started = Instant::now();

        match tokio::time::timeout(self.latency_ceiling, self.execute(command))
            .instrument(span)
            .await
        {
            Ok(result) => {
                let elapsed = started.elapsed();
                if elapsed > self.latency_ceiling {
                    warn!(
                        command = name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        ceiling_ms = self.latency_ceiling.as_millis() as u64,
                        "command overran latency ceiling in store work"
                    );
                }
                result
            }
            Err(_) => {
                let ceiling_ms = self.latency_ceiling.as_millis() as u64;
                warn!(command = name, ceiling_ms, "command exceeded latency ceiling");
                Err(WorkflowError::Timeout {
                    command: name,
                    ceiling_ms,
                })
            }
        }
    }

    /// JSON in, JSON out. Failures come back as an error envelope rather than
    /// an `Err`, so callers can relay the value as is.
    pub async fn dispatch_json(&self, request: &str) -> serde_json::Value {
        let outcome = match serde_json::from_str::<Command>(request) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => Err(WorkflowError::InvalidCommand(e.to_string())),
        };

        let rendered = match &outcome {
            Ok(response) => serde_json::to_value(response),
            Err(e) => serde_json::to_value(e.to_envelope()),
        };
        rendered.unwrap_or_else(|e| {
            serde_json::json!({ "error": { "kind": "INTERNAL_ERROR", "message": e.to_string() } })
        })
    }

    async fn execute(&self, command: Command) -> Result<CommandResponse, WorkflowError> {
        match command {
            Command::CreateRequisition(draft) => {
                Ok(CommandResponse::Requisition(self.pipeline.create(draft)?))
            }
            Command::UpdateRequisition { id, changes } => {
                Ok(CommandResponse::Requisition(self.pipeline.update(&id, changes)?))
            }
            Command::Approve { id } => {
                self.machine.approve(&id)?;
                Ok(CommandResponse::success())
            }
            Command::BulkReview { threshold_amount } => Ok(CommandResponse::BulkReview {
                updated_count: self.machine.bulk_review(threshold_amount)?,
            }),
            Command::FetchVendorRisk {
                vendor_id,
                requisition_id,
                require_fresh,
            } => {
                let policy = if require_fresh {
                    FreshnessPolicy::RequireFresh
                } else {
                    FreshnessPolicy::BestEffort
                };
                self.fetch_vendor_risk(&vendor_id, requisition_id, policy)
                    .await
                    .map(CommandResponse::VendorRisk)
            }
            Command::RiskReject { id, reason } => {
                self.machine.risk_reject(&id, reason)?;
                Ok(CommandResponse::success())
            }
            Command::GetRequisition { id } => Ok(CommandResponse::Requisition(self.require(&id)?)),
            Command::ListRequisitions { status } => {
                let mut records = self.store.list()?;
                if let Some(status) = status {
                    records.retain(|r| r.approval_status == status);
                }
                Ok(CommandResponse::Requisitions(records))
            }
            Command::History { id } => {
                self.require(&id)?;
                Ok(CommandResponse::History(self.store.history(&id)?))
            }
            Command::Diagnostics => Ok(CommandResponse::Diagnostics(self.diagnostics()?)),
        }
    }

    /// Look up a vendor's risk and, when it comes back HIGH and fresh, reject
    /// the associated requisitions. Stale results change nothing.
    async fn fetch_vendor_risk(
        &self,
        vendor_id: &str,
        requisition_id: Option<RequisitionId>,
        policy: FreshnessPolicy,
    ) -> Result<VendorRiskReport, WorkflowError> {
        let associated = match requisition_id {
            Some(id) => {
                let requisition = self.require(&id)?;
                if requisition.vendor_id != vendor_id {
                    return Err(ValidationError::VendorMismatch {
                        requested: vendor_id.to_string(),
                        actual: requisition.vendor_id,
                    }
                    .into());
                }
                vec![requisition]
            }
            None => self.store.find_by_vendor(vendor_id)?,
        };

        let risk = self.risk.fetch_risk(vendor_id, policy).await?;

        if risk.freshness == Freshness::Fresh {
            for requisition in &associated {
                self.store.record_risk_score(&requisition.id, risk.risk_score)?;
            }
        }

        let mut risk_rejections = Vec::new();
        if risk.is_high() {
            let reason = format!(
                "vendor {vendor_id} risk score {} classified HIGH",
                risk.risk_score
            );
            for requisition in associated {
                let (outcome, status) = match self.machine.risk_reject(&requisition.id, reason.clone()) {
                    Ok(done) if done.changed => (RejectionOutcome::Rejected, done.requisition.approval_status),
                    Ok(done) => (RejectionOutcome::Unchanged, done.requisition.approval_status),
                    Err(WorkflowError::Conflict { current, .. }) => {
                        warn!(requisition_id = %requisition.id, %current, "high risk vendor on a settled requisition");
                        (RejectionOutcome::Conflict, current)
                    }
                    Err(e) => return Err(e),
                };
                risk_rejections.push(RiskRejection {
                    requisition_id: requisition.id,
                    outcome,
                    status,
                });
            }
        }

        Ok(VendorRiskReport {
            risk,
            risk_rejections,
        })
    }

    fn require(&self, id: &RequisitionId) -> Result<Requisition, WorkflowError> {
        self.store
            .get(id)?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))
    }

    fn diagnostics(&self) -> Result<Diagnostics, WorkflowError> {
        let mut status_counts: BTreeMap<String, usize> = ApprovalStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for requisition in self.store.list()? {
            *status_counts
                .entry(requisition.approval_status.as_str().to_string())
                .or_default() += 1;
        }

        Ok(Diagnostics {
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_backend: self.store.backend().to_string(),
            status_counts,
            risk_timeout_ms: self.risk.timeout().as_millis() as u64,
            latency_ceiling_ms: self.latency_ceiling.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::FixedRiskScorer;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn gateway(scorer: FixedRiskScorer) -> CommandGateway {
        CommandGateway::new(
            Arc::new(MemoryStore::new()),
            ValidationEngine::default(),
            RiskEnrichmentClient::new(Arc::new(scorer)),
        )
    }

    #[test]
    fn commands_parse_from_tagged_json() {
        let create: Command = serde_json::from_value(json!({
            "command": "createRequisition",
            "description": "Chairs",
            "amount": "120.00",
            "currency": "USD",
            "vendorId": "acme"
        }))
        .unwrap();
        assert_eq!(
            create,
            Command::CreateRequisition(
                RequisitionDraft::new()
                    .set_description("Chairs")
                    .set_amount(Amount::from_minor(120_00))
                    .set_currency("USD")
                    .set_vendor("acme")
            )
        );

        let risk: Command = serde_json::from_value(json!({
            "command": "fetchVendorRisk",
            "vendorId": "acme",
            "requireFresh": true
        }))
        .unwrap();
        assert_eq!(
            risk,
            Command::FetchVendorRisk {
                vendor_id: "acme".into(),
                requisition_id: None,
                require_fresh: true,
            }
        );

        let bulk: Command =
            serde_json::from_value(json!({"command": "bulkReview", "thresholdAmount": 50000}))
                .unwrap();
        assert_eq!(
            bulk,
            Command::BulkReview {
                threshold_amount: Amount::from_minor(50_000_00)
            }
        );
    }

    #[tokio::test]
    async fn approve_response_shape() {
        let gateway = gateway(FixedRiskScorer::new());
        let created = gateway
            .dispatch_json(
                r#"{"command":"createRequisition","description":"Desk","amount":"80.00","currency":"usd","vendorId":"v1"}"#,
            )
            .await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["approvalStatus"], "PENDING");
        assert_eq!(created["highValueFlag"], false);
        assert_eq!(created["currency"], "USD");

        let approved = gateway
            .dispatch_json(&json!({"command": "approve", "id": id}).to_string())
            .await;
        assert_eq!(approved, json!({"success": true}));
    }

    #[tokio::test]
    async fn malformed_json_yields_envelope() {
        let gateway = gateway(FixedRiskScorer::new());
        let response = gateway.dispatch_json(r#"{"command":"explode"}"#).await;

        assert_eq!(response["error"]["kind"], "INVALID_COMMAND");
    }

    #[tokio::test]
    async fn latency_ceiling_bounds_commands() {
        let scorer = FixedRiskScorer::new()
            .with_score("slow", 10)
            .with_delay(Duration::from_millis(500));
        let gateway = CommandGateway::new(
            Arc::new(MemoryStore::new()),
            ValidationEngine::default(),
            RiskEnrichmentClient::with_timeout(Arc::new(scorer), Duration::from_secs(5)),
        )
        .with_latency_ceiling(Duration::from_millis(30));

        let err = gateway
            .dispatch(Command::FetchVendorRisk {
                vendor_id: "slow".into(),
                requisition_id: None,
                require_fresh: false,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Timeout { command: "fetchVendorRisk", .. }));
    }

    #[tokio::test]
    async fn committed_store_work_is_not_reported_as_timeout() {
        let store = Arc::new(MemoryStore::new());
        let gateway = CommandGateway::new(
            store.clone(),
            ValidationEngine::default(),
            RiskEnrichmentClient::new(Arc::new(FixedRiskScorer::new())),
        )
        .with_latency_ceiling(Duration::ZERO);

        let response = gateway
            .dispatch(Command::CreateRequisition(
                RequisitionDraft::new()
                    .set_description("Cables")
                    .set_amount(Amount::from_minor(15_00))
                    .set_currency("USD")
                    .set_vendor("v2"),
            ))
            .await
            .unwrap();

        let CommandResponse::Requisition(created) = response else {
            panic!("expected requisition");
        };
        assert_eq!(store.get(&created.id).unwrap(), Some(created));
    }

    #[tokio::test]
    async fn diagnostics_counts_every_status() {
        let gateway = gateway(FixedRiskScorer::new());
        let response = gateway.dispatch(Command::Diagnostics).await.unwrap();

        let CommandResponse::Diagnostics(diag) = response else {
            panic!("expected diagnostics");
        };
        assert_eq!(diag.store_backend, "memory");
        assert_eq!(diag.status_counts.len(), 4);
        assert_eq!(diag.risk_timeout_ms, 800);
    }
}
