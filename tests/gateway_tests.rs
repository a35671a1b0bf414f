//! Command gateway driven through its JSON surface.

use requisition_approval::risk::{FixedRiskScorer, RiskEnrichmentClient, ScorerError};
use requisition_approval::store::{MemoryStore, RequisitionStore, SledStore};
use requisition_approval::validation::ValidationEngine;
use requisition_approval::CommandGateway;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn gateway_with(store: Arc<dyn RequisitionStore>, scorer: FixedRiskScorer) -> CommandGateway {
    CommandGateway::new(
        store,
        ValidationEngine::default(),
        RiskEnrichmentClient::with_timeout(Arc::new(scorer), Duration::from_millis(100)),
    )
}

fn gateway(scorer: FixedRiskScorer) -> CommandGateway {
    gateway_with(Arc::new(MemoryStore::new()), scorer)
}

async fn send(gateway: &CommandGateway, request: Value) -> Value {
    gateway.dispatch_json(&request.to_string()).await
}

async fn create(gateway: &CommandGateway, amount: &str, vendor: &str) -> String {
    let created = send(
        gateway,
        json!({
            "command": "createRequisition",
            "description": "Warehouse shelving",
            "amount": amount,
            "currency": "EUR",
            "vendorId": vendor
        }),
    )
    .await;
    created["id"].as_str().expect("created id").to_string()
}

async fn status_of(gateway: &CommandGateway, id: &str) -> Value {
    send(gateway, json!({"command": "getRequisition", "id": id})).await["approvalStatus"].clone()
}

#[tokio::test]
async fn create_reports_every_validation_failure() {
    let gateway = gateway(FixedRiskScorer::new());

    let response = send(
        &gateway,
        json!({"command": "createRequisition", "amount": 0, "description": " ", "currency": "EU"}),
    )
    .await;

    assert_eq!(response["error"]["kind"], "VALIDATION_ERROR");
    let fields: Vec<&str> = response["error"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["amount", "description", "currency"]);

    let listed = send(&gateway, json!({"command": "listRequisitions"})).await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn approve_twice_is_idempotent() {
    let gateway = gateway(FixedRiskScorer::new());
    let id = create(&gateway, "300.00", "v-1").await;

    let first = send(&gateway, json!({"command": "approve", "id": id})).await;
    let second = send(&gateway, json!({"command": "approve", "id": id})).await;

    assert_eq!(first, json!({"success": true}));
    assert_eq!(second, json!({"success": true}));
    let history = send(&gateway, json!({"command": "history", "id": id})).await;
    let kinds: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["CREATED", "APPROVED"]);
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let gateway = gateway(FixedRiskScorer::new());

    let response = send(&gateway, json!({"command": "approve", "id": "req1nothere"})).await;

    assert_eq!(response["error"]["kind"], "NOT_FOUND");
}

#[tokio::test]
async fn bulk_review_reports_updated_count() {
    let gateway = gateway(FixedRiskScorer::new());
    create(&gateway, "999.99", "v-1").await;
    create(&gateway, "1000.00", "v-1").await;
    create(&gateway, "1000.01", "v-1").await;

    let response = send(
        &gateway,
        json!({"command": "bulkReview", "thresholdAmount": "1000.00"}),
    )
    .await;

    assert_eq!(response, json!({"updatedCount": 2}));
    let review = send(
        &gateway,
        json!({"command": "listRequisitions", "status": "REVIEW_REQUIRED"}),
    )
    .await;
    assert_eq!(review.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn high_risk_vendor_rejects_open_requisitions() {
    let gateway = gateway(FixedRiskScorer::new().with_score("shady", 88));
    let open = create(&gateway, "400.00", "shady").await;
    let settled = create(&gateway, "500.00", "shady").await;
    let unrelated = create(&gateway, "600.00", "honest").await;
    send(&gateway, json!({"command": "approve", "id": settled})).await;

    let report = send(
        &gateway,
        json!({"command": "fetchVendorRisk", "vendorId": "shady"}),
    )
    .await;

    assert_eq!(report["riskScore"], 88);
    assert_eq!(report["level"], "HIGH");
    assert_eq!(report["freshness"], "FRESH");
    let outcomes: Vec<(String, String)> = report["riskRejections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| {
            (
                r["requisitionId"].as_str().unwrap().to_string(),
                r["outcome"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert!(outcomes.contains(&(open.clone(), "REJECTED".to_string())));
    assert!(outcomes.contains(&(settled.clone(), "CONFLICT".to_string())));
    assert_eq!(outcomes.len(), 2);

    assert_eq!(status_of(&gateway, &open).await, "REJECTED");
    assert_eq!(status_of(&gateway, &settled).await, "APPROVED");
    assert_eq!(status_of(&gateway, &unrelated).await, "PENDING");

    let approve = send(&gateway, json!({"command": "approve", "id": open})).await;
    assert_eq!(approve["error"]["kind"], "CONFLICT");
}

#[tokio::test]
async fn fresh_score_is_recorded_without_status_change() {
    let gateway = gateway(FixedRiskScorer::new().with_score("steady", 35));
    let id = create(&gateway, "250.00", "steady").await;

    let report = send(
        &gateway,
        json!({"command": "fetchVendorRisk", "vendorId": "steady", "requisitionId": id}),
    )
    .await;

    assert_eq!(report["level"], "NORMAL");
    assert!(report.get("riskRejections").is_none());
    let stored = send(&gateway, json!({"command": "getRequisition", "id": id})).await;
    assert_eq!(stored["riskScore"], 35);
    assert_eq!(stored["approvalStatus"], "PENDING");
}

#[tokio::test]
async fn timed_out_lookup_changes_nothing() {
    let scorer = FixedRiskScorer::new()
        .with_score("slow", 99)
        .with_delay(Duration::from_millis(400));
    let gateway = gateway(scorer);
    let id = create(&gateway, "250.00", "slow").await;

    let report = send(
        &gateway,
        json!({"command": "fetchVendorRisk", "vendorId": "slow"}),
    )
    .await;

    assert_eq!(report["freshness"], "STALE");
    assert_eq!(report["level"], "UNKNOWN");
    assert_eq!(report["riskScore"], 0);
    let stored = send(&gateway, json!({"command": "getRequisition", "id": id})).await;
    assert_eq!(stored["approvalStatus"], "PENDING");
    assert_eq!(stored["riskScore"], 0);
}

#[tokio::test]
async fn require_fresh_surfaces_scorer_failures() {
    let scorer = FixedRiskScorer::new().failing(ScorerError::Status(502));
    let gateway = gateway(scorer);
    let id = create(&gateway, "250.00", "flaky").await;

    let response = send(
        &gateway,
        json!({"command": "fetchVendorRisk", "vendorId": "flaky", "requireFresh": true}),
    )
    .await;

    assert_eq!(response["error"]["kind"], "EXTERNAL_SERVICE_ERROR");
    assert_eq!(status_of(&gateway, &id).await, "PENDING");
}

#[tokio::test]
async fn vendor_mismatch_fails_before_lookup() {
    let scorer = Arc::new(FixedRiskScorer::new().with_score("other", 90));
    let gateway = CommandGateway::new(
        Arc::new(MemoryStore::new()),
        ValidationEngine::default(),
        RiskEnrichmentClient::new(scorer.clone()),
    );
    let id = create(&gateway, "80.00", "mine").await;

    let response = send(
        &gateway,
        json!({"command": "fetchVendorRisk", "vendorId": "other", "requisitionId": id}),
    )
    .await;

    assert_eq!(response["error"]["kind"], "VALIDATION_ERROR");
    assert_eq!(response["error"]["fields"][0]["field"], "vendorId");
    assert_eq!(scorer.calls(), 0);
}

#[tokio::test]
async fn update_edits_details_but_keeps_derived_state() {
    let gateway = gateway(FixedRiskScorer::new());
    let id = create(&gateway, "100.00", "v-9").await;

    let updated = send(
        &gateway,
        json!({"command": "updateRequisition", "id": id, "amount": "75000.00"}),
    )
    .await;

    assert_eq!(updated["amount"], "75000.00");
    assert_eq!(updated["highValueFlag"], false);
    assert_eq!(updated["approvalStatus"], "PENDING");
    assert_eq!(updated["description"], "Warehouse shelving");
}

#[tokio::test]
async fn risk_reject_requires_a_reason() {
    let gateway = gateway(FixedRiskScorer::new());
    let id = create(&gateway, "100.00", "v-9").await;

    let response = send(
        &gateway,
        json!({"command": "riskReject", "id": id, "reason": "  "}),
    )
    .await;

    assert_eq!(response["error"]["kind"], "VALIDATION_ERROR");
    assert_eq!(status_of(&gateway, &id).await, "PENDING");
}

#[tokio::test]
async fn diagnostics_reflect_store_contents() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(SledStore::open(dir.path().join("diag.db"))?);
    let gateway = gateway_with(store, FixedRiskScorer::new());
    let id = create(&gateway, "100.00", "v-1").await;
    create(&gateway, "90000.00", "v-1").await;
    send(&gateway, json!({"command": "approve", "id": id})).await;

    let diag = send(&gateway, json!({"command": "diagnostics"})).await;

    assert_eq!(diag["storeBackend"], "sled");
    assert_eq!(diag["statusCounts"]["APPROVED"], 1);
    assert_eq!(diag["statusCounts"]["REVIEW_REQUIRED"], 1);
    assert_eq!(diag["statusCounts"]["PENDING"], 0);
    assert_eq!(diag["latencyCeilingMs"], 1000);
    assert_eq!(diag["riskTimeoutMs"], 100);
    Ok(())
}
