//! HTTP risk scorer against a mock scoring service.

use requisition_approval::WorkflowError;
use requisition_approval::risk::{
    Freshness, FreshnessPolicy, HttpRiskScorer, RiskEnrichmentClient, RiskLevel,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, timeout_ms: u64) -> RiskEnrichmentClient {
    RiskEnrichmentClient::with_timeout(
        Arc::new(HttpRiskScorer::new(server.uri())),
        Duration::from_millis(timeout_ms),
    )
}

#[tokio::test]
async fn fresh_score_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vendors/acme/risk"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"riskScore": 72})))
        .expect(1)
        .mount(&server)
        .await;

    let risk = client_for(&server, 800)
        .fetch_risk("acme", FreshnessPolicy::BestEffort)
        .await
        .unwrap();

    assert_eq!(risk.risk_score, 72);
    assert_eq!(risk.level, RiskLevel::High);
    assert_eq!(risk.freshness, Freshness::Fresh);
}

#[tokio::test]
async fn reported_level_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vendors/globex/risk"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"riskScore": 40, "level": "LOW"})),
        )
        .mount(&server)
        .await;

    let risk = client_for(&server, 800)
        .fetch_risk("globex", FreshnessPolicy::BestEffort)
        .await
        .unwrap();

    assert_eq!(risk.level, RiskLevel::Low);
}

#[tokio::test]
async fn slow_service_degrades_to_stale() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vendors/slowco/risk"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"riskScore": 99}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let risk = client_for(&server, 50)
        .fetch_risk("slowco", FreshnessPolicy::BestEffort)
        .await
        .unwrap();

    assert_eq!(risk.freshness, Freshness::Stale);
    assert_eq!(risk.risk_score, 0);
    assert!(!risk.is_high());
}

#[tokio::test]
async fn server_error_fails_when_fresh_required() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server, 800)
        .fetch_risk("acme", FreshnessPolicy::RequireFresh)
        .await
        .unwrap_err();

    match err {
        WorkflowError::ExternalService(message) => assert!(message.contains("503")),
        other => panic!("expected external service error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_degrades() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let risk = client_for(&server, 800)
        .fetch_risk("acme", FreshnessPolicy::BestEffort)
        .await
        .unwrap();

    assert_eq!(risk.freshness, Freshness::Stale);
    assert!(risk.detail.is_some());
}
