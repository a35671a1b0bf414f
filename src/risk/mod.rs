//! Vendor risk enrichment.
//!
//! The external scorer sits behind [`RiskScorer`]. [`RiskEnrichmentClient`]
//! bounds every call with a timeout and turns failures into a stale result
//! unless the caller insists on a fresh answer.
use crate::error::WorkflowError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};

mod http;

pub use http::HttpRiskScorer;

pub const DEFAULT_RISK_TIMEOUT: Duration = Duration::from_millis(800);

const HIGH_RISK_FLOOR: u8 = 70;
const NORMAL_RISK_FLOOR: u8 = 30;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    High,
    Normal,
    Low,
    /// Only carried by degraded results.
    Unknown,
}

impl RiskLevel {
    pub fn classify(score: u8) -> Self {
        match score {
            s if s >= HIGH_RISK_FLOOR => RiskLevel::High,
            s if s >= NORMAL_RISK_FLOOR => RiskLevel::Normal,
            _ => RiskLevel::Low,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Whether a failed lookup may degrade into a stale result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreshnessPolicy {
    #[default]
    BestEffort,
    RequireFresh,
}

/// Raw answer from a scorer, before range checks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RiskSignal {
    pub risk_score: i64,
    #[serde(default)]
    pub level: Option<RiskLevel>,
}

impl RiskSignal {
    pub fn scored(risk_score: i64) -> Self {
        Self {
            risk_score,
            level: None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScorerError {
    #[error("no answer within {}ms", .0.as_millis())]
    TimedOut(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("scorer answered with status {0}")]
    Status(u16),
    #[error("invalid scorer response: {0}")]
    InvalidResponse(String),
    #[error("scorer has no data for vendor {0}")]
    UnknownVendor(String),
    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RiskScorer: Send + Sync {
    async fn score(&self, vendor_id: &str) -> Result<RiskSignal, ScorerError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VendorRisk {
    pub vendor_id: String,
    pub risk_score: u8,
    pub level: RiskLevel,
    pub freshness: Freshness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl VendorRisk {
    fn degraded(vendor_id: &str, detail: String) -> Self {
        Self {
            vendor_id: vendor_id.to_string(),
            risk_score: 0,
            level: RiskLevel::Unknown,
            freshness: Freshness::Stale,
            detail: Some(detail),
        }
    }

    /// A stale result never counts as high risk.
    pub fn is_high(&self) -> bool {
        self.freshness == Freshness::Fresh && self.level == RiskLevel::High
    }
}

fn assess(vendor_id: &str, signal: RiskSignal) -> Result<VendorRisk, ScorerError> {
    let score = u8::try_from(signal.risk_score)
        .ok()
        .filter(|s| *s <= 100)
        .ok_or_else(|| {
            ScorerError::InvalidResponse(format!("risk score {} outside 0..=100", signal.risk_score))
        })?;
    let level = match signal.level {
        Some(RiskLevel::Unknown) => {
            return Err(ScorerError::InvalidResponse("level UNKNOWN is not a score".into()));
        }
        Some(level) => level,
        None => RiskLevel::classify(score),
    };

    Ok(VendorRisk {
        vendor_id: vendor_id.to_string(),
        risk_score: score,
        level,
        freshness: Freshness::Fresh,
        detail: None,
    })
}

pub struct RiskEnrichmentClient {
    scorer: Arc<dyn RiskScorer>,
    timeout: Duration,
}

impl RiskEnrichmentClient {
    pub fn new(scorer: Arc<dyn RiskScorer>) -> Self {
        Self::with_timeout(scorer, DEFAULT_RISK_TIMEOUT)
    }

    pub fn with_timeout(scorer: Arc<dyn RiskScorer>, timeout: Duration) -> Self {
        Self { scorer, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Look up a vendor's risk. Nothing is cached between calls.
    #[instrument(skip(self), fields(timeout_ms = self.timeout.as_millis() as u64))]
    pub async fn fetch_risk(
        &self,
        vendor_id: &str,
        policy: FreshnessPolicy,
    ) -> Result<VendorRisk, WorkflowError> {
        let failure = match tokio::time::timeout(self.timeout, self.scorer.score(vendor_id)).await
        {
            Ok(Ok(signal)) => match assess(vendor_id, signal) {
                Ok(risk) => {
                    debug!(score = risk.risk_score, level = ?risk.level, "risk fetched");
                    return Ok(risk);
                }
                Err(e) => e,
            },
            Ok(Err(e)) => e,
            Err(_) => ScorerError::TimedOut(self.timeout),
        };

        match policy {
            FreshnessPolicy::RequireFresh => Err(WorkflowError::ExternalService(failure.to_string())),
            FreshnessPolicy::BestEffort => {
                warn!(error = %failure, "risk lookup degraded to stale result");
                Ok(VendorRisk::degraded(vendor_id, failure.to_string()))
            }
        }
    }
}

/// Deterministic scorer answering from a fixed table.
#[derive(Debug, Default)]
pub struct FixedRiskScorer {
    signals: HashMap<String, RiskSignal>,
    delay: Option<Duration>,
    failure: Option<ScorerError>,
    calls: AtomicUsize,
}

impl FixedRiskScorer {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_score(mut self, vendor_id: impl Into<String>, score: i64) -> Self {
        self.signals.insert(vendor_id.into(), RiskSignal::scored(score));
        self
    }
    pub fn with_signal(mut self, vendor_id: impl Into<String>, signal: RiskSignal) -> Self {
        self.signals.insert(vendor_id.into(), signal);
        self
    }
    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
    /// Fail every call with `failure`.
    pub fn failing(mut self, failure: ScorerError) -> Self {
        self.failure = Some(failure);
        self
    }
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiskScorer for FixedRiskScorer {
    async fn score(&self, vendor_id: &str) -> Result<RiskSignal, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        self.signals
            .get(vendor_id)
            .copied()
            .ok_or_else(|| ScorerError::UnknownVendor(vendor_id.to_string()))
    }
}

/// Used when no scorer endpoint is configured: every lookup is unavailable.
pub struct NoopRiskScorer;

#[async_trait]
impl RiskScorer for NoopRiskScorer {
    async fn score(&self, _: &str) -> Result<RiskSignal, ScorerError> {
        Err(ScorerError::Unavailable("no risk scorer configured".into()))
    }
}
