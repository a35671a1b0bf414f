use super::{RiskScorer, RiskSignal, ScorerError};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use tracing::debug;

/// Scorer reached over HTTP: `GET {base}/vendors/{vendor_id}/risk` answering
/// `{"riskScore": 0..100, "level": "HIGH" | "NORMAL" | "LOW"}` (level optional).
pub struct HttpRiskScorer {
    base_url: String,
    client: Client,
}

impl HttpRiskScorer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn risk_url(&self, vendor_id: &str) -> Result<Url, ScorerError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ScorerError::Transport(format!("bad base url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| ScorerError::Transport(format!("base url {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(["vendors", vendor_id, "risk"]);
        Ok(url)
    }
}

#[async_trait]
impl RiskScorer for HttpRiskScorer {
    async fn score(&self, vendor_id: &str) -> Result<RiskSignal, ScorerError> {
        let url = self.risk_url(vendor_id)?;
        debug!(%url, "requesting vendor risk");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ScorerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScorerError::Status(status.as_u16()));
        }

        response
            .json::<RiskSignal>()
            .await
            .map_err(|e| ScorerError::InvalidResponse(e.to_string()))
    }
}
