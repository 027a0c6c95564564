//! Client for the external summarization service.
//!
//! Posts a batch of chat lines to `{host}/summarize` and extracts the
//! `summary` field. Never retries; the next batch is the retry.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::SummarizerConfig;
use crate::error::SummarizeError;

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    summary: Option<String>,
}

pub struct SummaryClient {
    url: String,
    client: Client,
}

impl SummaryClient {
    pub fn new(config: &SummarizerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout: {e}");
                Client::new()
            });

        Self {
            url: format!("{}/summarize", config.host.trim_end_matches('/')),
            client,
        }
    }

    /// Summarize one batch. `Ok(None)` means the service answered without a
    /// usable summary, which is not an error.
    pub async fn summarize(&self, batch: &str) -> Result<Option<String>, SummarizeError> {
        let t_start = Instant::now();
        debug!("Sending {} chars to {}", batch.len(), self.url);

        let resp = self
            .client
            .post(&self.url)
            .json(&json!({ "text": batch }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SummarizeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        let data: SummaryResponse =
            serde_json::from_str(&body).map_err(|e| SummarizeError::Decode(e.to_string()))?;

        let latency_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        let summary = data
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        match &summary {
            Some(s) => info!("Summarized {} chars → {} chars ({latency_ms:.0}ms)", batch.len(), s.len()),
            None => debug!("Summarizer returned no summary ({latency_ms:.0}ms)"),
        }
        Ok(summary)
    }
}
