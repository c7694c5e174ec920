use crate::config::Settings;
use crate::ingest::types::{AnnualReportsResponse, DegradedReason, FetchOutcome, StatementKind};
use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const QUERY_PATH: &str = "/query";

#[async_trait::async_trait]
pub trait StatementFetcher: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Transport and HTTP failures come back as `Err`; quota, informational and
    /// empty payloads are `Ok(FetchOutcome::Degraded(..))`.
    async fn fetch_statements(&self, symbol: &str, kind: StatementKind) -> Result<FetchOutcome>;
}

#[derive(Debug, Clone)]
pub struct AlphaVantageFetcher {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageFetcher {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_alpha_vantage_api_key()?.to_string();

        let timeout_secs = std::env::var("ETL_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build alpha vantage http client")?;

        Ok(Self {
            http,
            base_url: settings.alpha_vantage_base_url.clone(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), QUERY_PATH)
    }
}

#[async_trait::async_trait]
impl StatementFetcher for AlphaVantageFetcher {
    fn provider_name(&self) -> &'static str {
        "alpha_vantage"
    }

    async fn fetch_statements(&self, symbol: &str, kind: StatementKind) -> Result<FetchOutcome> {
        let res = self
            .http
            .get(self.url())
            .query(&[
                ("function", kind.function_name()),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("{kind} statement request failed for {symbol}"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read provider response")?;

        if !status.is_success() {
            anyhow::bail!("alpha vantage HTTP {status}: {text}");
        }

        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("provider response is not valid JSON: {text}"))?;

        classify_response(raw_json)
    }
}

/// Sorts a decoded payload into reports or one of the degraded shapes the provider
/// answers with instead of an HTTP error.
pub fn classify_response(raw_json: Value) -> Result<FetchOutcome> {
    let Value::Object(obj) = &raw_json else {
        anyhow::bail!("provider response is not a JSON object: {raw_json}");
    };

    if obj.is_empty() {
        return Ok(FetchOutcome::Degraded(DegradedReason::Empty));
    }
    if let Some(msg) = obj.get("Note") {
        return Ok(FetchOutcome::Degraded(DegradedReason::RateLimited(
            message_text(msg),
        )));
    }
    if let Some(msg) = obj.get("Information") {
        return Ok(FetchOutcome::Degraded(DegradedReason::Informational(
            message_text(msg),
        )));
    }
    if let Some(msg) = obj.get("Error Message") {
        return Ok(FetchOutcome::Degraded(DegradedReason::InvalidSymbol(
            message_text(msg),
        )));
    }

    let parsed = serde_json::from_value::<AnnualReportsResponse>(raw_json)
        .context("failed to parse provider response into annual reports")?;

    if parsed.annual_reports.is_empty() {
        return Ok(FetchOutcome::Degraded(DegradedReason::Empty));
    }

    Ok(FetchOutcome::Reports(parsed.annual_reports))
}

fn message_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
