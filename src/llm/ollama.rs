//! Ollama adapter for [`ReasoningService`](super::ReasoningService).
//!
//! Non-streaming JSON requests to `/api/generate`; every request is bounded
//! by the configured timeout.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{prompts, ReasoningService};
use crate::config::LlmSettings;
use crate::error::PlanError;
use crate::types::{Classification, RouteDecision};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    /// e.g. "http://localhost:11434/api/generate"
    endpoint: String,
    model: String,
}

impl OllamaClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let host = settings
            .host
            .trim_start_matches("http://")
            .trim_end_matches('/');
        Ok(Self {
            client,
            endpoint: format!("http://{host}/api/generate"),
            model: settings.model.clone(),
        })
    }

    /// Run one non-streaming generation and return the `response` text.
    async fn generate(&self, prompt: String, json: bool) -> Result<String> {
        let mut payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if json {
            payload["format"] = serde_json::json!("json");
        }

        #[derive(Deserialize)]
        struct GenerateResp {
            response: Option<String>,
            error: Option<String>,
        }
        let outer: GenerateResp = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Ollama request failed: POST {}", self.endpoint))?
            .error_for_status()
            .context("Ollama returned an error status")?
            .json()
            .await
            .context("Malformed JSON from Ollama")?;
        if let Some(err) = outer.error {
            bail!("Ollama error: {err}");
        }
        outer.response.context("Ollama response has no 'response' field")
    }
}

#[async_trait]
impl ReasoningService for OllamaClient {
    async fn classify(&self, query: &str) -> Result<Classification> {
        let raw = self.generate(prompts::classify(query), true).await?;
        parse_classification(&raw)
    }

    async fn generate_graph_query(
        &self,
        query: &str,
        prior_error: Option<&str>,
    ) -> Result<String> {
        let raw = self
            .generate(prompts::generate_graph_query(query, prior_error), true)
            .await?;
        parse_generated_query(&raw)
    }

    async fn summarize(&self, code: &str) -> Result<String> {
        let summary = self.generate(prompts::summarize(code), false).await?;
        Ok(summary.trim().to_string())
    }

    async fn answer(&self, query: &str, context: &str) -> Result<String> {
        let answer = self.generate(prompts::answer(query, context), false).await?;
        Ok(answer.trim().to_string())
    }
}

fn parse_classification(json: &str) -> Result<Classification> {
    #[derive(Deserialize)]
    struct ClassifyResp {
        decision: Option<String>,
        rationale: Option<String>,
    }
    let resp: ClassifyResp =
        serde_json::from_str(json).context("Classification is not valid JSON")?;
    let decision = resp.decision.unwrap_or_default();
    let decision = match decision.trim().parse::<RouteDecision>() {
        Ok(d) => d,
        Err(_) => return Err(PlanError::InvalidDecision(decision).into()),
    };
    Ok(Classification {
        decision,
        rationale: resp.rationale.unwrap_or_default(),
    })
}

fn parse_generated_query(json: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct QueryResp {
        query: Option<String>,
    }
    // Models occasionally ignore the JSON format and return the bare query.
    match serde_json::from_str::<QueryResp>(json) {
        Ok(resp) => Ok(resp.query.unwrap_or_default()),
        Err(_) => Ok(json.to_string()),
    }
}
