//! Reasoning service contract: routing, query generation, summaries, answers.

pub mod ollama;
pub mod prompts;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Classification;

pub use ollama::OllamaClient;

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Route a question to the vector or graph path.
    ///
    /// Implementations must reject any decision other than the two routes.
    async fn classify(&self, query: &str) -> Result<Classification>;

    /// Produce a candidate graph query. `prior_error` is the execution error
    /// of the previous candidate, passed back verbatim.
    async fn generate_graph_query(&self, query: &str, prior_error: Option<&str>)
        -> Result<String>;

    /// One- or two-sentence description of a function's behavior.
    async fn summarize(&self, code: &str) -> Result<String>;

    /// Answer `query` in prose, given serialized result context.
    async fn answer(&self, query: &str, context: &str) -> Result<String>;
}
