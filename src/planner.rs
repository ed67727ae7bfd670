//! Routes natural-language questions to vector search or a generated graph
//! query, retrying failed queries with the store's error as feedback.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PlanError;
use crate::graph::subgraph::extract_subgraph;
use crate::graph::{GraphStore, VectorStore};
use crate::llm::ReasoningService;
use crate::rag::search::{semantic_search, SearchResult};
use crate::rag::{Embedder, Reranker};
use crate::types::{Classification, Record, RouteDecision, Subgraph};

const EMPTY_QUERY: &str = "generated query is empty";

/// Longest serialized context passed to `answer`.
const MAX_ANSWER_CONTEXT: usize = 24_000;

/// One generate/execute round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub query: String,
    pub error: Option<String>,
}

/// A graph query that executed, with how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct GraphPlan {
    pub query: String,
    pub attempts: Vec<Attempt>,
    pub records: Vec<Record>,
    pub subgraph: Subgraph,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum PlanOutcome {
    Vector {
        classification: Classification,
        result: SearchResult,
    },
    Graph {
        classification: Classification,
        plan: GraphPlan,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub outcome: PlanOutcome,
}

pub struct QueryPlanner {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    llm: Arc<dyn ReasoningService>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    max_attempts: u32,
    top_k: usize,
}

impl QueryPlanner {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        llm: Arc<dyn ReasoningService>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            graph,
            vectors,
            llm,
            embedder,
            reranker: None,
            max_attempts: 5,
            top_k: 10,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub async fn classify(&self, query: &str) -> Result<Classification, PlanError> {
        let classification = self.llm.classify(query).await.map_err(service_error)?;
        debug!(
            decision = %classification.decision,
            rationale = %classification.rationale,
            "query classified"
        );
        Ok(classification)
    }

    /// Generate a graph query and execute it, feeding each execution error
    /// back into the next generation. Gives up after `max_attempts` failures.
    pub async fn generate_and_execute(&self, query: &str) -> Result<GraphPlan, PlanError> {
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let raw = self
                .llm
                .generate_graph_query(query, last_error.as_deref())
                .await
                .map_err(PlanError::Service)?;
            let candidate = strip_code_fence(&raw).to_string();

            let executed = if candidate.is_empty() {
                Err(EMPTY_QUERY.to_string())
            } else {
                self.graph
                    .run(&candidate, &[])
                    .await
                    .map_err(|e| e.to_string())
            };

            match executed {
                Ok(records) => {
                    info!(attempt, rows = records.len(), "graph query executed");
                    attempts.push(Attempt {
                        query: candidate.clone(),
                        error: None,
                    });
                    let subgraph = extract_subgraph(&records, &[], &[]);
                    return Ok(GraphPlan {
                        query: candidate,
                        attempts,
                        records,
                        subgraph,
                    });
                }
                Err(error) => {
                    warn!(attempt, query = %candidate, error = %error, "graph query failed");
                    attempts.push(Attempt {
                        query: candidate,
                        error: Some(error.clone()),
                    });
                    last_error = Some(error);
                }
            }
        }

        Err(PlanError::Exhausted {
            attempts: self.max_attempts,
            last_error: last_error.unwrap_or_default(),
        })
    }

    pub async fn vector_search(&self, query: &str) -> Result<SearchResult, PlanError> {
        semantic_search(
            self.vectors.as_ref(),
            self.embedder.as_ref(),
            self.reranker.as_deref(),
            query,
            self.top_k,
        )
        .await
        .map_err(PlanError::Search)
    }

    /// Classify `query` and run the chosen path.
    pub async fn plan(&self, query: &str) -> Result<PlanOutcome, PlanError> {
        let classification = self.classify(query).await?;
        match classification.decision {
            RouteDecision::Vector => Ok(PlanOutcome::Vector {
                result: self.vector_search(query).await?,
                classification,
            }),
            RouteDecision::Graph => Ok(PlanOutcome::Graph {
                plan: self.generate_and_execute(query).await?,
                classification,
            }),
        }
    }

    /// Plan `query`, then have the reasoning service answer over the result.
    pub async fn ask(&self, query: &str) -> Result<Answer, PlanError> {
        let outcome = self.plan(query).await?;
        let context = answer_context(&outcome);
        let answer = self
            .llm
            .answer(query, &context)
            .await
            .map_err(PlanError::Service)?;
        Ok(Answer { answer, outcome })
    }
}

/// Keep a typed [`PlanError`] raised by the service; wrap anything else.
fn service_error(err: anyhow::Error) -> PlanError {
    match err.downcast::<PlanError>() {
        Ok(plan) => plan,
        Err(other) => PlanError::Service(other),
    }
}

fn answer_context(outcome: &PlanOutcome) -> String {
    let json = match outcome {
        PlanOutcome::Vector { result, .. } => serde_json::to_string_pretty(&result.hits),
        PlanOutcome::Graph { plan, .. } => serde_json::to_string_pretty(&plan.records),
    }
    .unwrap_or_default();
    if json.len() <= MAX_ANSWER_CONTEXT {
        return json;
    }
    let mut end = MAX_ANSWER_CONTEXT;
    while !json.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n...(truncated)", &json[..end])
}

/// Strip a surrounding Markdown code fence (with optional language tag).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}
