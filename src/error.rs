//! Typed failures for the indexing pipeline, the query planner and enrichment.
//!
//! Per-record pipeline failures are collected into reports rather than
//! propagated; plan failures are returned to the caller.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("cannot parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("graph write failed for {target}: {reason}")]
    GraphWrite { target: String, reason: String },
}

impl PipelineError {
    pub fn parse(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn graph_write(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::GraphWrite {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

impl serde::Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("reasoning service returned an invalid route decision: '{0}'")]
    InvalidDecision(String),

    #[error("reasoning service failed: {0}")]
    Service(#[source] anyhow::Error),

    #[error("could not produce a valid query after {attempts} attempts; last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("vector search failed: {0}")]
    Search(#[source] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("summary failed for {key}: {source}")]
    Summarize {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("embedding failed for {key}: {source}")]
    Embed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("record upsert failed for {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}
