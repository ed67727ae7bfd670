//! Incremental call graph for JS/TS codebases.
//!
//! Files are parsed with tree-sitter, written to a SQLite-backed graph
//! (File/Function nodes, IMPORTS_FROM/CALLS edges) and enriched in the
//! background with LLM summaries and embeddings. A query planner routes
//! natural-language questions to semantic search or a generated graph query.

pub mod app;
pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod graph;
pub mod languages;
pub mod llm;
pub mod mcp;
pub mod pipeline;
pub mod planner;
pub mod rag;
pub mod resolver;
pub mod types;
pub mod watch;
