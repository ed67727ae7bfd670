pub mod embeddings;
pub mod reranker;
pub mod search;
pub mod setup;

use anyhow::Result;
use async_trait::async_trait;

/// Embedding dimension for the bge-small-en-v1.5 model.
pub const EMBEDDING_DIM: usize = 384;

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Orders documents by relevance to a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Indices into `documents`, most relevant first.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<usize>>;
}

/// Shared model cache directory for ONNX models (embedding + reranker).
///
/// Precedence:
/// 1. `FASTEMBED_CACHE_DIR` env var (fastembed's own convention)
/// 2. `XDG_CACHE_HOME/callmap/models` (XDG standard)
/// 3. `~/.cache/callmap/models` (fallback)
pub fn model_cache_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("FASTEMBED_CACHE_DIR") {
        return std::path::PathBuf::from(dir);
    }

    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        return std::path::PathBuf::from(xdg).join("callmap").join("models");
    }

    if let Some(home) = home_dir() {
        return home.join(".cache").join("callmap").join("models");
    }

    // Last resort: fastembed's default (CWD/.fastembed_cache)
    std::path::PathBuf::from(".fastembed_cache")
}

fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(std::path::PathBuf::from)
}
