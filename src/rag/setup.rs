use anyhow::{Context, Result};

use super::embeddings::EmbeddingEngine;
use super::model_cache_dir;
use super::reranker::CrossEncoderEngine;

/// Result of the setup operation.
#[derive(Debug, serde::Serialize)]
pub struct SetupResult {
    pub model_dir: String,
    pub reranker: bool,
}

/// Download the embedding model and, when possible, the cross-encoder.
///
/// fastembed downloads ONNX models from HuggingFace on first use; this
/// triggers that eagerly so the user sees progress. A failed reranker
/// download is reported but not fatal, since reranking is optional.
pub fn download_models() -> Result<SetupResult> {
    let cache_dir = model_cache_dir();

    let _engine =
        EmbeddingEngine::new_with_progress().context("Failed to download embedding model")?;

    let reranker = match CrossEncoderEngine::load_with_progress() {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "cross-encoder download failed, reranking disabled");
            false
        }
    };

    Ok(SetupResult {
        model_dir: cache_dir.display().to_string(),
        reranker,
    })
}
