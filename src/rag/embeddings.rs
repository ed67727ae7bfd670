use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};

use super::{model_cache_dir, Embedder, EMBEDDING_DIM};

/// Embedding engine wrapping a fastembed ONNX model.
///
/// The quantized model (BGESmallENV15Q) is ~2-3x faster than full precision
/// with negligible quality loss.
pub struct EmbeddingEngine {
    model: TextEmbedding,
}

impl EmbeddingEngine {
    /// Create a new embedding engine using the quantized BGE-small-en-v1.5 model.
    ///
    /// Models are cached in the shared directory (see [`super::model_cache_dir`]).
    pub fn new() -> Result<Self> {
        Self::with_progress(false)
    }

    /// Create a new embedding engine, showing download progress on stdout.
    pub fn new_with_progress() -> Result<Self> {
        Self::with_progress(true)
    }

    fn with_progress(show: bool) -> Result<Self> {
        let model = TextEmbedding::try_new(
            TextInitOptions::new(EmbeddingModel::BGESmallENV15Q)
                .with_cache_dir(model_cache_dir())
                .with_show_download_progress(show),
        )
        .context("Failed to initialize embedding model")?;

        Ok(Self { model })
    }

    /// Embed a single text string, returning a normalized vector.
    pub fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let results = self
            .model
            .embed(vec![text], Some(1))
            .context("Embedding failed")?;

        let vec = results
            .into_iter()
            .next()
            .context("No embedding returned")?;

        anyhow::ensure!(
            vec.len() == EMBEDDING_DIM,
            "Expected {EMBEDDING_DIM}-dim embedding, got {}",
            vec.len()
        );

        Ok(vec)
    }
}

/// [`Embedder`] backed by a lazily loaded local [`EmbeddingEngine`].
///
/// Inference runs on the blocking pool; the engine is loaded on first use
/// and shared by every clone.
#[derive(Clone, Default)]
pub struct LocalEmbedder {
    engine: Arc<Mutex<Option<EmbeddingEngine>>>,
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let engine = Arc::clone(&self.engine);
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = engine
                .lock()
                .map_err(|_| anyhow::anyhow!("embedding engine lock poisoned"))?;
            if guard.is_none() {
                *guard = Some(EmbeddingEngine::new()?);
            }
            guard
                .as_mut()
                .context("embedding engine unavailable")?
                .embed(&text)
        })
        .await
        .context("embedding task failed")?
    }
}

/// Serialize a Vec<f32> to little-endian bytes for sqlite-vec storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}
