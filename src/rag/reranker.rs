use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

use super::{model_cache_dir, Reranker};

/// Cross-encoder re-ranker for scoring (query, document) pairs.
///
/// The BGE-reranker-base model processes query and document jointly through
/// all transformer layers, producing a relevance score for each pair.
pub struct CrossEncoderEngine {
    model: TextRerank,
}

impl CrossEncoderEngine {
    /// Load the cross-encoder re-ranker model.
    pub fn load() -> Result<Self> {
        Self::load_inner(false)
    }

    /// Load with download progress displayed on stdout.
    pub fn load_with_progress() -> Result<Self> {
        Self::load_inner(true)
    }

    fn load_inner(show: bool) -> Result<Self> {
        let model = TextRerank::try_new(
            RerankInitOptions::new(RerankerModel::BGERerankerBase)
                .with_cache_dir(model_cache_dir())
                .with_show_download_progress(show),
        )
        .context("Failed to initialize cross-encoder model")?;

        Ok(Self { model })
    }

    /// Score multiple documents against a single query.
    ///
    /// Returns scores in the same order as the input documents.
    pub fn score_batch(&mut self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let results = self
            .model
            .rerank(query, documents, false, None)
            .context("Cross-encoder batch scoring failed")?;

        // Results come back sorted by score descending; place back by original index.
        let mut scores = vec![0.0f32; documents.len()];
        for r in &results {
            scores[r.index] = r.score;
        }

        Ok(scores)
    }
}

/// Indices of `scores`, highest score first. Ties keep input order.
pub fn order_by_score(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

/// [`Reranker`] backed by a lazily loaded [`CrossEncoderEngine`].
///
/// Uses tri-state caching: once a load attempt fails it is not retried, and
/// every later call reports the reranker as unavailable.
#[derive(Clone, Default)]
pub struct LocalReranker {
    engine: Arc<Mutex<Option<Option<CrossEncoderEngine>>>>,
}

impl LocalReranker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Reranker for LocalReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<usize>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let engine = Arc::clone(&self.engine);
        let query = query.to_string();
        let documents = documents.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = engine
                .lock()
                .map_err(|_| anyhow::anyhow!("reranker lock poisoned"))?;
            if guard.is_none() {
                match CrossEncoderEngine::load() {
                    Ok(e) => *guard = Some(Some(e)),
                    Err(e) => {
                        tracing::debug!(error = %e, "cross-encoder not available");
                        *guard = Some(None);
                    }
                }
            }
            let engine = guard
                .as_mut()
                .and_then(|slot| slot.as_mut())
                .context("cross-encoder model not available")?;

            let docs: Vec<&str> = documents.iter().map(|d| d.as_str()).collect();
            let scores = engine.score_batch(&query, &docs)?;
            Ok(order_by_score(&scores))
        })
        .await
        .context("rerank task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_score_descending() {
        assert_eq!(order_by_score(&[0.1, 0.9, 0.5]), vec![1, 2, 0]);
    }

    #[test]
    fn test_order_by_score_ties_are_stable() {
        assert_eq!(order_by_score(&[0.5, 0.5, 0.7, 0.5]), vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_order_by_score_nan_does_not_panic() {
        let order = order_by_score(&[f32::NAN, 0.2, 0.4]);
        assert_eq!(order.len(), 3);
    }
}
