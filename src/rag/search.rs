use anyhow::{Context, Result};
use serde::Serialize;

use super::{Embedder, Reranker};
use crate::graph::VectorStore;
use crate::types::FunctionRecord;

/// One function returned by the vector path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Element id of the Function node.
    pub id: String,
    pub name: String,
    pub path: String,
    pub summary: String,
    /// Embedding distance to the query (lower = closer).
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    /// `true` when `hits` is in reranker order rather than distance order.
    pub reranked: bool,
}

/// Embed `query`, fetch the `top_k` nearest function records and optionally
/// rerank them by summary.
///
/// A reranker failure is logged and the distance order is kept.
pub async fn semantic_search(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    reranker: Option<&dyn Reranker>,
    query: &str,
    top_k: usize,
) -> Result<SearchResult> {
    let embedding = embedder
        .embed(query)
        .await
        .context("Failed to embed query")?;
    let neighbours = store.similarity_search(&embedding, top_k).await?;

    let ids: Vec<String> = neighbours.iter().map(|(id, _)| id.clone()).collect();
    let records = store.records_by_ids(&ids).await?;
    let mut hits: Vec<SearchHit> = neighbours
        .iter()
        .filter_map(|(id, distance)| {
            records
                .iter()
                .find(|r| &r.id == id)
                .map(|r| to_hit(r, *distance))
        })
        .collect();

    let mut reranked = false;
    if let Some(reranker) = reranker.filter(|_| hits.len() > 1) {
        let documents: Vec<String> = hits.iter().map(|h| h.summary.clone()).collect();
        match reranker.rerank(query, &documents).await {
            Ok(order) => {
                hits = apply_order(hits, &order);
                reranked = true;
            }
            Err(e) => {
                tracing::warn!(error = %e, "reranking failed, keeping distance order");
            }
        }
    }

    Ok(SearchResult { hits, reranked })
}

fn to_hit(record: &FunctionRecord, distance: f64) -> SearchHit {
    SearchHit {
        id: record.id.clone(),
        name: record.name.clone(),
        path: record.path.clone(),
        summary: record.summary.clone(),
        distance,
    }
}

/// Reorder `items` by `order`. Out-of-range and repeated indices are
/// ignored; items the order leaves out follow in their original order.
fn apply_order<T>(items: Vec<T>, order: &[usize]) -> Vec<T> {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    for &i in order {
        if let Some(item) = slots.get_mut(i).and_then(Option::take) {
            out.push(item);
        }
    }
    out.extend(slots.into_iter().flatten());
    out
}
