//! Pull nodes and relationships out of query records.

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;

use super::{GraphStore, VectorStore};
use crate::db::StoredFunction;
use crate::types::{FunctionRecord, GraphValue, Record, Subgraph, LABEL_FUNCTION, REL_CALLS};

/// Detail view of one Function node.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDetail {
    pub function: StoredFunction,
    pub record: Option<FunctionRecord>,
    /// CALLS edges into the function and their callers.
    pub callers: Subgraph,
    /// CALLS edges out of the function and their callees.
    pub callees: Subgraph,
}

/// Build the detail view for `id`, or `None` if it is not a known Function.
pub async fn function_detail(
    graph: &dyn GraphStore,
    vectors: &dyn VectorStore,
    id: &str,
) -> Result<Option<FunctionDetail>> {
    let Some(function) = graph.function(id).await? else {
        return Ok(None);
    };
    let record = vectors.get_record(id).await?;
    let (callers, callees) = graph.function_detail(id).await?;
    Ok(Some(FunctionDetail {
        function,
        record,
        callers: extract_subgraph(&callers, &[LABEL_FUNCTION], &[REL_CALLS]),
        callees: extract_subgraph(&callees, &[LABEL_FUNCTION], &[REL_CALLS]),
    }))
}

/// Collect the distinct nodes and relationships appearing in `records`.
///
/// Lists are searched recursively. An empty `labels` or `rel_types` filter
/// keeps everything of that kind; otherwise a node is kept when it carries at
/// least one listed label and a relationship when its type is listed.
/// Elements are deduplicated by element id and keep first-seen order.
pub fn extract_subgraph(records: &[Record], labels: &[&str], rel_types: &[&str]) -> Subgraph {
    let mut out = Subgraph::default();
    let mut seen: HashSet<String> = HashSet::new();
    for record in records {
        for value in record.values() {
            collect(value, labels, rel_types, &mut seen, &mut out);
        }
    }
    out
}

fn collect(
    value: &GraphValue,
    labels: &[&str],
    rel_types: &[&str],
    seen: &mut HashSet<String>,
    out: &mut Subgraph,
) {
    match value {
        GraphValue::Node(node) => {
            let wanted = labels.is_empty() || labels.iter().any(|l| node.has_label(l));
            if wanted && seen.insert(node.element_id.clone()) {
                out.nodes.push(node.clone());
            }
        }
        GraphValue::Relationship(rel) => {
            let wanted = rel_types.is_empty() || rel_types.contains(&rel.rel_type.as_str());
            if wanted && seen.insert(rel.element_id.clone()) {
                out.relationships.push(rel.clone());
            }
        }
        GraphValue::List(items) => {
            for item in items {
                collect(item, labels, rel_types, seen, out);
            }
        }
        GraphValue::Scalar(_) => {}
    }
}
