use std::sync::Arc;

use serde::Serialize;

use super::GraphStore;
use crate::error::PipelineError;
use crate::languages::{content_hash, ParsedFile};
use crate::types::FunctionKey;

/// A Function node written for the current file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenFunction {
    pub key: FunctionKey,
    pub element_id: String,
    pub body_hash: String,
}

/// Outcome of writing one parsed file into the graph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    pub path: String,
    pub files_merged: u32,
    pub functions_merged: u32,
    pub imports_merged: u32,
    pub imports_pruned: u32,
    pub functions_pruned: u32,
    pub failures: Vec<PipelineError>,
    pub functions: Vec<WrittenFunction>,
}

/// Writes File/Function nodes and IMPORTS_FROM edges for parsed files.
///
/// A failed merge is recorded in the report and the remaining records are
/// still written. Nothing is rolled back.
#[derive(Clone)]
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn write_file(&self, parsed: &ParsedFile) -> WriteReport {
        let path = parsed.path.as_str();
        let mut report = WriteReport {
            path: path.to_string(),
            ..Default::default()
        };

        match self.store.merge_file(path).await {
            Ok(_) => report.files_merged += 1,
            Err(e) => report.fail(PipelineError::graph_write(path, &e)),
        }

        for func in &parsed.functions {
            let key = FunctionKey::new(&func.name, path);
            match self
                .store
                .merge_function(&func.name, path, Some(&func.body))
                .await
            {
                Ok(element_id) => {
                    report.functions_merged += 1;
                    report.functions.push(WrittenFunction {
                        body_hash: content_hash(&func.body),
                        key,
                        element_id,
                    });
                }
                Err(e) => report.fail(PipelineError::graph_write(key.to_string(), &e)),
            }
        }

        let declared: Vec<String> = parsed.functions.iter().map(|f| f.name.clone()).collect();
        match self.store.prune_functions(path, &declared).await {
            Ok(n) => report.functions_pruned = n,
            Err(e) => report.fail(PipelineError::graph_write(path, &e)),
        }

        for import in &parsed.imports {
            match self
                .store
                .merge_import(path, &import.resolved_source, &import.clause)
                .await
            {
                Ok(_) => report.imports_merged += 1,
                Err(e) => {
                    let target = format!("{path} -> {} ({})", import.resolved_source, import.clause);
                    report.fail(PipelineError::graph_write(target, &e));
                }
            }
        }

        match self.store.prune_imports(path, &parsed.imports).await {
            Ok(n) => report.imports_pruned = n,
            Err(e) => report.fail(PipelineError::graph_write(path, &e)),
        }

        tracing::debug!(
            file = %path,
            functions = report.functions_merged,
            imports = report.imports_merged,
            pruned = report.imports_pruned,
            retired = report.functions_pruned,
            "file written"
        );
        report
    }
}

impl WriteReport {
    fn fail(&mut self, err: PipelineError) {
        tracing::warn!(error = %err, "graph write skipped");
        self.failures.push(err);
    }
}
