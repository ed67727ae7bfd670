use std::sync::Arc;

use serde::Serialize;

use super::GraphStore;
use crate::error::PipelineError;
use crate::types::{FunctionDecl, FunctionKey};

/// Outcome of resolving the calls made by one file's functions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveReport {
    pub path: String,
    /// `(caller, callee)` pairs that now have a CALLS edge.
    pub linked: Vec<(FunctionKey, FunctionKey)>,
    /// Callee names with no matching import clause.
    pub dropped: u32,
    pub pruned: u32,
    pub failures: Vec<PipelineError>,
}

/// Links direct calls to the functions they import.
///
/// A callee name resolves only through an IMPORTS_FROM edge of the caller's
/// file whose clause equals that name. Calls to functions in the same file
/// are never linked.
#[derive(Clone)]
pub struct CallResolver {
    store: Arc<dyn GraphStore>,
}

impl CallResolver {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_file(&self, path: &str, functions: &[FunctionDecl]) -> ResolveReport {
        let mut report = ResolveReport {
            path: path.to_string(),
            ..Default::default()
        };
        let mut resolved: Vec<(FunctionKey, FunctionKey)> = Vec::new();

        for func in functions {
            let caller = FunctionKey::new(&func.name, path);
            for callee_name in &func.callees {
                let target = match self.store.import_target(path, callee_name).await {
                    Ok(Some(target)) => target,
                    Ok(None) => {
                        tracing::trace!(caller = %caller, callee = %callee_name, "unresolved call dropped");
                        report.dropped += 1;
                        continue;
                    }
                    Err(e) => {
                        report.fail(PipelineError::graph_write(caller.to_string(), &e));
                        continue;
                    }
                };

                let callee = FunctionKey::new(callee_name, target);
                resolved.push((caller.clone(), callee.clone()));
                match self.store.merge_call(&caller, &callee).await {
                    Ok(_) => report.linked.push((caller.clone(), callee)),
                    Err(e) => {
                        let target = format!("{caller} -> {callee}");
                        report.fail(PipelineError::graph_write(target, &e));
                    }
                }
            }
        }

        match self.store.prune_calls(path, &resolved).await {
            Ok(n) => report.pruned = n,
            Err(e) => report.fail(PipelineError::graph_write(path, &e)),
        }

        tracing::debug!(
            file = %path,
            linked = report.linked.len(),
            dropped = report.dropped,
            pruned = report.pruned,
            "calls resolved"
        );
        report
    }
}

impl ResolveReport {
    fn fail(&mut self, err: PipelineError) {
        tracing::warn!(error = %err, "call edge skipped");
        self.failures.push(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SqliteStore;

    fn decl(name: &str, callees: &[&str]) -> FunctionDecl {
        FunctionDecl {
            name: name.to_string(),
            body: String::new(),
            callees: callees.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_links_only_imported_names() {
        let store = Arc::new(SqliteStore::memory().unwrap());
        store.merge_import("/p/a.ts", "/p/b.ts", "helper").await.unwrap();
        let resolver = CallResolver::new(store.clone());

        let report = resolver
            .resolve_file("/p/a.ts", &[decl("main", &["helper", "local", "missing"])])
            .await;

        assert_eq!(
            report.linked,
            vec![(FunctionKey::new("main", "/p/a.ts"), FunctionKey::new("helper", "/p/b.ts"))]
        );
        assert_eq!(report.dropped, 2);
        assert!(report.failures.is_empty());
        assert_eq!(store.stats().await.unwrap().num_calls, 1);
    }

    #[tokio::test]
    async fn test_same_file_call_is_dropped() {
        let store = Arc::new(SqliteStore::memory().unwrap());
        let resolver = CallResolver::new(store.clone());
        let report = resolver
            .resolve_file("/p/a.ts", &[decl("main", &["local"]), decl("local", &[])])
            .await;
        assert!(report.linked.is_empty());
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test]
    async fn test_callee_may_be_linked_before_its_file_is_written() {
        let store = Arc::new(SqliteStore::memory().unwrap());
        store.merge_import("/p/a.ts", "/p/b.ts", "helper").await.unwrap();
        CallResolver::new(store.clone())
            .resolve_file("/p/a.ts", &[decl("main", &["helper"])])
            .await;

        let before = store
            .function_by_key(&FunctionKey::new("helper", "/p/b.ts"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.body, None);

        store
            .merge_function("helper", "/p/b.ts", Some("function helper() {}"))
            .await
            .unwrap();
        let after = store.function(&before.element_id).await.unwrap().unwrap();
        assert_eq!(after.body.as_deref(), Some("function helper() {}"));
        assert_eq!(store.stats().await.unwrap().num_functions, 2);
    }

    #[tokio::test]
    async fn test_call_removed_on_reparse_is_pruned() {
        let store = Arc::new(SqliteStore::memory().unwrap());
        store.merge_import("/p/a.ts", "/p/b.ts", "x").await.unwrap();
        store.merge_import("/p/a.ts", "/p/b.ts", "y").await.unwrap();
        let resolver = CallResolver::new(store.clone());

        resolver.resolve_file("/p/a.ts", &[decl("main", &["x", "y"])]).await;
        assert_eq!(store.stats().await.unwrap().num_calls, 2);

        let report = resolver.resolve_file("/p/a.ts", &[decl("main", &["x"])]).await;
        assert_eq!(report.pruned, 1);
        assert_eq!(store.stats().await.unwrap().num_calls, 1);
    }
}
