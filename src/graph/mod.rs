//! Store seams for the call graph and the function-record side store.
//!
//! Everything above this module talks to [`GraphStore`] and [`VectorStore`];
//! [`SqliteStore`] implements both over one SQLite connection.

pub mod calls;
pub mod subgraph;
pub mod writer;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::db::{Database, GraphStats, StoredFunction};
use crate::types::{FunctionKey, FunctionRecord, ImportRecord, Record};

/// Graph store contract. Every merge is an idempotent upsert.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn merge_file(&self, path: &str) -> Result<String>;
    async fn merge_function(&self, name: &str, path: &str, body: Option<&str>) -> Result<String>;
    async fn merge_import(&self, source: &str, target: &str, clause: &str) -> Result<String>;
    async fn merge_call(&self, caller: &FunctionKey, callee: &FunctionKey) -> Result<String>;

    /// Target file of an import in `file` whose clause equals `clause`.
    async fn import_target(&self, file: &str, clause: &str) -> Result<Option<String>>;
    async fn prune_imports(&self, file: &str, keep: &[ImportRecord]) -> Result<u32>;
    async fn prune_calls(&self, file: &str, keep: &[(FunctionKey, FunctionKey)]) -> Result<u32>;
    /// Retire Function nodes in `file` that are no longer declared there.
    async fn prune_functions(&self, file: &str, keep: &[String]) -> Result<u32>;
    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Execute a read-only graph query. Errors carry the store's message verbatim.
    async fn run(&self, query: &str, params: &[serde_json::Value]) -> Result<Vec<Record>>;
    async fn function(&self, id: &str) -> Result<Option<StoredFunction>>;
    async fn function_by_key(&self, key: &FunctionKey) -> Result<Option<StoredFunction>>;
    /// `(callers, callees)` records for one Function node.
    async fn function_detail(&self, id: &str) -> Result<(Vec<Record>, Vec<Record>)>;
    async fn stats(&self) -> Result<GraphStats>;
    async fn has_files(&self) -> Result<bool>;
}

/// Side store of summarized, embedded functions.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// `true` if a record exists for `id` with this exact body hash.
    async fn is_enriched(&self, id: &str, body_hash: &str) -> Result<bool>;
    async fn upsert_record(&self, record: FunctionRecord) -> Result<()>;
    /// Nearest records as `(element_id, distance)`, closest first.
    async fn similarity_search(&self, embedding: &[f32], top_k: usize)
        -> Result<Vec<(String, f64)>>;
    async fn get_record(&self, id: &str) -> Result<Option<FunctionRecord>>;
    async fn records_by_ids(&self, ids: &[String]) -> Result<Vec<FunctionRecord>>;
}

/// SQLite-backed [`GraphStore`] + [`VectorStore`].
///
/// Calls run on the blocking pool and serialize on the connection mutex, so
/// each merge is atomic at this boundary.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
    max_rows: usize,
}

impl SqliteStore {
    pub fn open(path: &Path, max_rows: usize) -> Result<Self> {
        let db = Database::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self::new(db, max_rows))
    }

    /// In-memory store (for tests and benchmarks).
    #[doc(hidden)]
    pub fn memory() -> Result<Self> {
        Ok(Self::new(Database::open_memory()?, 500))
    }

    pub fn new(db: Database, max_rows: usize) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            max_rows,
        }
    }

    async fn with_db<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let db = db
                .lock()
                .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
            f(&db)
        })
        .await
        .context("database task failed")?
    }
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn merge_file(&self, path: &str) -> Result<String> {
        let path = path.to_string();
        self.with_db(move |db| db.merge_file(&path)).await
    }

    async fn merge_function(&self, name: &str, path: &str, body: Option<&str>) -> Result<String> {
        let (name, path) = (name.to_string(), path.to_string());
        let body = body.map(str::to_string);
        self.with_db(move |db| db.merge_function(&name, &path, body.as_deref()))
            .await
    }

    async fn merge_import(&self, source: &str, target: &str, clause: &str) -> Result<String> {
        let (source, target, clause) = (source.to_string(), target.to_string(), clause.to_string());
        self.with_db(move |db| db.merge_import(&source, &target, &clause))
            .await
    }

    async fn merge_call(&self, caller: &FunctionKey, callee: &FunctionKey) -> Result<String> {
        let (caller, callee) = (caller.clone(), callee.clone());
        self.with_db(move |db| db.merge_call(&caller, &callee)).await
    }

    async fn import_target(&self, file: &str, clause: &str) -> Result<Option<String>> {
        let (file, clause) = (file.to_string(), clause.to_string());
        self.with_db(move |db| db.import_target(&file, &clause)).await
    }

    async fn prune_imports(&self, file: &str, keep: &[ImportRecord]) -> Result<u32> {
        let (file, keep) = (file.to_string(), keep.to_vec());
        self.with_db(move |db| db.prune_imports(&file, &keep)).await
    }

    async fn prune_calls(&self, file: &str, keep: &[(FunctionKey, FunctionKey)]) -> Result<u32> {
        let (file, keep) = (file.to_string(), keep.to_vec());
        self.with_db(move |db| db.prune_calls(&file, &keep)).await
    }

    async fn prune_functions(&self, file: &str, keep: &[String]) -> Result<u32> {
        let (file, keep) = (file.to_string(), keep.to_vec());
        self.with_db(move |db| db.prune_functions(&file, &keep)).await
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_db(move |db| db.remove_file(&path)).await
    }

    async fn run(&self, query: &str, params: &[serde_json::Value]) -> Result<Vec<Record>> {
        let (query, params) = (query.to_string(), params.to_vec());
        let max_rows = self.max_rows;
        self.with_db(move |db| db.run_read_only(&query, &params, max_rows))
            .await
    }

    async fn function(&self, id: &str) -> Result<Option<StoredFunction>> {
        let id = id.to_string();
        self.with_db(move |db| db.function_by_id(&id)).await
    }

    async fn function_by_key(&self, key: &FunctionKey) -> Result<Option<StoredFunction>> {
        let key = key.clone();
        self.with_db(move |db| db.function_by_key(&key)).await
    }

    async fn function_detail(&self, id: &str) -> Result<(Vec<Record>, Vec<Record>)> {
        let id = id.to_string();
        self.with_db(move |db| db.function_detail(&id)).await
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.with_db(|db| db.stats()).await
    }

    async fn has_files(&self) -> Result<bool> {
        self.with_db(|db| db.has_files()).await
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn is_enriched(&self, id: &str, body_hash: &str) -> Result<bool> {
        let (id, body_hash) = (id.to_string(), body_hash.to_string());
        self.with_db(move |db| Ok(db.record_hash(&id)?.as_deref() == Some(body_hash.as_str())))
            .await
    }

    async fn upsert_record(&self, record: FunctionRecord) -> Result<()> {
        self.with_db(move |db| db.upsert_record(&record)).await
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f64)>> {
        let embedding = embedding.to_vec();
        self.with_db(move |db| db.similarity_search(&embedding, top_k))
            .await
    }

    async fn get_record(&self, id: &str) -> Result<Option<FunctionRecord>> {
        let id = id.to_string();
        self.with_db(move |db| db.get_record(&id)).await
    }

    async fn records_by_ids(&self, ids: &[String]) -> Result<Vec<FunctionRecord>> {
        let ids = ids.to_vec();
        self.with_db(move |db| db.records_by_ids(&ids)).await
    }
}
