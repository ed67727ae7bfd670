//! Wires configuration, storage and services into one handle shared by the
//! CLI and the MCP server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db::GraphStats;
use crate::enrich::{EnrichmentQueue, EnrichmentScheduler, Enricher};
use crate::graph::subgraph::{function_detail, FunctionDetail};
use crate::graph::{GraphStore, SqliteStore};
use crate::llm::OllamaClient;
use crate::pipeline::Pipeline;
use crate::planner::QueryPlanner;
use crate::rag::embeddings::LocalEmbedder;
use crate::rag::reranker::LocalReranker;
use crate::rag::search::{semantic_search, SearchResult};
use crate::rag::Reranker;

pub struct App {
    root: PathBuf,
    config: Config,
    store: Arc<SqliteStore>,
    queue: Arc<EnrichmentQueue>,
    pipeline: Pipeline,
    llm: Arc<OllamaClient>,
    embedder: Arc<LocalEmbedder>,
    reranker: Option<Arc<LocalReranker>>,
}

impl App {
    /// Load `callmap.toml` from `root` and open the project database.
    pub fn open(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("cannot resolve project root {}", root.display()))?;
        let config = Config::load(&root);
        let store = Arc::new(SqliteStore::open(
            &config.db_path(&root),
            config.planner.max_rows,
        )?);
        Self::with_store(root, config, store)
    }

    pub fn with_store(root: PathBuf, config: Config, store: Arc<SqliteStore>) -> Result<Self> {
        let queue = Arc::new(EnrichmentQueue::new(config.enrichment.queue_capacity));
        let mut pipeline = Pipeline::new(config.project.clone(), store.clone(), store.clone());
        if config.enrichment.enabled {
            pipeline = pipeline.with_queue(Arc::clone(&queue));
        }
        let reranker = config.rag.rerank.then(|| Arc::new(LocalReranker::new()));
        Ok(Self {
            llm: Arc::new(OllamaClient::new(&config.llm)?),
            embedder: Arc::new(LocalEmbedder::new()),
            root,
            config,
            store,
            queue,
            pipeline,
            reranker,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn queue(&self) -> &Arc<EnrichmentQueue> {
        &self.queue
    }

    pub fn planner(&self) -> QueryPlanner {
        let planner = QueryPlanner::new(
            self.store.clone(),
            self.store.clone(),
            self.llm.clone(),
            self.embedder.clone(),
        )
        .with_max_attempts(self.config.planner.max_attempts)
        .with_top_k(self.config.rag.top_k);
        match &self.reranker {
            Some(r) => planner.with_reranker(r.clone()),
            None => planner,
        }
    }

    pub fn scheduler(&self) -> EnrichmentScheduler {
        let enricher = Enricher::new(
            self.store.clone(),
            self.store.clone(),
            self.llm.clone(),
            self.embedder.clone(),
        );
        EnrichmentScheduler::new(
            Arc::clone(&self.queue),
            enricher,
            self.config.enrichment.tick(),
        )
    }

    /// Vector search without classification.
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<SearchResult> {
        let reranker = self.reranker.as_deref().map(|r| r as &dyn Reranker);
        semantic_search(
            self.store.as_ref(),
            self.embedder.as_ref(),
            reranker,
            query,
            top_k.unwrap_or(self.config.rag.top_k),
        )
        .await
    }

    pub async fn function(&self, id: &str) -> Result<Option<FunctionDetail>> {
        function_detail(self.store.as_ref(), self.store.as_ref(), id).await
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        self.store.stats().await
    }

    pub async fn has_files(&self) -> Result<bool> {
        self.store.has_files().await
    }
}
