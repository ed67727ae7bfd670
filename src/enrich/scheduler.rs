use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::queue::{EnrichmentQueue, QueuedFunction};
use crate::error::EnrichmentError;
use crate::graph::{GraphStore, VectorStore};
use crate::languages::content_hash;
use crate::llm::ReasoningService;
use crate::rag::Embedder;
use crate::types::FunctionRecord;

/// Summarize, embed and store one function.
#[derive(Clone)]
pub struct Enricher {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    llm: Arc<dyn ReasoningService>,
    embedder: Arc<dyn Embedder>,
}

impl Enricher {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        llm: Arc<dyn ReasoningService>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            graph,
            vectors,
            llm,
            embedder,
        }
    }

    /// Enrich the function as it is currently stored. The returned record's
    /// `body_hash` is the hash of the body that was summarized.
    pub async fn process(&self, item: &QueuedFunction) -> Result<FunctionRecord, EnrichmentError> {
        let key = item.key.to_string();
        let store_err = |source: anyhow::Error| EnrichmentError::Store {
            key: key.clone(),
            source,
        };

        let stored = self
            .graph
            .function_by_key(&item.key)
            .await
            .map_err(store_err)?
            .ok_or_else(|| store_err(anyhow::anyhow!("function no longer in graph")))?;
        let body = stored
            .body
            .ok_or_else(|| store_err(anyhow::anyhow!("function has no declaration text")))?;

        let summary = self
            .llm
            .summarize(&body)
            .await
            .map_err(|source| EnrichmentError::Summarize {
                key: key.clone(),
                source,
            })?;
        let embedding = self
            .embedder
            .embed(&summary)
            .await
            .map_err(|source| EnrichmentError::Embed {
                key: key.clone(),
                source,
            })?;

        let record = FunctionRecord {
            id: stored.element_id,
            name: stored.name,
            path: stored.path,
            body_hash: content_hash(&body),
            raw_text: Some(body),
            summary,
            embedding,
        };
        self.vectors
            .upsert_record(record.clone())
            .await
            .map_err(store_err)?;
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: u32,
    pub failed: u32,
}

/// Processes at most one queued function per tick, strictly in sequence.
pub struct EnrichmentScheduler {
    queue: Arc<EnrichmentQueue>,
    enricher: Enricher,
    tick: Duration,
}

impl EnrichmentScheduler {
    pub fn new(queue: Arc<EnrichmentQueue>, enricher: Enricher, tick: Duration) -> Self {
        Self {
            queue,
            enricher,
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    /// Process the oldest waiting item, if any. Returns `None` when the queue was empty.
    pub async fn tick_once(&self) -> Option<bool> {
        let item = self.queue.pop()?;
        match self.enricher.process(&item).await {
            Ok(record) => {
                tracing::debug!(function = %item.key, "function enriched");
                self.queue.complete(&item.key, record.body_hash);
                Some(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "enrichment failed");
                self.queue.fail(&item.key);
                Some(false)
            }
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(tick_ms = self.tick.as_millis() as u64, "enrichment scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("enrichment scheduler stopped");
    }

    /// Tick until the queue is empty.
    pub async fn drain(&self) -> DrainReport {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = DrainReport::default();

        loop {
            interval.tick().await;
            match self.tick_once().await {
                Some(true) => report.processed += 1,
                Some(false) => report.failed += 1,
                None => break,
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SqliteStore;
    use crate::rag::EMBEDDING_DIM;
    use crate::types::{Classification, FunctionKey};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeLlm {
        calls: AtomicU32,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl ReasoningService for FakeLlm {
        async fn classify(&self, _query: &str) -> Result<Classification> {
            unreachable!()
        }
        async fn generate_graph_query(&self, _q: &str, _e: Option<&str>) -> Result<String> {
            unreachable!()
        }
        async fn summarize(&self, code: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_on {
                anyhow::ensure!(!code.contains(marker), "model overloaded");
            }
            Ok(format!("summary of {} bytes", code.len()))
        }
        async fn answer(&self, _q: &str, _c: &str) -> Result<String> {
            unreachable!()
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1; EMBEDDING_DIM])
        }
    }

    async fn setup(
        fail_on: Option<&'static str>,
    ) -> (Arc<SqliteStore>, Arc<EnrichmentQueue>, Arc<FakeLlm>, EnrichmentScheduler) {
        let store = Arc::new(SqliteStore::memory().unwrap());
        for name in ["alpha", "beta"] {
            store
                .merge_function(name, "/p/a.ts", Some(&format!("function {name}() {{}}")))
                .await
                .unwrap();
        }
        let llm = Arc::new(FakeLlm {
            calls: AtomicU32::new(0),
            fail_on,
        });
        let queue = Arc::new(EnrichmentQueue::new(16));
        let enricher = Enricher::new(store.clone(), store.clone(), llm.clone(), Arc::new(FakeEmbedder));
        let scheduler = EnrichmentScheduler::new(queue.clone(), enricher, Duration::from_millis(100));
        (store, queue, llm, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_processes_everything() {
        let (store, queue, _llm, scheduler) = setup(None).await;
        queue.enqueue(FunctionKey::new("alpha", "/p/a.ts"), "h");
        queue.enqueue(FunctionKey::new("beta", "/p/a.ts"), "h");

        let report = scheduler.drain().await;
        assert_eq!(report, DrainReport { processed: 2, failed: 0 });
        assert_eq!(GraphStore::stats(store.as_ref()).await.unwrap().num_records, 2);

        let stored = store
            .function_by_key(&FunctionKey::new("alpha", "/p/a.ts"))
            .await
            .unwrap()
            .unwrap();
        let record = store.get_record(&stored.element_id).await.unwrap().unwrap();
        assert_eq!(record.body_hash, content_hash("function alpha() {}"));
        assert!(store.is_enriched(&stored.element_id, &record.body_hash).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_item_is_released_not_retried() {
        let (_store, queue, llm, scheduler) = setup(Some("beta")).await;
        queue.enqueue(FunctionKey::new("beta", "/p/a.ts"), "h");

        let report = scheduler.drain().await;
        assert_eq!(report, DrainReport { processed: 0, failed: 1 });
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.processed_count(), 0);
        assert_eq!(
            queue.enqueue(FunctionKey::new("beta", "/p/a.ts"), "h"),
            crate::enrich::EnqueueOutcome::Queued
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_item_per_tick() {
        let (_store, queue, llm, scheduler) = setup(None).await;
        queue.enqueue(FunctionKey::new("alpha", "/p/a.ts"), "h");
        queue.enqueue(FunctionKey::new("beta", "/p/a.ts"), "h");

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_missing_function_is_a_store_error() {
        let (_store, _queue, _llm, scheduler) = setup(None).await;
        let item = QueuedFunction {
            key: FunctionKey::new("gone", "/p/a.ts"),
            body_hash: "h".into(),
        };
        let err = scheduler.enricher.process(&item).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Store { .. }));
    }
}
