use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ProjectConfig;
use crate::enrich::{EnqueueOutcome, EnrichmentQueue};
use crate::error::PipelineError;
use crate::graph::calls::{CallResolver, ResolveReport};
use crate::graph::writer::{GraphWriter, WriteReport};
use crate::graph::{GraphStore, VectorStore};
use crate::languages::{is_source_file, parse_file, ParsedFile};

/// Summary of a registration pass.
#[derive(Debug, Default, Serialize)]
pub struct RegisterReport {
    pub files_registered: u32,
    pub files_failed: u32,
    pub functions: u32,
    pub imports: u32,
    pub calls_linked: u32,
    pub calls_dropped: u32,
    pub edges_pruned: u32,
    pub functions_pruned: u32,
    pub enqueued: u32,
    pub failures: Vec<PipelineError>,
}

impl RegisterReport {
    fn absorb_write(&mut self, write: &WriteReport) {
        self.files_registered += 1;
        self.functions += write.functions_merged;
        self.imports += write.imports_merged;
        self.edges_pruned += write.imports_pruned;
        self.functions_pruned += write.functions_pruned;
        self.failures.extend(write.failures.iter().cloned());
    }

    fn absorb_resolve(&mut self, resolve: &ResolveReport) {
        self.calls_linked += resolve.linked.len() as u32;
        self.calls_dropped += resolve.dropped;
        self.edges_pruned += resolve.pruned;
        self.failures.extend(resolve.failures.iter().cloned());
    }

    fn fail(&mut self, err: PipelineError) {
        warn!(error = %err, "file skipped");
        self.files_failed += 1;
        self.failures.push(err);
    }
}

/// Result of running a single file through the pipeline.
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub write: WriteReport,
    pub resolve: ResolveReport,
    pub enqueued: u32,
}

/// Parser/Extractor → Graph Writer → Call Resolver → Enrichment Queue.
#[derive(Clone)]
pub struct Pipeline {
    project: Arc<ProjectConfig>,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    writer: GraphWriter,
    resolver: CallResolver,
    queue: Option<Arc<EnrichmentQueue>>,
}

impl Pipeline {
    pub fn new(
        project: ProjectConfig,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            project: Arc::new(project),
            writer: GraphWriter::new(Arc::clone(&graph)),
            resolver: CallResolver::new(Arc::clone(&graph)),
            graph,
            vectors,
            queue: None,
        }
    }

    /// Feed newly written functions into `queue`.
    pub fn with_queue(mut self, queue: Arc<EnrichmentQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    /// Source files under `root`, skipping ignored directories.
    pub fn collect_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !is_ignored(e, &self.project.ignore))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "directory walk error");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_source_file(entry.path(), &self.project) {
                files.push(entry.into_path());
            }
        }
        files
    }

    /// Register every source file under `root`.
    ///
    /// All files are parsed and written concurrently; call resolution starts
    /// only once every file's own writes have settled.
    pub async fn register_directory(&self, root: &Path) -> Result<RegisterReport> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve root path {}", root.display()))?;
        let files = self.collect_files(&root);
        info!(root = %root.display(), files = files.len(), "registering directory");

        let mut report = RegisterReport::default();

        // Phase 1: parse + write.
        let mut writes = JoinSet::new();
        for path in files {
            let this = self.clone();
            writes.spawn(async move {
                let display = path.to_string_lossy().to_string();
                (display, this.parse_and_write(path).await)
            });
        }
        let mut written: Vec<(ParsedFile, WriteReport)> = Vec::new();
        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok((_, Ok((parsed, write)))) => {
                    report.absorb_write(&write);
                    written.push((parsed, write));
                }
                Ok((_, Err(e))) => report.fail(e),
                Err(e) => report.fail(PipelineError::parse("<task>", e)),
            }
        }

        // Phase 2: resolve calls.
        let mut resolves = JoinSet::new();
        for (parsed, _) in &written {
            let resolver = self.resolver.clone();
            let path = parsed.path.clone();
            let functions = parsed.functions.clone();
            resolves.spawn(async move { resolver.resolve_file(&path, &functions).await });
        }
        while let Some(joined) = resolves.join_next().await {
            match joined {
                Ok(resolve) => report.absorb_resolve(&resolve),
                Err(e) => report.failures.push(PipelineError::graph_write("<task>", e)),
            }
        }

        for (_, write) in &written {
            report.enqueued += self.enqueue_new(write).await;
        }

        info!(
            files = report.files_registered,
            failed = report.files_failed,
            functions = report.functions,
            calls = report.calls_linked,
            "registration complete"
        );
        Ok(report)
    }

    /// Run one file through every stage, as on first registration.
    pub async fn register_file(&self, path: &Path) -> Result<FileReport, PipelineError> {
        let (parsed, write) = self.parse_and_write(path.to_path_buf()).await?;
        let resolve = self
            .resolver
            .resolve_file(&parsed.path, &parsed.functions)
            .await;
        let enqueued = self.enqueue_new(&write).await;
        Ok(FileReport {
            write,
            resolve,
            enqueued,
        })
    }

    /// Reparse a changed file. Same stages as [`register_file`](Self::register_file).
    pub async fn reparse_file(&self, path: &Path) -> Result<FileReport, PipelineError> {
        self.register_file(path).await
    }

    /// Drop a deleted file's nodes, records and edges.
    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        let file = path.to_string_lossy();
        self.graph.remove_file(&file).await?;
        info!(file = %file, "file removed");
        Ok(())
    }

    async fn parse_and_write(
        &self,
        path: PathBuf,
    ) -> Result<(ParsedFile, WriteReport), PipelineError> {
        let display = path.to_string_lossy().to_string();
        let project = Arc::clone(&self.project);
        let parsed = tokio::task::spawn_blocking(move || parse_file(&path, &project))
            .await
            .map_err(|e| PipelineError::parse(&display, e))??;
        let write = self.writer.write_file(&parsed).await;
        Ok((parsed, write))
    }

    async fn enqueue_new(&self, write: &WriteReport) -> u32 {
        let Some(queue) = &self.queue else {
            return 0;
        };
        let mut enqueued = 0;
        for func in &write.functions {
            match self
                .vectors
                .is_enriched(&func.element_id, &func.body_hash)
                .await
            {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(function = %func.key, error = %e, "cannot check enrichment state");
                    continue;
                }
            }
            if queue.enqueue(func.key.clone(), &func.body_hash) == EnqueueOutcome::Queued {
                enqueued += 1;
            }
        }
        enqueued
    }
}

/// Directory names never descended into.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "bower_components",
    "target",
    "dist",
    "build",
    "out",
    "coverage",
    ".next",
    ".nuxt",
    ".turbo",
    ".cache",
    "vendor",
];

/// Returns `true` for ignored or hidden directory names.
pub fn is_ignored_dir_name(name: &str, extra: &[String]) -> bool {
    IGNORED_DIRS.contains(&name) || extra.iter().any(|e| e == name) || name.starts_with('.')
}

fn is_ignored(entry: &walkdir::DirEntry, extra: &[String]) -> bool {
    // The walk root itself may be a dot-directory (e.g. a temp dir).
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    is_ignored_dir_name(&entry.file_name().to_string_lossy(), extra)
}
