use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::languages::is_source_file;
use crate::pipeline::{is_ignored_dir_name, Pipeline};

/// Per-path debounce timers.
///
/// Every `touch` cancels the path's running timer and starts a new one. When a
/// timer elapses it sends `(path, generation)`; [`settle`](Self::settle)
/// accepts it only if no newer touch happened in between.
pub struct Debouncer {
    delay: Duration,
    fired: mpsc::UnboundedSender<(PathBuf, u64)>,
    pending: HashMap<PathBuf, (u64, JoinHandle<()>)>,
    next_generation: u64,
}

impl Debouncer {
    pub fn new(delay: Duration, fired: mpsc::UnboundedSender<(PathBuf, u64)>) -> Self {
        Self {
            delay,
            fired,
            pending: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn touch(&mut self, path: PathBuf) {
        if let Some((_, timer)) = self.pending.remove(&path) {
            timer.abort();
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = self.delay;
        let fired = self.fired.clone();
        let key = path.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired.send((key, generation));
        });
        self.pending.insert(path, (generation, timer));
    }

    /// `true` if `generation` is the latest touch for `path`; clears the entry.
    pub fn settle(&mut self, path: &Path, generation: u64) -> bool {
        match self.pending.get(path) {
            Some((current, _)) if *current == generation => {
                self.pending.remove(path);
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        for (_, (_, timer)) in self.pending.drain() {
            timer.abort();
        }
    }
}

/// Check if a path should trigger a reparse.
///
/// Returns `false` for:
/// - Files with an extension outside the configured source set
/// - Files outside the watched root (e.g., symlink escapes)
/// - Files under an ignored or hidden directory (`.git`, `node_modules`, etc.)
pub fn is_relevant_path(path: &Path, root: &Path, project: &ProjectConfig) -> bool {
    if !is_source_file(path, project) {
        return false;
    }

    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return false,
    };

    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            if let std::path::Component::Normal(name) = component {
                if is_ignored_dir_name(&name.to_string_lossy(), &project.ignore) {
                    return false;
                }
            }
        }
    }

    true
}

/// A `watch` channel that flips to `true` on Ctrl+C.
pub fn ctrlc_shutdown() -> Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = tx.send(true);
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(rx)
}

/// Applies one settled change to the graph.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    async fn apply(&self, path: &Path);
}

#[async_trait]
impl ChangeHandler for Pipeline {
    async fn apply(&self, path: &Path) {
        if path.exists() {
            match self.reparse_file(path).await {
                Ok(r) => debug!(
                    file = %path.display(),
                    functions = r.write.functions_merged,
                    retired = r.write.functions_pruned,
                    calls = r.resolve.linked.len(),
                    enqueued = r.enqueued,
                    "reparsed"
                ),
                Err(e) => warn!(error = %e, "reparse failed"),
            }
        } else if let Err(e) = self.remove_file(path).await {
            warn!(file = %path.display(), error = %e, "remove failed");
        }
    }
}

/// Paths whose change is being applied, each with a flag set when another
/// change settled in the meantime.
///
/// At most one apply runs per path. A change that settles during a run is
/// folded into a single follow-up run, which reads the file as it is then.
#[derive(Debug, Default)]
pub struct InFlight {
    running: HashMap<PathBuf, bool>,
}

impl InFlight {
    /// `true` if the caller should start applying `path` now.
    pub fn begin(&mut self, path: &Path) -> bool {
        match self.running.get_mut(path) {
            Some(dirty) => {
                *dirty = true;
                false
            }
            None => {
                self.running.insert(path.to_path_buf(), false);
                true
            }
        }
    }

    /// `true` if `path` changed during the finished run and must be applied again.
    pub fn finish(&mut self, path: &Path) -> bool {
        match self.running.get_mut(path) {
            Some(dirty) if *dirty => {
                *dirty = false;
                true
            }
            _ => {
                self.running.remove(path);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

/// Register `root`, then reparse files as they change until `shutdown` fires.
pub async fn run_watch(
    root: &Path,
    pipeline: Pipeline,
    debounce: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let root = root.canonicalize().context("cannot resolve watch root")?;
    if !root.is_dir() {
        anyhow::bail!("watch target is not a directory: {}", root.display());
    }

    info!(
        path = %root.display(),
        debounce_ms = debounce.as_millis() as u64,
        "starting watch"
    );

    match pipeline.register_directory(&root).await {
        Ok(r) => info!(
            files = r.files_registered,
            failed = r.files_failed,
            functions = r.functions,
            calls = r.calls_linked,
            "initial registration complete"
        ),
        Err(e) => warn!(error = %e, "initial registration failed"),
    }

    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = raw_tx.send(res);
    })
    .context("failed to create file watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .context("failed to start watching directory")?;

    info!("watching for changes (Ctrl+C to stop)");

    let project = pipeline.project().clone();
    process_events(&root, &project, pipeline, raw_rx, debounce, shutdown).await;

    drop(watcher);
    Ok(())
}

/// Debounce raw watcher events under `root` and hand settled paths to
/// `handler`, one run per path at a time, until `shutdown` fires or the event
/// source closes. Runs still in progress are awaited before returning.
pub async fn process_events<H>(
    root: &Path,
    project: &ProjectConfig,
    handler: H,
    mut events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    H: ChangeHandler + Clone,
{
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let mut debouncer = Debouncer::new(debounce, fired_tx);
    let mut in_flight = InFlight::default();
    let mut runs: JoinSet<PathBuf> = JoinSet::new();

    loop {
        tokio::select! {
            raw = events.recv() => {
                let Some(raw) = raw else {
                    warn!("file watcher channel disconnected");
                    break;
                };
                match raw {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Access(_)) {
                            continue;
                        }
                        for path in event.paths {
                            if is_relevant_path(&path, root, project) {
                                debouncer.touch(path);
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "file watcher error"),
                }
            }
            Some((path, generation)) = fired_rx.recv() => {
                if debouncer.settle(&path, generation) && in_flight.begin(&path) {
                    spawn_apply(&mut runs, handler.clone(), path);
                }
            }
            Some(done) = runs.join_next(), if !runs.is_empty() => {
                match done {
                    Ok(path) => {
                        if in_flight.finish(&path) {
                            debug!(file = %path.display(), "changed during reparse, running again");
                            spawn_apply(&mut runs, handler.clone(), path);
                        }
                    }
                    Err(e) => warn!(error = %e, "reparse task aborted"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(
        pending = debouncer.pending(),
        running = in_flight.len(),
        "watch stopped"
    );
    while runs.join_next().await.is_some() {}
}

/// The task always yields `path`, even if the apply panics, so the path
/// leaves [`InFlight`].
fn spawn_apply<H: ChangeHandler>(runs: &mut JoinSet<PathBuf>, handler: H, path: PathBuf) {
    runs.spawn(async move {
        let target = path.clone();
        if let Err(e) = tokio::spawn(async move { handler.apply(&target).await }).await {
            warn!(file = %path.display(), error = %e, "reparse task failed");
        }
        path
    });
}
