use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use callmap::app::App;
use callmap::enrich::DrainReport;
use callmap::pipeline::RegisterReport;
use callmap::planner::PlanOutcome;
use callmap::rag::search::SearchHit;
use callmap::rag::setup;
use callmap::types::Subgraph;
use callmap::watch::{ctrlc_shutdown, run_watch};

fn open_app() -> Result<App> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    App::open(&cwd).context("Failed to open callmap database")
}

/// Print `data` as pretty JSON if `json` is true, otherwise call `human_fmt`.
fn output<T: Serialize>(data: &T, json: bool, human_fmt: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        human_fmt(data);
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No summarized functions match");
        return;
    }
    for hit in hits {
        println!(
            "{id}  {name}  {path}  ({distance:.3})",
            id = hit.id,
            name = hit.name,
            path = hit.path,
            distance = hit.distance,
        );
        println!("    {}", hit.summary);
    }
}

fn print_subgraph(title: &str, subgraph: &Subgraph) {
    if subgraph.nodes.is_empty() {
        return;
    }
    println!("{title}:");
    for node in &subgraph.nodes {
        println!(
            "  {id}  {name}  {path}",
            id = node.element_id,
            name = node.prop("name").unwrap_or("-"),
            path = node.prop("path").unwrap_or("-"),
        );
    }
}

#[derive(Serialize)]
struct IndexOutput<'a> {
    register: &'a RegisterReport,
    enrichment: Option<DrainReport>,
}

/// Register a directory, optionally draining the enrichment queue afterwards.
pub async fn cmd_index(path: &str, enrich: bool, json: bool) -> Result<()> {
    let app = open_app()?;
    let report = app.pipeline().register_directory(Path::new(path)).await?;

    let drained = if enrich && app.config().enrichment.enabled {
        Some(app.scheduler().drain().await)
    } else {
        None
    };

    let data = IndexOutput {
        register: &report,
        enrichment: drained,
    };
    output(&data, json, |_| {
        println!(
            "Registered {} files ({} failed)",
            report.files_registered, report.files_failed
        );
        println!(
            "  {} functions, {} imports, {} calls ({} unresolved, {} stale edges pruned)",
            report.functions,
            report.imports,
            report.calls_linked,
            report.calls_dropped,
            report.edges_pruned
        );
        if report.functions_pruned > 0 {
            println!("  {} removed functions retired", report.functions_pruned);
        }
        match drained {
            Some(d) => println!("  {} functions summarized ({} failed)", d.processed, d.failed),
            None => println!("  {} functions queued for summarization", report.enqueued),
        }
    })
}

/// Register a directory, then follow changes until Ctrl+C.
pub async fn cmd_watch(path: &str) -> Result<()> {
    let app = open_app()?;
    let shutdown = ctrlc_shutdown()?;

    let scheduler = app
        .config()
        .enrichment
        .enabled
        .then(|| tokio::spawn(app.scheduler().run(shutdown.clone())));

    run_watch(
        Path::new(path),
        app.pipeline().clone(),
        app.config().watch.debounce(),
        shutdown,
    )
    .await?;

    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    Ok(())
}

/// Semantic search over function summaries.
pub async fn cmd_search(query: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let app = open_app()?;
    let result = app.search(query, top_k).await?;
    output(&result, json, |r| print_hits(&r.hits))
}

/// Show one function with its summary, callers and callees.
pub async fn cmd_function(id: &str, json: bool) -> Result<()> {
    let app = open_app()?;
    let detail = app
        .function(id)
        .await?
        .with_context(|| format!("no function with id '{id}'"))?;

    output(&detail, json, |d| {
        println!("{}  {}", d.function.name, d.function.path);
        if let Some(record) = &d.record {
            println!("  {}", record.summary);
        }
        if let Some(body) = &d.function.body {
            println!();
            println!("{body}");
            println!();
        }
        print_subgraph("Callers", &d.callers);
        print_subgraph("Callees", &d.callees);
    })
}

fn print_outcome(outcome: &PlanOutcome) {
    match outcome {
        PlanOutcome::Vector {
            classification,
            result,
        } => {
            println!("route: vector ({})", classification.rationale);
            print_hits(&result.hits);
        }
        PlanOutcome::Graph {
            classification,
            plan,
        } => {
            println!("route: graph ({})", classification.rationale);
            println!(
                "query ({} attempt{}):",
                plan.attempts.len(),
                if plan.attempts.len() == 1 { "" } else { "s" }
            );
            println!("  {}", plan.query);
            println!("{} rows", plan.records.len());
            for record in &plan.records {
                let cells: Vec<String> = record
                    .fields
                    .iter()
                    .map(|(k, v)| {
                        format!("{k}={}", serde_json::to_string(v).unwrap_or_default())
                    })
                    .collect();
                println!("  {}", cells.join("  "));
            }
        }
    }
}

/// Route a question and print the executed plan.
pub async fn cmd_plan(query: &str, json: bool) -> Result<()> {
    let app = open_app()?;
    let outcome = app.planner().plan(query).await?;
    output(&outcome, json, print_outcome)
}

/// Answer a question grounded on the planned result.
pub async fn cmd_ask(query: &str, json: bool) -> Result<()> {
    let app = open_app()?;
    let answer = app.planner().ask(query).await?;
    output(&answer, json, |a| println!("{}", a.answer))
}

/// Graph statistics summary.
pub async fn cmd_stats(json: bool) -> Result<()> {
    let app = open_app()?;
    let stats = app.stats().await?;

    output(&stats, json, |stats| {
        println!("Files:      {}", stats.num_files);
        println!("Functions:  {}", stats.num_functions);
        println!("Imports:    {}", stats.num_imports);
        println!("Calls:      {}", stats.num_calls);
        println!("Summarized: {}", stats.num_records);
    })
}

/// Download the ONNX models used for embedding and reranking.
pub fn cmd_setup(json: bool) -> Result<()> {
    let result = setup::download_models()?;
    output(&result, json, |r| {
        println!("Models cached in {}", r.model_dir);
        if !r.reranker {
            println!("Cross-encoder unavailable, search results will not be reranked");
        }
    })
}
