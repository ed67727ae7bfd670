use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rmcp::schemars;
use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::app::App;
use crate::resolver::normalize_path;

const MAX_TOP_K: usize = 100;

// ── Parameter types ──

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IndexParams {
    /// Directory to register relative to project root (defaults to ".")
    #[serde(default = "default_dot")]
    pub path: String,
}

fn default_dot() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Natural-language description of what the function does
    pub query: String,
    /// Maximum results to return (default from callmap.toml, max 100)
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FunctionParams {
    /// Element id of the Function node, e.g. "function:42"
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryParams {
    /// Natural-language question about the codebase
    pub query: String,
}

// ── Path validation ──

/// Validate that a path is within the given canonical project root.
/// Returns the resolved path on success, or an error string if the path escapes it.
fn validate_path_within_cwd_canonical(input: &str, cwd_canonical: &Path) -> Result<PathBuf, String> {
    let candidate = if Path::new(input).is_absolute() {
        PathBuf::from(input)
    } else {
        cwd_canonical.join(input)
    };

    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{input}': {e}"))?
    } else {
        normalize_path(&candidate)
    };

    if !resolved.starts_with(cwd_canonical) {
        return Err(format!("path '{input}' is outside the project directory"));
    }

    Ok(resolved)
}

#[cfg(test)]
fn validate_path_within_cwd(input: &str) -> Result<PathBuf, String> {
    let cwd = std::env::current_dir().map_err(|e| format!("cannot determine CWD: {e}"))?;
    let cwd_canonical = cwd
        .canonicalize()
        .map_err(|e| format!("cannot canonicalize CWD: {e}"))?;
    validate_path_within_cwd_canonical(input, &cwd_canonical)
}

fn mcp_err(msg: impl std::fmt::Display) -> McpError {
    McpError::internal_error(msg.to_string(), None)
}

fn to_json<T: Serialize>(data: &T) -> Result<String, McpError> {
    serde_json::to_string_pretty(data).map_err(|e| mcp_err(format!("serialization failed: {e}")))
}

/// Build a JSON text response, appending a hint if nothing is registered yet.
async fn json_response(app: &App, json: String) -> Result<CallToolResult, McpError> {
    // Single lightweight check instead of full stats().
    let is_empty = !app
        .has_files()
        .await
        .map_err(|e| mcp_err(format!("stats check failed: {e}")))?;
    if is_empty {
        let hint = "\n\n(Graph is empty. Run callmap_index first to register the codebase.)";
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{json}{hint}"
        ))]))
    } else {
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

// ── MCP Server ──

#[derive(Clone)]
pub struct CallmapServer {
    tool_router: ToolRouter<Self>,
    app: Arc<App>,
    /// Canonical project root, used to confine `callmap_index` paths.
    cwd: Arc<Path>,
}

#[tool_router]
impl CallmapServer {
    pub fn new(app: Arc<App>) -> Self {
        let cwd = Arc::from(app.root());
        Self {
            tool_router: Self::tool_router(),
            app,
            cwd,
        }
    }

    #[tool(
        description = "Register a directory in the call graph. Parses JS/TS files with tree-sitter, merges File/Function nodes and IMPORTS_FROM edges, links CALLS edges through imports and queues new functions for summarization."
    )]
    async fn callmap_index(
        &self,
        Parameters(params): Parameters<IndexParams>,
    ) -> Result<CallToolResult, McpError> {
        let validated = validate_path_within_cwd_canonical(&params.path, &self.cwd).map_err(mcp_err)?;
        debug!(path = %validated.display(), "registering directory");
        let report = self
            .app
            .pipeline()
            .register_directory(&validated)
            .await
            .map_err(|e| mcp_err(format!("registration failed: {e}")))?;
        Ok(CallToolResult::success(vec![Content::text(to_json(&report)?)]))
    }

    #[tool(
        description = "Find functions by what they do. Embeds the query and searches the LLM-written function summaries, optionally reranked by a cross-encoder."
    )]
    async fn callmap_search(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let top_k = params.top_k.map(|k| k.clamp(1, MAX_TOP_K));
        debug!(query = %params.query, ?top_k, "search");
        let result = self
            .app
            .search(&params.query, top_k)
            .await
            .map_err(|e| mcp_err(format!("search failed: {e}")))?;
        json_response(&self.app, to_json(&result)?).await
    }

    #[tool(
        description = "Get one function by element id: its body, summary, callers and callees."
    )]
    async fn callmap_function(
        &self,
        Parameters(params): Parameters<FunctionParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(id = %params.id, "function");
        let detail = self
            .app
            .function(&params.id)
            .await
            .map_err(|e| mcp_err(format!("function lookup failed: {e}")))?
            .ok_or_else(|| mcp_err(format!("no function with id '{}'", params.id)))?;
        Ok(CallToolResult::success(vec![Content::text(to_json(&detail)?)]))
    }

    #[tool(
        description = "Route a question to semantic search or a generated SQL graph query. Failing queries are regenerated with the database error as feedback, up to the configured attempt limit. Returns the route, attempts, rows and extracted subgraph."
    )]
    async fn callmap_plan(
        &self,
        Parameters(params): Parameters<QueryParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(query = %params.query, "plan");
        let outcome = self
            .app
            .planner()
            .plan(&params.query)
            .await
            .map_err(mcp_err)?;
        json_response(&self.app, to_json(&outcome)?).await
    }

    #[tool(
        description = "Answer a question about the codebase in natural language, grounded on the result of callmap_plan."
    )]
    async fn callmap_ask(
        &self,
        Parameters(params): Parameters<QueryParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(query = %params.query, "ask");
        let answer = self
            .app
            .planner()
            .ask(&params.query)
            .await
            .map_err(mcp_err)?;
        json_response(&self.app, to_json(&answer)?).await
    }

    #[tool(
        description = "Show graph statistics: files, functions, IMPORTS_FROM and CALLS edges, enriched function records and the enrichment backlog."
    )]
    async fn callmap_stats(&self) -> Result<CallToolResult, McpError> {
        debug!("stats");
        let stats = self
            .app
            .stats()
            .await
            .map_err(|e| mcp_err(format!("stats query failed: {e}")))?;
        let json = to_json(&serde_json::json!({
            "graph": stats,
            "enrichment_pending": self.app.queue().len(),
        }))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

#[tool_handler]
impl ServerHandler for CallmapServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "callmap".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some(
                "callmap keeps a call graph of a JS/TS codebase (File and Function nodes, \
                 IMPORTS_FROM and CALLS edges) in SQLite, with LLM summaries of every function \
                 for semantic search.\n\n\
                 Workflow:\n\
                 1. Run callmap_index first to register the codebase.\n\
                 2. Use callmap_search to find functions by behavior.\n\
                 3. Use callmap_function with an id from a result to see body, callers and callees.\n\
                 4. Use callmap_plan for structural questions (who calls X, which files import Y).\n\
                 5. Use callmap_ask for a prose answer.\n\n\
                 Summaries are produced in the background, so semantic search fills in over time."
                    .into(),
            ),
        }
    }
}

/// Start the MCP server over stdio, with the enrichment scheduler running
/// in the background when enabled.
pub async fn run_server() -> anyhow::Result<()> {
    info!("starting callmap MCP server v{}", env!("CARGO_PKG_VERSION"));

    let cwd = std::env::current_dir()
        .map_err(|e| anyhow::anyhow!("cannot determine CWD: {e}"))?;
    let app = Arc::new(App::open(&cwd)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = app
        .config()
        .enrichment
        .enabled
        .then(|| tokio::spawn(app.scheduler().run(shutdown_rx)));

    let server = CallmapServer::new(Arc::clone(&app));
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }

    info!("callmap MCP server stopped");
    Ok(())
}
