mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use callmap::mcp;
use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.command.is_long_running() {
        "info"
    } else {
        "warn"
    };

    // Stdout stays clean for CLI output and the MCP protocol.
    // RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if let Command::Setup = cli.command {
        return commands::cmd_setup(cli.json);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Command::Index { path, enrich } => commands::cmd_index(&path, enrich, cli.json).await,
            Command::Watch { path } => commands::cmd_watch(&path).await,
            Command::Search { query, top_k } => commands::cmd_search(&query, top_k, cli.json).await,
            Command::Function { id } => commands::cmd_function(&id, cli.json).await,
            Command::Plan { query } => commands::cmd_plan(&query, cli.json).await,
            Command::Ask { query } => commands::cmd_ask(&query, cli.json).await,
            Command::Stats => commands::cmd_stats(cli.json).await,
            Command::Serve => mcp::run_server().await,
            Command::Setup => commands::cmd_setup(cli.json),
        }
    })
}
