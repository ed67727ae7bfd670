use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "callmap")]
#[command(about = "Call graph and semantic index for JS/TS codebases.")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a directory in the call graph
    Index {
        /// Directory to register (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Summarize and embed queued functions before exiting
        #[arg(long)]
        enrich: bool,
    },

    /// Register a directory, then keep the graph current as files change
    Watch {
        /// Directory to watch (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Find functions by what they do
    Search {
        /// Natural-language description
        query: String,

        /// Maximum results to return (defaults to rag.top_k)
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show a function with its summary, callers and callees
    Function {
        /// Element id, e.g. function:42
        id: String,
    },

    /// Route a question to semantic search or a generated graph query
    Plan {
        /// Natural-language question
        query: String,
    },

    /// Answer a question about the codebase
    Ask {
        /// Natural-language question
        query: String,
    },

    /// Graph statistics summary
    Stats,

    /// Download the embedding and reranker models
    Setup,

    /// Start MCP server over stdio
    Serve,
}

impl Command {
    /// Long-running commands log lifecycle events at info level by default.
    pub fn is_long_running(&self) -> bool {
        matches!(self, Command::Serve | Command::Watch { .. })
    }
}
