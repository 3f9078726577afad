//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cortex-rs: cognitive request-routing engine.
///
/// Indexes a source tree into summaries and chunks, then routes
/// natural-language queries through a per-request brain chain with
/// token, latency, and quality budgets.
#[derive(Parser, Debug)]
#[command(name = "cortex-rs")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Cache directory for the embedding cache.
    #[arg(long, env = "CORTEX_CACHE_PATH")]
    pub cache_path: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a source tree into the retrieval stores.
    ///
    /// Skips re-indexing when the corpus hash matches the cache.
    #[command(after_help = r"Examples:
  cortex-rs index ./src/main/java                  # Cold or cached index
  cortex-rs index ./src --namespace com.acme       # Custom project namespace
  cortex-rs --format json index ./src | jq .chunks_indexed
")]
    Index {
        /// Root of the source tree.
        path: PathBuf,

        /// Project root namespace for dependency extraction.
        #[arg(long, env = "CORTEX_PROJECT_NAMESPACE")]
        namespace: Option<String>,
    },

    /// Print the search plan the query planner emits for a query.
    #[command(after_help = r#"Examples:
  cortex-rs plan "explain CacheManager"            # Entity-centered plan
  cortex-rs plan "why does startup fail"           # Error-trace plan
"#)]
    Plan {
        /// The query to classify.
        query: String,
    },

    /// Route one request through the brain chain.
    #[command(after_help = r#"Examples:
  cortex-rs ask "explain CacheManager" --source ./src
  cortex-rs ask "weather in Paris today?" --provider openai
  cortex-rs ask "how does eviction work" --conversation work-session
"#)]
    Ask {
        /// The message to route.
        message: String,

        /// Provider name (openai, claude, gemini, ollama, default).
        #[arg(short, long, env = "CORTEX_PROVIDER", default_value = "default")]
        provider: String,

        /// Source tree to index before asking.
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Conversation id, stable across turns.
        #[arg(short, long)]
        conversation: Option<String>,

        /// User id for memory and quota accounting.
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Watch a source tree and re-index on changes until interrupted.
    #[command(after_help = r"Examples:
  cortex-rs watch ./src/main/java
  cortex-rs watch ./src --namespace com.acme
")]
    Watch {
        /// Root of the source tree.
        path: PathBuf,

        /// Project root namespace for dependency extraction.
        #[arg(long, env = "CORTEX_PROJECT_NAMESPACE")]
        namespace: Option<String>,
    },

    /// Show index, memory, and profiler statistics.
    Status {
        /// Source tree to index before reporting.
        #[arg(short, long)]
        source: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from([
            "cortex-rs",
            "ask",
            "explain CacheManager",
            "--provider",
            "openai",
        ])
        .unwrap_or_else(|e| unreachable!("parse: {e}"));
        match cli.command {
            Commands::Ask {
                message, provider, ..
            } => {
                assert_eq!(message, "explain CacheManager");
                assert_eq!(provider, "openai");
            }
            other => unreachable!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_index_with_namespace() {
        let cli = Cli::try_parse_from([
            "cortex-rs",
            "index",
            "./src",
            "--namespace",
            "com.acme",
        ])
        .unwrap_or_else(|e| unreachable!("parse: {e}"));
        match cli.command {
            Commands::Index { path, namespace } => {
                assert_eq!(path, PathBuf::from("./src"));
                assert_eq!(namespace.as_deref(), Some("com.acme"));
            }
            other => unreachable!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_format_defaults_to_text() {
        let cli = Cli::try_parse_from(["cortex-rs", "status"])
            .unwrap_or_else(|e| unreachable!("parse: {e}"));
        assert_eq!(cli.format, "text");
    }
}
