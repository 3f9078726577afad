//! CLI command implementations.
//!
//! Each command builds an [`Engine`] from the resolved configuration,
//! runs, and renders its result into a single string written once to
//! locked stdout by `main`.

use std::fmt::Write as FmtWrite;
use std::path::Path;

use anyhow::Context;

use crate::chain::ChainRequest;
use crate::cli::parser::{Cli, Commands};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::index::IndexReport;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// JSON for scripting.
    Json,
}

impl OutputFormat {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Executes the parsed CLI, returning the rendered output.
///
/// # Errors
///
/// Returns an error for unusable configuration, unreadable trees, or a
/// fatal request error (empty provider).
pub async fn execute(cli: Cli) -> anyhow::Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let mut builder = EngineConfig::builder().from_env();
    if let Some(ref cache) = cli.cache_path {
        builder = builder.cache_path(cache);
    }

    match cli.command {
        Commands::Index { path, namespace } => {
            if let Some(ns) = namespace {
                builder = builder.project_namespace(ns);
            }
            let engine = Engine::new(builder.build()).context("engine construction failed")?;
            let report = engine
                .index_tree(&path)
                .await
                .with_context(|| format!("indexing {} failed", path.display()))?;
            render_index_report(&report, format)
        }
        Commands::Plan { query } => {
            let engine = Engine::new(builder.build()).context("engine construction failed")?;
            let plan = engine.plan(&query);
            match format {
                OutputFormat::Json => {
                    serde_json::to_string_pretty(&plan).context("plan serialization failed")
                }
                OutputFormat::Text => {
                    let mut out = String::new();
                    let _ = writeln!(out, "Strategy:     {}", plan.strategy);
                    let _ = writeln!(out, "Top-K:        {}", plan.top_k);
                    let _ = writeln!(out, "Max hops:     {}", plan.max_hops);
                    let _ = writeln!(out, "Reverse deps: {}", plan.include_reverse_deps);
                    let _ = writeln!(out, "Token budget: {}", plan.token_budget);
                    let _ = writeln!(out, "Confidence:   {:.2}", plan.confidence);
                    if !plan.target_entities.is_empty() {
                        let entities: Vec<&str> =
                            plan.target_entities.iter().map(String::as_str).collect();
                        let _ = writeln!(out, "Entities:     {}", entities.join(", "));
                    }
                    Ok(out)
                }
            }
        }
        Commands::Ask {
            message,
            provider,
            source,
            conversation,
            user,
        } => {
            let engine = Engine::new(builder.build()).context("engine construction failed")?;
            if let Some(ref root) = source {
                engine
                    .index_tree(root)
                    .await
                    .with_context(|| format!("indexing {} failed", root.display()))?;
            }
            let request = ChainRequest {
                provider,
                message,
                conversation_id: conversation,
                user_id: user,
            };
            let response = engine.ask(request).await.context("request failed")?;
            match format {
                OutputFormat::Json => serde_json::to_string_pretty(&response)
                    .context("response serialization failed"),
                OutputFormat::Text => {
                    let mut out = String::new();
                    if let Some(ref label) = response.partial {
                        let _ = writeln!(out, "[partial: {label}]");
                    }
                    let _ = writeln!(out, "{}", response.text);
                    if !response.tools_used.is_empty() {
                        let _ = writeln!(out, "\ntools: {}", response.tools_used.join(", "));
                    }
                    Ok(out)
                }
            }
        }
        Commands::Watch { path, namespace } => {
            if let Some(ns) = namespace {
                builder = builder.project_namespace(ns);
            }
            let engine = Engine::new(builder.build()).context("engine construction failed")?;
            run_watch(&engine, &path).await
        }
        Commands::Status { source } => {
            let engine = Engine::new(builder.build()).context("engine construction failed")?;
            if let Some(ref root) = source {
                engine
                    .index_tree(root)
                    .await
                    .with_context(|| format!("indexing {} failed", root.display()))?;
            }
            let status = engine.status();
            match format {
                OutputFormat::Json => {
                    serde_json::to_string_pretty(&status).context("status serialization failed")
                }
                OutputFormat::Text => {
                    let mut out = String::new();
                    let _ = writeln!(out, "Indexed documents:   {}", status.indexed_documents);
                    let _ = writeln!(
                        out,
                        "Similarity graph:    {} nodes, {} edges",
                        status.similarity_nodes, status.similarity_edges
                    );
                    let _ = writeln!(
                        out,
                        "Dependency graph:    {} files, {} edges",
                        status.dependency_files, status.dependency_edges
                    );
                    let _ = writeln!(out, "Live sessions:       {}", status.sessions);
                    let _ = writeln!(out, "Long-term memories:  {}", status.long_term_memories);
                    let _ = writeln!(out, "Recent requests:     {}", status.recent_requests);
                    Ok(out)
                }
            }
        }
    }
}

/// Indexes then runs the watcher until Ctrl-C.
async fn run_watch(engine: &Engine, path: &Path) -> anyhow::Result<String> {
    engine
        .index_tree(path)
        .await
        .with_context(|| format!("initial indexing of {} failed", path.display()))?;

    let watcher = engine.watcher(path);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let watch = watcher.run(shutdown_rx);
    tokio::pin!(watch);

    tokio::select! {
        result = &mut watch => {
            result.context("watcher failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            let _ = shutdown_tx.send(());
        }
    }
    Ok("watch stopped\n".to_string())
}

fn render_index_report(report: &IndexReport, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "cache_hit": report.cache_hit,
                "files_processed": report.files_processed,
                "chunks_indexed": report.chunks_indexed,
                "summaries_indexed": report.summaries_indexed,
                "parse_failures": report.parse_failures,
                "files_removed": report.files_removed,
                "corpus_hash": report.corpus_hash,
            });
            serde_json::to_string_pretty(&value).context("report serialization failed")
        }
        OutputFormat::Text => {
            let mut out = String::new();
            if report.cache_hit {
                let _ = writeln!(out, "Cache hit: index reused (hash {})", report.corpus_hash);
            } else {
                let _ = writeln!(out, "Files processed:   {}", report.files_processed);
                let _ = writeln!(out, "Chunks indexed:    {}", report.chunks_indexed);
                let _ = writeln!(out, "Summaries indexed: {}", report.summaries_indexed);
                let _ = writeln!(out, "Parse failures:    {}", report.parse_failures);
                let _ = writeln!(out, "Corpus hash:       {}", report.corpus_hash);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        std::fs::write(
            dir.path().join("Widget.java"),
            r"package com.example;
public class Widget {
    private String label;
    public String describeWidget(String prefix) {
        return prefix + label + label.length();
    }
}
",
        )
        .unwrap_or_else(|e| unreachable!("write: {e}"));
        dir
    }

    async fn run(args: &[&str]) -> String {
        let cli = Cli::try_parse_from(args).unwrap_or_else(|e| unreachable!("parse: {e}"));
        execute(cli).await.unwrap_or_else(|e| unreachable!("execute: {e}"))
    }

    #[tokio::test]
    async fn test_plan_command_text() {
        let out = run(&["cortex-rs", "plan", "explain CacheManager"]).await;
        assert!(out.contains("entity_centered"));
        assert!(out.contains("CacheManager"));
    }

    #[tokio::test]
    async fn test_plan_command_json() {
        let out = run(&["cortex-rs", "--format", "json", "plan", "hello world"]).await;
        let value: serde_json::Value =
            serde_json::from_str(&out).unwrap_or_else(|e| unreachable!("json: {e}"));
        assert_eq!(value["strategy"], "similarity_search");
    }

    #[tokio::test]
    async fn test_index_command() {
        let tree = tree();
        let cache = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let out = run(&[
            "cortex-rs",
            "--cache-path",
            &cache.path().display().to_string(),
            "index",
            &tree.path().display().to_string(),
        ])
        .await;
        assert!(out.contains("Files processed:   1"));
    }

    #[tokio::test]
    async fn test_ask_command_with_source() {
        let tree = tree();
        let cache = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let out = run(&[
            "cortex-rs",
            "--cache-path",
            &cache.path().display().to_string(),
            "ask",
            "explain Widget",
            "--source",
            &tree.path().display().to_string(),
        ])
        .await;
        assert!(!out.trim().is_empty());
    }

    #[tokio::test]
    async fn test_status_command_json() {
        let cache = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let out = run(&[
            "cortex-rs",
            "--cache-path",
            &cache.path().display().to_string(),
            "--format",
            "json",
            "status",
        ])
        .await;
        let value: serde_json::Value =
            serde_json::from_str(&out).unwrap_or_else(|e| unreachable!("json: {e}"));
        assert_eq!(value["indexed_documents"], 0);
    }
}
