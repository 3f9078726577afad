//! Engine configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::EngineError;

/// Default on-disk cache directory.
const DEFAULT_CACHE_PATH: &str = "./cache";
/// Default maximum context tokens per request.
const DEFAULT_MAX_CONTEXT_TOKENS: usize = 8000;
/// Default tokens reserved for the response.
const DEFAULT_RESERVED_RESPONSE_TOKENS: usize = 1000;
/// Default summary-indexing worker pool size.
const DEFAULT_INDEXER_WORKERS: usize = 3;
/// Default per-file throttle between summarizer calls.
const DEFAULT_PER_FILE_DELAY_MS: u64 = 100;
/// Default watcher debounce window.
const DEFAULT_DEBOUNCE_MS: u64 = 1000;
/// Default watcher settle wait before reindexing.
const DEFAULT_SETTLE_MS: u64 = 500;
/// Default maximum ReAct iterations per request.
const DEFAULT_MAX_ITERATIONS: usize = 2;
/// Default maximum supervisor re-evaluation cycles.
const DEFAULT_MAX_REEVALUATIONS: usize = 3;
/// Default quality threshold below which refinement is considered.
const DEFAULT_QUALITY_THRESHOLD: f64 = 0.75;
/// Default inter-output consistency threshold.
const DEFAULT_CONSISTENCY_THRESHOLD: f64 = 0.85;
/// Default per-user monthly token quota.
const DEFAULT_MONTHLY_QUOTA: u64 = 100_000;
/// Default usage percentage at which a quota warning fires.
const DEFAULT_QUOTA_WARN_PCT: u8 = 80;
/// Default number of specialist stages selected per request.
const DEFAULT_SPECIALIST_TOP_N: usize = 3;
/// Default request deadline.
const DEFAULT_REQUEST_DEADLINE_SECS: u64 = 120;

/// Configuration for the engine.
///
/// Covers the chain scheduler, the retrieval pipeline, the indexing
/// pipeline, and per-user accounting. One instance is built at startup
/// and shared immutably.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// LLM provider name (e.g. "openai", "claude", "ollama", "default").
    pub provider: String,
    /// API key for the provider, if any.
    pub api_key: Option<String>,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model used by chain stages.
    pub model: String,
    /// On-disk cache directory for the embedding cache.
    pub cache_path: PathBuf,
    /// Whether the embedding cache is consulted at startup.
    pub cache_enabled: bool,
    /// Root namespace of the indexed project (import-prefix filter for the
    /// dependency graph, e.g. "com.example").
    pub project_namespace: String,
    /// Maximum context tokens available to the retriever.
    pub max_context_tokens: usize,
    /// Tokens reserved for the model response.
    pub reserved_response_tokens: usize,
    /// Summary-indexing worker pool size.
    pub indexer_workers: usize,
    /// Throttle between summarizer calls per worker.
    pub per_file_delay: Duration,
    /// Watcher debounce window for repeated events on one path.
    pub debounce: Duration,
    /// Watcher settle wait before triggering a reindex.
    pub settle: Duration,
    /// Maximum ReAct iterations per request.
    pub max_iterations: usize,
    /// Maximum supervisor re-evaluation cycles per conversation.
    pub max_reevaluations: usize,
    /// Quality threshold below which refinement is considered.
    pub quality_threshold: f64,
    /// Inter-output consistency threshold.
    pub consistency_threshold: f64,
    /// Per-user monthly token quota.
    pub monthly_quota: u64,
    /// Usage percentage at which a quota warning fires.
    pub quota_warn_pct: u8,
    /// Number of specialist stages selected per request.
    pub specialist_top_n: usize,
    /// Request deadline; stages share what remains of it.
    pub request_deadline: Duration,
}

impl EngineConfig {
    /// Creates a new builder for `EngineConfig`.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self::builder().from_env().build()
    }

    /// Token budget handed to the query planner: context minus the
    /// response reservation.
    #[must_use]
    pub fn planner_token_budget(&self) -> usize {
        self.max_context_tokens
            .saturating_sub(self.reserved_response_tokens)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CacheInvalid`] when the reserved response
    /// tokens leave no room for context.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.reserved_response_tokens >= self.max_context_tokens {
            return Err(EngineError::CacheInvalid {
                reason: format!(
                    "reserved_response_tokens ({}) must be below max_context_tokens ({})",
                    self.reserved_response_tokens, self.max_context_tokens
                ),
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    cache_path: Option<PathBuf>,
    cache_enabled: Option<bool>,
    project_namespace: Option<String>,
    max_context_tokens: Option<usize>,
    reserved_response_tokens: Option<usize>,
    indexer_workers: Option<usize>,
    per_file_delay: Option<Duration>,
    debounce: Option<Duration>,
    settle: Option<Duration>,
    max_iterations: Option<usize>,
    max_reevaluations: Option<usize>,
    quality_threshold: Option<f64>,
    consistency_threshold: Option<f64>,
    monthly_quota: Option<u64>,
    quota_warn_pct: Option<u8>,
    specialist_top_n: Option<usize>,
    request_deadline: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if self.provider.is_none() {
            self.provider = std::env::var("CORTEX_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("CORTEX_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("CORTEX_BASE_URL").ok();
        }
        if self.model.is_none() {
            self.model = std::env::var("CORTEX_MODEL").ok();
        }
        if self.cache_path.is_none() {
            self.cache_path = std::env::var("CORTEX_CACHE_PATH").ok().map(PathBuf::from);
        }
        if self.cache_enabled.is_none() {
            self.cache_enabled = parse_env("CORTEX_CACHE_ENABLED");
        }
        if self.project_namespace.is_none() {
            self.project_namespace = std::env::var("CORTEX_PROJECT_NAMESPACE").ok();
        }
        if self.max_context_tokens.is_none() {
            self.max_context_tokens = parse_env("CORTEX_MAX_CONTEXT_TOKENS");
        }
        if self.reserved_response_tokens.is_none() {
            self.reserved_response_tokens = parse_env("CORTEX_RESERVED_TOKENS");
        }
        if self.indexer_workers.is_none() {
            self.indexer_workers = parse_env("CORTEX_INDEXER_WORKERS");
        }
        if self.per_file_delay.is_none() {
            self.per_file_delay = parse_env("CORTEX_PER_FILE_DELAY_MS").map(Duration::from_millis);
        }
        if self.debounce.is_none() {
            self.debounce = parse_env("CORTEX_DEBOUNCE_MS").map(Duration::from_millis);
        }
        if self.settle.is_none() {
            self.settle = parse_env("CORTEX_SETTLE_MS").map(Duration::from_millis);
        }
        if self.max_iterations.is_none() {
            self.max_iterations = parse_env("CORTEX_MAX_ITERATIONS");
        }
        if self.max_reevaluations.is_none() {
            self.max_reevaluations = parse_env("CORTEX_MAX_REEVALUATIONS");
        }
        if self.quality_threshold.is_none() {
            self.quality_threshold = parse_env("CORTEX_QUALITY_THRESHOLD");
        }
        if self.consistency_threshold.is_none() {
            self.consistency_threshold = parse_env("CORTEX_CONSISTENCY_THRESHOLD");
        }
        if self.monthly_quota.is_none() {
            self.monthly_quota = parse_env("CORTEX_MONTHLY_QUOTA");
        }
        if self.quota_warn_pct.is_none() {
            self.quota_warn_pct = parse_env("CORTEX_QUOTA_WARN_PCT");
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the stage model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the on-disk cache directory.
    #[must_use]
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Enables or disables the embedding cache.
    #[must_use]
    pub const fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Sets the project root namespace for dependency extraction.
    #[must_use]
    pub fn project_namespace(mut self, ns: impl Into<String>) -> Self {
        self.project_namespace = Some(ns.into());
        self
    }

    /// Sets the maximum context tokens.
    #[must_use]
    pub const fn max_context_tokens(mut self, n: usize) -> Self {
        self.max_context_tokens = Some(n);
        self
    }

    /// Sets the reserved response tokens.
    #[must_use]
    pub const fn reserved_response_tokens(mut self, n: usize) -> Self {
        self.reserved_response_tokens = Some(n);
        self
    }

    /// Sets the summary worker pool size.
    #[must_use]
    pub const fn indexer_workers(mut self, n: usize) -> Self {
        self.indexer_workers = Some(n);
        self
    }

    /// Sets the per-file summarizer throttle.
    #[must_use]
    pub const fn per_file_delay(mut self, d: Duration) -> Self {
        self.per_file_delay = Some(d);
        self
    }

    /// Sets the watcher debounce window.
    #[must_use]
    pub const fn debounce(mut self, d: Duration) -> Self {
        self.debounce = Some(d);
        self
    }

    /// Sets the watcher settle wait.
    #[must_use]
    pub const fn settle(mut self, d: Duration) -> Self {
        self.settle = Some(d);
        self
    }

    /// Sets the maximum ReAct iterations.
    #[must_use]
    pub const fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Sets the maximum re-evaluation cycles.
    #[must_use]
    pub const fn max_reevaluations(mut self, n: usize) -> Self {
        self.max_reevaluations = Some(n);
        self
    }

    /// Sets the quality threshold.
    #[must_use]
    pub const fn quality_threshold(mut self, t: f64) -> Self {
        self.quality_threshold = Some(t);
        self
    }

    /// Sets the consistency threshold.
    #[must_use]
    pub const fn consistency_threshold(mut self, t: f64) -> Self {
        self.consistency_threshold = Some(t);
        self
    }

    /// Sets the per-user monthly token quota.
    #[must_use]
    pub const fn monthly_quota(mut self, n: u64) -> Self {
        self.monthly_quota = Some(n);
        self
    }

    /// Sets the quota warning percentage.
    #[must_use]
    pub const fn quota_warn_pct(mut self, pct: u8) -> Self {
        self.quota_warn_pct = Some(pct);
        self
    }

    /// Sets the number of specialists selected per request.
    #[must_use]
    pub const fn specialist_top_n(mut self, n: usize) -> Self {
        self.specialist_top_n = Some(n);
        self
    }

    /// Sets the request deadline.
    #[must_use]
    pub const fn request_deadline(mut self, d: Duration) -> Self {
        self.request_deadline = Some(d);
        self
    }

    /// Builds the [`EngineConfig`].
    #[must_use]
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            provider: self.provider.unwrap_or_else(|| "default".to_string()),
            api_key: self.api_key,
            base_url: self.base_url,
            model: self
                .model
                .unwrap_or_else(|| "gpt-5-mini-2025-08-07".to_string()),
            cache_path: self
                .cache_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH)),
            cache_enabled: self.cache_enabled.unwrap_or(true),
            project_namespace: self
                .project_namespace
                .unwrap_or_else(|| "com.example".to_string()),
            max_context_tokens: self.max_context_tokens.unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS),
            reserved_response_tokens: self
                .reserved_response_tokens
                .unwrap_or(DEFAULT_RESERVED_RESPONSE_TOKENS),
            indexer_workers: self.indexer_workers.unwrap_or(DEFAULT_INDEXER_WORKERS),
            per_file_delay: self
                .per_file_delay
                .unwrap_or(Duration::from_millis(DEFAULT_PER_FILE_DELAY_MS)),
            debounce: self
                .debounce
                .unwrap_or(Duration::from_millis(DEFAULT_DEBOUNCE_MS)),
            settle: self
                .settle
                .unwrap_or(Duration::from_millis(DEFAULT_SETTLE_MS)),
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            max_reevaluations: self.max_reevaluations.unwrap_or(DEFAULT_MAX_REEVALUATIONS),
            quality_threshold: self.quality_threshold.unwrap_or(DEFAULT_QUALITY_THRESHOLD),
            consistency_threshold: self
                .consistency_threshold
                .unwrap_or(DEFAULT_CONSISTENCY_THRESHOLD),
            monthly_quota: self.monthly_quota.unwrap_or(DEFAULT_MONTHLY_QUOTA),
            quota_warn_pct: self.quota_warn_pct.unwrap_or(DEFAULT_QUOTA_WARN_PCT),
            specialist_top_n: self.specialist_top_n.unwrap_or(DEFAULT_SPECIALIST_TOP_N),
            request_deadline: self
                .request_deadline
                .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_DEADLINE_SECS)),
        }
    }
}
