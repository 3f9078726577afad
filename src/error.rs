//! Error types for the engine.
//!
//! One enum per failure domain would fragment handling across the chain, so
//! the engine uses a single [`EngineError`] taxonomy plus [`StageFailure`]
//! for the per-stage result type the scheduler pattern-matches on.

use std::time::Duration;

/// Errors produced by the engine and its subsystems.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request named an empty or unusable provider.
    #[error("invalid provider: {name:?}")]
    InvalidProvider {
        /// The provider string as received.
        name: String,
    },

    /// No API key was configured for a provider that requires one.
    #[error("no API key configured (set CORTEX_API_KEY or OPENAI_API_KEY)")]
    ApiKeyMissing,

    /// An LLM API request failed.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Underlying error description.
        message: String,
        /// HTTP status, when known.
        status: Option<u16>,
    },

    /// A streaming response failed mid-flight.
    #[error("stream error: {message}")]
    Stream {
        /// Underlying error description.
        message: String,
    },

    /// A model response could not be parsed into the expected shape.
    #[error("response parse error: {message}")]
    ResponseParse {
        /// What went wrong.
        message: String,
        /// The raw response content for diagnostics.
        content: String,
    },

    /// The vector index rejected a write or lookup.
    #[error("vector index error: {message}")]
    Index {
        /// Underlying error description.
        message: String,
    },

    /// The on-disk cache is missing, stale, or corrupt.
    ///
    /// Always recoverable: the caller treats it as "cache invalid" and
    /// rebuilds.
    #[error("cache invalid: {reason}")]
    CacheInvalid {
        /// Why the cache was rejected.
        reason: String,
    },

    /// Filesystem I/O failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved in the operation.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A source file could not be parsed into chunks.
    ///
    /// Per-file parse failures are skipped with a debug record and never
    /// fail a batch; this variant surfaces only from direct parse calls.
    #[error("parse failure in {path}: {message}")]
    Parse {
        /// File that failed.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// Admission was refused because the token budget is exhausted.
    #[error("token budget exceeded: {used}/{max} tokens")]
    BudgetExceeded {
        /// Tokens already admitted.
        used: usize,
        /// Budget ceiling.
        max: usize,
    },

    /// A tool invocation failed gate validation.
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidToolArguments {
        /// Tool name.
        tool: String,
        /// Missing or malformed field description.
        message: String,
    },

    /// A tool was requested that the conductor never approved.
    #[error("tool {tool} is not in the approved set")]
    ToolNotApproved {
        /// Tool name.
        tool: String,
    },

    /// The request was cancelled or ran past its deadline.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// Why the request was cut short.
        reason: String,
    },

    /// The scheduler could not produce any response at all.
    ///
    /// Raised only when every stage failed and no fallback text exists;
    /// anything short of that degrades and continues per the propagation
    /// policy.
    #[error("chain produced no output: {message}")]
    ChainExhausted {
        /// Diagnostic summary of what failed.
        message: String,
    },

    /// Recording the same stage output twice within one request.
    #[error("duplicate stage output for {stage} in iteration {iteration}")]
    DuplicateStageOutput {
        /// Stage that was recorded twice.
        stage: String,
        /// Iteration in which the duplicate occurred.
        iteration: usize,
    },

    /// Background task failed to join.
    #[error("task join failed: {message}")]
    Join {
        /// Underlying error description.
        message: String,
    },

    /// The file watcher could not be created or registered.
    #[error("watcher error: {message}")]
    Watcher {
        /// Underlying error description.
        message: String,
    },
}

impl EngineError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a single stage, consumed by the scheduler.
///
/// The scheduler pattern-matches on the kind and degrades without
/// unwinding: a failed stage contributes an empty output with quality 0.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageFailure {
    /// The stage's LLM or retrieval dependency failed.
    #[error("{stage}: dependency failed: {message}")]
    Dependency {
        /// Stage name.
        stage: String,
        /// Underlying error description.
        message: String,
    },

    /// The stage exceeded its slice of the request deadline.
    #[error("{stage}: timed out after {elapsed:?}")]
    Timeout {
        /// Stage name.
        stage: String,
        /// How long the stage ran before cancellation.
        elapsed: Duration,
    },

    /// The stage panicked or returned an internal error.
    #[error("{stage}: internal failure: {message}")]
    Internal {
        /// Stage name.
        stage: String,
        /// Underlying error description.
        message: String,
    },
}

impl StageFailure {
    /// The name of the stage that failed.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Dependency { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Internal { stage, .. } => stage,
        }
    }
}

/// Convenience alias used throughout the library.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::InvalidProvider {
            name: String::new(),
        };
        assert!(err.to_string().contains("invalid provider"));

        let err = EngineError::BudgetExceeded { used: 600, max: 500 };
        assert!(err.to_string().contains("600/500"));
    }

    #[test]
    fn test_stage_failure_stage_name() {
        let f = StageFailure::Dependency {
            stage: "judge".to_string(),
            message: "llm down".to_string(),
        };
        assert_eq!(f.stage(), "judge");

        let f = StageFailure::Timeout {
            stage: "voice".to_string(),
            elapsed: Duration::from_millis(250),
        };
        assert_eq!(f.stage(), "voice");
    }

    #[test]
    fn test_cache_invalid_is_descriptive() {
        let err = EngineError::CacheInvalid {
            reason: "hash mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "cache invalid: hash mismatch");
    }
}
