//! Tool discovery, approval enforcement, and argument validation.
//!
//! Tools are known by name only. Discovery is a nearest-neighbor lookup
//! over an indexed catalog of tool descriptions; the conductor approves a
//! subset; this gate enforces `approved ⊆ suggested`, applies
//! family-specific argument fixups (extracting missing fields from the
//! raw query), drops empty arguments, and delegates execution to the
//! external [`ToolRunner`].

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::chain::EngineServices;
use crate::chain::scratchpad::{ScratchPad, StageOutput, ToolOutcome};
use crate::chain::stage::{Stage, StageRole};
use crate::error::{EngineError, StageFailure};
use crate::llm::LlmProvider;
use crate::vector::{Document, InMemoryVectorIndex, VectorIndex};

static CITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"\bin\s+([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)?)").unwrap();
    re
});

static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r#""([^"]+)"|'([^']+)'"#).unwrap();
    re
});

/// Known tool families with dedicated argument fixups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFamily {
    /// Weather lookups; requires a city.
    Weather,
    /// Date/time answers; defaults the date phrase.
    DateTime,
    /// Calendar entries; requires an event title.
    Calendar,
    /// No family-specific validation.
    Other,
}

/// A tool visible to the gate: name, description, family.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Tool name (the only handle the engine knows).
    pub name: String,
    /// Description indexed for discovery.
    pub description: String,
    /// Validation family.
    pub family: ToolFamily,
}

/// Catalog of tool descriptions with a discovery index.
pub struct ToolCatalog {
    descriptors: Vec<ToolDescriptor>,
    index: InMemoryVectorIndex,
}

impl ToolCatalog {
    /// Builds a catalog and indexes every description.
    #[must_use]
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        let index = InMemoryVectorIndex::new();
        let docs: Vec<Document> = descriptors
            .iter()
            .map(|d| {
                Document::new(
                    format!("{} {}", d.name, d.description),
                    [("tool_name", d.name.as_str())],
                )
            })
            .collect();
        // The in-memory index only fails on lock poisoning.
        if let Err(e) = index.add(docs) {
            warn!(error = %e, "tool catalog indexing failed");
        }
        Self { descriptors, index }
    }

    /// The default catalog: weather, datetime, calendar.
    #[must_use]
    pub fn default_catalog() -> Self {
        Self::new(vec![
            ToolDescriptor {
                name: "weather".to_string(),
                description: "current weather forecast temperature conditions for a city"
                    .to_string(),
                family: ToolFamily::Weather,
            },
            ToolDescriptor {
                name: "datetime".to_string(),
                description: "current date time today tomorrow day of week".to_string(),
                family: ToolFamily::DateTime,
            },
            ToolDescriptor {
                name: "calendar".to_string(),
                description: "calendar events schedule meeting appointment reminder".to_string(),
                family: ToolFamily::Calendar,
            },
        ])
    }

    /// Nearest-neighbor discovery of tool names for a query.
    #[must_use]
    pub fn discover(&self, query: &str, top_k: usize) -> Vec<String> {
        self.index
            .similarity_search(query, top_k)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|hit| hit.document.meta("tool_name").map(str::to_string))
            .collect()
    }

    /// Family of a tool, if known.
    #[must_use]
    pub fn family(&self, name: &str) -> Option<ToolFamily> {
        self.descriptors
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.family)
    }

    /// Number of cataloged tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` when the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.descriptors.len())
            .finish()
    }
}

/// A tool invocation after gate validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Tool name.
    pub name: String,
    /// Validated, non-empty arguments.
    pub args: BTreeMap<String, String>,
}

/// Validates one invocation against the allow-list and its family rules.
///
/// Empty argument values are dropped before family validation. Missing
/// required fields are recovered from the raw query where the family
/// permits, defaulted where a safe default exists, and rejected
/// otherwise.
///
/// # Errors
///
/// [`EngineError::ToolNotApproved`] when the tool is outside
/// `approved ∩ suggested`; [`EngineError::InvalidToolArguments`] when a
/// required field cannot be recovered.
pub fn validate_invocation(
    catalog: &ToolCatalog,
    approved: &[String],
    suggested: &[String],
    name: &str,
    args: BTreeMap<String, String>,
    raw_query: &str,
) -> Result<ToolInvocation, EngineError> {
    if !approved.iter().any(|t| t == name) || !suggested.iter().any(|t| t == name) {
        return Err(EngineError::ToolNotApproved {
            tool: name.to_string(),
        });
    }

    let mut args: BTreeMap<String, String> = args
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .collect();

    match catalog.family(name).unwrap_or(ToolFamily::Other) {
        ToolFamily::Weather => {
            if !args.contains_key("city") {
                match extract_city(raw_query) {
                    Some(city) => {
                        args.insert("city".to_string(), city);
                    }
                    None => {
                        return Err(EngineError::InvalidToolArguments {
                            tool: name.to_string(),
                            message: "missing required field: city".to_string(),
                        });
                    }
                }
            }
        }
        ToolFamily::DateTime => {
            if !args.contains_key("date") {
                let phrase = extract_date_phrase(raw_query).unwrap_or("today");
                args.insert("date".to_string(), phrase.to_string());
            }
        }
        ToolFamily::Calendar => {
            if !args.contains_key("title") {
                match extract_quoted(raw_query) {
                    Some(title) => {
                        args.insert("title".to_string(), title);
                    }
                    None => {
                        return Err(EngineError::InvalidToolArguments {
                            tool: name.to_string(),
                            message: "missing required field: title".to_string(),
                        });
                    }
                }
            }
        }
        ToolFamily::Other => {}
    }

    Ok(ToolInvocation {
        name: name.to_string(),
        args,
    })
}

/// Executes validated tool invocations.
///
/// Implementations live outside the engine; the gate only hands over an
/// allow-listed name and a validated argument set.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Invokes a tool and returns its textual result.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on execution failure; the gate records the
    /// failure and continues.
    async fn invoke(
        &self,
        name: &str,
        args: &BTreeMap<String, String>,
    ) -> Result<String, EngineError>;
}

/// Default runner: answers with a deterministic placeholder.
#[derive(Debug, Default)]
pub struct NullToolRunner {
    _private: (),
}

impl NullToolRunner {
    /// Creates the runner.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

#[async_trait]
impl ToolRunner for NullToolRunner {
    async fn invoke(
        &self,
        name: &str,
        args: &BTreeMap<String, String>,
    ) -> Result<String, EngineError> {
        let rendered: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Ok(format!("[{name}: {}]", rendered.join(", ")))
    }
}

/// Core stage enforcing the tool contract for the request.
#[derive(Debug, Default)]
pub struct ToolGateStage {
    _private: (),
}

impl ToolGateStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

#[async_trait]
impl Stage for ToolGateStage {
    fn name(&self) -> &'static str {
        "tool_gate"
    }

    fn description(&self) -> &'static str {
        "enforces the tool allow-list and validates tool arguments"
    }

    fn role(&self) -> StageRole {
        StageRole::Core
    }

    async fn run(
        &self,
        _provider: &dyn LlmProvider,
        services: &EngineServices,
        pad: &mut ScratchPad,
    ) -> Result<StageOutput, StageFailure> {
        if pad.approved_tools.is_empty() {
            return Ok(StageOutput::new(self.name(), "", 0.1));
        }

        let mut outcomes: Vec<ToolOutcome> = Vec::new();
        let mut rejected: Vec<String> = Vec::new();

        // Validate sequentially, then fan out the actual invocations and
        // join before the next stage starts.
        let mut validated: Vec<ToolInvocation> = Vec::new();
        for name in pad.approved_tools.clone() {
            match validate_invocation(
                &services.tool_catalog,
                &pad.approved_tools,
                &pad.suggested_tools,
                &name,
                BTreeMap::new(),
                &pad.user_query,
            ) {
                Ok(invocation) => validated.push(invocation),
                Err(e) => {
                    debug!(tool = %name, error = %e, "tool rejected by gate");
                    rejected.push(name);
                }
            }
        }

        let futures: Vec<_> = validated
            .iter()
            .map(|inv| services.tool_runner.invoke(&inv.name, &inv.args))
            .collect();
        let results = futures_util::future::join_all(futures).await;

        for (invocation, result) in validated.into_iter().zip(results) {
            match result {
                Ok(output) => outcomes.push(ToolOutcome {
                    name: invocation.name,
                    args: invocation.args,
                    output,
                }),
                Err(e) => {
                    warn!(tool = %invocation.name, error = %e, "tool execution failed");
                }
            }
        }

        let text = outcomes
            .iter()
            .map(|o| o.output.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        pad.tool_outcomes.extend(outcomes);

        let quality = if rejected.is_empty() { 0.3 } else { 0.2 };
        Ok(StageOutput::new(self.name(), text, quality))
    }
}

fn extract_city(query: &str) -> Option<String> {
    CITY_RE
        .captures(query)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_date_phrase(query: &str) -> Option<&'static str> {
    let lower = query.to_lowercase();
    for phrase in ["today", "tomorrow", "yesterday"] {
        if lower.contains(phrase) {
            return Some(phrase);
        }
    }
    None
}

fn extract_quoted(query: &str) -> Option<String> {
    QUOTED_RE.captures(query).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_discover_ranks_relevant_tool_first() {
        let catalog = ToolCatalog::default_catalog();
        let found = catalog.discover("what is the weather forecast in Paris", 2);
        assert_eq!(found.first().map(String::as_str), Some("weather"));
    }

    #[test]
    fn test_unapproved_tool_rejected() {
        let catalog = ToolCatalog::default_catalog();
        let result = validate_invocation(
            &catalog,
            &names(&["datetime"]),
            &names(&["datetime", "weather"]),
            "weather",
            BTreeMap::new(),
            "weather in Paris",
        );
        assert!(matches!(result, Err(EngineError::ToolNotApproved { .. })));
    }

    #[test]
    fn test_approved_must_be_subset_of_suggested() {
        let catalog = ToolCatalog::default_catalog();
        // Approved but never suggested: still rejected.
        let result = validate_invocation(
            &catalog,
            &names(&["weather"]),
            &names(&["datetime"]),
            "weather",
            BTreeMap::new(),
            "weather in Paris",
        );
        assert!(matches!(result, Err(EngineError::ToolNotApproved { .. })));
    }

    #[test]
    fn test_weather_city_extracted_from_query() {
        let catalog = ToolCatalog::default_catalog();
        let invocation = validate_invocation(
            &catalog,
            &names(&["weather"]),
            &names(&["weather"]),
            "weather",
            BTreeMap::new(),
            "what is the weather in New York right now",
        )
        .unwrap_or_else(|e| unreachable!("validate: {e}"));
        assert_eq!(invocation.args.get("city").map(String::as_str), Some("New York"));
    }

    #[test]
    fn test_weather_without_city_rejected() {
        let catalog = ToolCatalog::default_catalog();
        let result = validate_invocation(
            &catalog,
            &names(&["weather"]),
            &names(&["weather"]),
            "weather",
            BTreeMap::new(),
            "what is the weather like",
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidToolArguments { .. })
        ));
    }

    #[test]
    fn test_datetime_defaults_to_today() {
        let catalog = ToolCatalog::default_catalog();
        let invocation = validate_invocation(
            &catalog,
            &names(&["datetime"]),
            &names(&["datetime"]),
            "datetime",
            BTreeMap::new(),
            "what day is it",
        )
        .unwrap_or_else(|e| unreachable!("validate: {e}"));
        assert_eq!(invocation.args.get("date").map(String::as_str), Some("today"));
    }

    #[test]
    fn test_datetime_picks_tomorrow_phrase() {
        let catalog = ToolCatalog::default_catalog();
        let invocation = validate_invocation(
            &catalog,
            &names(&["datetime"]),
            &names(&["datetime"]),
            "datetime",
            BTreeMap::new(),
            "what about tomorrow",
        )
        .unwrap_or_else(|e| unreachable!("validate: {e}"));
        assert_eq!(
            invocation.args.get("date").map(String::as_str),
            Some("tomorrow")
        );
    }

    #[test]
    fn test_calendar_title_from_quotes() {
        let catalog = ToolCatalog::default_catalog();
        let invocation = validate_invocation(
            &catalog,
            &names(&["calendar"]),
            &names(&["calendar"]),
            "calendar",
            BTreeMap::new(),
            "add \"sprint review\" to my calendar",
        )
        .unwrap_or_else(|e| unreachable!("validate: {e}"));
        assert_eq!(
            invocation.args.get("title").map(String::as_str),
            Some("sprint review")
        );
    }

    #[test]
    fn test_empty_args_dropped() {
        let catalog = ToolCatalog::default_catalog();
        let mut args = BTreeMap::new();
        args.insert("date".to_string(), "  ".to_string());
        let invocation = validate_invocation(
            &catalog,
            &names(&["datetime"]),
            &names(&["datetime"]),
            "datetime",
            args,
            "what day is today",
        )
        .unwrap_or_else(|e| unreachable!("validate: {e}"));
        // Whitespace value dropped, then defaulted from the query.
        assert_eq!(invocation.args.get("date").map(String::as_str), Some("today"));
    }

    #[tokio::test]
    async fn test_null_runner_renders_args() {
        let runner = NullToolRunner::new();
        let mut args = BTreeMap::new();
        args.insert("city".to_string(), "Paris".to_string());
        let output = runner
            .invoke("weather", &args)
            .await
            .unwrap_or_else(|e| unreachable!("invoke: {e}"));
        assert_eq!(output, "[weather: city=Paris]");
    }
}
