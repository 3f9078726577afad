//! Core and built-in specialist stages.

pub mod conductor;
pub mod context_fetcher;
pub mod judge;
pub mod specialists;
pub mod voice;

pub use conductor::ConductorStage;
pub use context_fetcher::ContextFetcherStage;
pub use judge::JudgeStage;
pub use specialists::{CodeExplainer, DesignAdvisor, ErrorAnalyst, default_specialists};
pub use voice::VoiceStage;
