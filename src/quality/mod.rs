//! Quality gates: consistency and hallucination checks.
//!
//! Both gates are pure functions over text. Their reports land in the
//! scratchpad, where the Judge folds them into its quality score.

pub mod consistency;
pub mod hallucination;

pub use consistency::{ConsistencyChecker, ConsistencyReport};
pub use hallucination::{
    HallucinationDetector, HallucinationIssue, HallucinationReport, Severity,
};
