//! Narrative generation against a strict output contract

pub mod contract;
pub mod orchestrator;
pub mod text;
pub mod validate;

pub use contract::{InsightContract, SectionHeaders};
pub use orchestrator::{
  GeneratedInsight, InsightError, InsightLimits, InsightOrchestrator, InsightStage, InsightStatus,
};
pub use text::{is_truncated, sanitize, Normalizer};
pub use validate::{validate, ValidationContext, Violation};
