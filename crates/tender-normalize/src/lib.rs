//! Normalization of raw tender records: the decision engine, the rule-based
//! normalizer, the enhancement pass and the LLM path with response recovery.

pub mod classify;
pub mod dates;
pub mod decision;
pub mod english;
pub mod enhance;
pub mod error;
pub mod llm;
pub mod money;
pub mod rules;
pub mod text;

pub use decision::{decide, DecisionConfig};
pub use enhance::{enhance, EnhanceContext};
pub use error::{CompletionError, FieldWarning, LlmError, ParseFailure};
pub use llm::{
    normalize_with_llm, normalize_with_llm_timeout, CompletionClient, HttpCompletionClient,
    LlmConfig, LlmOutcome, RecoveryStage, ThrottleConfig,
};
pub use rules::{normalize_without_llm, RuleMode, RuleOutcome};
