use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Completion output from which no canonical field could be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no canonical field recoverable from {len}-byte completion")]
pub struct ParseFailure {
    pub len: usize,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion request failed: {0}")]
    Network(String),
    #[error("completion service returned http {status}: {body}")]
    Status { status: u16, body: String },
    /// Quota or billing exhaustion; further calls in the same run will fail too.
    #[error("completion quota exhausted (http {status}): {body}")]
    Quota { status: u16, body: String },
    #[error("completion service returned no content")]
    EmptyResponse,
}

impl CompletionError {
    pub fn is_quota(&self) -> bool {
        matches!(self, CompletionError::Quota { .. })
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::Network(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Parse(#[from] ParseFailure),
    #[error("llm normalization exceeded {0:?}")]
    TimedOut(Duration),
}

impl LlmError {
    pub fn is_quota(&self) -> bool {
        matches!(self, LlmError::Completion(err) if err.is_quota())
    }
}

/// One field that could not be parsed. Never propagated: it is logged and the field stays null.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not parse {field} from {value:?}: {reason}")]
pub struct FieldWarning {
    pub field: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl FieldWarning {
    pub fn new(field: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        let mut value = value.into();
        if value.len() > 120 {
            let cut = (0..=120).rev().find(|i| value.is_char_boundary(*i)).unwrap_or(0);
            value.truncate(cut);
        }
        Self {
            field,
            value,
            reason,
        }
    }

    pub fn log(&self, source_table: &str, source_id: Option<&str>) {
        warn!(
            source = source_table,
            source_id = source_id.unwrap_or("-"),
            field = self.field,
            value = %self.value,
            reason = self.reason,
            "field extraction warning"
        );
    }
}
