use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrataError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Collaborator errors
    #[error("Retrieval unavailable: {0}")]
    Retrieval(String),

    #[error("Database error: {0}")]
    Database(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Run cancelled")]
    Cancelled,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StrataError>;

/// Failure taxonomy for a single run.
///
/// `RoutingAmbiguous` is always recovered (the run falls back to hybrid) and
/// only shows up in run history. The query and format kinds are repairable;
/// the rest terminate a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    RoutingAmbiguous,
    RetrievalUnavailable,
    QueryGenerationEmpty,
    QueryExecutionError,
    FormatMismatch,
    RepairBudgetExhausted,
    Timeout,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoutingAmbiguous => "RoutingAmbiguous",
            Self::RetrievalUnavailable => "RetrievalUnavailable",
            Self::QueryGenerationEmpty => "QueryGenerationEmpty",
            Self::QueryExecutionError => "QueryExecutionError",
            Self::FormatMismatch => "FormatMismatch",
            Self::RepairBudgetExhausted => "RepairBudgetExhausted",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_variant_name() {
        assert_eq!(FailureKind::RepairBudgetExhausted.to_string(), "RepairBudgetExhausted");
        assert_eq!(FailureKind::Cancelled.as_str(), "Cancelled");
    }

    #[test]
    fn failure_kind_serializes_as_name() {
        let json = serde_json::to_string(&FailureKind::RetrievalUnavailable).unwrap();
        assert_eq!(json, "\"RetrievalUnavailable\"");
    }
}
