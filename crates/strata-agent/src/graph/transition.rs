use serde::Serialize;

use strata_core::error::FailureKind;
use strata_core::types::{Mode, QueryOutcome};

use crate::validator::ValidationError;

/// States of the validate/repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    Validating,
    RepairFormat,
    RepairQuery,
    End,
    Failed(FailureKind),
}

impl GraphState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::Failed(_))
    }
}

/// The typed transition table of the repair loop.
///
/// The budget check comes before any routing, so the loop terminates after
/// at most `max_attempts` repairs whatever the validator keeps reporting.
#[derive(Debug, Clone, Copy)]
pub struct RepairDispatcher {
    max_attempts: u32,
}

impl RepairDispatcher {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Next state after validation.
    pub fn after_validation(
        &self,
        verdict: Result<(), &ValidationError>,
        mode: Mode,
        query: Option<&QueryOutcome>,
        attempts: u32,
    ) -> GraphState {
        let error = match verdict {
            Ok(()) => return GraphState::End,
            Err(e) => e,
        };
        if attempts >= self.max_attempts {
            return GraphState::Failed(FailureKind::RepairBudgetExhausted);
        }

        let query_failed = query.is_some_and(QueryOutcome::is_failure);
        if !error.is_format() && mode.uses_sql() && query_failed {
            GraphState::RepairQuery
        } else {
            GraphState::RepairFormat
        }
    }

    /// Both repair states go back to validation once their work is done.
    pub fn after_repair(&self, state: GraphState) -> GraphState {
        match state {
            GraphState::RepairFormat | GraphState::RepairQuery => GraphState::Validating,
            other => other,
        }
    }
}

/// The failure kind a repair state is recovering from.
pub fn repair_reason(state: GraphState, query: Option<&QueryOutcome>) -> Option<FailureKind> {
    match state {
        GraphState::RepairFormat => Some(FailureKind::FormatMismatch),
        GraphState::RepairQuery => Some(match query.and_then(QueryOutcome::error) {
            Some(e) if e.kind == strata_core::types::QueryErrorKind::EmptyQuery => {
                FailureKind::QueryGenerationEmpty
            }
            _ => FailureKind::QueryExecutionError,
        }),
        _ => None,
    }
}
