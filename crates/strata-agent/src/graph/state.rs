use serde::Serialize;

use strata_core::types::{DraftAnswer, Mode, Passage, QueryOutcome, Question};

use crate::validator::ValidationError;

/// A graph node, as recorded in history and failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Router,
    Retrieval,
    Sql,
    Synthesizer,
    Validator,
    Repair,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Retrieval => "retrieval",
            Self::Sql => "sql",
            Self::Synthesizer => "synthesizer",
            Self::Validator => "validator",
            Self::Repair => "repair",
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(node, outcome)` diagnostic entry.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub node: Node,
    pub outcome: String,
    pub elapsed_ms: u64,
}

/// Everything one run knows. Owned by a single runner invocation.
#[derive(Debug, Clone)]
pub struct RunState {
    pub question: Question,
    mode: Option<Mode>,
    pub retrieved_passages: Vec<Passage>,
    /// The most recent cleaned query; replaced wholesale on every attempt.
    pub generated_query: Option<String>,
    pub query_result: Option<QueryOutcome>,
    pub draft_answer: Option<DraftAnswer>,
    /// Set on validator failure, cleared before each synthesis attempt.
    pub validation_error: Option<ValidationError>,
    repair_attempts: u32,
    history: Vec<HistoryEntry>,
}

impl RunState {
    pub fn new(question: Question) -> Self {
        Self {
            question,
            mode: None,
            retrieved_passages: Vec::new(),
            generated_query: None,
            query_result: None,
            draft_answer: None,
            validation_error: None,
            repair_attempts: 0,
            history: Vec::new(),
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Fix the mode. Returns `false`, leaving the mode untouched, if it was
    /// already set.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if self.mode.is_some() {
            return false;
        }
        self.mode = Some(mode);
        true
    }

    pub fn repair_attempts(&self) -> u32 {
        self.repair_attempts
    }

    pub(crate) fn count_repair(&mut self) -> u32 {
        self.repair_attempts += 1;
        self.repair_attempts
    }

    /// Record a query attempt, replacing the previous one.
    pub(crate) fn set_query(&mut self, outcome: QueryOutcome) {
        self.generated_query = outcome.sql().map(str::to_string);
        self.query_result = Some(outcome);
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub(crate) fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    pub(crate) fn take_history(&mut self) -> Vec<HistoryEntry> {
        std::mem::take(&mut self.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::types::{QueryError, QueryErrorKind, QueryRows};
    use strata_test_utils::question;

    #[test]
    fn mode_is_set_once() {
        let mut state = RunState::new(question("q1", "How many orders?", "int"));
        assert!(state.set_mode(Mode::Sql));
        assert!(!state.set_mode(Mode::Rag));
        assert_eq!(state.mode(), Some(Mode::Sql));
    }

    #[test]
    fn query_attempts_replace_each_other() {
        let mut state = RunState::new(question("q1", "How many orders?", "int"));
        state.set_query(QueryOutcome::Failed {
            sql: Some("SELEC 1".into()),
            error: QueryError::new(QueryErrorKind::Syntax, "bad"),
        });
        assert_eq!(state.generated_query.as_deref(), Some("SELEC 1"));

        state.set_query(QueryOutcome::Failed {
            sql: None,
            error: QueryError::new(QueryErrorKind::EmptyQuery, "empty"),
        });
        assert_eq!(state.generated_query, None);

        state.set_query(QueryOutcome::Rows {
            sql: "SELECT 1".into(),
            rows: QueryRows::default(),
        });
        assert_eq!(state.generated_query.as_deref(), Some("SELECT 1"));
        assert!(!state.query_result.as_ref().unwrap().is_failure());
    }

    #[test]
    fn repair_counter_only_grows() {
        let mut state = RunState::new(question("q1", "x", "str"));
        assert_eq!(state.count_repair(), 1);
        assert_eq!(state.count_repair(), 2);
        assert_eq!(state.repair_attempts(), 2);
    }
}
