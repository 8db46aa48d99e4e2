use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::format::{ExpectedFormat, FormatHints};

/// Execution mode chosen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Rag,
    Sql,
    Hybrid,
}

impl Mode {
    pub fn uses_retrieval(self) -> bool {
        matches!(self, Self::Rag | Self::Hybrid)
    }

    pub fn uses_sql(self) -> bool {
        matches!(self, Self::Sql | Self::Hybrid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rag => "rag",
            Self::Sql => "sql",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    /// Accepts a bare label with surrounding noise (`"Route: SQL."`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        let labels: Vec<Mode> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter_map(|tok| match tok {
                "rag" => Some(Mode::Rag),
                "sql" => Some(Mode::Sql),
                "hybrid" => Some(Mode::Hybrid),
                _ => None,
            })
            .collect();
        match labels.as_slice() {
            [only] => Ok(*only),
            [first, rest @ ..] if rest.iter().all(|m| m == first) => Ok(*first),
            [] => Err(format!("no route label in '{}'", s.trim())),
            _ => Err(format!("conflicting route labels in '{}'", s.trim())),
        }
    }
}

/// An immutable input question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(alias = "question")]
    pub text: String,
    #[serde(alias = "format_hint", default = "default_format")]
    pub expected_format: ExpectedFormat,
    #[serde(default)]
    pub hints: FormatHints,
}

fn default_format() -> ExpectedFormat {
    ExpectedFormat::FreeForm
}

impl Question {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        expected_format: ExpectedFormat,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            expected_format,
            hints: FormatHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: FormatHints) -> Self {
        self.hints = hints;
        self
    }
}

/// A retrieved unit of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub score: f64,
}

impl Passage {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
        }
    }
}

/// One result row, column name to value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows returned by a successful query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Classification of a failed query attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    /// The generator produced nothing executable.
    EmptyQuery,
    /// The statement did not parse.
    Syntax,
    /// Unknown table or column.
    UnknownIdentifier,
    /// Anything else the executor reported (locked database, type error, ...).
    Other,
}

/// A structured query failure, fed back to the generator on repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of one SQL path invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Rows { sql: String, rows: QueryRows },
    Failed { sql: Option<String>, error: QueryError },
}

impl QueryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Rows { sql, .. } => Some(sql),
            Self::Failed { sql, .. } => sql.as_deref(),
        }
    }

    pub fn rows(&self) -> Option<&QueryRows> {
        match self {
            Self::Rows { rows, .. } => Some(rows),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Rows { .. } => None,
        }
    }
}

/// A reference tying an answer to the source it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Citation {
    Passage { passage_id: String },
    Query { sql: String, row_count: usize },
}

impl Citation {
    pub fn passage(id: impl Into<String>) -> Self {
        Self::Passage {
            passage_id: id.into(),
        }
    }

    pub fn query(sql: impl Into<String>, row_count: usize) -> Self {
        Self::Query {
            sql: sql.into(),
            row_count,
        }
    }
}

impl std::fmt::Display for Citation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passage { passage_id } => f.write_str(passage_id),
            Self::Query { sql, .. } => f.write_str(sql),
        }
    }
}

/// A typed answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
    Records(Vec<Row>),
}

impl AnswerValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list of strings",
            Self::Records(_) => "list of records",
        }
    }
}

/// Marker text carried by drafts that signal insufficient data.
pub const INSUFFICIENT_DATA: &str = "insufficient data";

/// The synthesized, not yet validated output of one synthesis attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftAnswer {
    pub value: AnswerValue,
    pub citations: Vec<Citation>,
    /// Set when the sources were consulted and held nothing usable.
    #[serde(default)]
    pub insufficient_data: bool,
    /// Model output before coercion.
    #[serde(default)]
    pub raw: String,
}

impl DraftAnswer {
    pub fn new(value: AnswerValue, citations: Vec<Citation>, raw: impl Into<String>) -> Self {
        Self {
            value,
            citations,
            insufficient_data: false,
            raw: raw.into(),
        }
    }

    pub fn insufficient_data() -> Self {
        Self {
            value: AnswerValue::Text(INSUFFICIENT_DATA.to_string()),
            citations: vec![],
            insufficient_data: true,
            raw: String::new(),
        }
    }
}
