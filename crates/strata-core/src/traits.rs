//! Boundary contracts for the collaborators the graph drives.
//!
//! Every collaborator must be safe to share between concurrent runs; none of
//! them may keep per-call state that leaks into the next call.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::format::ExpectedFormat;
use crate::types::*;

/// Question classifier.
pub trait Router: Send + Sync + 'static {
    /// Classify a question. An error means no valid label could be produced.
    fn classify(&self, question: &str) -> BoxFuture<'_, Result<Mode>>;
}

/// Ranked passage retrieval. Pure read.
pub trait Retriever: Send + Sync + 'static {
    /// Return passages ordered by descending relevance. "No results" is an
    /// empty list, never an error; errors mean the index is unavailable.
    fn retrieve(&self, question: &str) -> BoxFuture<'_, Result<Vec<Passage>>>;
}

/// Error feedback from a prior query attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFeedback {
    pub prior_query: Option<String>,
    pub error: QueryError,
}

/// Everything a query generator may look at. Generation is a function of
/// this value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub question: String,
    /// Retrieved passages in hybrid mode, empty otherwise.
    pub context: Vec<Passage>,
    pub feedback: Option<QueryFeedback>,
}

/// Natural language to SQL.
pub trait QueryGenerator: Send + Sync + 'static {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>>;
}

/// Runs a cleaned query against the dataset.
pub trait QueryExecutor: Send + Sync + 'static {
    /// A legitimately empty result is `Ok` with no rows.
    fn execute(&self, sql: &str) -> BoxFuture<'_, std::result::Result<QueryRows, QueryError>>;
}

/// Strips non-executable wrapping from generated query text.
pub trait OutputCleaner: Send + Sync + 'static {
    fn clean(&self, raw: &str) -> String;
}

/// Inputs to one synthesis attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub question: String,
    pub expected_format: ExpectedFormat,
    pub passages: Vec<Passage>,
    pub sql: Option<String>,
    pub rows: Option<QueryRows>,
    /// Validator complaint about the previous draft, if this is a format repair.
    pub feedback: Option<String>,
}

/// Raw model answer before coercion and citation checking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAnswer {
    pub answer: String,
    /// Source labels the model claims to have used (passage ids, `sql`).
    #[serde(default)]
    pub citations: Vec<String>,
}

/// The language model behind the synthesizer.
pub trait AnswerModel: Send + Sync + 'static {
    fn answer(&self, request: SynthesisRequest) -> BoxFuture<'_, Result<ModelAnswer>>;
}
