//! Orchestration for hybrid document + SQL question answering.
//!
//! A [`GraphRunner`] takes one [`Question`](strata_core::Question) through
//! routing, retrieval and/or query generation, synthesis, validation and a
//! bounded repair loop, and always ends with either a cited answer or a
//! structured failure.

pub mod batch;
pub mod coerce;
pub mod graph;
pub mod llm;
pub mod retrieval_path;
pub mod router;
pub mod sql_path;
pub mod synthesizer;
pub mod validator;

pub use batch::{BatchRunner, OutputRecord};
pub use graph::{
    Collaborators, GraphRunner, GraphState, HistoryEntry, Node, RepairDispatcher, RunFailure,
    RunOutput, RunResult, RunState,
};
pub use llm::{LlmAnswerModel, LlmQueryGenerator};
pub use router::{KeywordRouter, LlmRouter};
pub use synthesizer::Synthesizer;
pub use validator::{ValidationError, Validator};
