//! The per-question state machine.
//!
//! `Router → (RetrievalPath and/or SQLPath) → Synthesizer → Validator`, then
//! either `End`, a repair that loops back, or `Failed`. [`RepairDispatcher`]
//! holds the transition table; [`GraphRunner`] drives it and is the only
//! writer of [`RunState`] history.

pub mod runner;
pub mod state;
pub mod transition;

pub use runner::{Collaborators, GraphRunner, RunFailure, RunOutput, RunResult};
pub use state::{HistoryEntry, Node, RunState};
pub use transition::{GraphState, RepairDispatcher};
