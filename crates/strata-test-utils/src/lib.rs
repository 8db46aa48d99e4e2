//! Scripted stand-ins for every external collaborator of the graph.
//!
//! Each mock records its calls into a shared [`CallLog`] so tests can assert
//! ordering across collaborators, and keeps the requests it received.

mod fixtures;
mod mocks;

pub use fixtures::*;
pub use mocks::*;

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One recorded collaborator call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub name: &'static str,
    pub phase: Phase,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

/// Shared, ordered record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    inner: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, name: &'static str) {
        self.push(name, Phase::Start);
    }

    pub fn end(&self, name: &'static str) {
        self.push(name, Phase::End);
    }

    fn push(&self, name: &'static str, phase: Phase) {
        self.inner.lock().unwrap().push(CallRecord {
            name,
            phase,
            at: Instant::now(),
        });
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.inner.lock().unwrap().clone()
    }

    /// Names of started calls, in order.
    pub fn started(&self) -> Vec<&'static str> {
        self.records()
            .into_iter()
            .filter(|r| r.phase == Phase::Start)
            .map(|r| r.name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.started().iter().filter(|n| **n == name).count()
    }

    /// Index in the full record of the first `phase` event for `name`.
    pub fn first(&self, name: &str, phase: Phase) -> Option<usize> {
        self.records()
            .iter()
            .position(|r| r.name == name && r.phase == phase)
    }

    /// True when every start of `later` comes after the first end of `earlier`.
    pub fn happens_before(&self, earlier: &str, later: &str) -> bool {
        let records = self.records();
        let Some(done) = records
            .iter()
            .position(|r| r.name == earlier && r.phase == Phase::End)
        else {
            return false;
        };
        records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.name == later && r.phase == Phase::Start)
            .all(|(i, r)| i > done && r.at >= records[done].at)
    }
}
