use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use strata_core::config::GraphConfig;
use strata_core::error::FailureKind;
use strata_core::event::{EventBus, RunEvent};
use strata_core::traits::*;
use strata_core::types::{
    AnswerValue, Citation, DraftAnswer, Mode, Passage, QueryOutcome, Question,
};

use super::state::{HistoryEntry, Node, RunState};
use super::transition::{repair_reason, GraphState, RepairDispatcher};
use crate::retrieval_path::RetrievalPath;
use crate::sql_path::SqlPath;
use crate::synthesizer::Synthesizer;
use crate::validator::{ValidationError, Validator};

/// The external capabilities a run depends on. All are shared across runs.
#[derive(Clone)]
pub struct Collaborators {
    pub router: Arc<dyn Router>,
    pub retriever: Arc<dyn Retriever>,
    pub generator: Arc<dyn QueryGenerator>,
    pub cleaner: Arc<dyn OutputCleaner>,
    pub executor: Arc<dyn QueryExecutor>,
    pub answer_model: Arc<dyn AnswerModel>,
}

/// Terminal failure record.
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    /// Node in flight (timeout, cancellation) or where the run gave up.
    pub node: Option<Node>,
    pub message: String,
    /// Only carried when the repair budget ran out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_draft: Option<DraftAnswer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    Answer {
        answer: AnswerValue,
        citations: Vec<Citation>,
        /// The query behind the answer, if one succeeded.
        sql: Option<String>,
        insufficient_data: bool,
    },
    Failed(RunFailure),
}

/// What a caller gets back for one question.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub question_id: String,
    pub mode: Option<Mode>,
    pub repair_attempts: u32,
    pub result: RunResult,
    pub history: Vec<HistoryEntry>,
}

impl RunOutput {
    pub fn is_success(&self) -> bool {
        matches!(self.result, RunResult::Answer { .. })
    }

    pub fn answer(&self) -> Option<&AnswerValue> {
        match &self.result {
            RunResult::Answer { answer, .. } => Some(answer),
            RunResult::Failed(_) => None,
        }
    }

    pub fn citations(&self) -> &[Citation] {
        match &self.result {
            RunResult::Answer { citations, .. } => citations,
            RunResult::Failed(_) => &[],
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match &self.result {
            RunResult::Failed(f) => Some(f),
            RunResult::Answer { .. } => None,
        }
    }
}

/// Which paths feed the synthesizer. In `RetrievalThenSql` the SQL path is
/// handed the retrieval output, so it cannot start before retrieval ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputPlan {
    RetrievalOnly,
    SqlOnly,
    RetrievalThenSql,
}

impl InputPlan {
    fn for_mode(mode: Mode) -> Self {
        match (mode.uses_retrieval(), mode.uses_sql()) {
            (true, false) => Self::RetrievalOnly,
            (false, _) => Self::SqlOnly,
            (true, true) => Self::RetrievalThenSql,
        }
    }
}

enum Interrupt {
    Timeout,
    Cancelled,
}

/// Drives one question at a time through the graph.
///
/// A runner holds no per-run state, so one instance can serve many
/// concurrent runs.
pub struct GraphRunner {
    router: Arc<dyn Router>,
    retrieval: RetrievalPath,
    sql: SqlPath,
    synthesizer: Synthesizer,
    validator: Validator,
    dispatcher: RepairDispatcher,
    run_timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl GraphRunner {
    pub fn new(collaborators: Collaborators, config: &GraphConfig) -> Self {
        let Collaborators {
            router,
            retriever,
            generator,
            cleaner,
            executor,
            answer_model,
        } = collaborators;

        Self {
            router,
            retrieval: RetrievalPath::new(retriever),
            sql: SqlPath::new(generator, cleaner, executor),
            synthesizer: Synthesizer::new(answer_model),
            validator: Validator::new(),
            dispatcher: RepairDispatcher::new(config.max_repair_attempts),
            run_timeout: Duration::from_secs(config.run_timeout_secs),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub async fn run(&self, question: Question) -> RunOutput {
        self.run_with_cancel(question, &CancellationToken::new()).await
    }

    /// Run one question to a terminal state. Cancelling `cancel` aborts the
    /// external call in flight and fails the run as `Cancelled`.
    pub async fn run_with_cancel(&self, question: Question, cancel: &CancellationToken) -> RunOutput {
        let deadline = Instant::now() + self.run_timeout;
        let question_id = question.id.clone();
        info!(question_id = %question_id, "Run started");
        self.publish(RunEvent::RunStarted {
            question_id: question_id.clone(),
        });

        let mut state = RunState::new(question);
        let result = match self.drive(&mut state, deadline, cancel).await {
            Ok(draft) => {
                let sql = state
                    .query_result
                    .as_ref()
                    .filter(|q| !q.is_failure())
                    .and_then(QueryOutcome::sql)
                    .map(str::to_string);
                info!(
                    question_id = %question_id,
                    repair_attempts = state.repair_attempts(),
                    citations = draft.citations.len(),
                    "Run finished"
                );
                RunResult::Answer {
                    answer: draft.value,
                    citations: draft.citations,
                    sql,
                    insufficient_data: draft.insufficient_data,
                }
            }
            Err(failure) => {
                error!(
                    question_id = %question_id,
                    kind = %failure.kind,
                    node = ?failure.node,
                    message = %failure.message,
                    "Run failed"
                );
                RunResult::Failed(failure)
            }
        };

        let output = RunOutput {
            question_id: question_id.clone(),
            mode: state.mode(),
            repair_attempts: state.repair_attempts(),
            history: state.take_history(),
            result,
        };
        self.publish(RunEvent::RunFinished {
            question_id,
            succeeded: output.is_success(),
            repair_attempts: output.repair_attempts,
        });
        output
    }

    async fn drive(
        &self,
        state: &mut RunState,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<DraftAnswer, RunFailure> {
        let mode = self.route(state, deadline, cancel).await?;

        match InputPlan::for_mode(mode) {
            InputPlan::RetrievalOnly => {
                state.retrieved_passages = self.retrieve(state, deadline, cancel).await?;
            }
            InputPlan::SqlOnly => {
                self.query(state, &[], None, deadline, cancel).await?;
            }
            InputPlan::RetrievalThenSql => {
                let passages = self.retrieve(state, deadline, cancel).await?;
                state.retrieved_passages = passages.clone();
                self.query(state, &passages, None, deadline, cancel).await?;
            }
        }

        let mut current = GraphState::Validating;
        let mut feedback: Option<String> = None;
        loop {
            current = match current {
                GraphState::Validating => {
                    let verdict = self
                        .synthesize_and_validate(state, feedback.take(), deadline, cancel)
                        .await?;
                    self.dispatcher.after_validation(
                        verdict.as_ref().map(|_| ()),
                        mode,
                        state.query_result.as_ref(),
                        state.repair_attempts(),
                    )
                }
                GraphState::RepairFormat => {
                    self.schedule_repair(state, current);
                    feedback = state.validation_error.as_ref().map(ToString::to_string);
                    self.dispatcher.after_repair(current)
                }
                GraphState::RepairQuery => {
                    self.schedule_repair(state, current);
                    let repair = state
                        .query_result
                        .as_ref()
                        .and_then(QueryOutcome::error)
                        .map(|error| QueryFeedback {
                            prior_query: state.generated_query.clone(),
                            error: error.clone(),
                        });
                    let context = if mode.uses_retrieval() {
                        state.retrieved_passages.clone()
                    } else {
                        Vec::new()
                    };
                    self.query(state, &context, repair, deadline, cancel).await?;
                    self.dispatcher.after_repair(current)
                }
                GraphState::End => {
                    return state.draft_answer.clone().ok_or_else(|| RunFailure {
                        kind: FailureKind::FormatMismatch,
                        node: Some(Node::Validator),
                        message: "validation passed without a draft".into(),
                        last_draft: None,
                        last_error: None,
                    });
                }
                GraphState::Failed(kind) => return Err(self.exhausted(state, kind)),
            };
        }
    }

    async fn route(
        &self,
        state: &mut RunState,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Mode, RunFailure> {
        let started = self.begin(state, Node::Router);
        let classified = self
            .guard(self.router.classify(&state.question.text), deadline, cancel)
            .await;

        let (mode, fallback) = match classified {
            Err(interrupt) => return Err(self.interrupted(state, Node::Router, started, interrupt)),
            Ok(Ok(mode)) => {
                self.finish(state, Node::Router, started, format!("mode={}", mode));
                (mode, false)
            }
            Ok(Err(e)) => {
                warn!(
                    question_id = %state.question.id,
                    error = %e,
                    "Routing ambiguous, falling back to hybrid"
                );
                self.finish(
                    state,
                    Node::Router,
                    started,
                    format!("{}: {}; mode=hybrid", FailureKind::RoutingAmbiguous, e),
                );
                (Mode::Hybrid, true)
            }
        };

        state.set_mode(mode);
        self.publish(RunEvent::Routed {
            question_id: state.question.id.clone(),
            mode,
            fallback,
        });
        Ok(mode)
    }

    async fn retrieve(
        &self,
        state: &mut RunState,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<Passage>, RunFailure> {
        let started = self.begin(state, Node::Retrieval);
        let retrieved = self
            .guard(self.retrieval.retrieve(&state.question.text), deadline, cancel)
            .await;

        match retrieved {
            Err(interrupt) => Err(self.interrupted(state, Node::Retrieval, started, interrupt)),
            Ok(Ok(passages)) => {
                self.finish(state, Node::Retrieval, started, format!("{} passages", passages.len()));
                Ok(passages)
            }
            Ok(Err(e)) => {
                self.finish(state, Node::Retrieval, started, format!("unavailable: {}", e));
                Err(RunFailure {
                    kind: FailureKind::RetrievalUnavailable,
                    node: Some(Node::Retrieval),
                    message: e.to_string(),
                    last_draft: None,
                    last_error: None,
                })
            }
        }
    }

    async fn query(
        &self,
        state: &mut RunState,
        context: &[Passage],
        feedback: Option<QueryFeedback>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), RunFailure> {
        let started = self.begin(state, Node::Sql);
        let attempted = self
            .guard(
                self.sql.generate_and_execute(&state.question.text, context, feedback),
                deadline,
                cancel,
            )
            .await;

        let outcome = match attempted {
            Ok(outcome) => outcome,
            Err(interrupt) => return Err(self.interrupted(state, Node::Sql, started, interrupt)),
        };
        let summary = match &outcome {
            QueryOutcome::Rows { rows, .. } => format!("{} rows", rows.len()),
            QueryOutcome::Failed { error, .. } => {
                warn!(question_id = %state.question.id, error = %error, "SQL attempt failed");
                format!("failed: {}", error)
            }
        };
        state.set_query(outcome);
        self.finish(state, Node::Sql, started, summary);
        Ok(())
    }

    async fn synthesize_and_validate(
        &self,
        state: &mut RunState,
        feedback: Option<String>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Result<(), ValidationError>, RunFailure> {
        state.validation_error = None;

        let started = self.begin(state, Node::Synthesizer);
        let synthesized = self
            .guard(
                self.synthesizer.synthesize(
                    &state.question,
                    &state.retrieved_passages,
                    state.query_result.as_ref(),
                    feedback,
                ),
                deadline,
                cancel,
            )
            .await;

        let verdict = match synthesized {
            Err(interrupt) => {
                return Err(self.interrupted(state, Node::Synthesizer, started, interrupt))
            }
            Ok(Err(e)) => {
                warn!(question_id = %state.question.id, error = %e, "Answer model failed");
                self.finish(state, Node::Synthesizer, started, format!("failed: {}", e));
                Err(ValidationError::SynthesisFailed {
                    detail: e.to_string(),
                })
            }
            Ok(Ok(draft)) => {
                let summary = if draft.insufficient_data {
                    "insufficient data".to_string()
                } else {
                    format!("{} with {} citations", draft.value.type_name(), draft.citations.len())
                };
                self.finish(state, Node::Synthesizer, started, summary);

                let started = self.begin(state, Node::Validator);
                let verdict = self
                    .validator
                    .validate(&draft, &state.question.expected_format);
                state.draft_answer = Some(draft);
                let summary = match &verdict {
                    Ok(()) => "pass".to_string(),
                    Err(e) => format!("fail: {}", e),
                };
                self.finish(state, Node::Validator, started, summary);
                verdict
            }
        };

        if let Err(e) = &verdict {
            state.validation_error = Some(e.clone());
        }
        Ok(verdict)
    }

    fn schedule_repair(&self, state: &mut RunState, target: GraphState) {
        let attempt = state.count_repair();
        let (node, label) = match target {
            GraphState::RepairQuery => (Node::Sql, "query"),
            _ => (Node::Synthesizer, "format"),
        };
        let reason = repair_reason(target, state.query_result.as_ref())
            .map(|k| k.as_str())
            .unwrap_or("unknown");

        warn!(
            question_id = %state.question.id,
            attempt,
            max = self.dispatcher.max_attempts(),
            reason,
            "Scheduling {} repair",
            label
        );
        state.push_history(HistoryEntry {
            node: Node::Repair,
            outcome: format!("{} repair {} ({})", label, attempt, reason),
            elapsed_ms: 0,
        });
        self.publish(RunEvent::RepairScheduled {
            question_id: state.question.id.clone(),
            attempt,
            target: node.as_str(),
        });
    }

    fn exhausted(&self, state: &RunState, kind: FailureKind) -> RunFailure {
        let mut last_error = state.validation_error.as_ref().map(ToString::to_string);
        if let Some(query_error) = state.query_result.as_ref().and_then(QueryOutcome::error) {
            let query_error = format!("last query error: {}", query_error);
            last_error = Some(match last_error {
                Some(e) => format!("{}; {}", e, query_error),
                None => query_error,
            });
        }
        RunFailure {
            kind,
            node: Some(Node::Validator),
            message: format!(
                "no valid answer after {} repair attempts",
                state.repair_attempts()
            ),
            last_draft: state.draft_answer.clone(),
            last_error,
        }
    }

    /// Race `fut` against the run deadline and the cancellation token.
    async fn guard<F: Future>(
        &self,
        fut: F,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            res = tokio::time::timeout_at(deadline, fut) => res.map_err(|_| Interrupt::Timeout),
        }
    }

    fn interrupted(
        &self,
        state: &mut RunState,
        node: Node,
        started: std::time::Instant,
        interrupt: Interrupt,
    ) -> RunFailure {
        let (kind, message) = match interrupt {
            Interrupt::Timeout => (
                FailureKind::Timeout,
                format!("run exceeded {:?} while {} was running", self.run_timeout, node),
            ),
            Interrupt::Cancelled => (
                FailureKind::Cancelled,
                format!("run cancelled while {} was running", node),
            ),
        };
        self.finish(state, node, started, kind.as_str());
        RunFailure {
            kind,
            node: Some(node),
            message,
            last_draft: None,
            last_error: None,
        }
    }

    fn begin(&self, state: &RunState, node: Node) -> std::time::Instant {
        debug!(question_id = %state.question.id, node = %node, "Node started");
        self.publish(RunEvent::NodeStarted {
            question_id: state.question.id.clone(),
            node: node.as_str(),
        });
        std::time::Instant::now()
    }

    fn finish(
        &self,
        state: &mut RunState,
        node: Node,
        started: std::time::Instant,
        outcome: impl Into<String>,
    ) {
        let outcome = outcome.into();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            question_id = %state.question.id,
            node = %node,
            elapsed_ms,
            outcome = %outcome,
            "Node finished"
        );
        self.publish(RunEvent::NodeFinished {
            question_id: state.question.id.clone(),
            node: node.as_str(),
            outcome: outcome.clone(),
            elapsed_ms,
        });
        state.push_history(HistoryEntry {
            node,
            outcome,
            elapsed_ms,
        });
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
