//! Batch execution over a JSONL question file.

use std::io::{BufRead, Write};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use strata_core::error::{FailureKind, Result, StrataError};
use strata_core::types::{AnswerValue, DraftAnswer, Mode, Question};

use crate::graph::{GraphRunner, HistoryEntry, Node, RunFailure, RunOutput, RunResult};

/// One line of batch output.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutputRecord {
    Answer {
        id: String,
        final_answer: AnswerValue,
        sql: String,
        citations: Vec<String>,
        mode: Mode,
        repair_attempts: u32,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        insufficient_data: bool,
    },
    Failure {
        id: String,
        failure_kind: FailureKind,
        diagnostics: Diagnostics,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub node: Option<Node>,
    pub message: String,
    pub mode: Option<Mode>,
    pub repair_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_draft: Option<DraftAnswer>,
    pub history: Vec<HistoryEntry>,
}

impl From<RunOutput> for OutputRecord {
    fn from(output: RunOutput) -> Self {
        match output.result {
            RunResult::Answer {
                answer,
                citations,
                sql,
                insufficient_data,
            } => Self::Answer {
                id: output.question_id,
                final_answer: answer,
                sql: sql.unwrap_or_default(),
                citations: citations.iter().map(ToString::to_string).collect(),
                mode: output.mode.unwrap_or(Mode::Hybrid),
                repair_attempts: output.repair_attempts,
                insufficient_data,
            },
            RunResult::Failed(failure) => Self::Failure {
                id: output.question_id,
                failure_kind: failure.kind,
                diagnostics: Diagnostics {
                    node: failure.node,
                    message: failure.message,
                    mode: output.mode,
                    repair_attempts: output.repair_attempts,
                    last_error: failure.last_error,
                    last_draft: failure.last_draft,
                    history: output.history,
                },
            },
        }
    }
}

/// Runs many questions, one tokio task each, with at most `concurrency`
/// in flight. Results come back in input order.
pub struct BatchRunner {
    runner: Arc<GraphRunner>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(runner: Arc<GraphRunner>, concurrency: usize) -> Self {
        Self {
            runner,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run_all(&self, questions: Vec<Question>, cancel: &CancellationToken) -> Vec<RunOutput> {
        let total = questions.len();
        info!(total, concurrency = self.concurrency, "Batch started");
        let permits = Arc::new(Semaphore::new(self.concurrency));

        let handles: Vec<_> = questions
            .into_iter()
            .map(|question| {
                let id = question.id.clone();
                let runner = Arc::clone(&self.runner);
                let permits = Arc::clone(&permits);
                let cancel = cancel.clone();
                let handle = tokio::spawn(async move {
                    // The semaphore is never closed, so acquire only fails if it is dropped.
                    let _permit = permits.acquire_owned().await.ok();
                    runner.run_with_cancel(question, &cancel).await
                });
                (id, handle)
            })
            .collect();

        let mut outputs = Vec::with_capacity(total);
        for (id, handle) in handles {
            match handle.await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    error!(question_id = %id, error = %e, "Run task aborted");
                    outputs.push(aborted(id, e.to_string()));
                }
            }
        }

        let succeeded = outputs.iter().filter(|o| o.is_success()).count();
        info!(total, succeeded, failed = total - succeeded, "Batch finished");
        outputs
    }
}

fn aborted(id: String, message: String) -> RunOutput {
    RunOutput {
        question_id: id,
        mode: None,
        repair_attempts: 0,
        result: RunResult::Failed(RunFailure {
            kind: FailureKind::Cancelled,
            node: None,
            message: format!("run task aborted: {}", message),
            last_draft: None,
            last_error: None,
        }),
        history: Vec::new(),
    }
}

/// Parse a JSONL question file: one `{"id", "question", "format_hint"}`
/// object per line, blank lines ignored.
pub fn read_questions(reader: impl BufRead) -> Result<Vec<Question>> {
    let mut questions = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let question: Question = serde_json::from_str(&line).map_err(|e| {
            StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("line {}: {}", n + 1, e),
            ))
        })?;
        questions.push(question);
    }
    Ok(questions)
}

/// Write one JSON object per output, in order.
pub fn write_records(mut writer: impl Write, outputs: Vec<RunOutput>) -> Result<()> {
    for output in outputs {
        let record = OutputRecord::from(output);
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
