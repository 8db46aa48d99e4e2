use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use strata_core::error::{Result, StrataError};
use strata_core::traits::*;
use strata_core::types::*;

use crate::CallLog;

async fn pause(delay: Option<Duration>) {
    if let Some(d) = delay {
        tokio::time::sleep(d).await;
    }
}

/// Router that always answers with a fixed label, or fails.
pub struct FixedRouter {
    mode: Option<Mode>,
    log: CallLog,
}

impl FixedRouter {
    pub fn new(mode: Mode) -> Self {
        Self { mode: Some(mode), log: CallLog::new() }
    }

    /// A router that never produces a valid label.
    pub fn ambiguous() -> Self {
        Self { mode: None, log: CallLog::new() }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }
}

impl Router for FixedRouter {
    fn classify(&self, _question: &str) -> BoxFuture<'_, Result<Mode>> {
        Box::pin(async move {
            self.log.start("classify");
            self.log.end("classify");
            self.mode
                .ok_or_else(|| StrataError::LlmParse("no valid route label".into()))
        })
    }
}

/// Retriever returning the same passages for every question.
pub struct StaticRetriever {
    passages: Vec<Passage>,
    unavailable: bool,
    delay: Option<Duration>,
    log: CallLog,
}

impl StaticRetriever {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self { passages, unavailable: false, delay: None, log: CallLog::new() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// A retriever whose index is unavailable.
    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::empty() }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }
}

impl Retriever for StaticRetriever {
    fn retrieve(&self, _question: &str) -> BoxFuture<'_, Result<Vec<Passage>>> {
        Box::pin(async move {
            self.log.start("retrieve");
            pause(self.delay).await;
            self.log.end("retrieve");
            if self.unavailable {
                return Err(StrataError::Retrieval("index unavailable".into()));
            }
            Ok(self.passages.clone())
        })
    }
}

/// Query generator answering from a script, then repeating a fallback.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String>>>,
    fallback: String,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
    log: CallLog,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: "SELECT 1".into(),
            requests: Mutex::new(Vec::new()),
            delay: None,
            log: CallLog::new(),
        }
    }

    /// Always returns `sql`.
    pub fn always(sql: &str) -> Self {
        Self::new(Vec::new()).with_fallback(sql)
    }

    pub fn with_fallback(mut self, sql: &str) -> Self {
        self.fallback = sql.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl QueryGenerator for ScriptedGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.log.start("generate");
            self.requests.lock().unwrap().push(request);
            pause(self.delay).await;
            let next = self.script.lock().unwrap().pop_front();
            self.log.end("generate");
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        })
    }
}

/// Executor answering from a script, then repeating a fallback.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<std::result::Result<QueryRows, QueryError>>>,
    fallback: std::result::Result<QueryRows, QueryError>,
    queries: Mutex<Vec<String>>,
    delay: Option<Duration>,
    log: CallLog,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<std::result::Result<QueryRows, QueryError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Ok(QueryRows::default()),
            queries: Mutex::new(Vec::new()),
            delay: None,
            log: CallLog::new(),
        }
    }

    /// Every execution fails with the given error.
    pub fn always_failing(error: QueryError) -> Self {
        let mut exec = Self::new(Vec::new());
        exec.fallback = Err(error);
        exec
    }

    /// Every execution returns `rows`.
    pub fn always(rows: QueryRows) -> Self {
        let mut exec = Self::new(Vec::new());
        exec.fallback = Ok(rows);
        exec
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl QueryExecutor for ScriptedExecutor {
    fn execute(&self, sql: &str) -> BoxFuture<'_, std::result::Result<QueryRows, QueryError>> {
        let sql = sql.to_string();
        Box::pin(async move {
            self.log.start("execute");
            self.queries.lock().unwrap().push(sql);
            pause(self.delay).await;
            let next = self.script.lock().unwrap().pop_front();
            self.log.end("execute");
            next.unwrap_or_else(|| self.fallback.clone())
        })
    }
}

/// Cleaner that only trims whitespace.
#[derive(Debug, Default)]
pub struct TrimCleaner;

impl OutputCleaner for TrimCleaner {
    fn clean(&self, raw: &str) -> String {
        raw.trim().to_string()
    }
}

/// Answer model answering from a script, then repeating a fallback.
pub struct ScriptedAnswerModel {
    script: Mutex<VecDeque<Result<ModelAnswer>>>,
    fallback: ModelAnswer,
    requests: Mutex<Vec<SynthesisRequest>>,
    log: CallLog,
}

impl ScriptedAnswerModel {
    pub fn new(script: Vec<Result<ModelAnswer>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: ModelAnswer::default(),
            requests: Mutex::new(Vec::new()),
            log: CallLog::new(),
        }
    }

    /// Always answers `answer` citing `citations`.
    pub fn always(answer: &str, citations: &[&str]) -> Self {
        let mut model = Self::new(Vec::new());
        model.fallback = model_answer(answer, citations);
        model
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl AnswerModel for ScriptedAnswerModel {
    fn answer(&self, request: SynthesisRequest) -> BoxFuture<'_, Result<ModelAnswer>> {
        Box::pin(async move {
            self.log.start("synthesize");
            self.requests.lock().unwrap().push(request);
            let next = self.script.lock().unwrap().pop_front();
            self.log.end("synthesize");
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        })
    }
}

pub fn model_answer(answer: &str, citations: &[&str]) -> ModelAnswer {
    ModelAnswer {
        answer: answer.to_string(),
        citations: citations.iter().map(|c| c.to_string()).collect(),
    }
}
