use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use strata_agent::batch::{read_questions, write_records};
use strata_agent::{BatchRunner, Collaborators, GraphRunner};
use strata_core::config::GraphConfig;
use strata_core::error::Result;
use strata_core::traits::Retriever;
use strata_core::types::{Mode, Passage};
use strata_test_utils::*;

/// Tracks how many retrievals overlap; slower for lower-numbered questions.
#[derive(Default)]
struct ProbeRetriever {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Retriever for ProbeRetriever {
    fn retrieve(&self, question: &str) -> BoxFuture<'_, Result<Vec<Passage>>> {
        let delay = 60u64.saturating_sub(question.len() as u64 * 5);
        let id = format!("doc::{}", question);
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![Passage::new(id, "text", 1.0)])
        })
    }
}

fn runner(retriever: Arc<ProbeRetriever>) -> Arc<GraphRunner> {
    let collaborators = Collaborators {
        router: Arc::new(FixedRouter::new(Mode::Rag)),
        retriever,
        generator: Arc::new(ScriptedGenerator::always("SELECT 1")),
        cleaner: Arc::new(TrimCleaner),
        executor: Arc::new(ScriptedExecutor::always(Default::default())),
        answer_model: Arc::new(ScriptedAnswerModel::always("ok", &[])),
    };
    Arc::new(GraphRunner::new(collaborators, &GraphConfig::default()))
}

#[tokio::test]
async fn outputs_keep_input_order_under_bounded_concurrency() {
    let probe = Arc::new(ProbeRetriever::default());
    let batch = BatchRunner::new(runner(probe.clone()), 2);
    let questions: Vec<_> = ["a", "bb", "ccc", "dddd", "eeeee", "ffffff"]
        .iter()
        .enumerate()
        .map(|(i, text)| question(&format!("q{}", i), text, "str"))
        .collect();

    let outputs = batch.run_all(questions, &CancellationToken::new()).await;

    let ids: Vec<_> = outputs.iter().map(|o| o.question_id.as_str()).collect();
    assert_eq!(ids, vec!["q0", "q1", "q2", "q3", "q4", "q5"]);
    assert!(outputs.iter().all(|o| o.is_success()));
    assert!(probe.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn jsonl_round_trip_through_batch() {
    let input = r#"{"id": "r1", "question": "a", "format_hint": "str"}
{"id": "r2", "question": "bb", "format_hint": "str"}
"#;
    let questions = read_questions(input.as_bytes()).unwrap();
    let batch = BatchRunner::new(runner(Arc::new(ProbeRetriever::default())), 4);
    let outputs = batch.run_all(questions, &CancellationToken::new()).await;

    let mut buf = Vec::new();
    write_records(&mut buf, outputs).unwrap();
    let lines: Vec<serde_json::Value> = String::from_utf8(buf)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], "r1");
    assert_eq!(lines[0]["final_answer"], "ok");
    assert_eq!(lines[0]["citations"], serde_json::json!(["doc::a"]));
    assert_eq!(lines[0]["mode"], "rag");
    assert_eq!(lines[1]["id"], "r2");
}

#[tokio::test]
async fn cancelled_batch_reports_every_question() {
    let probe = Arc::new(ProbeRetriever::default());
    let batch = BatchRunner::new(runner(probe), 1);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outputs = batch
        .run_all(vec![question("x", "a", "str"), question("y", "b", "str")], &cancel)
        .await;

    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().all(|o| !o.is_success()));
}
