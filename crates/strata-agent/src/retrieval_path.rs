use std::sync::Arc;

use tracing::debug;

use strata_core::error::Result;
use strata_core::traits::Retriever;
use strata_core::types::Passage;

/// Wraps the retriever and normalises what it returns.
///
/// No retries here: an error means the index is unavailable and ends the run.
pub struct RetrievalPath {
    retriever: Arc<dyn Retriever>,
}

impl RetrievalPath {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<Passage>> {
        let passages = self.retriever.retrieve(question).await?;
        let shaped = shape(passages);
        debug!(passages = shaped.len(), "Retrieval finished");
        Ok(shaped)
    }
}

/// Descending score order, first occurrence of each id, no NaN scores.
fn shape(passages: Vec<Passage>) -> Vec<Passage> {
    let mut out: Vec<Passage> = Vec::with_capacity(passages.len());
    for p in passages {
        if p.score.is_nan() || out.iter().any(|seen| seen.id == p.id) {
            continue;
        }
        out.push(p);
    }
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out
}
