use std::sync::Arc;

use tracing::debug;

use strata_core::error::Result;
use strata_core::traits::{AnswerModel, SynthesisRequest};
use strata_core::types::{
    AnswerValue, Citation, DraftAnswer, Passage, QueryOutcome, Question, INSUFFICIENT_DATA,
};

use crate::coerce::coerce;

/// Label the answer model uses to cite the query result.
pub const SQL_SOURCE: &str = "sql";

/// Merges passages and query rows into a typed, cited draft answer.
pub struct Synthesizer {
    model: Arc<dyn AnswerModel>,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn AnswerModel>) -> Self {
        Self { model }
    }

    /// Produce one draft.
    ///
    /// With no passages and no rows the model is not consulted: the draft
    /// either signals insufficient data or, when the query failed, carries
    /// no citation so validation routes it back to the query path.
    pub async fn synthesize(
        &self,
        question: &Question,
        passages: &[Passage],
        query: Option<&QueryOutcome>,
        feedback: Option<String>,
    ) -> Result<DraftAnswer> {
        let rows = query.and_then(QueryOutcome::rows).filter(|r| !r.is_empty());

        if passages.is_empty() && rows.is_none() {
            if let Some(error) = query.and_then(QueryOutcome::error) {
                let raw = format!("query failed: {}", error);
                return Ok(DraftAnswer::new(AnswerValue::Text(String::new()), vec![], raw));
            }
            return Ok(DraftAnswer::insufficient_data());
        }

        let sql = rows.and(query.and_then(QueryOutcome::sql)).map(str::to_string);
        let request = SynthesisRequest {
            question: question.text.clone(),
            expected_format: question.expected_format.clone(),
            passages: passages.to_vec(),
            sql: sql.clone(),
            rows: rows.cloned(),
            feedback,
        };

        let answer = self.model.answer(request).await?;
        let citations = resolve_citations(
            &answer.citations,
            passages,
            sql.as_deref().zip(rows.map(|r| r.len())),
        );

        if answer.answer.trim().eq_ignore_ascii_case(INSUFFICIENT_DATA) {
            let mut draft = DraftAnswer::insufficient_data();
            draft.citations = citations;
            draft.raw = answer.answer;
            return Ok(draft);
        }

        let value = coerce(&answer.answer, &question.expected_format, &question.hints)
            .unwrap_or_else(|| AnswerValue::Text(answer.answer.trim().to_string()));
        debug!(
            question_id = %question.id,
            value_type = value.type_name(),
            citations = citations.len(),
            "Draft synthesized"
        );

        Ok(DraftAnswer::new(value, citations, answer.answer))
    }
}

/// Keep only citations that point at sources actually provided. If the model
/// cites nothing usable, every provided source is attached.
fn resolve_citations(
    claimed: &[String],
    passages: &[Passage],
    query: Option<(&str, usize)>,
) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();

    for label in claimed {
        let label = label.trim();
        if let Some(p) = passages.iter().find(|p| p.id == label) {
            push_unique(&mut out, Citation::passage(&p.id));
        } else if let Some((sql, count)) = query {
            let lower = label.to_lowercase();
            if lower == SQL_SOURCE || lower == "query" || label == sql {
                push_unique(&mut out, Citation::query(sql, count));
            }
        }
    }

    if out.is_empty() {
        for p in passages {
            push_unique(&mut out, Citation::passage(&p.id));
        }
        if let Some((sql, count)) = query {
            push_unique(&mut out, Citation::query(sql, count));
        }
    }
    out
}

fn push_unique(out: &mut Vec<Citation>, citation: Citation) {
    if !out.contains(&citation) {
        out.push(citation);
    }
}
