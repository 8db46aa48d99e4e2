//! Model-backed query generation and answer synthesis.
//!
//! Prompts are pure functions of the request, so a retry with new feedback
//! never sees leftovers from an earlier call.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use strata_core::config::ModelConfig;
use strata_core::error::Result;
use strata_core::traits::{
    AnswerModel, GenerationRequest, ModelAnswer, QueryGenerator, SynthesisRequest,
};
use strata_llm::{complete, ChatMessage, LlmClient};

use crate::synthesizer::SQL_SOURCE;

/// Rows beyond this are left out of synthesis prompts.
const MAX_PROMPT_ROWS: usize = 50;

const SQL_SYSTEM_PROMPT: &str = "You convert questions about a retail sales database into a single SQLite query.\n\
Rules:\n\
- Use only tables and columns that appear in the schema.\n\
- Quote table names containing spaces, e.g. \"Order Details\".\n\
- Revenue is SUM(UnitPrice * Quantity * (1 - Discount)) over order lines.\n\
- Return only the SQL statement, without explanation.";

/// Natural language to SQL through a chat model, grounded in the schema.
pub struct LlmQueryGenerator {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
    schema: String,
}

impl LlmQueryGenerator {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig, schema: impl Into<String>) -> Self {
        Self {
            client,
            config,
            schema: schema.into(),
        }
    }

    pub fn build_messages(&self, request: &GenerationRequest) -> Vec<ChatMessage> {
        let mut prompt = format!("Schema:\n{}\n\n", self.schema);

        if !request.context.is_empty() {
            prompt.push_str("Reference documents (definitions, dates, categories):\n");
            for p in &request.context {
                prompt.push_str(&format!("[{}] {}\n", p.id, p.text));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!("Question: {}\n", request.question));

        if let Some(feedback) = &request.feedback {
            prompt.push_str("\nThe previous query failed.\n");
            if let Some(prior) = &feedback.prior_query {
                prompt.push_str(&format!("Previous query: {}\n", prior));
            }
            prompt.push_str(&format!("Error: {}\nWrite a corrected query.\n", feedback.error.message));
        }

        vec![ChatMessage::system(SQL_SYSTEM_PROMPT), ChatMessage::user(prompt)]
    }
}

impl QueryGenerator for LlmQueryGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
        let messages = self.build_messages(&request);
        Box::pin(async move {
            let text = complete(self.client.as_ref(), &self.config, messages).await?;
            debug!(chars = text.len(), repair = request.feedback.is_some(), "Query generated");
            Ok(text)
        })
    }
}

const ANSWER_SYSTEM_PROMPT: &str = "You answer retail analytics questions using only the sources given.\n\
Respond with a JSON object: {\"answer\": <value>, \"citations\": [<source labels>]}.\n\
- The answer must match the requested format exactly (a bare number for int/float, a JSON array for lists).\n\
- Cite document sources by their bracketed id and the query result as \"sql\".\n\
- If the sources do not contain the answer, reply {\"answer\": \"insufficient data\", \"citations\": []}.";

/// Typed answer synthesis through a chat model.
pub struct LlmAnswerModel {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmAnswerModel {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn build_messages(&self, request: &SynthesisRequest) -> Vec<ChatMessage> {
        let mut prompt = format!(
            "Question: {}\nFormat: {}\n\n",
            request.question,
            request.expected_format.hint()
        );
        if request.expected_format.is_numeric() {
            prompt.push_str("Give the answer as a bare number, without units or thousands separators.\n\n");
        }

        if !request.passages.is_empty() {
            prompt.push_str("Documents:\n");
            for p in &request.passages {
                prompt.push_str(&format!("[{}] {}\n", p.id, p.text));
            }
            prompt.push('\n');
        }

        if let (Some(sql), Some(rows)) = (&request.sql, &request.rows) {
            let shown: Vec<&strata_core::types::Row> = rows.rows.iter().take(MAX_PROMPT_ROWS).collect();
            let table = serde_json::to_string(&shown).unwrap_or_default();
            prompt.push_str(&format!("[{}] {}\nRows ({} total): {}\n\n", SQL_SOURCE, sql, rows.len(), table));
        }

        if let Some(feedback) = &request.feedback {
            prompt.push_str(&format!("Your previous answer was rejected: {}\n", feedback));
        }

        vec![ChatMessage::system(ANSWER_SYSTEM_PROMPT), ChatMessage::user(prompt)]
    }
}

impl AnswerModel for LlmAnswerModel {
    fn answer(&self, request: SynthesisRequest) -> BoxFuture<'_, Result<ModelAnswer>> {
        let messages = self.build_messages(&request);
        Box::pin(async move {
            let text = complete(self.client.as_ref(), &self.config, messages).await?;
            Ok(parse_answer(&text))
        })
    }
}

/// Read `{"answer": ..., "citations": [...]}` out of model text. Anything
/// unparseable becomes an uncited answer holding the whole text.
pub fn parse_answer(text: &str) -> ModelAnswer {
    let object = text
        .find('{')
        .zip(text.rfind('}'))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| serde_json::from_str::<Value>(&text[start..=end]).ok())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        });

    let Some(mut map) = object else {
        return ModelAnswer {
            answer: text.trim().to_string(),
            citations: Vec::new(),
        };
    };

    let answer = match map.remove("answer").or_else(|| map.remove("final_answer")) {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let citations = match map.remove("citations") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|c| match c {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|c| c.trim().to_string()).collect(),
        _ => Vec::new(),
    };

    ModelAnswer { answer, citations }
}
