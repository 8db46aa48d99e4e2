//! Question routers.
//!
//! An error from a router is never fatal: the graph falls back to
//! [`Mode::Hybrid`] and records the ambiguity in run history.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use strata_core::config::ModelConfig;
use strata_core::error::{Result, StrataError};
use strata_core::traits::Router;
use strata_core::types::Mode;
use strata_llm::{complete, ChatMessage, LlmClient};

/// Phrases naming a KPI whose definition lives in the docs but whose value
/// comes from the database.
const KPI_PHRASES: &[&str] = &[
    "average order value",
    "aov",
    "gross margin",
    "kpi",
];

/// Vocabulary answered from documents alone.
const DOC_TERMS: &[&str] = &["policy", "policies", "calendar", "return window", "returns"];

/// Vocabulary that implies aggregation over the dataset.
const DATA_TERMS: &[&str] = &[
    "revenue",
    "total",
    "top",
    "highest",
    "quantity",
    "how many",
    "sum",
    "count",
    "average",
    "customer",
    "1997",
    "1998",
];

/// Deterministic vocabulary router.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordRouter;

impl KeywordRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, question: &str) -> Mode {
        let lower = question.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mentions = |term: &str| {
            if term.contains(' ') {
                lower.contains(term)
            } else {
                words.contains(&term)
            }
        };

        let kpi = KPI_PHRASES.iter().any(|t| mentions(t));
        let docs = DOC_TERMS.iter().any(|t| mentions(t));
        let data = DATA_TERMS.iter().any(|t| mentions(t));

        if kpi || (docs && data) {
            Mode::Hybrid
        } else if docs {
            Mode::Rag
        } else {
            Mode::Sql
        }
    }
}

impl Router for KeywordRouter {
    fn classify(&self, question: &str) -> BoxFuture<'_, Result<Mode>> {
        let mode = self.classify_text(question);
        Box::pin(async move { Ok(mode) })
    }
}

const ROUTER_PROMPT: &str = "You classify retail analytics questions. \
Answer `rag` when the answer is in company documents (policies, marketing calendar, KPI definitions), \
`sql` when it needs only the sales database, and `hybrid` when it needs both. \
Reply with exactly one word: rag, sql, or hybrid.";

/// Asks the model for a route label.
pub struct LlmRouter {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmRouter {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }
}

impl Router for LlmRouter {
    fn classify(&self, question: &str) -> BoxFuture<'_, Result<Mode>> {
        let messages = vec![
            ChatMessage::system(ROUTER_PROMPT),
            ChatMessage::user(question),
        ];
        Box::pin(async move {
            let reply = complete(self.client.as_ref(), &self.config, messages).await?;
            debug!(reply = %reply.trim(), "Router reply");
            reply.parse::<Mode>().map_err(StrataError::LlmParse)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, BoxStream};
    use strata_llm::StreamDelta;

    #[test]
    fn keyword_routes() {
        let router = KeywordRouter::new();
        assert_eq!(
            router.classify_text("According to the product policy, what is the return window for unopened Beverages?"),
            Mode::Rag
        );
        assert_eq!(router.classify_text("What is the marketing calendar theme for June?"), Mode::Rag);
        assert_eq!(
            router.classify_text("Using the AOV definition from the KPI docs, what was the Average Order Value in December 1997?"),
            Mode::Hybrid
        );
        assert_eq!(
            router.classify_text("During Summer Beverages 1997 as defined in the marketing calendar, which category had the highest total quantity?"),
            Mode::Hybrid
        );
        assert_eq!(
            router.classify_text("Top 3 products by total revenue all-time."),
            Mode::Sql
        );
    }

    #[test]
    fn short_words_match_whole_tokens_only() {
        // "saovine" contains "aov" but is not the KPI.
        assert_eq!(KeywordRouter::new().classify_text("List saovine orders"), Mode::Sql);
    }

    struct ReplyClient(&'static str);

    impl LlmClient for ReplyClient {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let text = self.0.to_string();
            Box::pin(async move {
                let deltas: Vec<Result<StreamDelta>> = vec![Ok(StreamDelta::TextDelta(text))];
                Ok(Box::pin(stream::iter(deltas)) as BoxStream<'_, _>)
            })
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            provider: "ollama".into(),
            model_id: "phi3.5".into(),
            api_key: None,
            base_url: None,
            max_tokens: 64,
            temperature: 0.0,
            retry: None,
        }
    }

    #[tokio::test]
    async fn llm_router_parses_label() {
        let router = LlmRouter::new(Arc::new(ReplyClient("Route: SQL.")), config());
        assert_eq!(router.classify("How many orders?").await.unwrap(), Mode::Sql);
    }

    #[tokio::test]
    async fn llm_router_rejects_garbage() {
        let router = LlmRouter::new(Arc::new(ReplyClient("I am not sure")), config());
        let err = router.classify("?").await.unwrap_err();
        assert!(matches!(err, StrataError::LlmParse(_)));
    }
}
