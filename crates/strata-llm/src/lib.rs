pub mod openai;
pub mod retry;
pub mod streaming;
pub mod types;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};

use strata_core::config::ModelConfig;
use strata_core::error::Result;

pub use openai::OpenAiClient;
pub use retry::RetryingClient;
pub use types::{ChatMessage, Role, StopReason, StreamDelta};

/// Streaming chat-completion client.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Create an LLM client for the configured provider, wrapped with retries
/// when the config carries a `[model.retry]` section.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    // Every supported provider speaks the OpenAI-compatible protocol.
    let client = Box::new(OpenAiClient::new());
    match &config.retry {
        Some(retry) => Box::new(RetryingClient::new(client, retry.clone())),
        None => client,
    }
}

/// Run a chat request to completion and return the concatenated text.
pub async fn complete(
    llm: &dyn LlmClient,
    config: &ModelConfig,
    messages: Vec<ChatMessage>,
) -> Result<String> {
    let mut stream = llm.chat_stream(config, messages).await?;
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        if let StreamDelta::TextDelta(chunk) = delta? {
            text.push_str(&chunk);
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::error::StrataError;

    struct CannedClient {
        deltas: Vec<&'static str>,
        fail_mid_stream: bool,
    }

    impl LlmClient for CannedClient {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            Box::pin(async move {
                let mut items: Vec<Result<StreamDelta>> = self
                    .deltas
                    .iter()
                    .map(|d| Ok(StreamDelta::TextDelta(d.to_string())))
                    .collect();
                if self.fail_mid_stream {
                    items.push(Err(StrataError::LlmStream("connection reset".into())));
                }
                items.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));
                Ok(futures::stream::iter(items).boxed())
            })
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            provider: "ollama".into(),
            model_id: "m".into(),
            api_key: None,
            base_url: None,
            max_tokens: 256,
            temperature: 0.0,
            retry: None,
        }
    }

    #[tokio::test]
    async fn complete_concatenates_text() {
        let client = CannedClient {
            deltas: vec!["SELECT ", "1", ";"],
            fail_mid_stream: false,
        };
        let text = complete(&client, &config(), vec![ChatMessage::user("q")])
            .await
            .unwrap();
        assert_eq!(text, "SELECT 1;");
    }

    #[tokio::test]
    async fn complete_propagates_stream_errors() {
        let client = CannedClient {
            deltas: vec!["partial"],
            fail_mid_stream: true,
        };
        let result = complete(&client, &config(), vec![ChatMessage::user("q")]).await;
        assert!(matches!(result, Err(StrataError::LlmStream(_))));
    }
}
