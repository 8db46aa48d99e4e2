use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use strata_core::config::ModelConfig;
use strata_core::error::{Result, StrataError};

use crate::streaming::{SseEvent, SseStream};
use crate::types::*;
use crate::LlmClient;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OLLAMA_API_URL: &str = "http://127.0.0.1:11434/v1/chat/completions";
const LMSTUDIO_API_URL: &str = "http://127.0.0.1:1234/v1/chat/completions";

/// Default chat-completions endpoint for a provider name.
pub fn default_endpoint(provider: &str) -> &'static str {
    match provider {
        "ollama" => OLLAMA_API_URL,
        "lmstudio" | "lm-studio" => LMSTUDIO_API_URL,
        _ => OPENAI_API_URL,
    }
}

/// OpenAI-compatible client. Works with Ollama, LM Studio, vLLM and OpenAI itself.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn parse_chunk(event: &SseEvent) -> Vec<Result<StreamDelta>> {
    if event.is_done() {
        return vec![];
    }

    let chunk: StreamChunk = match serde_json::from_str(&event.data) {
        Ok(c) => c,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();

    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.and_then(|d| d.content) {
            if !text.is_empty() {
                deltas.push(Ok(StreamDelta::TextDelta(text)));
            }
        }
        // Some servers put the last text and the finish reason in one chunk.
        if let Some(reason) = choice.finish_reason {
            let stop = match reason.as_str() {
                "length" => StopReason::MaxTokens,
                "stop_sequence" => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            };
            deltas.push(Ok(StreamDelta::Stop(stop)));
        }
    }

    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }

    deltas
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let endpoint = config
                .base_url
                .clone()
                .unwrap_or_else(|| default_endpoint(&config.provider).to_string());

            let body = ChatRequest {
                model: &config.model_id,
                messages: &messages,
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                stream: true,
            };

            let mut req = self.http.post(&endpoint).json(&body);
            if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.starts_with("${")) {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(endpoint = %endpoint, model = %config.model_id, "Sending chat request");

            let response = req
                .send()
                .await
                .map_err(|e| StrataError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(StrataError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let sse_stream = SseStream::new(response.bytes_stream());
            let delta_stream = sse_stream
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(parse_chunk(&event)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn text_delta_is_extracted() {
        let deltas = parse_chunk(&event(
            r#"{"choices":[{"delta":{"content":"SELECT"},"finish_reason":null}]}"#,
        ));
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], Ok(StreamDelta::TextDelta(t)) if t == "SELECT"));
    }

    #[test]
    fn finish_reason_with_trailing_text() {
        let deltas = parse_chunk(&event(
            r#"{"choices":[{"delta":{"content":";"},"finish_reason":"stop"}]}"#,
        ));
        assert_eq!(deltas.len(), 2);
        assert!(matches!(&deltas[1], Ok(StreamDelta::Stop(StopReason::EndTurn))));
    }

    #[test]
    fn usage_chunk() {
        let deltas = parse_chunk(&event(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
        ));
        assert!(matches!(
            &deltas[0],
            Ok(StreamDelta::Usage {
                input_tokens: 12,
                output_tokens: 3
            })
        ));
    }

    #[test]
    fn done_and_garbage_yield_nothing() {
        assert!(parse_chunk(&event("[DONE]")).is_empty());
        assert!(parse_chunk(&event("not json")).is_empty());
    }

    #[test]
    fn endpoints_by_provider() {
        assert_eq!(default_endpoint("ollama"), OLLAMA_API_URL);
        assert_eq!(default_endpoint("lmstudio"), LMSTUDIO_API_URL);
        assert_eq!(default_endpoint("openai"), OPENAI_API_URL);
    }
}
