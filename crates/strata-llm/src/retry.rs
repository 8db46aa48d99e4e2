use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::warn;

use strata_core::config::{ModelConfig, RetryConfig};
use strata_core::error::{Result, StrataError};

use crate::types::*;
use crate::LlmClient;

/// An LLM client that retries transient request failures with jittered
/// exponential backoff.
///
/// Only opening the stream is retried. Once deltas flow, errors surface to
/// the caller unchanged.
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &StrataError) -> bool {
    match e {
        StrataError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        StrataError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;

            loop {
                match self.inner.chat_stream(&config, messages.clone()).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use futures::StreamExt;

    use super::*;

    struct FlakyClient {
        calls: Arc<AtomicU32>,
        failures_before_success: u32,
        error: fn() -> StrataError,
    }

    impl LlmClient for FlakyClient {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures_before_success {
                    Err((self.error)())
                } else {
                    let items = vec![Ok(StreamDelta::TextDelta("ok".into()))];
                    Ok(futures::stream::iter(items).boxed())
                }
            })
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn model() -> ModelConfig {
        ModelConfig {
            provider: "ollama".into(),
            model_id: "m".into(),
            api_key: None,
            base_url: None,
            max_tokens: 64,
            temperature: 0.0,
            retry: None,
        }
    }

    #[test]
    fn backoff_is_capped() {
        let cfg = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(8, &cfg);
        assert!(d <= Duration::from_millis(6000));
        assert!(d >= Duration::from_millis(4000));
    }

    #[test]
    fn retryable_classification() {
        assert!(is_retryable(&StrataError::LlmRequest("HTTP 503: busy".into())));
        assert!(is_retryable(&StrataError::LlmRequest("connection refused".into())));
        assert!(!is_retryable(&StrataError::LlmRequest("HTTP 400: bad".into())));
        assert!(!is_retryable(&StrataError::Config("x".into())));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(FlakyClient {
                calls: calls.clone(),
                failures_before_success: 2,
                error: || StrataError::LlmRequest("HTTP 503".into()),
            }),
            fast_retry(3),
        );
        assert!(client.chat_stream(&model(), vec![]).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(FlakyClient {
                calls: calls.clone(),
                failures_before_success: u32::MAX,
                error: || StrataError::LlmRequest("HTTP 502".into()),
            }),
            fast_retry(2),
        );
        assert!(client.chat_stream(&model(), vec![]).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(FlakyClient {
                calls: calls.clone(),
                failures_before_success: u32::MAX,
                error: || StrataError::LlmRequest("HTTP 401: unauthorized".into()),
            }),
            fast_retry(5),
        );
        assert!(client.chat_stream(&model(), vec![]).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
