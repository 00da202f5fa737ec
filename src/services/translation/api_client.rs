// Chat-completions translation client (OpenAI-compatible endpoints such as
// Cerebras). One recognized string per request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::core::config::TranslationConfig;
use crate::core::errors::{TranslationError, TranslationResult};
use crate::middleware::{CircuitBreaker, CircuitBreakerConfig};
use crate::services::translation::TranslationGateway;
use crate::utils::Metrics;

const MAX_RETRY_DELAY_MS: u64 = 10000;

const MAX_COMPLETION_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    max_completion_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

pub struct HttpTranslationGateway {
    http_client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    source_language: String,
    target_language: String,
    max_retries: u32,
    retry_initial_delay_ms: u64,
    breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

impl HttpTranslationGateway {
    pub fn new(config: &TranslationConfig) -> TranslationResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            cooldown: Duration::from_secs(config.breaker_cooldown_secs),
            ..CircuitBreakerConfig::default()
        });

        if config.api_key.is_none() {
            warn!("No TRANSLATION_API_KEY set; requests to {} are unauthenticated", config.api_url);
        }

        Ok(Self {
            http_client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
            max_retries: config.max_retries,
            retry_initial_delay_ms: config.retry_initial_delay_ms.min(MAX_RETRY_DELAY_MS),
            breaker,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn build_request(&self, text: &str) -> ChatCompletionRequest {
        let system_prompt = format!(
            "You are a {} to {} translator. \
             Translate the user's text naturally while fixing obvious OCR errors. \
             Reply with the translation only, without quotes, notes or explanations.",
            self.source_language, self.target_language
        );

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text.to_string(),
                },
            ],
            stream: false,
            max_completion_tokens: MAX_COMPLETION_TOKENS,
            temperature: 0.2,
        }
    }

    /// POST with exponential backoff on timeouts, connect errors, 5xx and 429
    async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest,
    ) -> TranslationResult<ChatCompletionResponse> {
        let mut retry_delay_ms = self.retry_initial_delay_ms;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                warn!("Translation: retry attempt {} after {}ms delay", attempt, retry_delay_ms);
                tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                retry_delay_ms = (retry_delay_ms * 2).min(MAX_RETRY_DELAY_MS);
            }
            let can_retry = attempt < self.max_retries;
            attempt += 1;

            let mut builder = self
                .http_client
                .post(&self.api_url)
                .header("Content-Type", "application/json")
                .json(request);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = match builder.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    error!(
                        "Translation: request failed (attempt {}): {} (retryable: {})",
                        attempt, e, retryable
                    );
                    if retryable && can_retry {
                        continue;
                    }
                    return Err(e.into());
                }
            };

            let status = response.status();
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let body = response.text().await.unwrap_or_default();
                error!("Translation: server error {} (attempt {}): {}", status, attempt, body);
                if can_retry {
                    continue;
                }
                return Err(TranslationError::ServiceError {
                    status: status.as_u16(),
                    body,
                });
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TranslationError::ServiceError {
                    status: status.as_u16(),
                    body,
                });
            }

            return response
                .json::<ChatCompletionResponse>()
                .await
                .map_err(|e| TranslationError::InvalidResponse(e.to_string()));
        }
    }

    fn extract_text(response: ChatCompletionResponse) -> TranslationResult<String> {
        if let Some(usage) = &response.usage {
            debug!("Translation: {} tokens used", usage.total_tokens);
        }

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(TranslationError::InvalidResponse(
                "completion contained no text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl TranslationGateway for HttpTranslationGateway {
    fn is_ready(&self) -> bool {
        self.breaker.is_ready()
    }

    fn target_language(&self) -> &str {
        &self.target_language
    }

    async fn translate(&self, text: &str) -> TranslationResult<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        if !self.breaker.allow_request() {
            return Err(TranslationError::Unavailable(
                "circuit breaker is open".to_string(),
            ));
        }

        let start = Instant::now();
        let request = self.build_request(text);
        let result = self
            .send_with_retry(&request)
            .await
            .and_then(Self::extract_text);

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_translation(result.is_ok(), elapsed);
        }

        match &result {
            Ok(translated) => {
                self.breaker.record_success();
                debug!(
                    "Translation: {} chars → {} chars in {:.2}s",
                    text.chars().count(),
                    translated.chars().count(),
                    elapsed.as_secs_f64()
                );
            }
            Err(e) => {
                if self.breaker.record_failure() {
                    warn!("Translation: circuit breaker opened after: {}", e);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_circuit_breaker_trip();
                    }
                }
            }
        }

        result
    }
}
