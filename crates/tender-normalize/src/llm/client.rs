use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::error::CompletionError;

use super::retry::{
    classify_failure, retry_disposition, BackoffPolicy, RequestThrottle, RetryDisposition,
    ThrottleConfig,
};

const SYSTEM_PROMPT: &str =
    "You convert procurement notices into a fixed JSON schema. Reply with one JSON object and nothing else.";

/// Opaque text-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Hard ceiling for one call, retries included.
    pub call_ceiling: Duration,
    pub backoff: BackoffPolicy,
    pub throttle: Option<ThrottleConfig>,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 2_000,
            call_ceiling: Duration::from_secs(120),
            backoff: BackoffPolicy::default(),
            throttle: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Content of the first choice of a chat-completions response body.
pub fn parse_chat_response(body: &str) -> Result<String, CompletionError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|err| CompletionError::Network(format!("malformed completion envelope: {err}")))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(CompletionError::EmptyResponse)
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
    config: LlmConfig,
    throttle: Option<Arc<RequestThrottle>>,
}

impl HttpCompletionClient {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.call_ceiling)
            .build()
            .context("building completion http client")?;
        let throttle = config.throttle.map(|c| Arc::new(RequestThrottle::new(c)));
        Ok(Self {
            client,
            config,
            throttle,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send_once(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CompletionError::Timeout(self.config.call_ceiling)
                } else {
                    CompletionError::from(err)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status, body));
        }
        parse_chat_response(&body)
    }

    async fn complete_with_retries(&self, prompt: &str) -> Result<String, CompletionError> {
        let mut attempt = 0;
        loop {
            match self.send_once(prompt).await {
                Ok(content) => return Ok(content),
                Err(err)
                    if retry_disposition(&err) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries =>
                {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, error = %err, "retrying completion request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        if let Some(throttle) = &self.throttle {
            throttle.acquire().await;
        }
        let ceiling = self.config.call_ceiling;
        let span = info_span!("completion", model = %self.config.model, prompt_bytes = prompt.len());
        match tokio::time::timeout(ceiling, self.complete_with_retries(prompt))
            .instrument(span)
            .await
        {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(ceiling)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_content_is_returned() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"title\":\"x\"}"}}]}"#;
        assert_eq!(parse_chat_response(body).unwrap(), r#"{"title":"x"}"#);
    }

    #[test]
    fn empty_or_missing_content_is_an_error() {
        assert!(matches!(
            parse_chat_response(r#"{"choices":[]}"#),
            Err(CompletionError::EmptyResponse)
        ));
        assert!(matches!(
            parse_chat_response(r#"{"choices":[{"message":{"content":"  "}}]}"#),
            Err(CompletionError::EmptyResponse)
        ));
        assert!(matches!(
            parse_chat_response("<html>gateway</html>"),
            Err(CompletionError::Network(_))
        ));
    }

    #[test]
    fn request_body_uses_low_temperature_json_mode() {
        let request = ChatRequest {
            model: "m",
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: "p",
                },
            ],
            temperature: 0.1,
            max_tokens: 2_000,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][1]["content"], "p");
        assert_eq!(value["max_tokens"], 2_000);
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let mut config = LlmConfig::new("key");
        config.base_url = "http://localhost:8080/v1/".into();
        let client = HttpCompletionClient::new(config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
