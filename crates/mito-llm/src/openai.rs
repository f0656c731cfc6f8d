use std::time::Duration;

use async_trait::async_trait;
use mito_types::MitoError;
use serde_json::json;

use crate::{FinishReason, ProviderAdapter, Request, Response, Role, Usage};

// ---------------------------------------------------------------------------
// OpenAiCompatAdapter: any endpoint speaking the chat-completions protocol
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl OpenAiCompatAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Read the key from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, MitoError> {
        let key = std::env::var(var).map_err(|_| MitoError::AuthError {
            provider: "openai".into(),
        })?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request_body(&self, request: &Request) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": msg.content })
            })
            .collect();

        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };
        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    fn parse_response(&self, body: serde_json::Value) -> Result<Response, MitoError> {
        let choice = &body["choices"][0];
        let text = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| MitoError::ProviderError {
                provider: "openai".into(),
                status: 200,
                message: "response has no message content".into(),
                retryable: true,
            })?
            .to_string();
        let finish_reason = match choice["finish_reason"].as_str() {
            Some("length") => FinishReason::MaxTokens,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::EndTurn,
        };
        Ok(Response {
            text,
            model: body["model"].as_str().unwrap_or_default().to_string(),
            usage: Usage {
                input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            },
            finish_reason,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, MitoError> {
        let body = self.build_request_body(request);

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MitoError::RequestTimeout {
                        provider: "openai".into(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    MitoError::ProviderError {
                        provider: "openai".into(),
                        status: 0,
                        message: e.to_string(),
                        retryable: true,
                    }
                }
            })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| MitoError::ProviderError {
            provider: "openai".into(),
            status: 0,
            message: e.to_string(),
            retryable: true,
        })?;

        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| MitoError::ProviderError {
                provider: "openai".into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
                retryable: false,
            })?;

        self.parse_response(json)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

fn map_error(status: reqwest::StatusCode, body: &str) -> MitoError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            MitoError::RateLimited {
                provider: "openai".into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => MitoError::AuthError {
            provider: "openai".into(),
        },
        _ => MitoError::ProviderError {
            provider: "openai".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: matches!(status_u16, 500 | 502 | 503 | 504),
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}
