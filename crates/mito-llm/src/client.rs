use mito_types::MitoError;
use serde_json::Value;

use crate::retry::{execute_with_retry, BackoffPolicy};
use crate::schema::{extract_json, ResponseSchema};
use crate::{DynProvider, Message, ProviderAdapter, Request, Response};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            json_mode = request.json_mode,
            "LLM request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// Optional knobs for [`LlmClient::generate_text`].
#[derive(Debug, Clone, Default)]
pub struct TextOptions {
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Single-provider client with bounded retries and schema-checked JSON output.
///
/// A disabled client (no provider configured) fails every call with
/// [`MitoError::LlmUnavailable`]; callers treat that like any other LLM failure.
pub struct LlmClient {
    provider: Option<DynProvider>,
    model: String,
    max_retries: usize,
    backoff: BackoffPolicy,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        let provider = DynProvider::new(provider);
        let model = provider.default_model().to_string();
        Self {
            provider: Some(provider),
            model,
            max_retries: 2,
            backoff: BackoffPolicy::default(),
            middleware: vec![Box::new(LoggingMiddleware)],
        }
    }

    pub fn disabled() -> Self {
        Self {
            provider: None,
            model: String::new(),
            max_retries: 0,
            backoff: BackoffPolicy::None,
            middleware: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_ref().map(DynProvider::name)
    }

    async fn complete(&self, request: &Request) -> Result<Response, MitoError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| MitoError::LlmUnavailable("no LLM provider configured".into()))?;
        let mut req = request.clone();
        for m in &self.middleware {
            m.before(&mut req);
        }
        let mut resp = provider.complete(&req).await?;
        for m in &self.middleware {
            m.after(&req, &mut resp);
        }
        Ok(resp)
    }

    fn build_request(&self, prompt: &str, system: Option<&str>) -> Request {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));
        Request::new(self.model.clone(), messages)
    }

    pub async fn generate_text(&self, prompt: &str, options: &TextOptions) -> Result<String, MitoError> {
        let mut request = self.build_request(prompt, options.system.as_deref());
        request.temperature = options.temperature;
        request.max_tokens = options.max_tokens;
        let request = &request;
        execute_with_retry(
            || async move { self.complete(request).await.map(|r| r.text) },
            self.max_retries,
            &self.backoff,
            "generate_text",
        )
        .await
    }

    /// Ask for a JSON object matching `schema`. Unparseable or non-conforming
    /// replies count as retryable failures within the retry bound.
    pub async fn generate_json(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
        system: Option<&str>,
    ) -> Result<Value, MitoError> {
        let full_prompt = format!("{prompt}\n\n{}", schema.prompt_hint());
        let mut request = self.build_request(&full_prompt, system);
        request.json_mode = true;
        request.temperature = Some(0.1);
        let request = &request;
        execute_with_retry(
            || async move {
                let response = self.complete(request).await?;
                let value = extract_json(&response.text)?;
                schema.validate(&value)?;
                Ok(value)
            },
            self.max_retries,
            &self.backoff,
            "generate_json",
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
