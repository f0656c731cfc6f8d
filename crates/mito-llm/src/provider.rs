use async_trait::async_trait;
use mito_types::MitoError;

use crate::{Request, Response};

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, MitoError>;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

pub struct DynProvider(Box<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, MitoError> {
        self.0.complete(request).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Message, Usage};

    struct MockProvider;

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn complete(&self, request: &Request) -> Result<Response, MitoError> {
            Ok(Response {
                text: format!("echo: {}", request.messages.len()),
                model: request.model.clone(),
                usage: Usage::default(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }
    }

    #[tokio::test]
    async fn dyn_provider_delegates() {
        let provider = DynProvider::new(MockProvider);
        assert_eq!(provider.name(), "mock");
        assert_eq!(provider.default_model(), "mock-model");

        let request = Request::new("m", vec![Message::user("hi")]);
        let response = provider.complete(&request).await.unwrap();
        assert_eq!(response.text, "echo: 1");
        assert_eq!(response.model, "m");
    }
}
