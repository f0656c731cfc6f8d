use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mito_types::MitoError;

use crate::{FinishReason, ProviderAdapter, Request, Response, Usage};

/// Provider that replays a fixed list of replies and records every request.
///
/// Used by tests and offline runs. Once the script is exhausted every call fails
/// with [`MitoError::LlmUnavailable`].
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    replies: Arc<Mutex<VecDeque<Result<String, MitoError>>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, MitoError>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    async fn complete(&self, request: &Request) -> Result<Response, MitoError> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        let next = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        match next {
            Some(Ok(text)) => Ok(Response {
                text,
                model: request.model.clone(),
                usage: Usage::default(),
                finish_reason: FinishReason::EndTurn,
            }),
            Some(Err(e)) => Err(e),
            None => Err(MitoError::LlmUnavailable("scripted replies exhausted".into())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}
