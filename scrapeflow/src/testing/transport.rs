//! Scripted LLM transport.

use crate::errors::ExtractionError;
use crate::extraction::{LlmTransport, ProviderReply};
use crate::providers::ProviderRequest;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Generated text, wrapped in a 200 reply shaped for the request's provider.
    Content(String),
    /// A raw reply.
    Reply(ProviderReply),
    /// A transport failure.
    Error(ExtractionError),
}

type Responder = Arc<dyn Fn(&ProviderRequest) -> Option<ScriptStep> + Send + Sync>;

/// An [`LlmTransport`] that plays back queued answers.
///
/// A responder, when set, is asked first; then the queue; then the fallback,
/// which defaults to an empty record list.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptStep>>,
    fallback: ScriptStep,
    responder: Option<Responder>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("queued", &self.script.lock().len())
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Creates a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: ScriptStep::Content("[]".to_string()),
            responder: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answers with `reply` once the script runs out.
    #[must_use]
    pub fn with_fallback(mut self, reply: ProviderReply) -> Self {
        self.fallback = ScriptStep::Reply(reply);
        self
    }

    /// Answers with `text` once the script runs out.
    #[must_use]
    pub fn with_fallback_content(mut self, text: impl Into<String>) -> Self {
        self.fallback = ScriptStep::Content(text.into());
        self
    }

    /// Consults `responder` before the queue.
    #[must_use]
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ProviderRequest) -> Option<ScriptStep> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Waits before every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues generated text.
    pub fn push_content(&self, text: impl Into<String>) {
        self.script.lock().push_back(ScriptStep::Content(text.into()));
    }

    /// Queues a raw reply.
    pub fn push_reply(&self, reply: ProviderReply) {
        self.script.lock().push_back(ScriptStep::Reply(reply));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: ExtractionError) {
        self.script.lock().push_back(ScriptStep::Error(error));
    }

    /// Number of requests received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    /// Most requests ever outstanding at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, request: &ProviderRequest) -> ScriptStep {
        if let Some(step) = self.responder.as_ref().and_then(|r| r(request)) {
            return step;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Wraps generated text the way the provider behind `url` would.
#[must_use]
pub fn envelope_for(url: &str, text: &str) -> String {
    let envelope = if url.ends_with("/messages") {
        json!({"content": [{"type": "text", "text": text}]})
    } else if url.contains(":generateContent") {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    } else {
        json!({"choices": [{"message": {"role": "assistant", "content": text}}]})
    };
    envelope.to_string()
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderReply, ExtractionError> {
        let step = self.next_step(&request);
        let url = request.url.clone();
        self.requests.lock().push(request);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            ScriptStep::Content(text) => Ok(ProviderReply::new(200, envelope_for(&url, &text))),
            ScriptStep::Reply(reply) => Ok(reply),
            ScriptStep::Error(error) => Err(error),
        }
    }
}
