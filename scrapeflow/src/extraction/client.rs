//! Extraction client: prompt, call, classify, parse, retry.

use super::parse::parse_records;
use super::prompt::extraction_prompt;
use super::record::{ExtractionRecord, FieldSet};
use super::transport::{LlmTransport, ProviderReply};
use crate::chunker::Chunk;
use crate::config::Credential;
use crate::errors::ExtractionError;
use crate::providers::{Prompt, ResolvedModel};
use crate::retry::{with_retry, RetryClass, RetryConfig, RetryOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-call timeout in seconds.
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 60;

/// Longest provider error excerpt kept in an error message.
const ERROR_EXCERPT_CHARS: usize = 200;

/// Calls one provider model on behalf of a crawl run.
///
/// The model and credential are bound at construction; the credential is
/// only ever written into request headers.
#[derive(Clone)]
pub struct ExtractionClient {
    model: ResolvedModel,
    credential: Credential,
    transport: Arc<dyn LlmTransport>,
    retry: RetryConfig,
    timeout: Duration,
}

impl std::fmt::Debug for ExtractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionClient")
            .field("model", &self.model)
            .field("credential", &self.credential)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ExtractionClient {
    /// Creates a client with the default retry policy and timeout.
    #[must_use]
    pub fn new(model: ResolvedModel, credential: Credential, transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            model,
            credential,
            transport,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The model this client calls.
    #[must_use]
    pub fn model(&self) -> &ResolvedModel {
        &self.model
    }

    /// The retry policy in force.
    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Extracts records from a chunk, retrying transient and parsing failures.
    ///
    /// # Errors
    ///
    /// The last error once retries are exhausted, or the first fatal error.
    pub async fn extract(
        &self,
        chunk: &Chunk,
        fields: &FieldSet,
        system_prompt: Option<&str>,
    ) -> Result<Vec<ExtractionRecord>, ExtractionError> {
        self.extract_with_attempts(chunk, fields, system_prompt)
            .await
            .result
    }

    /// Like [`extract`](Self::extract), also reporting the attempts made.
    pub async fn extract_with_attempts(
        &self,
        chunk: &Chunk,
        fields: &FieldSet,
        system_prompt: Option<&str>,
    ) -> RetryOutcome<Vec<ExtractionRecord>, ExtractionError> {
        let key = format!("{}#{}", chunk.page_url, chunk.index);
        let outcome = with_retry(
            &self.retry,
            &key,
            |attempt| {
                debug!(chunk = %key, attempt, "Extraction attempt");
                self.extract_once(chunk, fields, system_prompt)
            },
            retry_class,
        )
        .await;

        if let Err(e) = &outcome.result {
            warn!(
                chunk = %key,
                attempts = outcome.attempts,
                class = %e.class(),
                error = %e,
                "Extraction failed"
            );
        }
        outcome
    }

    /// One extraction call with no retry.
    ///
    /// # Errors
    ///
    /// Any [`ExtractionError`] from the call or from parsing its reply.
    pub async fn extract_once(
        &self,
        chunk: &Chunk,
        fields: &FieldSet,
        system_prompt: Option<&str>,
    ) -> Result<Vec<ExtractionRecord>, ExtractionError> {
        let prompt = extraction_prompt(fields, system_prompt, chunk);
        let text = self.complete(&prompt).await?;
        parse_records(&text, fields)
    }

    /// Plain-text completion through the same provider, with retry.
    ///
    /// # Errors
    ///
    /// The last error once retries are exhausted, or the first fatal error.
    pub async fn complete_text(&self, system: &str, user: &str) -> Result<String, ExtractionError> {
        let prompt = Prompt::text(system, user);
        with_retry(
            &self.retry,
            "complete_text",
            |_| self.complete(&prompt),
            retry_class,
        )
        .await
        .result
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ExtractionError> {
        let shaper = self.model.shaper();
        let request = shaper.build_request(&self.model, &self.credential, prompt);

        let reply = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| {
                ExtractionError::transport(format!("no reply within {:?}", self.timeout), true)
            })??;

        let body = classify_reply(&self.model.provider.id, reply)?;
        shaper.parse_response(&body)
    }
}

/// Maps a provider reply to its body, or to the error its status stands for.
///
/// # Errors
///
/// 401/403 `InvalidCredential`, 429 `RateLimited`, 400/422 `SchemaRejected`,
/// any other non-2xx `ProviderError`.
pub fn classify_reply(provider: &str, reply: ProviderReply) -> Result<String, ExtractionError> {
    if reply.is_success() {
        return Ok(reply.body);
    }
    let message: String = reply.body.trim().chars().take(ERROR_EXCERPT_CHARS).collect();

    Err(match reply.status {
        401 | 403 => ExtractionError::InvalidCredential {
            provider: provider.to_string(),
            status: reply.status,
        },
        429 => ExtractionError::RateLimited {
            retry_after: reply.retry_after,
        },
        400 | 422 => ExtractionError::SchemaRejected {
            code: reply.status,
            message,
        },
        code => ExtractionError::ProviderError { code, message },
    })
}

fn retry_class(error: &ExtractionError) -> RetryClass {
    if error.is_retryable() {
        RetryClass::Retry {
            after: error.retry_after(),
        }
    } else {
        RetryClass::Stop
    }
}
