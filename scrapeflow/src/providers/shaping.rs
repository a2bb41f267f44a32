//! Provider-specific request building and response unwrapping.
//!
//! Each [`ApiStyle`] has one [`RequestShaper`], chosen when a model is
//! resolved. The shaper turns a prompt into an HTTP request and pulls the
//! generated text back out of the provider's response envelope.

use super::registry::{ApiStyle, ResolvedModel};
use crate::config::Credential;
use crate::errors::ExtractionError;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Anthropic API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output token ceiling for providers that require one.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// A system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System instruction.
    pub system: String,
    /// User message.
    pub user: String,
    /// Ask the provider for JSON output.
    pub json_output: bool,
}

impl Prompt {
    /// A prompt that expects JSON back.
    #[must_use]
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_output: true,
        }
    }

    /// A prompt that expects plain text back.
    #[must_use]
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_output: false,
        }
    }
}

/// An outbound HTTP request to a provider.
#[derive(Clone, PartialEq)]
pub struct ProviderRequest {
    /// Full endpoint URL.
    pub url: String,
    /// Header name/value pairs, including the credential.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Value,
}

impl ProviderRequest {
    /// Looks up a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ProviderRequest")
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body", &self.body)
            .finish()
    }
}

/// Builds provider requests and unwraps provider responses.
pub trait RequestShaper: Send + Sync {
    /// The wire protocol this shaper speaks.
    fn api_style(&self) -> ApiStyle;

    /// Builds the request for one completion.
    fn build_request(
        &self,
        model: &ResolvedModel,
        credential: &Credential,
        prompt: &Prompt,
    ) -> ProviderRequest;

    /// Extracts the generated text from a successful response body.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` when the envelope is not as expected.
    fn parse_response(&self, body: &str) -> Result<String, ExtractionError>;
}

/// Returns the shaper for an API style.
#[must_use]
pub fn shaper_for(style: ApiStyle) -> Arc<dyn RequestShaper> {
    match style {
        ApiStyle::OpenAiCompatible => Arc::new(OpenAiShaper),
        ApiStyle::Anthropic => Arc::new(AnthropicShaper),
        ApiStyle::Gemini => Arc::new(GeminiShaper),
    }
}

fn parse_envelope(body: &str) -> Result<Value, ExtractionError> {
    serde_json::from_str(body)
        .map_err(|e| ExtractionError::malformed(format!("response body is not JSON: {e}")))
}

fn non_empty(text: String) -> Result<String, ExtractionError> {
    if text.trim().is_empty() {
        Err(ExtractionError::malformed("provider returned no content"))
    } else {
        Ok(text)
    }
}

/// OpenAI chat completions, also spoken by DeepSeek, Mistral and xAI.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiShaper;

impl RequestShaper for OpenAiShaper {
    fn api_style(&self) -> ApiStyle {
        ApiStyle::OpenAiCompatible
    }

    fn build_request(
        &self,
        model: &ResolvedModel,
        credential: &Credential,
        prompt: &Prompt,
    ) -> ProviderRequest {
        let mut body = json!({
            "model": model.model.id,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": 0,
        });
        if prompt.json_output {
            body["response_format"] = json!({"type": "json_object"});
        }

        ProviderRequest {
            url: format!("{}/chat/completions", model.provider.base_url),
            headers: vec![
                (
                    "Authorization".to_string(),
                    format!("Bearer {}", credential.expose()),
                ),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }

    fn parse_response(&self, body: &str) -> Result<String, ExtractionError> {
        let envelope = parse_envelope(body)?;
        let content = envelope
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractionError::malformed("missing choices[0].message.content"))?;
        non_empty(content.to_string())
    }
}

/// Anthropic messages API.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicShaper;

impl RequestShaper for AnthropicShaper {
    fn api_style(&self) -> ApiStyle {
        ApiStyle::Anthropic
    }

    fn build_request(
        &self,
        model: &ResolvedModel,
        credential: &Credential,
        prompt: &Prompt,
    ) -> ProviderRequest {
        let body = json!({
            "model": model.model.id,
            "max_tokens": DEFAULT_MAX_OUTPUT_TOKENS,
            "system": prompt.system,
            "messages": [
                {"role": "user", "content": prompt.user},
            ],
            "temperature": 0,
        });

        ProviderRequest {
            url: format!("{}/messages", model.provider.base_url),
            headers: vec![
                ("x-api-key".to_string(), credential.expose().to_string()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }

    fn parse_response(&self, body: &str) -> Result<String, ExtractionError> {
        let envelope = parse_envelope(body)?;
        let blocks = envelope
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| ExtractionError::malformed("missing content blocks"))?;

        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
        non_empty(text)
    }
}

/// Google Gemini generateContent API.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiShaper;

impl RequestShaper for GeminiShaper {
    fn api_style(&self) -> ApiStyle {
        ApiStyle::Gemini
    }

    fn build_request(
        &self,
        model: &ResolvedModel,
        credential: &Credential,
        prompt: &Prompt,
    ) -> ProviderRequest {
        let mut generation_config = json!({"temperature": 0});
        if prompt.json_output {
            generation_config["responseMimeType"] = json!("application/json");
        }
        let body = json!({
            "systemInstruction": {"parts": [{"text": prompt.system}]},
            "contents": [
                {"role": "user", "parts": [{"text": prompt.user}]},
            ],
            "generationConfig": generation_config,
        });

        ProviderRequest {
            url: format!(
                "{}/models/{}:generateContent",
                model.provider.base_url, model.model.id
            ),
            headers: vec![
                ("x-goog-api-key".to_string(), credential.expose().to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }

    fn parse_response(&self, body: &str) -> Result<String, ExtractionError> {
        let envelope = parse_envelope(body)?;
        let parts = envelope
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| ExtractionError::malformed("missing candidates[0].content.parts"))?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        non_empty(text)
    }
}
