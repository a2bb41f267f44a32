//! Static table of LLM providers and the models they offer.

use super::shaping::{shaper_for, RequestShaper};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    /// `POST {base}/chat/completions` with a bearer token.
    OpenAiCompatible,
    /// `POST {base}/messages` with an `x-api-key` header.
    Anthropic,
    /// `POST {base}/models/{model}:generateContent`.
    Gemini,
}

/// Coarse pricing label for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    /// Cheap.
    Low,
    /// Mid-range.
    Moderate,
    /// Expensive.
    Premium,
    /// Most expensive.
    Highest,
    /// No pricing information.
    Varies,
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::Premium => write!(f, "premium"),
            Self::Highest => write!(f, "highest"),
            Self::Varies => write!(f, "varies"),
        }
    }
}

/// A model offered by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model id as sent to the provider API.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Pricing label.
    pub cost_tier: CostTier,
}

impl ModelDescriptor {
    /// Creates a model descriptor.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>, cost_tier: CostTier) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            cost_tier,
        }
    }
}

/// Static description of an LLM provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider id, e.g. `openai`.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Offered models; the first is the default.
    pub models: Vec<ModelDescriptor>,
    /// Label of the credential to request from the caller.
    pub credential_name: String,
    /// Where to obtain a credential.
    pub help_text: String,
    /// Wire protocol.
    pub api_style: ApiStyle,
    /// API root, without a trailing slash.
    pub base_url: String,
}

impl ProviderSpec {
    /// Looks up a model by id.
    #[must_use]
    pub fn model(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Points the provider at another API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// A validated provider/model pair, with the provider's request shaper.
#[derive(Clone)]
pub struct ResolvedModel {
    /// The provider.
    pub provider: ProviderSpec,
    /// The selected model.
    pub model: ModelDescriptor,
    shaper: Arc<dyn RequestShaper>,
}

impl ResolvedModel {
    /// `"<provider>/<model>"`.
    #[must_use]
    pub fn provider_string(&self) -> String {
        format!("{}/{}", self.provider.id, self.model.id)
    }

    /// The request shaper selected for this provider.
    #[must_use]
    pub fn shaper(&self) -> &dyn RequestShaper {
        self.shaper.as_ref()
    }
}

impl fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider", &self.provider.id)
            .field("model", &self.model.id)
            .field("api_style", &self.provider.api_style)
            .finish()
    }
}

/// Read-only lookup over provider specs.
///
/// Built once and never mutated; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderSpec>,
}

static BUILTIN: OnceLock<Arc<ProviderRegistry>> = OnceLock::new();

impl ProviderRegistry {
    /// Creates a registry from custom specs. Later duplicates of an id are ignored.
    #[must_use]
    pub fn from_specs(specs: impl IntoIterator<Item = ProviderSpec>) -> Self {
        let mut providers: Vec<ProviderSpec> = Vec::new();
        for spec in specs {
            if providers.iter().any(|p| p.id == spec.id) {
                tracing::warn!(provider = %spec.id, "Duplicate provider spec ignored");
                continue;
            }
            providers.push(spec);
        }
        Self { providers }
    }

    /// The process-wide built-in registry.
    #[must_use]
    pub fn builtin() -> Arc<Self> {
        BUILTIN
            .get_or_init(|| Arc::new(Self::from_specs(builtin_specs())))
            .clone()
    }

    /// Looks up a provider.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if the id is not registered.
    pub fn provider(&self, provider_id: &str) -> Result<&ProviderSpec, ConfigError> {
        self.providers
            .iter()
            .find(|p| p.id == provider_id)
            .ok_or_else(|| ConfigError::UnknownProvider(provider_id.to_string()))
    }

    /// Validates a provider/model pair and selects its request shaper.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` or `UnknownModel`.
    pub fn resolve(&self, provider_id: &str, model_id: &str) -> Result<ResolvedModel, ConfigError> {
        let provider = self.provider(provider_id)?;
        let model = provider
            .model(model_id)
            .ok_or_else(|| ConfigError::UnknownModel {
                provider: provider_id.to_string(),
                model: model_id.to_string(),
            })?;

        Ok(ResolvedModel {
            provider: provider.clone(),
            model: model.clone(),
            shaper: shaper_for(provider.api_style),
        })
    }

    /// The credential label a provider requires.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if the id is not registered.
    pub fn required_credential_name(&self, provider_id: &str) -> Result<&str, ConfigError> {
        Ok(self.provider(provider_id)?.credential_name.as_str())
    }

    /// `(id, display name)` pairs in registration order.
    #[must_use]
    pub fn providers(&self) -> Vec<(&str, &str)> {
        self.providers
            .iter()
            .map(|p| (p.id.as_str(), p.display_name.as_str()))
            .collect()
    }

    /// A provider's models in order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if the id is not registered.
    pub fn models(&self, provider_id: &str) -> Result<&[ModelDescriptor], ConfigError> {
        Ok(&self.provider(provider_id)?.models)
    }

    /// The first listed model of a provider.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider`, or `UnknownModel` for a provider with no models.
    pub fn default_model(&self, provider_id: &str) -> Result<&ModelDescriptor, ConfigError> {
        self.provider(provider_id)?
            .models
            .first()
            .ok_or_else(|| ConfigError::UnknownModel {
                provider: provider_id.to_string(),
                model: String::new(),
            })
    }

    /// `"<provider>/<model>"` for a valid pair.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` or `UnknownModel`.
    pub fn provider_string(&self, provider_id: &str, model_id: &str) -> Result<String, ConfigError> {
        self.resolve(provider_id, model_id)
            .map(|resolved| resolved.provider_string())
    }

    /// Pricing label; unknown combinations report [`CostTier::Varies`].
    #[must_use]
    pub fn cost_tier(&self, provider_id: &str, model_id: &str) -> CostTier {
        self.provider(provider_id)
            .ok()
            .and_then(|p| p.model(model_id))
            .map_or(CostTier::Varies, |m| m.cost_tier)
    }

    /// Iterates over all provider specs.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.iter()
    }
}

/// Minimum trimmed length of a plausible credential.
pub const MIN_CREDENTIAL_LEN: usize = 10;

/// Whether a credential value looks like a real key.
#[must_use]
pub fn validate_credential_format(value: &str) -> bool {
    value.trim().chars().count() >= MIN_CREDENTIAL_LEN
}

fn spec(
    id: &str,
    display_name: &str,
    credential_name: &str,
    help_text: &str,
    api_style: ApiStyle,
    base_url: &str,
    models: Vec<ModelDescriptor>,
) -> ProviderSpec {
    ProviderSpec {
        id: id.to_string(),
        display_name: display_name.to_string(),
        models,
        credential_name: credential_name.to_string(),
        help_text: help_text.to_string(),
        api_style,
        base_url: base_url.to_string(),
    }
}

fn builtin_specs() -> Vec<ProviderSpec> {
    use CostTier::{Highest, Low, Moderate, Premium};
    let m = ModelDescriptor::new;

    vec![
        spec(
            "openai",
            "OpenAI",
            "OPENAI_API_KEY",
            "Create a key at https://platform.openai.com/api-keys",
            ApiStyle::OpenAiCompatible,
            "https://api.openai.com/v1",
            vec![
                m("gpt-4o", "GPT-4o, most capable", Premium),
                m("gpt-4o-mini", "GPT-4o Mini, fast and cheap", Low),
                m("gpt-4-turbo", "GPT-4 Turbo", Premium),
                m("gpt-3.5-turbo", "GPT-3.5 Turbo, legacy", Low),
            ],
        ),
        spec(
            "gemini",
            "Google Gemini",
            "GEMINI_API_KEY",
            "Create a key at https://aistudio.google.com/app/apikey",
            ApiStyle::Gemini,
            "https://generativelanguage.googleapis.com/v1beta",
            vec![
                m("gemini-2.5-flash", "Gemini 2.5 Flash, fast", Low),
                m("gemini-2.5-pro", "Gemini 2.5 Pro, most capable", Moderate),
                m("gemini-1.5-pro", "Gemini 1.5 Pro", Moderate),
                m("gemini-1.5-flash", "Gemini 1.5 Flash", Low),
            ],
        ),
        spec(
            "deepseek",
            "DeepSeek",
            "DEEPSEEK_API_KEY",
            "Create a key at https://platform.deepseek.com/api_keys",
            ApiStyle::OpenAiCompatible,
            "https://api.deepseek.com/v1",
            vec![
                m("deepseek-chat", "DeepSeek V3 chat", Low),
                m("deepseek-reasoner", "DeepSeek R1 reasoning", Low),
            ],
        ),
        spec(
            "anthropic",
            "Anthropic Claude",
            "ANTHROPIC_API_KEY",
            "Create a key at https://console.anthropic.com/settings/keys",
            ApiStyle::Anthropic,
            "https://api.anthropic.com/v1",
            vec![
                m("claude-3-5-sonnet-latest", "Claude 3.5 Sonnet", Premium),
                m("claude-3-5-haiku-latest", "Claude 3.5 Haiku, fast", Low),
                m("claude-3-opus-latest", "Claude 3 Opus", Highest),
                m("claude-3-sonnet-20240229", "Claude 3 Sonnet", Moderate),
            ],
        ),
        spec(
            "mistral",
            "Mistral AI",
            "MISTRAL_API_KEY",
            "Create a key at https://console.mistral.ai/api-keys",
            ApiStyle::OpenAiCompatible,
            "https://api.mistral.ai/v1",
            vec![
                m("mistral-large-latest", "Mistral Large", Moderate),
                m("mistral-medium-latest", "Mistral Medium", Moderate),
                m("mistral-small-latest", "Mistral Small", Low),
                m("codestral-latest", "Codestral", Low),
            ],
        ),
        spec(
            "xai",
            "xAI Grok",
            "XAI_API_KEY",
            "Create a key at https://console.x.ai",
            ApiStyle::OpenAiCompatible,
            "https://api.x.ai/v1",
            vec![
                m("grok-3", "Grok 3", Moderate),
                m("grok-3-mini", "Grok 3 Mini, reasoning", Premium),
                m("grok-beta", "Grok beta", Moderate),
            ],
        ),
    ]
}
