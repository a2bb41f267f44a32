//! LLM provider registry and request shaping.

mod registry;
mod shaping;

pub use registry::{
    validate_credential_format, ApiStyle, CostTier, ModelDescriptor, ProviderRegistry,
    ProviderSpec, ResolvedModel, MIN_CREDENTIAL_LEN,
};
pub use shaping::{
    shaper_for, AnthropicShaper, GeminiShaper, OpenAiShaper, Prompt, ProviderRequest,
    RequestShaper, ANTHROPIC_VERSION, DEFAULT_MAX_OUTPUT_TOKENS,
};
