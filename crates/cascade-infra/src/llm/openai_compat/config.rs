//! Configuration types and per-provider defaults for OpenAI-compatible
//! providers.
//!
//! Each provider that speaks the OpenAI chat completions protocol gets a
//! factory function returning an [`OpenAiCompatConfig`] with the correct
//! base URL and pricing defaults.

use secrecy::SecretString;

/// Per-million-token pricing used to estimate call cost. `None` disables
/// cost estimation (e.g., local servers).
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl ModelPricing {
    /// Estimated USD cost of a call with the given token counts.
    pub fn estimate(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        f64::from(prompt_tokens) / 1_000_000.0 * self.input_cost_per_million
            + f64::from(completion_tokens) / 1_000_000.0 * self.output_cost_per_million
    }
}

/// Configuration for an OpenAI-compatible provider.
///
/// Used to construct an [`super::OpenAiCompatibleProvider`].
pub struct OpenAiCompatConfig {
    /// Human-readable provider name (e.g., "openai", "gemini").
    pub provider_name: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    pub base_url: String,
    /// API key for authentication.
    pub api_key: SecretString,
    /// Default model identifier when a request leaves it empty.
    pub model: String,
    /// Pricing for cost estimation, when known.
    pub pricing: Option<ModelPricing>,
}

/// OpenAI default configuration.
///
/// Base URL: `https://api.openai.com/v1`
pub fn openai_defaults(api_key: &str, model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "openai".into(),
        base_url: "https://api.openai.com/v1".into(),
        api_key: api_key.into(),
        model: model.into(),
        pricing: Some(ModelPricing {
            input_cost_per_million: 0.15,
            output_cost_per_million: 0.60,
        }),
    }
}

/// Google Gemini default configuration (OpenAI-compatible beta endpoint).
///
/// Base URL: `https://generativelanguage.googleapis.com/v1beta/openai`
pub fn gemini_defaults(api_key: &str, model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "gemini".into(),
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        api_key: api_key.into(),
        model: model.into(),
        pricing: Some(ModelPricing {
            input_cost_per_million: 0.10,
            output_cost_per_million: 0.40,
        }),
    }
}

/// Local OpenAI-compatible server (Ollama, llama.cpp, vLLM, ...).
///
/// No authentication, no cost estimation.
pub fn local_defaults(base_url: &str, model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "local".into(),
        base_url: base_url.into(),
        api_key: "unused".into(),
        model: model.into(),
        pricing: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricing_estimate() {
        let pricing = ModelPricing {
            input_cost_per_million: 1.0,
            output_cost_per_million: 2.0,
        };
        let cost = pricing.estimate(1_000_000, 500_000);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_local_defaults_have_no_pricing() {
        let config = local_defaults("http://localhost:11434/v1", "llama3");
        assert_eq!(config.provider_name, "local");
        assert!(config.pricing.is_none());
    }
}
