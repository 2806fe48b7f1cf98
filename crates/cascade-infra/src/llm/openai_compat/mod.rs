//! OpenAI-compatible provider implementation.
//!
//! A single [`OpenAiCompatibleProvider`] serves OpenAI, Google Gemini, and
//! any local OpenAI-compatible server from one codebase via configurable
//! base URLs. Uses [`async_openai`] for type-safe request/response
//! handling. Non-streaming only: the engine consumes whole responses.

pub mod config;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest, FinishReason,
};
use secrecy::ExposeSecret;
use tracing::Instrument;

use cascade_core::llm::Provider;
use cascade_observe::genai_attrs;
use cascade_types::llm::{
    CompletionRequest, CompletionResponse, FinishReason as EngineFinishReason, LlmError,
    MessageRole, Usage,
};

use self::config::{ModelPricing, OpenAiCompatConfig};

/// Unified provider for any OpenAI-compatible API.
///
/// # API Key Security
///
/// Does NOT derive Debug to prevent accidental exposure of the API key
/// stored inside the `async_openai::Client`.
pub struct OpenAiCompatibleProvider {
    client: Client<OpenAIConfig>,
    provider_name: String,
    model: String,
    pricing: Option<ModelPricing>,
}

impl OpenAiCompatibleProvider {
    /// Create a new OpenAI-compatible provider from a configuration.
    pub fn new(config: OpenAiCompatConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.expose_secret())
            .with_api_base(&config.base_url);

        Self {
            client: Client::with_config(openai_config),
            provider_name: config.provider_name,
            model: config.model,
            pricing: config.pricing,
        }
    }

    /// Create an OpenAI provider (`https://api.openai.com/v1`).
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self::new(config::openai_defaults(api_key, model))
    }

    /// Create a Google Gemini provider (OpenAI-compatible beta endpoint).
    pub fn gemini(api_key: &str, model: &str) -> Self {
        Self::new(config::gemini_defaults(api_key, model))
    }

    /// Create a provider for a local OpenAI-compatible server.
    pub fn local(base_url: &str, model: &str) -> Self {
        Self::new(config::local_defaults(base_url, model))
    }

    /// Build a [`CreateChatCompletionRequest`] from the engine's generic
    /// [`CompletionRequest`].
    fn build_request(&self, request: &CompletionRequest) -> CreateChatCompletionRequest {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        for msg in &request.messages {
            let oai_msg = match msg.role {
                MessageRole::System => {
                    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                        content: ChatCompletionRequestSystemMessageContent::Text(
                            msg.content.clone(),
                        ),
                        name: None,
                    })
                }
                MessageRole::User => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                        content: ChatCompletionRequestUserMessageContent::Text(
                            msg.content.clone(),
                        ),
                        name: None,
                    })
                }
                MessageRole::Assistant => {
                    #[allow(deprecated)]
                    ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessage {
                            content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                                msg.content.clone(),
                            )),
                            refusal: None,
                            name: None,
                            audio: None,
                            tool_calls: None,
                            function_call: None,
                        },
                    )
                }
            };
            messages.push(oai_msg);
        }

        // Use the model from the request if set, otherwise the config default.
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        CreateChatCompletionRequest {
            model,
            messages,
            max_completion_tokens: request.max_tokens,
            temperature: request.temperature.map(|t| t as f32),
            ..Default::default()
        }
    }
}

impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let oai_request = self.build_request(request);

        let span = tracing::info_span!(
            "generate",
            { genai_attrs::GEN_AI_OPERATION_NAME } = genai_attrs::OP_GENERATE,
            { genai_attrs::GEN_AI_PROVIDER_NAME } = self.provider_name.as_str(),
            { genai_attrs::GEN_AI_REQUEST_MODEL } = oai_request.model.as_str(),
            { genai_attrs::GEN_AI_REQUEST_TEMPERATURE } = request.temperature,
            { genai_attrs::GEN_AI_REQUEST_MAX_TOKENS } = request.max_tokens,
            { genai_attrs::GEN_AI_USAGE_INPUT_TOKENS } = tracing::field::Empty,
            { genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS } = tracing::field::Empty,
            { genai_attrs::GEN_AI_RESPONSE_FINISH_REASONS } = tracing::field::Empty,
        );

        async {
            let response = self
                .client
                .chat()
                .create(oai_request)
                .await
                .map_err(map_openai_error)?;

            let choice = response.choices.first();
            let text = choice
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default();

            let finish_reason = choice
                .and_then(|c| c.finish_reason.as_ref())
                .map(|fr| match fr {
                    FinishReason::Stop => EngineFinishReason::Stop,
                    FinishReason::Length => EngineFinishReason::Length,
                    FinishReason::ContentFilter => EngineFinishReason::ContentFilter,
                    FinishReason::ToolCalls | FinishReason::FunctionCall => {
                        EngineFinishReason::Other
                    }
                })
                .unwrap_or(EngineFinishReason::Stop);

            let usage = response
                .usage
                .map(|u| {
                    let cost_usd = self
                        .pricing
                        .map(|p| p.estimate(u.prompt_tokens, u.completion_tokens));
                    Usage {
                        prompt_tokens: u.prompt_tokens,
                        completion_tokens: u.completion_tokens,
                        total_tokens: u.total_tokens,
                        cost_usd,
                    }
                })
                .unwrap_or_default();

            let span = tracing::Span::current();
            span.record(genai_attrs::GEN_AI_USAGE_INPUT_TOKENS, usage.prompt_tokens);
            span.record(
                genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS,
                usage.completion_tokens,
            );
            span.record(
                genai_attrs::GEN_AI_RESPONSE_FINISH_REASONS,
                finish_reason.to_string().as_str(),
            );

            Ok(CompletionResponse {
                text,
                model: response.model,
                finish_reason,
                usage,
            })
        }
        .instrument(span)
        .await
    }
}

/// Map an `async_openai::error::OpenAIError` to an [`LlmError`].
fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            // Check for known error types by code or type field
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "authentication_error"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("Invalid API key")
            {
                LlmError::AuthenticationFailed
            } else if code == "rate_limit_exceeded" || error_type == "rate_limit_error" {
                LlmError::RateLimited {
                    retry_after_ms: None,
                }
            } else {
                LlmError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::Reqwest(reqwest_err) => {
            if let Some(status) = reqwest_err.status() {
                match status.as_u16() {
                    401 => LlmError::AuthenticationFailed,
                    429 => LlmError::RateLimited {
                        retry_after_ms: None,
                    },
                    _ => LlmError::Provider {
                        message: err.to_string(),
                    },
                }
            } else {
                // Connection failures and client-side timeouts are transient.
                LlmError::Transport(err.to_string())
            }
        }
        OpenAIError::JSONDeserialize(_, content) => {
            LlmError::Deserialization(format!("failed to parse response: {content}"))
        }
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg.clone()),
        _ => LlmError::Provider {
            message: err.to_string(),
        },
    }
}
