//! Provider trait definition.
//!
//! This is the abstraction the engine consumes for generative-text calls.
//! Uses RPITIT (return-position `impl Trait` in traits) per the Rust 2024
//! edition approach; `BoxProvider` wraps it for dynamic dispatch.

use cascade_types::llm::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for generative-text provider backends.
///
/// The engine only ever sends a `CompletionRequest` and reads back
/// `{text, finish_reason, usage}`; it never inspects provider-specific
/// fields beyond that contract. Implementations live in cascade-infra
/// (e.g., the OpenAI-compatible client).
pub trait Provider: Send + Sync {
    /// Human-readable provider name (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;
}

/// Shared handles delegate to the inner provider.
impl<T: Provider> Provider for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        (**self).complete(request).await
    }
}
