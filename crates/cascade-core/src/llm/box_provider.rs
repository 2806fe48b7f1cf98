//! BoxProvider -- object-safe dynamic dispatch wrapper for Provider.
//!
//! Pattern:
//! 1. Define an object-safe `ProviderDyn` trait with boxed futures
//! 2. Blanket-impl `ProviderDyn` for all `T: Provider`
//! 3. `BoxProvider` wraps `Box<dyn ProviderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use cascade_types::llm::{CompletionRequest, CompletionResponse, LlmError};

use super::provider::Provider;

/// Object-safe version of [`Provider`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch; a blanket
/// implementation is provided for all types implementing `Provider`.
pub trait ProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + 'a>>;
}

/// Blanket implementation: any `Provider` automatically implements `ProviderDyn`.
impl<T: Provider> ProviderDyn for T {
    fn name(&self) -> &str {
        Provider::name(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + 'a>> {
        Box::pin(self.complete(request))
    }
}

/// Type-erased provider for runtime selection.
///
/// Since `Provider` uses RPITIT it cannot be used as a trait object
/// directly; `BoxProvider` provides equivalent methods that delegate to
/// the inner `ProviderDyn` trait object.
pub struct BoxProvider {
    inner: Box<dyn ProviderDyn + Send + Sync>,
}

impl BoxProvider {
    /// Wrap a concrete `Provider` in a type-erased box.
    pub fn new<T: Provider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    /// Human-readable provider name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Send a completion request and receive the full response.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        self.inner.complete_boxed(request).await
    }
}
