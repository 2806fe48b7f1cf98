//! Provider port: the trait the engine consumes and its dyn-safe wrapper.

pub mod box_provider;
pub mod provider;

pub use box_provider::BoxProvider;
pub use provider::Provider;

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider fakes for engine tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use cascade_types::llm::{
        CompletionRequest, CompletionResponse, FinishReason, LlmError, Usage,
    };

    use super::Provider;

    /// One scripted provider turn.
    pub(crate) struct ScriptedTurn {
        pub response: Result<CompletionResponse, LlmError>,
        /// Simulated latency before the response is produced.
        pub delay: Duration,
    }

    /// Provider fake that replays a fixed sequence of responses in call
    /// order and counts invocations.
    pub(crate) struct ScriptedProvider {
        turns: Mutex<VecDeque<ScriptedTurn>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        pub fn new(turns: Vec<ScriptedTurn>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.turns.lock().unwrap().pop_front();
            match next {
                Some(t) => {
                    if !t.delay.is_zero() {
                        tokio::time::sleep(t.delay).await;
                    }
                    t.response
                }
                None => Err(LlmError::Provider {
                    message: "script exhausted".to_string(),
                }),
            }
        }
    }

    /// Provider fake that echoes the final user message back, with a
    /// per-call delay taken from `delays` in call order. Used to simulate
    /// out-of-order completion in collection tests.
    pub(crate) struct EchoProvider {
        delays: Mutex<VecDeque<Duration>>,
        calls: AtomicU32,
    }

    impl EchoProvider {
        pub fn new(delays_ms: &[u64]) -> Self {
            Self {
                delays: Mutex::new(
                    delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
                ),
                calls: AtomicU32::new(0),
            }
        }

        pub fn instant() -> Self {
            Self::new(&[])
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays.lock().unwrap().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let text = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ok(&format!("echo:{text}"), FinishReason::Stop))
        }
    }

    /// Build a successful response with fixed usage numbers.
    pub(crate) fn ok(text: &str, finish_reason: FinishReason) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            model: "scripted-model".to_string(),
            finish_reason,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                cost_usd: Some(0.001),
            },
        }
    }

    pub(crate) fn turn(response: CompletionResponse) -> ScriptedTurn {
        ScriptedTurn {
            response: Ok(response),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn failing_turn(error: LlmError) -> ScriptedTurn {
        ScriptedTurn {
            response: Err(error),
            delay: Duration::ZERO,
        }
    }
}
