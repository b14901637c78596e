use async_trait::async_trait;

use crate::errors::PhoneClawResult;
use crate::llm::types::{ChatMessage, Completion};

/// A chat model bound to one endpoint and model name.
///
/// Calls are non-streaming: the caller parses a whole reply at once. Timeouts
/// and retries belong to the implementation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (the `[llm.providers.<id>]` key).
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Whether a real API key is configured. Only reported, never logged.
    fn api_key_set(&self) -> bool {
        false
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> PhoneClawResult<Completion>;
}
