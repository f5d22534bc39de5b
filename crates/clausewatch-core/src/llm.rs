//! Chat-model trait used by the answer pipeline.

use anyhow::Result;
use async_trait::async_trait;

/// A hosted chat model that answers a single fully-rendered prompt.
///
/// Implementations are expected to be deterministic where the provider
/// allows it (temperature 0, fixed seed).
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send `prompt` as one user message and return the reply text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}
