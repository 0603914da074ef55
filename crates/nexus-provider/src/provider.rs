use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::types::{ChatChunk, ChatParams, ChatResponse, ProviderStatus};

/// One upstream chat provider. Implemented for OpenAI, OpenRouter, and the
/// self-hosted "OpenClaw" local runtime — all three speak the same
/// OpenAI-compatible wire format, so a single adapter (`OpenAiCompatProvider`)
/// backs all three with different base URLs/headers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Per-token cost estimate used by `sensitivity=internal` cheapest-capable
    /// routing and by usage-cost accounting.
    fn cost_per_token(&self) -> f64;

    /// True only for the local/self-hosted provider — the only provider
    /// eligible under `sensitivity=restricted`.
    fn is_local(&self) -> bool {
        false
    }

    async fn send(&self, req: &ChatParams) -> Result<ChatResponse, ProviderError>;

    /// Default streaming implementation: providers that can't stream natively
    /// fall back to a single `send()` call surfaced as one Delta + Done chunk.
    async fn send_stream(&self, req: &ChatParams) -> Result<mpsc::Receiver<ChatChunk>, ProviderError> {
        let (tx, rx) = mpsc::channel(8);
        let resp = self.send(req).await?;
        let _ = tx.send(ChatChunk::Delta { delta: resp.content }).await;
        let _ = tx
            .send(ChatChunk::Done {
                finish_reason: resp.finish_reason,
            })
            .await;
        Ok(rx)
    }

    /// Active connectivity probe against the provider's cheapest endpoint,
    /// bounded by `timeouts.health`.
    async fn test_connection(&self) -> ProviderStatus;
}
