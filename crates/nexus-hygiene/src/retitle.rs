use std::sync::Arc;

use async_trait::async_trait;
use nexus_core::types::{Sensitivity, TaskRole};
use nexus_provider::{ChatParams, LlmProvider};
use nexus_store::types::Message;

const MAX_HEURISTIC_CHARS: usize = 40;

/// Produces a replacement title for a conversation flagged as generic.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate_title(&self, messages: &[Message]) -> String;
}

/// Truncates the first user message — the fallback when no provider is
/// configured for retitling.
pub struct HeuristicTitleGenerator;

#[async_trait]
impl TitleGenerator for HeuristicTitleGenerator {
    async fn generate_title(&self, messages: &[Message]) -> String {
        let first = messages
            .iter()
            .find(|m| m.role == nexus_core::types::MessageRole::User)
            .map(|m| m.content.trim())
            .unwrap_or("");
        if first.is_empty() {
            return "Untitled conversation".to_string();
        }
        let truncated: String = first.chars().take(MAX_HEURISTIC_CHARS).collect();
        if first.chars().count() > MAX_HEURISTIC_CHARS {
            format!("{truncated}…")
        } else {
            truncated
        }
    }
}

/// Asks a cheap internal-sensitivity model to summarize the opening turns
/// into a short title. Falls back to the heuristic on any provider error.
pub struct ProviderTitleGenerator {
    provider: Arc<dyn LlmProvider>,
    fallback: HeuristicTitleGenerator,
}

impl ProviderTitleGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            fallback: HeuristicTitleGenerator,
        }
    }
}

#[async_trait]
impl TitleGenerator for ProviderTitleGenerator {
    async fn generate_title(&self, messages: &[Message]) -> String {
        let transcript: String = messages
            .iter()
            .take(6)
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        if transcript.trim().is_empty() {
            return self.fallback.generate_title(messages).await;
        }

        let params = ChatParams {
            messages: vec![nexus_provider::types::Message {
                role: nexus_provider::types::Role::User,
                content: format!(
                    "Summarize this conversation opening in 6 words or fewer, no punctuation, as a title:\n\n{transcript}"
                ),
            }],
            task_role: TaskRole::Draft,
            sensitivity: Sensitivity::Internal,
            tenant_id: "hygiene".to_string(),
            stream: false,
            model: None,
            temperature: Some(0.2),
            max_tokens: Some(16),
            request_id: nexus_core::types::new_ephemeral_id(),
        };

        match self.provider.send(&params).await {
            Ok(resp) if !resp.content.trim().is_empty() => resp.content.trim().to_string(),
            _ => self.fallback.generate_title(messages).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::types::MessageRole;

    fn msg(role: MessageRole, content: &str) -> Message {
        Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            role,
            content: content.to_string(),
            content_json: None,
            tool_call_id: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn heuristic_truncates_long_first_message() {
        let gen = HeuristicTitleGenerator;
        let long = "a".repeat(100);
        let title = gen.generate_title(&[msg(MessageRole::User, &long)]).await;
        assert!(title.ends_with('…'));
        assert!(title.chars().count() <= MAX_HEURISTIC_CHARS + 1);
    }

    #[tokio::test]
    async fn heuristic_falls_back_when_no_user_message() {
        let gen = HeuristicTitleGenerator;
        let title = gen.generate_title(&[msg(MessageRole::Assistant, "hi")]).await;
        assert_eq!(title, "Untitled conversation");
    }
}
