pub mod error;
pub mod health;
pub mod openai;
pub mod provider;
pub mod router;
pub mod types;

pub use error::ProviderError;
pub use health::HealthTracker;
pub use openai::OpenAiCompatProvider;
pub use provider::LlmProvider;
pub use router::ProviderRouter;
pub use types::{ChatChunk, ChatParams, ChatResponse, ModelInfo, ProviderStatus, UsageStats};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use nexus_core::types::{Sensitivity, TaskRole};
    use nexus_store::port::{PersistencePort, SqliteStore};

    use super::*;
    use crate::types::{ChatParams, Message, Role};

    struct StubProvider {
        label: &'static str,
        cost: f64,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            self.label
        }
        fn cost_per_token(&self) -> f64 {
            self.cost
        }
        async fn send(&self, _req: &ChatParams) -> Result<ChatResponse, ProviderError> {
            if self.fail {
                return Err(ProviderError::Unavailable("stub down".to_string()));
            }
            Ok(ChatResponse {
                content: "hi".to_string(),
                provider: self.label.to_string(),
                model: "stub-model".to_string(),
                tokens_in: 10,
                tokens_out: 5,
                finish_reason: Some("stop".to_string()),
            })
        }
        async fn test_connection(&self) -> ProviderStatus {
            ProviderStatus::Connected
        }
    }

    fn req() -> ChatParams {
        ChatParams {
            messages: vec![Message {
                role: Role::User,
                content: "hello".to_string(),
            }],
            task_role: TaskRole::Chat,
            sensitivity: Sensitivity::Public,
            tenant_id: "tenant-1".to_string(),
            stream: false,
            model: None,
            temperature: None,
            max_tokens: None,
            request_id: "req-1".to_string(),
        }
    }

    #[tokio::test]
    async fn falls_back_to_second_provider_on_failure() {
        let store: Arc<dyn PersistencePort> = Arc::new(SqliteStore::in_memory().unwrap());
        let health = Arc::new(HealthTracker::new());
        let primary = Arc::new(StubProvider {
            label: "flaky",
            cost: 0.001,
            fail: true,
        });
        let backup = Arc::new(StubProvider {
            label: "steady",
            cost: 0.002,
            fail: false,
        });
        let router = ProviderRouter::new(vec![primary, backup], store, health);
        let resp = router.send(&req()).await.unwrap();
        assert_eq!(resp.provider, "steady");
    }

    #[tokio::test]
    async fn restricted_sensitivity_only_uses_local_provider() {
        struct LocalProvider;
        #[async_trait]
        impl LlmProvider for LocalProvider {
            fn name(&self) -> &str {
                "local"
            }
            fn cost_per_token(&self) -> f64 {
                0.0
            }
            fn is_local(&self) -> bool {
                true
            }
            async fn send(&self, _req: &ChatParams) -> Result<ChatResponse, ProviderError> {
                Ok(ChatResponse {
                    content: "local reply".to_string(),
                    provider: "local".to_string(),
                    model: "local-model".to_string(),
                    tokens_in: 1,
                    tokens_out: 1,
                    finish_reason: Some("stop".to_string()),
                })
            }
            async fn test_connection(&self) -> ProviderStatus {
                ProviderStatus::Connected
            }
        }

        let store: Arc<dyn PersistencePort> = Arc::new(SqliteStore::in_memory().unwrap());
        let health = Arc::new(HealthTracker::new());
        let cloud = Arc::new(StubProvider {
            label: "cloud",
            cost: 0.001,
            fail: false,
        });
        let local = Arc::new(LocalProvider);
        let router = ProviderRouter::new(vec![cloud, local], store, health);

        let mut restricted = req();
        restricted.sensitivity = Sensitivity::Restricted;
        let resp = router.send(&restricted).await.unwrap();
        assert_eq!(resp.provider, "local");
    }

    #[tokio::test]
    async fn budget_exceeded_blocks_dispatch() {
        let store: Arc<dyn PersistencePort> = Arc::new(SqliteStore::in_memory().unwrap());
        store.increment_budget("tenant-1", "only", "monthly_cost", 0.0).unwrap();
        // Force the budget active and exhausted by spending past a zero cap.
        store.increment_budget("tenant-1", "only", "monthly_cost", 1.0).unwrap();

        let health = Arc::new(HealthTracker::new());
        let provider = Arc::new(StubProvider {
            label: "only",
            cost: 0.001,
            fail: false,
        });
        let router = ProviderRouter::new(vec![provider], store.clone(), health);

        // budget_amount defaults to 0 on first insert, so any positive spend exceeds it.
        let err = router.send(&req()).await.unwrap_err();
        assert!(matches!(err, ProviderError::BudgetExceeded { .. }));
    }
}
