pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nexus_context::{AssembleRequest, ContextAssembler};
use nexus_core::error::{NexusError, Result};
use nexus_core::types::{ConversationSource, MessageRole, Scope, Sensitivity, TaskRole};
use nexus_persona::{HistoryTurn, PersonaSelector, UserProfileSnapshot};
use nexus_provider::{ChatChunk, ChatParams, ProviderRouter};
use nexus_store::port::PersistencePort;
use nexus_store::types::ListConversationsFilter;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use registry::RequestRegistry;

const TITLE_PREVIEW_CHARS: usize = 48;

/// A single incoming chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurnRequest {
    pub user_id: String,
    pub agent_id: String,
    pub conversation_id: Option<String>,
    pub message: String,
    pub sensitivity: Sensitivity,
    pub task_role: TaskRole,
    pub model: Option<String>,
    pub request_id: String,
}

/// Records the decision trail behind one reply: which persona/template/
/// provider produced it and what context it was grounded in. Surfaced to
/// callers so a reply can be explained after the fact.
#[derive(Debug, Clone, Serialize)]
pub struct ModelWay {
    pub persona: String,
    pub prompt_name: Option<String>,
    pub provider: String,
    pub model: String,
    pub intent: String,
    pub phase: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub context_digest: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnOutcome {
    pub conversation_id: String,
    pub assistant_message_id: String,
    pub content: String,
    pub aborted: bool,
    pub model_way: ModelWay,
}

pub struct OrchestratorConfig {
    pub message_window: usize,
    pub max_context_blocks: usize,
    pub chat_timeout: Duration,
}

/// Wires the knowledge, context, persona, and provider layers into the
/// chat-turn pipeline (request registry + orchestrator).
pub struct Orchestrator {
    store: Arc<dyn PersistencePort>,
    context: Arc<ContextAssembler>,
    persona: Arc<PersonaSelector>,
    router: Arc<ProviderRouter>,
    registry: Arc<RequestRegistry>,
    conversation_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PersistencePort>,
        context: Arc<ContextAssembler>,
        persona: Arc<PersonaSelector>,
        router: Arc<ProviderRouter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            context,
            persona,
            router,
            registry: Arc::new(RequestRegistry::new()),
            conversation_locks: DashMap::new(),
            config,
        }
    }

    pub fn registry(&self) -> Arc<RequestRegistry> {
        self.registry.clone()
    }

    pub fn router(&self) -> Arc<ProviderRouter> {
        self.router.clone()
    }

    fn conversation_lock(&self, conversation_id: &str) -> Arc<AsyncMutex<()>> {
        self.conversation_locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn resolve_conversation(&self, req: &ChatTurnRequest) -> Result<nexus_store::types::Conversation> {
        match &req.conversation_id {
            Some(id) => self
                .store
                .get_conversation(&Scope::User(req.user_id.clone()), id)
                .map_err(NexusError::from),
            None => {
                let title: String = req.message.chars().take(TITLE_PREVIEW_CHARS).collect();
                self.store
                    .create_conversation(&req.user_id, None, &title, ConversationSource::Native, None)
                    .map_err(NexusError::from)
            }
        }
    }

    fn trailing_window(&self, conversation_id: &str) -> Vec<HistoryTurn> {
        let page = self.store.list_messages(conversation_id, None, 200).unwrap_or(nexus_store::types::Page {
            items: vec![],
            next_cursor: None,
        });
        page.items
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|m| HistoryTurn {
                content: m.content.clone(),
                topics: self.persona_topics(&m.content),
            })
            .collect()
    }

    fn persona_topics(&self, content: &str) -> Vec<String> {
        let lowered = content.to_lowercase();
        self.persona
            .personas_snapshot()
            .into_iter()
            .filter(|p| p.keyword_triggers.iter().any(|k| lowered.contains(k.as_str())))
            .map(|p| p.id)
            .collect()
    }

    fn compose_messages(&self, system_prompt: &str, history: &[nexus_store::types::Message], new_message: &str) -> Vec<nexus_provider::types::Message> {
        use nexus_provider::types::{Message as PMessage, Role};

        let mut out = Vec::with_capacity(history.len() + 2);
        out.push(PMessage {
            role: Role::System,
            content: system_prompt.to_string(),
        });

        let window_start = history.len().saturating_sub(self.config.message_window);
        for m in &history[window_start..] {
            let role = match m.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
                MessageRole::System => Role::System,
                MessageRole::Tool => Role::Assistant,
            };
            out.push(PMessage {
                role,
                content: m.content.clone(),
            });
        }

        out.push(PMessage {
            role: Role::User,
            content: new_message.to_string(),
        });
        out
    }

    /// Runs one full non-streaming chat turn end to end: resolve conversation,
    /// assemble context, pick a persona, dispatch to a provider, persist
    /// user-then-assistant, and return the decision trail.
    #[instrument(skip(self, req), fields(request_id = %req.request_id))]
    pub async fn process_turn(&self, req: ChatTurnRequest) -> Result<ChatTurnOutcome> {
        if req.message.trim().is_empty() {
            return Err(NexusError::invalid_request("message cannot be empty"));
        }

        let conversation = self.resolve_conversation(&req)?;
        let lock = self.conversation_lock(&conversation.id);
        let _guard = lock.lock().await;

        let history = self
            .store
            .list_messages(&conversation.id, None, 10_000)
            .map_err(NexusError::from)?
            .items;
        let conversation_length = history.len();

        let bundle = self.context.assemble(&AssembleRequest {
            user_id: req.user_id.clone(),
            agent_id: req.agent_id.clone(),
            include_short: true,
            include_medium: true,
            include_long: true,
            max_blocks: self.config.max_context_blocks,
        });

        let trailing = self.trailing_window(&conversation.id);
        let profile = UserProfileSnapshot::default();
        let (persona_id, _decision) = self.persona.select_expert(&req.message, &trailing, &profile, None, conversation_length);

        let mut template_ctx: HashMap<String, Value> = HashMap::new();
        template_ctx.insert("profileCompleteness".to_string(), Value::from(profile.completeness));
        let context_block = render_context_block(&bundle);
        let system_prompt = self.persona.assemble_prompt(&persona_id, &template_ctx, &context_block);
        let template_name = self.persona.select_template(&persona_id, &template_ctx).map(|t| t.prompt_name.clone());

        let chat_messages = self.compose_messages(&system_prompt, &history, &req.message);

        // User message is always persisted before dispatch so a mid-flight
        // abort never leaves an assistant reply without its prompt.
        self.store
            .append_message(&conversation.id, MessageRole::User, &req.message, None, None, None)
            .map_err(NexusError::from)?;

        let token = self.registry.register(&req.request_id);
        let params = ChatParams {
            messages: chat_messages,
            task_role: req.task_role,
            sensitivity: req.sensitivity,
            tenant_id: req.user_id.clone(),
            stream: false,
            model: req.model.clone(),
            temperature: None,
            max_tokens: None,
            request_id: req.request_id.clone(),
        };

        let dispatch = self.router.send(&params);
        let select_fut = async {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = dispatch => Some(result),
            }
        };
        let timed = tokio::time::timeout(self.config.chat_timeout, select_fut).await;
        self.registry.unregister(&req.request_id);

        let outcome = match timed {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(request_id = %req.request_id, "chat turn timed out");
                return Err(NexusError::Timeout {
                    ms: self.config.chat_timeout.as_millis() as u64,
                });
            }
        };

        let (content, aborted, provider, model, tokens_in, tokens_out) = match outcome {
            None => {
                info!(request_id = %req.request_id, "chat turn aborted before provider response");
                (String::new(), true, "none".to_string(), "none".to_string(), 0, 0)
            }
            Some(Ok(resp)) => (resp.content, false, resp.provider, resp.model, resp.tokens_in, resp.tokens_out),
            Some(Err(e)) => {
                warn!(request_id = %req.request_id, error = %e, "provider dispatch failed");
                return Err(NexusError::from(e));
            }
        };

        // Abort before any provider text arrived leaves no assistant message;
        // a mid-flight abort still persists whatever was returned.
        let assistant_message_id = if aborted && content.is_empty() {
            String::new()
        } else {
            self.store
                .append_message(&conversation.id, MessageRole::Assistant, &content, aborted_marker(aborted), None, None)
                .map_err(NexusError::from)?
                .id
        };

        let conversation_id = conversation.id;
        Ok(ChatTurnOutcome {
            conversation_id: conversation_id.clone(),
            assistant_message_id,
            content,
            aborted,
            model_way: ModelWay {
                persona: persona_id,
                prompt_name: template_name,
                provider,
                model,
                intent: req.task_role.to_string(),
                phase: if aborted { "aborted".to_string() } else { "complete".to_string() },
                conversation_id,
                request_id: req.request_id,
                context_digest: bundle.context_digest,
                tokens_in,
                tokens_out,
            },
        })
    }

    /// Streaming variant: relays provider chunks to the caller as they
    /// arrive, persisting the accumulated reply once the stream ends (or is
    /// aborted) rather than mid-flight.
    #[instrument(skip(self, req), fields(request_id = %req.request_id))]
    pub async fn process_turn_stream(&self, req: ChatTurnRequest) -> Result<mpsc::Receiver<ChatChunk>> {
        if req.message.trim().is_empty() {
            return Err(NexusError::invalid_request("message cannot be empty"));
        }

        let conversation = self.resolve_conversation(&req)?;
        let lock = self.conversation_lock(&conversation.id);
        let guard_conversation_id = conversation.id.clone();

        let history = self
            .store
            .list_messages(&conversation.id, None, 10_000)
            .map_err(NexusError::from)?
            .items;
        let conversation_length = history.len();

        let bundle = self.context.assemble(&AssembleRequest {
            user_id: req.user_id.clone(),
            agent_id: req.agent_id.clone(),
            include_short: true,
            include_medium: true,
            include_long: true,
            max_blocks: self.config.max_context_blocks,
        });

        let trailing = self.trailing_window(&conversation.id);
        let profile = UserProfileSnapshot::default();
        let (persona_id, _decision) = self.persona.select_expert(&req.message, &trailing, &profile, None, conversation_length);
        let mut template_ctx: HashMap<String, Value> = HashMap::new();
        template_ctx.insert("profileCompleteness".to_string(), Value::from(profile.completeness));
        let context_block = render_context_block(&bundle);
        let system_prompt = self.persona.assemble_prompt(&persona_id, &template_ctx, &context_block);
        let chat_messages = self.compose_messages(&system_prompt, &history, &req.message);

        self.store
            .append_message(&conversation.id, MessageRole::User, &req.message, None, None, None)
            .map_err(NexusError::from)?;

        let token = self.registry.register(&req.request_id);
        let params = ChatParams {
            messages: chat_messages,
            task_role: req.task_role,
            sensitivity: req.sensitivity,
            tenant_id: req.user_id.clone(),
            stream: true,
            model: req.model.clone(),
            temperature: None,
            max_tokens: None,
            request_id: req.request_id.clone(),
        };

        let router = self.router.clone();
        let establish = tokio::time::timeout(self.config.chat_timeout, router.send_stream(&params)).await;
        let mut upstream = match establish {
            Ok(Ok(rx)) => rx,
            Ok(Err(e)) => {
                self.registry.unregister(&req.request_id);
                return Err(NexusError::from(e));
            }
            Err(_) => {
                self.registry.unregister(&req.request_id);
                return Err(NexusError::Timeout {
                    ms: self.config.chat_timeout.as_millis() as u64,
                });
            }
        };

        let (tx, rx) = mpsc::channel(32);
        let store = self.store.clone();
        let registry = self.registry.clone();
        let request_id = req.request_id.clone();

        tokio::spawn(async move {
            // Conversation-level append lock is held for the lifetime of the
            // relay, not just the final persist, so an interleaved second
            // turn on the same conversation can't append out of order.
            let _guard = lock.lock().await;
            let mut accumulated = String::new();
            let mut aborted = false;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        aborted = true;
                        break;
                    }
                    chunk = upstream.recv() => {
                        match chunk {
                            Some(ChatChunk::Delta { delta }) => {
                                accumulated.push_str(&delta);
                                if tx.send(ChatChunk::Delta { delta }).await.is_err() {
                                    break;
                                }
                            }
                            Some(ChatChunk::Done { finish_reason }) => {
                                let _ = tx.send(ChatChunk::Done { finish_reason }).await;
                                break;
                            }
                            Some(other @ ChatChunk::ToolCall { .. }) => {
                                if tx.send(other).await.is_err() {
                                    break;
                                }
                            }
                            Some(ChatChunk::Error { message }) => {
                                let _ = tx.send(ChatChunk::Error { message }).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            registry.unregister(&request_id);

            if !accumulated.is_empty() {
                if let Err(e) = store.append_message(
                    &guard_conversation_id,
                    MessageRole::Assistant,
                    &accumulated,
                    aborted_marker(aborted),
                    None,
                    None,
                ) {
                    warn!(request_id = %request_id, error = %e, "failed to persist streamed reply");
                }
            }
        });

        Ok(rx)
    }

    pub fn abort(&self, request_id: &str) -> bool {
        self.registry.abort(request_id)
    }

    pub fn list_conversations(&self, user_id: &str, archived: Option<bool>) -> Result<Vec<nexus_store::types::Conversation>> {
        self.store
            .list_conversations(
                &Scope::User(user_id.to_string()),
                user_id,
                ListConversationsFilter {
                    archived,
                    limit: 0,
                    cursor: None,
                },
            )
            .map(|p| p.items)
            .map_err(NexusError::from)
    }
}

fn aborted_marker(aborted: bool) -> Option<Value> {
    if aborted {
        Some(serde_json::json!({ "aborted": true }))
    } else {
        None
    }
}

fn render_context_block(bundle: &nexus_context::ContextBundle) -> String {
    if bundle.context_blocks.is_empty() {
        return "(no relevant context)".to_string();
    }
    bundle
        .context_blocks
        .iter()
        .map(|b| format!("- {}: {}", b.title, b.body))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_knowledge::FactStore;
    use nexus_provider::HealthTracker;
    use nexus_store::SqliteStore;

    fn build_orchestrator() -> Orchestrator {
        let store: Arc<dyn PersistencePort> = Arc::new(SqliteStore::in_memory().unwrap());
        let facts = Arc::new(FactStore::new(store.clone()));
        let context = Arc::new(ContextAssembler::new(facts));
        let persona = Arc::new(PersonaSelector::with_defaults());
        let router = Arc::new(ProviderRouter::new(vec![], store.clone(), Arc::new(HealthTracker::new())));
        Orchestrator::new(
            store,
            context,
            persona,
            router,
            OrchestratorConfig {
                message_window: 40,
                max_context_blocks: 10,
                chat_timeout: Duration::from_secs(30),
            },
        )
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_any_persistence() {
        let orch = build_orchestrator();
        let err = orch
            .process_turn(ChatTurnRequest {
                user_id: "u1".into(),
                agent_id: "a1".into(),
                conversation_id: None,
                message: "   ".into(),
                sensitivity: Sensitivity::Public,
                task_role: TaskRole::Chat,
                model: None,
                request_id: "r1".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidRequest");
    }

    #[tokio::test]
    async fn no_eligible_provider_surfaces_as_unavailable() {
        let orch = build_orchestrator();
        let err = orch
            .process_turn(ChatTurnRequest {
                user_id: "u1".into(),
                agent_id: "a1".into(),
                conversation_id: None,
                message: "hello there".into(),
                sensitivity: Sensitivity::Public,
                task_role: TaskRole::Chat,
                model: None,
                request_id: "r2".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "Unavailable");
        assert!(!orch.registry.is_active("r2"));
    }
}
