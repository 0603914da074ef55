use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use nexus_bridge::BridgeState;
use nexus_context::ContextAssembler;
use nexus_core::config::NexusConfig;
use nexus_hygiene::retitle::{HeuristicTitleGenerator, ProviderTitleGenerator, TitleGenerator};
use nexus_hygiene::HygieneRunner;
use nexus_knowledge::FactStore;
use nexus_orchestrator::{Orchestrator, OrchestratorConfig};
use nexus_persona::PersonaSelector;
use nexus_provider::{HealthTracker, LlmProvider, OpenAiCompatProvider, ProviderRouter};
use nexus_store::port::PersistencePort;
use nexus_store::SqliteStore;
use tower_http::trace::TraceLayer;

/// Central shared state — passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: NexusConfig,
    pub store: Arc<dyn PersistencePort>,
    pub orchestrator: Arc<Orchestrator>,
    pub router: Arc<ProviderRouter>,
    pub health: Arc<HealthTracker>,
    pub hygiene: Arc<HygieneRunner>,
}

impl AppState {
    pub fn new(config: NexusConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn PersistencePort> = Arc::new(SqliteStore::open(&config.persistence.url)?);
        let facts = Arc::new(FactStore::new(store.clone()));
        let context = Arc::new(ContextAssembler::new(facts));
        let persona = Arc::new(PersonaSelector::with_defaults());

        let providers = build_providers(&config);
        if providers.is_empty() {
            anyhow::bail!("no LLM providers configured/enabled; refusing to start");
        }
        let health = Arc::new(HealthTracker::new());
        let router = Arc::new(ProviderRouter::new(providers, store.clone(), health.clone()));

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            context,
            persona,
            router.clone(),
            OrchestratorConfig {
                message_window: config.orchestrator.message_window,
                max_context_blocks: config.context.max_blocks,
                chat_timeout: Duration::from_secs(config.timeouts.chat_secs),
            },
        ));

        let title_generator: Arc<dyn TitleGenerator> = match router.providers().first() {
            Some(provider) => Arc::new(ProviderTitleGenerator::new(provider.clone())),
            None => Arc::new(HeuristicTitleGenerator),
        };
        let hygiene = Arc::new(HygieneRunner::new(store.clone(), title_generator, config.hygiene.clone()));

        Ok(Self {
            config,
            store,
            orchestrator,
            router,
            health,
            hygiene,
        })
    }
}

/// Builds the provider list from config — one `OpenAiCompatProvider` per
/// enabled upstream.
fn build_providers(config: &NexusConfig) -> Vec<Arc<dyn LlmProvider>> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

    let openai = &config.providers.openai;
    if openai.enabled {
        if let Some(api_key) = &openai.api_key {
            providers.push(Arc::new(OpenAiCompatProvider::openai(
                api_key.clone(),
                "https://api.openai.com".to_string(),
                "gpt-4o-mini".to_string(),
                openai.cost_per_token.unwrap_or(0.000_002),
            )));
        }
    }

    let openrouter = &config.providers.openrouter;
    if openrouter.enabled {
        if let Some(api_key) = &openrouter.api_key {
            providers.push(Arc::new(OpenAiCompatProvider::openrouter(
                api_key.clone(),
                "https://openrouter.ai".to_string(),
                "openrouter/auto".to_string(),
                openrouter.cost_per_token.unwrap_or(0.000_001),
            )));
        }
    }

    let local = &config.providers.local;
    if local.enabled {
        if let Some(base_url) = &local.base_url {
            providers.push(Arc::new(OpenAiCompatProvider::local(
                base_url.clone(),
                local.api_key.clone(),
                "local-default".to_string(),
            )));
        }
    }

    providers
}

/// Assembles the full Axum router: chat surface, admin/ops surface, and the
/// tool-bridge sub-router mounted under its own path prefix.
pub fn build_router(state: Arc<AppState>) -> Router {
    let bridge_state = Arc::new(BridgeState {
        api_key: state.config.bridge.api_key.clone().unwrap_or_default(),
        store: state.store.clone(),
        orchestrator: state.orchestrator.clone(),
        tools: nexus_bridge::ToolRegistry::with_defaults(),
    });

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/chat", post(crate::http::chat::chat_handler))
        .route("/abort", post(crate::http::chat::abort_handler))
        .route("/conversations", get(crate::http::conversations::list_handler))
        .route("/conversations/{id}", get(crate::http::conversations::get_handler))
        .route("/admin/health", get(crate::http::admin::admin_health_handler))
        .route("/admin/usage", get(crate::http::admin::usage_handler))
        .route(
            "/admin/soul",
            get(crate::http::admin::get_soul_handler).put(crate::http::admin::set_soul_handler),
        )
        .nest("/openclaw", nexus_bridge::router(bridge_state))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
