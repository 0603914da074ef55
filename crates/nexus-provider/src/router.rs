use std::sync::Arc;
use std::time::{Duration, SystemTime};

const CHARS_PER_TOKEN: usize = 4;

use nexus_core::types::Sensitivity;
use nexus_store::port::PersistencePort;
use nexus_store::types::ProviderUsage;
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::error::ProviderError;
use crate::health::HealthTracker;
use crate::provider::LlmProvider;
use crate::types::{ChatChunk, ChatParams, ChatResponse, ProviderStatus};

const DEFAULT_BUDGET_TYPE: &str = "monthly_cost";

/// Routes a chat call to the right upstream given its sensitivity tag,
/// enforces per-tenant budgets, and records usage rows for every attempt.
///
/// `sensitivity=restricted` never leaves the local provider; `internal`
/// prefers the cheapest capable provider; `public` accepts any enabled
/// provider and just avoids ones the passive health window has marked down.
pub struct ProviderRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    store: Arc<dyn PersistencePort>,
    health: Arc<HealthTracker>,
}

impl ProviderRouter {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, store: Arc<dyn PersistencePort>, health: Arc<HealthTracker>) -> Self {
        Self {
            providers,
            store,
            health,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn LlmProvider>] {
        &self.providers
    }

    async fn eligible(&self, sensitivity: Sensitivity) -> Vec<Arc<dyn LlmProvider>> {
        let mut candidates: Vec<Arc<dyn LlmProvider>> = match sensitivity {
            Sensitivity::Restricted => self.providers.iter().filter(|p| p.is_local()).cloned().collect(),
            Sensitivity::Internal | Sensitivity::Public => self.providers.clone(),
        };

        let mut ranked = Vec::with_capacity(candidates.len());
        for p in candidates.drain(..) {
            let status = self.health.passive_status(p.name()).await;
            if status != ProviderStatus::Down {
                ranked.push((p, status));
            }
        }

        match sensitivity {
            Sensitivity::Internal => {
                ranked.sort_by(|a, b| a.0.cost_per_token().partial_cmp(&b.0.cost_per_token()).unwrap_or(std::cmp::Ordering::Equal));
            }
            Sensitivity::Public | Sensitivity::Restricted => {
                // Prefer fully-connected providers; degraded ones are kept as fallback.
                ranked.sort_by_key(|(_, status)| *status != ProviderStatus::Connected);
            }
        }

        ranked.into_iter().map(|(p, _)| p).collect()
    }

    fn check_budget(&self, tenant_id: &str, provider: &str) -> Result<(), ProviderError> {
        match self.store.get_budget(tenant_id, provider, DEFAULT_BUDGET_TYPE) {
            Ok(Some(budget)) if budget.is_active && budget.current_spend >= budget.budget_amount => {
                Err(ProviderError::BudgetExceeded {
                    tenant_id: tenant_id.to_string(),
                    provider: provider.to_string(),
                    budget_type: DEFAULT_BUDGET_TYPE.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn record(&self, provider: &str, req: &ChatParams, tokens_in: u64, tokens_out: u64, model: String, success: bool, latency_ms: u64) {
        let cost_per_token = self
            .providers
            .iter()
            .find(|p| p.name() == provider)
            .map(|p| p.cost_per_token())
            .unwrap_or(0.0);
        let cost = (tokens_in + tokens_out) as f64 * cost_per_token;
        let usage = ProviderUsage {
            id: nexus_core::types::new_id(),
            user_id: req.tenant_id.clone(),
            provider: provider.to_string(),
            model,
            task_type: req.task_role.to_string(),
            tokens_in,
            tokens_out,
            cost,
            latency_ms,
            success,
            request_id: req.request_id.clone(),
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.store.record_usage(&usage) {
            warn!(error = %e, "failed to record provider usage");
        }
        if success && cost > 0.0 {
            if let Err(e) = self.store.increment_budget(&req.tenant_id, provider, DEFAULT_BUDGET_TYPE, cost) {
                warn!(error = %e, "failed to increment usage budget");
            }
        }
    }

    /// Jitter-bounded backoff before a single retry on a transient fault.
    /// Non-streaming calls only: a stream that fails mid-flight
    /// is surfaced to the caller as-is, never silently restarted.
    async fn jittered_backoff(attempt: u32) {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let jitter_ms = (nanos % 250) as u64;
        tokio::time::sleep(Duration::from_millis(100 * attempt as u64 + jitter_ms)).await;
    }

    fn is_transient(err: &ProviderError) -> bool {
        matches!(err, ProviderError::Http(_) | ProviderError::RateLimited { .. } | ProviderError::Unavailable(_))
    }

    #[instrument(skip(self, req))]
    pub async fn send(&self, req: &ChatParams) -> Result<ChatResponse, ProviderError> {
        let candidates = self.eligible(req.sensitivity).await;
        if candidates.is_empty() {
            return Err(ProviderError::NoEligibleProvider(format!(
                "no provider eligible for sensitivity={}",
                req.sensitivity
            )));
        }

        let mut last_err = None;
        for provider in &candidates {
            if let Err(e) = self.check_budget(&req.tenant_id, provider.name()) {
                last_err = Some(e);
                continue;
            }

            let started = std::time::Instant::now();
            let mut attempt = 0;
            loop {
                match provider.send(req).await {
                    Ok(resp) => {
                        let latency = started.elapsed().as_millis() as u64;
                        self.health.record(provider.name(), true).await;
                        self.record(provider.name(), req, resp.tokens_in, resp.tokens_out, resp.model.clone(), true, latency);
                        return Ok(resp);
                    }
                    Err(e) => {
                        self.health.record(provider.name(), false).await;
                        if attempt == 0 && Self::is_transient(&e) {
                            attempt += 1;
                            Self::jittered_backoff(attempt).await;
                            continue;
                        }
                        let latency = started.elapsed().as_millis() as u64;
                        self.record(provider.name(), req, 0, 0, req.model.clone().unwrap_or_default(), false, latency);
                        last_err = Some(e);
                        break;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all eligible providers failed".to_string())))
    }

    /// Streaming calls never retry mid-stream: the first eligible provider's
    /// stream is handed back as-is, and a failure surfaces as a `ChatChunk::Error`.
    /// Usage is recorded once, after the relay drains, aggregating chunks into
    /// prompt/completion token estimates so budgets are charged for what was
    /// actually streamed rather than a zeroed placeholder row.
    #[instrument(skip(self, req))]
    pub async fn send_stream(self: Arc<Self>, req: &ChatParams) -> Result<mpsc::Receiver<ChatChunk>, ProviderError> {
        let candidates = self.eligible(req.sensitivity).await;
        let provider = candidates
            .first()
            .ok_or_else(|| ProviderError::NoEligibleProvider(format!("no provider eligible for sensitivity={}", req.sensitivity)))?
            .clone();

        self.check_budget(&req.tenant_id, provider.name())?;
        let started = std::time::Instant::now();
        let mut upstream = match provider.send_stream(req).await {
            Ok(rx) => {
                self.health.record(provider.name(), true).await;
                rx
            }
            Err(e) => {
                self.health.record(provider.name(), false).await;
                self.record(provider.name(), req, 0, 0, req.model.clone().unwrap_or_default(), false, started.elapsed().as_millis() as u64);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(32);
        let router = self.clone();
        let provider_name = provider.name().to_string();
        let model = req.model.clone().unwrap_or_else(|| provider_name.clone());
        let req_owned = req.clone();
        let prompt_chars: usize = req_owned.messages.iter().map(|m| m.content.len()).sum();

        tokio::spawn(async move {
            let mut completion_chars = 0usize;
            let mut success = true;
            while let Some(chunk) = upstream.recv().await {
                if let ChatChunk::Delta { delta } = &chunk {
                    completion_chars += delta.len();
                }
                if matches!(chunk, ChatChunk::Error { .. }) {
                    success = false;
                }
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            let tokens_in = (prompt_chars / CHARS_PER_TOKEN) as u64;
            let tokens_out = (completion_chars / CHARS_PER_TOKEN) as u64;
            router.record(&provider_name, &req_owned, tokens_in, tokens_out, model, success, started.elapsed().as_millis() as u64);
        });

        Ok(rx)
    }

    pub async fn test_connections(&self) -> Vec<(String, ProviderStatus)> {
        let mut out = Vec::with_capacity(self.providers.len());
        for p in &self.providers {
            let status = self.health.active_status(p.clone()).await;
            out.push((p.name().to_string(), status));
        }
        out
    }
}
