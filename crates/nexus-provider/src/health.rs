use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::provider::LlmProvider;
use crate::types::ProviderStatus;

const WINDOW_SIZE: usize = 20;
const DEGRADED_FAILURE_RATE: f64 = 0.3;
const DOWN_FAILURE_RATE: f64 = 0.8;
const ACTIVE_PROBE_TTL: Duration = Duration::from_secs(30);

/// Rolling pass/fail window for one provider, updated after every real call.
/// This is the "passive" signal — it reflects recent production traffic, not
/// a synthetic probe.
struct RollingWindow {
    outcomes: VecDeque<bool>,
}

impl RollingWindow {
    fn new() -> Self {
        Self {
            outcomes: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    fn record(&mut self, ok: bool) {
        if self.outcomes.len() == WINDOW_SIZE {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(ok);
    }

    fn status(&self) -> ProviderStatus {
        if self.outcomes.is_empty() {
            return ProviderStatus::Connected;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        let rate = failures as f64 / self.outcomes.len() as f64;
        if rate >= DOWN_FAILURE_RATE {
            ProviderStatus::Down
        } else if rate >= DEGRADED_FAILURE_RATE {
            ProviderStatus::Degraded
        } else {
            ProviderStatus::Connected
        }
    }
}

/// Dual health signal for the provider gateway: a passive rolling failure
/// window fed by real traffic, and an active-probe cache fed by
/// `testConnections()` calls. The router consults the passive window when
/// picking a provider for a live request (it's free and always fresh); the
/// active cache backs the admin/ops health endpoint, which wants an answer
/// even for providers nobody has called recently.
pub struct HealthTracker {
    windows: DashMap<String, Mutex<RollingWindow>>,
    active: DashMap<String, (ProviderStatus, Instant)>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            active: DashMap::new(),
        }
    }

    pub async fn record(&self, provider: &str, ok: bool) {
        let entry = self
            .windows
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(RollingWindow::new()));
        entry.lock().await.record(ok);
    }

    pub async fn passive_status(&self, provider: &str) -> ProviderStatus {
        match self.windows.get(provider) {
            Some(entry) => entry.lock().await.status(),
            None => ProviderStatus::Connected,
        }
    }

    /// Active probe, cached for `ACTIVE_PROBE_TTL` so the admin health
    /// endpoint doesn't hammer every upstream on every poll.
    pub async fn active_status(&self, provider: Arc<dyn LlmProvider>) -> ProviderStatus {
        let name = provider.name().to_string();
        if let Some(entry) = self.active.get(&name) {
            let (status, at) = *entry;
            if at.elapsed() < ACTIVE_PROBE_TTL {
                return status;
            }
        }
        let status = provider.test_connection().await;
        self.active.insert(name, (status, Instant::now()));
        status
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passive_status_degrades_after_repeated_failures() {
        let tracker = HealthTracker::new();
        for _ in 0..10 {
            tracker.record("openai", true).await;
        }
        assert_eq!(tracker.passive_status("openai").await, ProviderStatus::Connected);

        for _ in 0..10 {
            tracker.record("openai", false).await;
        }
        assert_eq!(tracker.passive_status("openai").await, ProviderStatus::Down);
    }

    #[tokio::test]
    async fn unseen_provider_defaults_connected() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.passive_status("never-called").await, ProviderStatus::Connected);
    }
}
