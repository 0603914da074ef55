use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// In-flight request registry keyed by `request_id`, unlike the terminal
/// pipeline's session-keyed `active_operations` map — a chat turn here is
/// identified by its own request id, not by the conversation it belongs to,
/// so two concurrent turns on the same conversation get independent tokens.
#[derive(Default)]
pub struct RequestRegistry {
    active: DashMap<String, CancellationToken>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh cancellation token before dispatch begins.
    pub fn register(&self, request_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.active.insert(request_id.to_string(), token.clone());
        token
    }

    /// Removes the entry once dispatch has resolved, regardless of outcome.
    pub fn unregister(&self, request_id: &str) {
        self.active.remove(request_id);
    }

    /// Cooperatively cancels an in-flight turn. Returns false if the request
    /// id is unknown (already finished, or never started).
    pub fn abort(&self, request_id: &str) -> bool {
        match self.active.get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, request_id: &str) -> bool {
        self.active.contains_key(request_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancels every in-flight turn — used by graceful shutdown.
    pub fn cancel_all(&self) -> usize {
        let n = self.active.len();
        for entry in self.active.iter() {
            entry.value().cancel();
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_removes_entry() {
        let registry = RequestRegistry::new();
        registry.register("req-1");
        assert!(registry.is_active("req-1"));
        registry.unregister("req-1");
        assert!(!registry.is_active("req-1"));
    }

    #[test]
    fn abort_unknown_request_returns_false() {
        let registry = RequestRegistry::new();
        assert!(!registry.abort("ghost"));
    }

    #[test]
    fn abort_cancels_the_token() {
        let registry = RequestRegistry::new();
        let token = registry.register("req-1");
        assert!(!token.is_cancelled());
        assert!(registry.abort("req-1"));
        assert!(token.is_cancelled());
    }
}
