pub mod retitle;

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use nexus_core::config::HygieneConfig;
use nexus_core::error::{NexusError, Result};
use nexus_core::types::Scope;
use nexus_store::port::PersistencePort;
use serde::Serialize;
use tracing::info;

use retitle::TitleGenerator;

/// Fixed generic-title set a conversation must match to be archive/retitle
/// eligible. Operators extend this via `hygiene.extra_generic_titles`
/// The set is fixed but operator-extensible.
const GENERIC_TITLES: &[&str] = &[
    "new conversation", "untitled", "chat", "conversation", "new chat", "hi", "hello", "hey", "yo", "",
];

#[derive(Debug, Clone, Serialize, Default)]
pub struct HygieneReport {
    pub dry_run: bool,
    pub pruned: usize,
    pub deduped: usize,
    pub archived: usize,
    pub retitled: usize,
}

/// Offline transcript-maintenance routine, invoked out of
/// the request path — by a scheduled job or an admin-triggered run, never
/// inline with a chat turn.
pub struct HygieneRunner {
    store: Arc<dyn PersistencePort>,
    titles: Arc<dyn TitleGenerator>,
    config: HygieneConfig,
}

impl HygieneRunner {
    pub fn new(store: Arc<dyn PersistencePort>, titles: Arc<dyn TitleGenerator>, config: HygieneConfig) -> Self {
        Self { store, titles, config }
    }

    fn generic_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = GENERIC_TITLES.iter().map(|s| s.to_string()).collect();
        titles.extend(self.config.extra_generic_titles.iter().cloned());
        titles
    }

    /// Runs the four ordered rules: prune, dedupe, archive, retitle.
    /// Each rule is independently idempotent — re-running with no
    /// intervening activity produces a report with the same counts as `0`
    /// on a second pass, never double-applying an effect.
    pub async fn run(&self, dry_run: bool) -> Result<HygieneReport> {
        let pruned = self.prune(dry_run)?;
        let deduped = self.dedupe(dry_run)?;
        let archived = self.archive(dry_run)?;
        let retitled = self.retitle(dry_run).await?;

        let report = HygieneReport {
            dry_run,
            pruned,
            deduped,
            archived,
            retitled,
        };
        info!(?report, "hygiene run complete");
        Ok(report)
    }

    fn prune(&self, dry_run: bool) -> Result<usize> {
        let candidates = self
            .store
            .find_prune_candidates(self.config.prune_empty_after_secs, self.config.prune_short_after_secs)
            .map_err(NexusError::from)?;
        if dry_run {
            return Ok(candidates.len());
        }
        let scope = Scope::Privileged("hygiene");
        for c in &candidates {
            self.store.delete_messages(&c.id).map_err(NexusError::from)?;
            self.store.delete_conversation(&scope, &c.id).map_err(NexusError::from)?;
        }
        Ok(candidates.len())
    }

    fn dedupe(&self, dry_run: bool) -> Result<usize> {
        let ids = self
            .store
            .find_duplicate_messages(self.config.dedupe_window_secs)
            .map_err(NexusError::from)?;
        if dry_run {
            return Ok(ids.len());
        }
        self.store.delete_messages_by_id(&ids).map_err(NexusError::from)?;
        Ok(ids.len())
    }

    fn archive(&self, dry_run: bool) -> Result<usize> {
        let titles = self.generic_titles();
        let candidates = self
            .store
            .find_archive_candidates(&titles, self.config.prune_short_after_secs)
            .map_err(NexusError::from)?;
        if dry_run {
            return Ok(candidates.len());
        }
        let scope = Scope::Privileged("hygiene");
        for c in &candidates {
            self.store.archive_conversation(&scope, &c.id, true).map_err(NexusError::from)?;
        }
        Ok(candidates.len())
    }

    async fn retitle(&self, dry_run: bool) -> Result<usize> {
        let titles = self.generic_titles();
        let candidates = self.store.find_retitle_candidates(&titles).map_err(NexusError::from)?;
        if dry_run {
            return Ok(candidates.len());
        }

        let batch_size = self.config.retitle_batch_size.max(1);
        let store = self.store.clone();
        let generator = self.titles.clone();

        let results: Vec<bool> = stream::iter(candidates.into_iter())
            .map(|conversation| {
                let store = store.clone();
                let generator = generator.clone();
                async move {
                    let messages = store.list_messages(&conversation.id, None, 20).ok()?.items;
                    let title = generator.generate_title(&messages).await;
                    store.update_title(&conversation.id, &title).ok()?;
                    Some(())
                }
            })
            .buffer_unordered(batch_size)
            .map(|r| r.is_some())
            .collect()
            .await;

        Ok(results.into_iter().filter(|ok| *ok).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::types::{ConversationSource, MessageRole};
    use nexus_store::SqliteStore;
    use retitle::HeuristicTitleGenerator;

    fn config() -> HygieneConfig {
        HygieneConfig {
            prune_empty_after_secs: 0,
            prune_short_after_secs: 0,
            dedupe_window_secs: 3600,
            retitle_batch_size: 2,
            extra_generic_titles: vec![],
        }
    }

    #[tokio::test]
    async fn retitle_renames_generic_conversations() {
        let store: Arc<dyn PersistencePort> = Arc::new(SqliteStore::in_memory().unwrap());
        let convo = store
            .create_conversation("u1", None, "New chat", ConversationSource::Native, None)
            .unwrap();
        store
            .append_message(&convo.id, MessageRole::User, "help me plan a trip to Japan", None, None, None)
            .unwrap();

        let runner = HygieneRunner::new(store.clone(), Arc::new(HeuristicTitleGenerator), config());
        let report = runner.run(false).await.unwrap();
        assert_eq!(report.retitled, 1);

        let updated = store.get_conversation(&Scope::User("u1".to_string()), &convo.id).unwrap();
        assert_ne!(updated.title, "New chat");
    }

    #[tokio::test]
    async fn dry_run_reports_without_mutating() {
        let store: Arc<dyn PersistencePort> = Arc::new(SqliteStore::in_memory().unwrap());
        let convo = store
            .create_conversation("u1", None, "chat", ConversationSource::Native, None)
            .unwrap();
        store
            .append_message(&convo.id, MessageRole::User, "hello", None, None, None)
            .unwrap();

        let runner = HygieneRunner::new(store.clone(), Arc::new(HeuristicTitleGenerator), config());
        let report = runner.run(true).await.unwrap();
        assert_eq!(report.retitled, 1);

        let untouched = store.get_conversation(&Scope::User("u1".to_string()), &convo.id).unwrap();
        assert_eq!(untouched.title, "chat");
    }

    #[tokio::test]
    async fn dedupe_is_idempotent() {
        let store: Arc<dyn PersistencePort> = Arc::new(SqliteStore::in_memory().unwrap());
        let convo = store
            .create_conversation("u1", None, "topic", ConversationSource::Native, None)
            .unwrap();
        store
            .append_message(&convo.id, MessageRole::User, "duplicate text", None, None, None)
            .unwrap();
        store
            .append_message(&convo.id, MessageRole::User, "duplicate text", None, None, None)
            .unwrap();

        let runner = HygieneRunner::new(store.clone(), Arc::new(HeuristicTitleGenerator), config());
        let first = runner.run(false).await.unwrap();
        assert_eq!(first.deduped, 1);

        let second = runner.run(false).await.unwrap();
        assert_eq!(second.deduped, 0);
    }
}
