pub mod db;
pub mod error;
pub mod port;
pub mod types;

pub use error::{Result, StoreError};
pub use port::{PersistencePort, SqliteStore};

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::types::{ConversationSource, MessageRole, Scope};
    use types::ListConversationsFilter;

    #[test]
    fn append_message_before_assistant_invariant() {
        let store = SqliteStore::in_memory().unwrap();
        let convo = store
            .create_conversation("u1", None, "hi", ConversationSource::Native, None)
            .unwrap();
        store
            .append_message(&convo.id, MessageRole::User, "hi", None, None, None)
            .unwrap();
        store
            .append_message(&convo.id, MessageRole::Assistant, "hello", None, None, None)
            .unwrap();

        let page = store.list_messages(&convo.id, None, 10).unwrap();
        assert_eq!(page.items[0].role, MessageRole::User);
        assert_eq!(page.items[1].role, MessageRole::Assistant);
    }

    #[test]
    fn ownership_check_rejects_other_user() {
        let store = SqliteStore::in_memory().unwrap();
        let convo = store
            .create_conversation("owner", None, "hi", ConversationSource::Native, None)
            .unwrap();
        let err = store
            .get_conversation(&Scope::User("someone-else".to_string()), &convo.id)
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
    }

    #[test]
    fn sync_with_external_id_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let convo = store
            .create_conversation("u1", None, "synced", ConversationSource::ToolBridge, Some("ext-1"))
            .unwrap();
        let m1 = store
            .append_message(&convo.id, MessageRole::User, "hello", None, None, Some("msg-1"))
            .unwrap();
        let m2 = store
            .append_message(&convo.id, MessageRole::User, "hello", None, None, Some("msg-1"))
            .unwrap();
        assert_eq!(m1.id, m2.id);
        assert_eq!(store.message_count(&convo.id).unwrap(), 1);
    }

    #[test]
    fn list_conversations_respects_archived_filter() {
        let store = SqliteStore::in_memory().unwrap();
        let convo = store
            .create_conversation("u1", None, "x", ConversationSource::Native, None)
            .unwrap();
        store
            .archive_conversation(&Scope::User("u1".to_string()), &convo.id, true)
            .unwrap();
        let page = store
            .list_conversations(
                &Scope::User("u1".to_string()),
                "u1",
                ListConversationsFilter {
                    archived: Some(false),
                    limit: 10,
                    cursor: None,
                },
            )
            .unwrap();
        assert!(page.items.is_empty());
    }
}
