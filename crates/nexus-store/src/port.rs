use std::sync::Mutex;

use chrono::Utc;
use nexus_core::types::{ConversationSource, Horizon, MessageRole, Scope, SubjectType, UserRole};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{
    AgentSoul, Conversation, FactFilter, FactStatus, FactUpsert, KnowledgeFact,
    ListConversationsFilter, Message, Page, ProviderCredit, ProviderUsage, UsageBudget,
    UsageStatsFilter, UsageStatsSummary,
};

/// Narrow capability set over the relational store.
///
/// All operations are row-scoped: a `Scope::User(id)` caller is restricted to
/// rows it owns; `Scope::Privileged(name)` callers (hygiene, tool bridge
/// sync) bypass ownership explicitly rather than by omission.
pub trait PersistencePort: Send + Sync {
    fn create_conversation(
        &self,
        user_id: &str,
        org_id: Option<&str>,
        title: &str,
        source: ConversationSource,
        external_id: Option<&str>,
    ) -> Result<Conversation>;

    fn get_conversation(&self, scope: &Scope, id: &str) -> Result<Conversation>;

    fn find_conversation_by_external_id(
        &self,
        user_id: &str,
        source: ConversationSource,
        external_id: &str,
    ) -> Result<Option<Conversation>>;

    fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        content_json: Option<Value>,
        tool_call_id: Option<&str>,
        external_msg_id: Option<&str>,
    ) -> Result<Message>;

    fn list_conversations(
        &self,
        scope: &Scope,
        user_id: &str,
        filter: ListConversationsFilter,
    ) -> Result<Page<Conversation>>;

    fn list_messages(
        &self,
        conversation_id: &str,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Page<Message>>;

    fn archive_conversation(&self, scope: &Scope, id: &str, flag: bool) -> Result<()>;

    fn delete_conversation(&self, scope: &Scope, id: &str) -> Result<()>;

    /// Delete just the messages of a conversation (used by hygiene pruning,
    /// which deletes messages then the conversation as two explicit steps).
    fn delete_messages(&self, conversation_id: &str) -> Result<usize>;

    fn record_usage(&self, usage: &ProviderUsage) -> Result<()>;

    fn increment_budget(
        &self,
        org_id: &str,
        provider: &str,
        budget_type: &str,
        amount: f64,
    ) -> Result<UsageBudget>;

    fn get_budget(&self, org_id: &str, provider: &str, budget_type: &str) -> Result<Option<UsageBudget>>;

    fn get_credit(&self, provider: &str) -> Result<Option<ProviderCredit>>;

    fn read_health(&self) -> Result<bool>;

    fn upsert_fact(&self, fact: FactUpsert) -> Result<KnowledgeFact>;

    fn query_facts(&self, filter: &FactFilter) -> Result<Vec<KnowledgeFact>>;

    fn expire_stale_facts(&self) -> Result<usize>;

    /// Find duplicate message ids within `(conversation_id, role, content)`
    /// inside `window_secs` of each other, for hygiene dedupe. Returns ids to
    /// delete (earliest per group kept).
    fn find_duplicate_messages(&self, window_secs: u64) -> Result<Vec<String>>;

    fn delete_messages_by_id(&self, ids: &[String]) -> Result<usize>;

    /// Conversations eligible for pruning/archiving per hygiene rules.
    fn find_prune_candidates(
        &self,
        empty_after_secs: u64,
        short_after_secs: u64,
    ) -> Result<Vec<Conversation>>;

    fn find_archive_candidates(
        &self,
        generic_titles: &[String],
        inactive_after_secs: u64,
    ) -> Result<Vec<Conversation>>;

    fn find_retitle_candidates(&self, generic_titles: &[String]) -> Result<Vec<Conversation>>;

    fn update_title(&self, id: &str, title: &str) -> Result<()>;

    fn message_count(&self, conversation_id: &str) -> Result<usize>;

    /// Role lookup for the admin surface's owner/admin gate. Unknown users
    /// default to `UserRole::User`.
    fn get_user_role(&self, user_id: &str) -> Result<UserRole>;

    fn set_user_role(&self, user_id: &str, role: UserRole) -> Result<()>;

    fn usage_stats(&self, filter: &UsageStatsFilter) -> Result<UsageStatsSummary>;

    fn get_agent_soul(&self) -> Result<Option<AgentSoul>>;

    fn set_agent_soul(&self, content: &str, updated_by: &str) -> Result<AgentSoul>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::from)?;
        init_db(&conn).map_err(StoreError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        init_db(&conn).map_err(StoreError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn check_ownership(&self, conn: &Connection, scope: &Scope, conversation_id: &str) -> Result<()> {
        if let Scope::User(uid) = scope {
            let owner: String = conn
                .query_row(
                    "SELECT user_id FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(StoreError::from)?
                .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
            if &owner != uid {
                return Err(StoreError::Unauthorized(format!(
                    "user {uid} does not own conversation {conversation_id}"
                )));
            }
        }
        Ok(())
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let source_str: String = row.get(5)?;
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        org_id: row.get(2)?,
        title: row.get(3)?,
        is_archived: row.get::<_, i64>(4)? != 0,
        source: source_str.parse().unwrap_or(ConversationSource::Native),
        external_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const CONVERSATION_COLS: &str =
    "id, user_id, org_id, title, is_archived, source, external_id, created_at, updated_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    let content_json: Option<String> = row.get(4)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role_str.parse().unwrap_or(MessageRole::User),
        content: row.get(3)?,
        content_json: content_json.and_then(|s| serde_json::from_str(&s).ok()),
        tool_call_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const MESSAGE_COLS: &str = "id, conversation_id, role, content, content_json, tool_call_id, created_at";

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeFact> {
    let subject_type: String = row.get(1)?;
    let horizon: String = row.get(3)?;
    let fact_value: String = row.get(6)?;
    let status: String = row.get(8)?;
    let tags: String = row.get(10)?;
    Ok(KnowledgeFact {
        id: row.get(0)?,
        subject_type: subject_type.parse().unwrap_or(SubjectType::User),
        subject_id: row.get(2)?,
        horizon: horizon.parse().unwrap_or(Horizon::Long),
        domain: row.get(4)?,
        fact_key: row.get(5)?,
        fact_value: serde_json::from_str(&fact_value).unwrap_or(Value::Null),
        ttl_seconds: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        status: status.parse().unwrap_or(FactStatus::Active),
        confidence: row.get(9)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

const FACT_COLS: &str = "id, subject_type, subject_id, horizon, domain, fact_key, fact_value, \
     ttl_seconds, status, confidence, tags, created_at, updated_at";

impl PersistencePort for SqliteStore {
    #[instrument(skip(self, title))]
    fn create_conversation(
        &self,
        user_id: &str,
        org_id: Option<&str>,
        title: &str,
        source: ConversationSource,
        external_id: Option<&str>,
    ) -> Result<Conversation> {
        let conn = self.conn.lock().unwrap();
        let id = nexus_core::types::new_id();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO conversations (id, user_id, org_id, title, is_archived, source, external_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?7)",
            params![id, user_id, org_id, title, source.as_str(), external_id, now],
        )?;
        Ok(Conversation {
            id,
            user_id: user_id.to_string(),
            org_id: org_id.map(String::from),
            title: title.to_string(),
            is_archived: false,
            source,
            external_id: external_id.map(String::from),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn get_conversation(&self, scope: &Scope, id: &str) -> Result<Conversation> {
        let conn = self.conn.lock().unwrap();
        self.check_ownership(&conn, scope, id)?;
        let sql = format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1");
        conn.query_row(&sql, params![id], row_to_conversation)
            .map_err(StoreError::from)
    }

    fn find_conversation_by_external_id(
        &self,
        user_id: &str,
        source: ConversationSource,
        external_id: &str,
    ) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {CONVERSATION_COLS} FROM conversations
             WHERE user_id = ?1 AND source = ?2 AND external_id = ?3"
        );
        conn.query_row(&sql, params![user_id, source.as_str(), external_id], row_to_conversation)
            .optional()
            .map_err(StoreError::from)
    }

    #[instrument(skip(self, content, content_json))]
    fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        content_json: Option<Value>,
        tool_call_id: Option<&str>,
        external_msg_id: Option<&str>,
    ) -> Result<Message> {
        let conn = self.conn.lock().unwrap();

        // Idempotent sync: if the caller supplied an external message id and
        // we've already stored a message with that id in this conversation,
        // return the existing row rather than duplicating it.
        if let Some(ext_id) = external_msg_id {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages WHERE conversation_id = ?1 AND external_msg_id = ?2"
            );
            if let Some(existing) = conn
                .query_row(&sql, params![conversation_id, ext_id], row_to_message)
                .optional()
                .map_err(StoreError::from)?
            {
                debug!(conversation_id, ext_id, "duplicate external message id, skipping insert");
                return Ok(existing);
            }
        }

        let id = nexus_core::types::new_id();
        let now = Utc::now().to_rfc3339();
        let content_json_str = content_json.as_ref().map(|v| v.to_string());
        let hash = content_hash(content);

        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, content_json, tool_call_id, content_hash, external_msg_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![id, conversation_id, role.as_str(), content, content_json_str, tool_call_id, hash, external_msg_id, now],
        )?;
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now, conversation_id],
        )?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            content_json,
            tool_call_id: tool_call_id.map(String::from),
            created_at: now,
        })
    }

    fn list_conversations(
        &self,
        _scope: &Scope,
        user_id: &str,
        filter: ListConversationsFilter,
    ) -> Result<Page<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let sql = match filter.archived {
            Some(flag) => format!(
                "SELECT {CONVERSATION_COLS} FROM conversations
                 WHERE user_id = ?1 AND is_archived = {}
                 ORDER BY updated_at DESC LIMIT ?2",
                if flag { 1 } else { 0 }
            ),
            None => format!(
                "SELECT {CONVERSATION_COLS} FROM conversations
                 WHERE user_id = ?1
                 ORDER BY updated_at DESC LIMIT ?2"
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let items: Vec<Conversation> = stmt
            .query_map(params![user_id, limit as i64], row_to_conversation)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(Page {
            items,
            next_cursor: None,
        })
    }

    fn list_messages(
        &self,
        conversation_id: &str,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Page<Message>> {
        let conn = self.conn.lock().unwrap();
        let limit = if limit == 0 { 100 } else { limit };
        let items: Vec<Message> = if let Some(after) = after_id {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE conversation_id = ?1 AND created_at > (SELECT created_at FROM messages WHERE id = ?2)
                 ORDER BY created_at ASC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![conversation_id, after, limit as i64], row_to_message)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![conversation_id, limit as i64], row_to_message)?
                .filter_map(|r| r.ok())
                .collect()
        };
        Ok(Page {
            items,
            next_cursor: None,
        })
    }

    fn archive_conversation(&self, scope: &Scope, id: &str, flag: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        self.check_ownership(&conn, scope, id)?;
        conn.execute(
            "UPDATE conversations SET is_archived = ?1 WHERE id = ?2",
            params![flag as i64, id],
        )?;
        Ok(())
    }

    fn delete_conversation(&self, scope: &Scope, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        self.check_ownership(&conn, scope, id)?;
        conn.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn delete_messages(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM messages WHERE conversation_id = ?1", params![conversation_id])?;
        Ok(n)
    }

    fn record_usage(&self, usage: &ProviderUsage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO provider_usage (id, user_id, provider, model, task_type, tokens_in, tokens_out, cost, latency_ms, success, request_id, metadata, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                usage.id,
                usage.user_id,
                usage.provider,
                usage.model,
                usage.task_type,
                usage.tokens_in as i64,
                usage.tokens_out as i64,
                usage.cost,
                usage.latency_ms as i64,
                usage.success as i64,
                usage.request_id,
                usage.metadata.to_string(),
                usage.created_at,
            ],
        )?;
        Ok(())
    }

    fn increment_budget(
        &self,
        org_id: &str,
        provider: &str,
        budget_type: &str,
        amount: f64,
    ) -> Result<UsageBudget> {
        let conn = self.conn.lock().unwrap();
        // Atomic upsert: create the row at zero spend if missing, then add.
        conn.execute(
            "INSERT INTO usage_budgets (org_id, provider, budget_type, is_active, budget_amount, current_spend, reset_date)
             VALUES (?1, ?2, ?3, 1, 0, 0, '')
             ON CONFLICT(org_id, provider, budget_type) DO NOTHING",
            params![org_id, provider, budget_type],
        )?;
        conn.execute(
            "UPDATE usage_budgets SET current_spend = current_spend + ?1
             WHERE org_id = ?2 AND provider = ?3 AND budget_type = ?4",
            params![amount, org_id, provider, budget_type],
        )?;
        conn.query_row(
            "SELECT org_id, provider, budget_type, is_active, budget_amount, current_spend, reset_date
             FROM usage_budgets WHERE org_id = ?1 AND provider = ?2 AND budget_type = ?3",
            params![org_id, provider, budget_type],
            |row| {
                Ok(UsageBudget {
                    org_id: row.get(0)?,
                    provider: row.get(1)?,
                    budget_type: row.get(2)?,
                    is_active: row.get::<_, i64>(3)? != 0,
                    budget_amount: row.get(4)?,
                    current_spend: row.get(5)?,
                    reset_date: row.get(6)?,
                })
            },
        )
        .map_err(StoreError::from)
    }

    fn get_budget(&self, org_id: &str, provider: &str, budget_type: &str) -> Result<Option<UsageBudget>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT org_id, provider, budget_type, is_active, budget_amount, current_spend, reset_date
             FROM usage_budgets WHERE org_id = ?1 AND provider = ?2 AND budget_type = ?3",
            params![org_id, provider, budget_type],
            |row| {
                Ok(UsageBudget {
                    org_id: row.get(0)?,
                    provider: row.get(1)?,
                    budget_type: row.get(2)?,
                    is_active: row.get::<_, i64>(3)? != 0,
                    budget_amount: row.get(4)?,
                    current_spend: row.get(5)?,
                    reset_date: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn get_credit(&self, provider: &str) -> Result<Option<ProviderCredit>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT provider, balance, quota_reset_at FROM provider_credits WHERE provider = ?1",
            params![provider],
            |row| {
                Ok(ProviderCredit {
                    provider: row.get(0)?,
                    balance: row.get(1)?,
                    quota_reset_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn read_health(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map(|_| true)
            .map_err(StoreError::from)
    }

    #[instrument(skip(self, fact))]
    fn upsert_fact(&self, fact: FactUpsert) -> Result<KnowledgeFact> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let confidence = fact.confidence.clamp(0.0, 1.0);
        let mut tags = fact.tags.clone();
        tags.sort();
        tags.dedup();

        let existing_id: Option<String> = conn
            .query_row(
                "SELECT id FROM knowledge_facts
                 WHERE subject_type = ?1 AND subject_id = ?2 AND horizon = ?3 AND domain = ?4 AND fact_key = ?5",
                params![
                    fact.subject_type.as_str(),
                    fact.subject_id,
                    fact.horizon.as_str(),
                    fact.domain,
                    fact.fact_key
                ],
                |r| r.get(0),
            )
            .optional()?;

        let id = existing_id.unwrap_or_else(nexus_core::types::new_id);

        conn.execute(
            "INSERT INTO knowledge_facts
                (id, subject_type, subject_id, horizon, domain, fact_key, fact_value, ttl_seconds, status, confidence, tags, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,'active',?9,?10,?11,?11)
             ON CONFLICT(subject_type, subject_id, horizon, domain, fact_key) DO UPDATE SET
                fact_value = excluded.fact_value,
                ttl_seconds = excluded.ttl_seconds,
                status = 'active',
                confidence = excluded.confidence,
                tags = excluded.tags,
                updated_at = excluded.updated_at",
            params![
                id,
                fact.subject_type.as_str(),
                fact.subject_id,
                fact.horizon.as_str(),
                fact.domain,
                fact.fact_key,
                fact.fact_value.to_string(),
                fact.ttl_seconds.map(|v| v as i64),
                confidence,
                serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string()),
                now,
            ],
        )?;

        let sql = format!("SELECT {FACT_COLS} FROM knowledge_facts WHERE id = ?1");
        conn.query_row(&sql, params![id], row_to_fact)
            .map_err(StoreError::from)
    }

    fn query_facts(&self, filter: &FactFilter) -> Result<Vec<KnowledgeFact>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {FACT_COLS} FROM knowledge_facts WHERE status != 'revoked'");
        let mut stmt = conn.prepare(&sql)?;
        let all: Vec<KnowledgeFact> = stmt
            .query_map([], row_to_fact)?
            .filter_map(|r| r.ok())
            .collect();

        let now = Utc::now();
        let filtered: Vec<KnowledgeFact> = all
            .into_iter()
            .filter(|f| {
                if !filter.subjects.is_empty()
                    && !filter
                        .subjects
                        .iter()
                        .any(|(t, id)| *t == f.subject_type && id == &f.subject_id)
                {
                    return false;
                }
                if !filter.horizons.is_empty() && !filter.horizons.contains(&f.horizon) {
                    return false;
                }
                if !filter.domains.is_empty() && !filter.domains.contains(&f.domain) {
                    return false;
                }
                if !filter.tags.is_empty() && !filter.tags.iter().any(|t| f.tags.contains(t)) {
                    return false;
                }
                if let Some(min_conf) = filter.min_confidence {
                    if f.confidence < min_conf {
                        return false;
                    }
                }
                if !filter.include_expired {
                    if let Some(ttl) = f.ttl_seconds {
                        if let Ok(updated) = chrono::DateTime::parse_from_rfc3339(&f.updated_at) {
                            let elapsed = (now - updated.with_timezone(&Utc)).num_seconds();
                            if elapsed > ttl as i64 {
                                return false;
                            }
                        }
                    }
                }
                true
            })
            .collect();

        let mut sorted = filtered;
        sorted.sort_by(|a, b| {
            a.horizon
                .priority()
                .cmp(&b.horizon.priority())
                .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
                .then(b.updated_at.cmp(&a.updated_at))
        });
        if filter.limit > 0 {
            sorted.truncate(filter.limit);
        }
        Ok(sorted)
    }

    fn expire_stale_facts(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {FACT_COLS} FROM knowledge_facts WHERE status = 'active' AND ttl_seconds IS NOT NULL");
        let mut stmt = conn.prepare(&sql)?;
        let candidates: Vec<KnowledgeFact> = stmt.query_map([], row_to_fact)?.filter_map(|r| r.ok()).collect();
        let now = Utc::now();
        let mut expired = 0;
        for f in candidates {
            if let (Some(ttl), Ok(updated)) = (f.ttl_seconds, chrono::DateTime::parse_from_rfc3339(&f.updated_at)) {
                let elapsed = (now - updated.with_timezone(&Utc)).num_seconds();
                if elapsed > ttl as i64 {
                    conn.execute(
                        "UPDATE knowledge_facts SET status = 'stale' WHERE id = ?1",
                        params![f.id],
                    )?;
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }

    fn find_duplicate_messages(&self, window_secs: u64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {MESSAGE_COLS} FROM messages ORDER BY conversation_id, role, content_hash, created_at ASC");
        let mut stmt = conn.prepare(&sql)?;
        let all: Vec<Message> = stmt.query_map([], row_to_message)?.filter_map(|r| r.ok()).collect();

        let mut to_delete = Vec::new();
        let mut i = 0;
        while i < all.len() {
            let anchor = &all[i];
            let mut j = i + 1;
            let mut group_keep_time = parse_time(&anchor.created_at);
            while j < all.len()
                && all[j].conversation_id == anchor.conversation_id
                && all[j].role == anchor.role
                && content_hash(&all[j].content) == content_hash(&anchor.content)
            {
                let t = parse_time(&all[j].created_at);
                if (t - group_keep_time).num_seconds().unsigned_abs() <= window_secs {
                    to_delete.push(all[j].id.clone());
                } else {
                    group_keep_time = t;
                }
                j += 1;
            }
            i = j.max(i + 1);
        }
        Ok(to_delete)
    }

    fn delete_messages_by_id(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let mut n = 0;
        for id in ids {
            n += conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        }
        Ok(n)
    }

    fn find_prune_candidates(
        &self,
        empty_after_secs: u64,
        short_after_secs: u64,
    ) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE is_archived = 0");
        let mut stmt = conn.prepare(&sql)?;
        let all: Vec<Conversation> = stmt.query_map([], row_to_conversation)?.filter_map(|r| r.ok()).collect();

        let now = Utc::now();
        let mut out = Vec::new();
        for c in all {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![c.id],
                |r| r.get(0),
            )?;
            let age = (now - parse_time(&c.created_at)).num_seconds();
            let idle = (now - parse_time(&c.updated_at)).num_seconds();
            if count == 0 && age > empty_after_secs as i64 {
                out.push(c);
            } else if count <= 2 && idle > short_after_secs as i64 {
                out.push(c);
            }
        }
        Ok(out)
    }

    fn find_archive_candidates(
        &self,
        generic_titles: &[String],
        inactive_after_secs: u64,
    ) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE is_archived = 0");
        let mut stmt = conn.prepare(&sql)?;
        let all: Vec<Conversation> = stmt.query_map([], row_to_conversation)?.filter_map(|r| r.ok()).collect();

        let now = Utc::now();
        let lowered: Vec<String> = generic_titles.iter().map(|t| t.to_lowercase()).collect();
        let mut out = Vec::new();
        for c in all {
            if !lowered.contains(&c.title.trim().to_lowercase()) {
                continue;
            }
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![c.id],
                |r| r.get(0),
            )?;
            let idle = (now - parse_time(&c.updated_at)).num_seconds();
            if count <= 2 && idle > inactive_after_secs as i64 {
                out.push(c);
            }
        }
        Ok(out)
    }

    fn find_retitle_candidates(&self, generic_titles: &[String]) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE is_archived = 0");
        let mut stmt = conn.prepare(&sql)?;
        let all: Vec<Conversation> = stmt.query_map([], row_to_conversation)?.filter_map(|r| r.ok()).collect();

        let lowered: Vec<String> = generic_titles.iter().map(|t| t.to_lowercase()).collect();
        let mut out = Vec::new();
        for c in all {
            let is_generic = c.title.trim().is_empty() || lowered.contains(&c.title.trim().to_lowercase());
            if !is_generic {
                continue;
            }
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![c.id],
                |r| r.get(0),
            )?;
            if count >= 1 {
                out.push(c);
            }
        }
        Ok(out)
    }

    fn update_title(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE conversations SET title = ?1 WHERE id = ?2", params![title, id])?;
        Ok(())
    }

    fn message_count(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    fn get_user_role(&self, user_id: &str) -> Result<UserRole> {
        let conn = self.conn.lock().unwrap();
        let role: Option<String> = conn
            .query_row("SELECT role FROM user_roles WHERE user_id = ?1", params![user_id], |r| r.get(0))
            .optional()
            .map_err(StoreError::from)?;
        Ok(role
            .and_then(|r| r.parse().ok())
            .unwrap_or(UserRole::User))
    }

    fn set_user_role(&self, user_id: &str, role: UserRole) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_roles (user_id, role) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET role = excluded.role",
            params![user_id, role.as_str()],
        )?;
        Ok(())
    }

    fn usage_stats(&self, filter: &UsageStatsFilter) -> Result<UsageStatsSummary> {
        let conn = self.conn.lock().unwrap();
        let since = filter
            .since_secs
            .map(|secs| (Utc::now() - chrono::Duration::seconds(secs as i64)).to_rfc3339());

        let mut sql = String::from(
            "SELECT COUNT(*), COALESCE(SUM(success), 0), COALESCE(SUM(tokens_in), 0),
                    COALESCE(SUM(tokens_out), 0), COALESCE(SUM(cost), 0), COALESCE(AVG(latency_ms), 0)
             FROM provider_usage WHERE 1 = 1",
        );
        let mut bind: Vec<String> = Vec::new();
        if let Some(user_id) = &filter.user_id {
            sql.push_str(" AND user_id = ?");
            bind.push(user_id.clone());
        }
        if let Some(provider) = &filter.provider {
            sql.push_str(" AND provider = ?");
            bind.push(provider.clone());
        }
        if let Some(since) = &since {
            sql.push_str(" AND created_at >= ?");
            bind.push(since.clone());
        }

        let params: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        conn.query_row(&sql, params.as_slice(), |row| {
            Ok(UsageStatsSummary {
                request_count: row.get::<_, i64>(0)? as u64,
                success_count: row.get::<_, i64>(1)? as u64,
                total_tokens_in: row.get::<_, i64>(2)? as u64,
                total_tokens_out: row.get::<_, i64>(3)? as u64,
                total_cost: row.get(4)?,
                avg_latency_ms: row.get(5)?,
            })
        })
        .map_err(StoreError::from)
    }

    fn get_agent_soul(&self) -> Result<Option<AgentSoul>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT content, updated_at, updated_by FROM agent_soul WHERE id = 1",
            [],
            |row| {
                Ok(AgentSoul {
                    content: row.get(0)?,
                    updated_at: row.get(1)?,
                    updated_by: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn set_agent_soul(&self, content: &str, updated_by: &str) -> Result<AgentSoul> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO agent_soul (id, content, updated_at, updated_by) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at, updated_by = excluded.updated_by",
            params![content, now, updated_by],
        )?;
        Ok(AgentSoul {
            content: content.to_string(),
            updated_at: now,
            updated_by: updated_by.to_string(),
        })
    }
}

fn parse_time(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
