use rusqlite::Connection;

/// Idempotent schema setup. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            org_id      TEXT,
            title       TEXT NOT NULL,
            is_archived INTEGER NOT NULL DEFAULT 0,
            source      TEXT NOT NULL,
            external_id TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, updated_at DESC);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_external
            ON conversations(source, user_id, external_id)
            WHERE external_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            content_json    TEXT,
            tool_call_id    TEXT,
            content_hash    TEXT NOT NULL,
            external_msg_id TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conv ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_dedupe ON messages(conversation_id, role, content_hash, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_external ON messages(conversation_id, external_msg_id);

        CREATE TABLE IF NOT EXISTS provider_usage (
            id         TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            provider   TEXT NOT NULL,
            model      TEXT NOT NULL,
            task_type  TEXT NOT NULL,
            tokens_in  INTEGER NOT NULL,
            tokens_out INTEGER NOT NULL,
            cost       REAL NOT NULL,
            latency_ms INTEGER NOT NULL,
            success    INTEGER NOT NULL,
            request_id TEXT NOT NULL,
            metadata   TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_user ON provider_usage(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_usage_provider ON provider_usage(provider, created_at DESC);

        CREATE TABLE IF NOT EXISTS provider_credits (
            provider       TEXT PRIMARY KEY,
            balance        REAL NOT NULL,
            quota_reset_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS usage_budgets (
            org_id         TEXT NOT NULL,
            provider       TEXT NOT NULL,
            budget_type    TEXT NOT NULL,
            is_active      INTEGER NOT NULL DEFAULT 1,
            budget_amount  REAL NOT NULL,
            current_spend  REAL NOT NULL DEFAULT 0,
            reset_date     TEXT NOT NULL,
            PRIMARY KEY (org_id, provider, budget_type)
        );

        CREATE TABLE IF NOT EXISTS knowledge_facts (
            id           TEXT PRIMARY KEY,
            subject_type TEXT NOT NULL,
            subject_id   TEXT NOT NULL,
            horizon      TEXT NOT NULL,
            domain       TEXT NOT NULL,
            fact_key     TEXT NOT NULL,
            fact_value   TEXT NOT NULL,
            ttl_seconds  INTEGER,
            status       TEXT NOT NULL DEFAULT 'active',
            confidence   REAL NOT NULL,
            tags         TEXT NOT NULL DEFAULT '[]',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_facts_key
            ON knowledge_facts(subject_type, subject_id, horizon, domain, fact_key);
        CREATE INDEX IF NOT EXISTS idx_facts_query
            ON knowledge_facts(subject_type, subject_id, status, confidence DESC);

        CREATE TABLE IF NOT EXISTS user_roles (
            user_id TEXT PRIMARY KEY,
            role    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS agent_soul (
            id         INTEGER PRIMARY KEY CHECK (id = 1),
            content    TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_by TEXT NOT NULL
        );
        ",
    )
}
