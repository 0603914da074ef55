use nexus_core::types::{ConversationSource, Horizon, MessageRole, SubjectType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub org_id: Option<String>,
    pub title: String,
    pub is_archived: bool,
    pub source: ConversationSource,
    pub external_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub content_json: Option<Value>,
    pub tool_call_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub task_type: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub request_id: String,
    pub metadata: Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredit {
    pub provider: String,
    pub balance: f64,
    pub quota_reset_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageBudget {
    pub org_id: String,
    pub provider: String,
    pub budget_type: String,
    pub is_active: bool,
    pub budget_amount: f64,
    pub current_spend: f64,
    pub reset_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    Active,
    Stale,
    Revoked,
}

impl FactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FactStatus::Active => "active",
            FactStatus::Stale => "stale",
            FactStatus::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for FactStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(FactStatus::Active),
            "stale" => Ok(FactStatus::Stale),
            "revoked" => Ok(FactStatus::Revoked),
            other => Err(format!("unknown fact status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFact {
    pub id: String,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub horizon: Horizon,
    pub domain: String,
    pub fact_key: String,
    pub fact_value: Value,
    pub ttl_seconds: Option<u64>,
    pub status: FactStatus,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A single upsert request for a knowledge fact — everything except
/// `created_at`/`id`, which the store preserves/generates.
#[derive(Debug, Clone)]
pub struct FactUpsert {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub horizon: Horizon,
    pub domain: String,
    pub fact_key: String,
    pub fact_value: Value,
    pub ttl_seconds: Option<u64>,
    pub confidence: f64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    pub subjects: Vec<(SubjectType, String)>,
    pub horizons: Vec<Horizon>,
    pub domains: Vec<String>,
    pub tags: Vec<String>,
    pub min_confidence: Option<f64>,
    pub include_expired: bool,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ListConversationsFilter {
    pub archived: Option<bool>,
    pub limit: usize,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Aggregate usage figures for the admin surface's stats query, scoped by
/// an optional `user_id`/`provider` filter and a lookback window.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsageStatsSummary {
    pub request_count: u64,
    pub success_count: u64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub total_cost: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct UsageStatsFilter {
    pub user_id: Option<String>,
    pub provider: Option<String>,
    pub since_secs: Option<u64>,
}

/// The single editable "agent soul" markdown blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSoul {
    pub content: String,
    pub updated_at: String,
    pub updated_by: String,
}
