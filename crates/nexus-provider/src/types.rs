use nexus_core::types::{Sensitivity, TaskRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Parameters for a single provider call.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub messages: Vec<Message>,
    pub task_role: TaskRole,
    pub sensitivity: Sensitivity,
    pub tenant_id: String,
    pub stream: bool,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub finish_reason: Option<String>,
}

/// A single normalized streaming chunk — the common shape every provider's
/// wire format is translated into.
#[derive(Debug, Clone, Serialize)]
pub enum ChatChunk {
    Delta { delta: String },
    ToolCall { name: String, arguments: serde_json::Value },
    Done { finish_reason: Option<String> },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Connected,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    pub cost_per_token: f64,
    pub context_window: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct UsageStats {
    pub total_requests: u64,
    pub total_cost: f64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
}
