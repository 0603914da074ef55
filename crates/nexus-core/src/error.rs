use thiserror::Error;

/// The error taxonomy surfaced by every layer of the service, from the
/// persistence port up through the chat orchestrator. Crate-local errors
/// convert into this type at the boundary where they become user-visible.
#[derive(Debug, Error)]
pub enum NexusError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("budget exceeded for {tenant_id}/{provider}/{budget_type}")]
    BudgetExceeded {
        tenant_id: String,
        provider: String,
        budget_type: String,
    },

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("aborted: {request_id}")]
    Aborted { request_id: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl NexusError {
    /// Short error-kind string. Used as the
    /// `error` field in wire responses and as a stable log/metric label.
    pub fn code(&self) -> &'static str {
        match self {
            NexusError::InvalidRequest(_) => "InvalidRequest",
            NexusError::Unauthorized(_) => "Unauthorized",
            NexusError::Forbidden(_) => "Forbidden",
            NexusError::NotFound(_) => "NotFound",
            NexusError::Conflict(_) => "Conflict",
            NexusError::BudgetExceeded { .. } => "BudgetExceeded",
            NexusError::Unavailable(_) => "Unavailable",
            NexusError::Timeout { .. } => "Timeout",
            NexusError::Aborted { .. } => "Aborted",
            NexusError::Internal(_) => "Internal",
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        NexusError::InvalidRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        NexusError::NotFound(msg.into())
    }
}

impl From<serde_json::Error> for NexusError {
    fn from(e: serde_json::Error) -> Self {
        NexusError::InvalidRequest(format!("malformed JSON: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, NexusError>;
