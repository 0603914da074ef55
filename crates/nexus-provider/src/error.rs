use nexus_core::error::NexusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),

    #[error("provider api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse provider response: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("no eligible provider: {0}")]
    NoEligibleProvider(String),

    #[error("budget exceeded for {tenant_id}/{provider}/{budget_type}")]
    BudgetExceeded {
        tenant_id: String,
        provider: String,
        budget_type: String,
    },
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.to_string())
    }
}

impl From<ProviderError> for NexusError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::RateLimited { .. } | ProviderError::Unavailable(_) | ProviderError::Http(_) => {
                NexusError::Unavailable(e.to_string())
            }
            ProviderError::Cancelled => NexusError::Aborted {
                request_id: String::new(),
            },
            ProviderError::NoEligibleProvider(_) => NexusError::Unavailable(e.to_string()),
            ProviderError::BudgetExceeded {
                tenant_id,
                provider,
                budget_type,
            } => NexusError::BudgetExceeded {
                tenant_id,
                provider,
                budget_type,
            },
            ProviderError::Api { .. } | ProviderError::Parse(_) => NexusError::Internal(e.to_string()),
        }
    }
}
