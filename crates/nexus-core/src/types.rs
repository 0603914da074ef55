use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generates a new time-sortable row id (UUIDv7) — sortable in logs and in
/// `ORDER BY id` fallbacks.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generates a new random per-request/per-connection id (UUIDv4).
pub fn new_ephemeral_id() -> String {
    Uuid::new_v4().to_string()
}

/// Policy tag constraining which providers may serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Any enabled provider; ties broken by recent latency.
    #[default]
    Public,
    /// Lowest-cost capable provider for the requested role.
    Internal,
    /// Forces the local/self-hosted provider; never OpenAI/OpenRouter.
    Restricted,
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensitivity::Public => write!(f, "public"),
            Sensitivity::Internal => write!(f, "internal"),
            Sensitivity::Restricted => write!(f, "restricted"),
        }
    }
}

/// The kind of work a provider call is being asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskRole {
    #[default]
    Chat,
    Draft,
    Analysis,
    Embedding,
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRole::Chat => write!(f, "chat"),
            TaskRole::Draft => write!(f, "draft"),
            TaskRole::Analysis => write!(f, "analysis"),
            TaskRole::Embedding => write!(f, "embedding"),
        }
    }
}

/// How transient a knowledge fact is. Ordered short > medium > long for the
/// horizon-priority tie-break used during context assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Short,
    Medium,
    Long,
}

impl Horizon {
    /// Lower is higher priority (short is most specific to the current turn).
    pub fn priority(self) -> u8 {
        match self {
            Horizon::Short => 0,
            Horizon::Medium => 1,
            Horizon::Long => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Horizon::Short => "short",
            Horizon::Medium => "medium",
            Horizon::Long => "long",
        }
    }

    pub fn all() -> [Horizon; 3] {
        [Horizon::Short, Horizon::Medium, Horizon::Long]
    }
}

impl std::str::FromStr for Horizon {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "short" => Ok(Horizon::Short),
            "medium" => Ok(Horizon::Medium),
            "long" => Ok(Horizon::Long),
            other => Err(format!("unknown horizon: {other}")),
        }
    }
}

/// Subject a knowledge fact is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Agent,
    Shared,
}

impl SubjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectType::User => "user",
            SubjectType::Agent => "agent",
            SubjectType::Shared => "shared",
        }
    }
}

impl std::str::FromStr for SubjectType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(SubjectType::User),
            "agent" => Ok(SubjectType::Agent),
            "shared" => Ok(SubjectType::Shared),
            other => Err(format!("unknown subject type: {other}")),
        }
    }
}

/// Role of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// Discriminates how a conversation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationSource {
    Native,
    ToolBridge,
}

impl ConversationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationSource::Native => "native",
            ConversationSource::ToolBridge => "tool-bridge",
        }
    }
}

impl std::str::FromStr for ConversationSource {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "native" => Ok(ConversationSource::Native),
            "tool-bridge" => Ok(ConversationSource::ToolBridge),
            other => Err(format!("unknown conversation source: {other}")),
        }
    }
}

/// Role hierarchy used by the admin surface's owner/admin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Owner,
    Admin,
    #[default]
    User,
}

impl UserRole {
    /// True for the two roles permitted to read/write the admin "agent soul" text.
    pub fn is_privileged(&self) -> bool {
        matches!(self, UserRole::Owner | UserRole::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Owner => "owner",
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "owner" => Ok(UserRole::Owner),
            "admin" => Ok(UserRole::Admin),
            "user" => Ok(UserRole::User),
            other => Err(format!("unknown user role: {other}")),
        }
    }
}

/// Capability the caller is acting under, threaded explicitly through the
/// persistence port rather than bypassing ownership checks implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Requests scoped to one end user; row ownership is enforced.
    User(String),
    /// Privileged subsystems (hygiene, tool bridge sync) — bypasses
    /// per-row ownership but is itself an explicit, named capability.
    Privileged(&'static str),
}

impl Scope {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Scope::User(id) => Some(id),
            Scope::Privileged(_) => None,
        }
    }
}
