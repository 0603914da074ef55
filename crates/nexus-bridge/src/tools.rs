use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

pub const CATALOG_VERSION: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("integration not connected: {0}")]
    NotConnected(String),
}

/// One callable tool exposed to the external assistant over the bridge.
/// Every adapter in this crate is a structured placeholder: it validates
/// arguments and reports integration state honestly, but performs no real
/// external I/O — wiring a provider (Gmail, IMAP, a calendar API) is out of
/// scope here and left to the deployment that turns this bridge on.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn arg_schema(&self) -> Value;
    /// Coarse blast-radius tag surfaced in the catalog so a calling agent can
    /// gate write/destructive tools behind extra confirmation.
    fn scope_of_effect(&self) -> &'static str;
    async fn execute(&self, user_id: &str, args: &Value) -> Result<Value, ToolError>;
}

pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn ToolAdapter>>,
}

impl ToolRegistry {
    pub fn with_defaults() -> Self {
        let defaults: Vec<Box<dyn ToolAdapter>> = vec![
            Box::new(GetIntegrationStatus),
            Box::new(SearchEmails),
            Box::new(ResolveEmailProvider),
            Box::new(StartEmailConnection),
            Box::new(ConnectImap),
            Box::new(TestIntegrationConnection),
            Box::new(DisconnectIntegration),
            Box::new(SendEmail),
            Box::new(GetCalendarEvents),
        ];
        let mut tools = HashMap::new();
        for tool in defaults {
            tools.insert(tool.name(), tool);
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolAdapter> {
        self.tools.get(name).map(|b| b.as_ref())
    }

    pub fn catalog(&self) -> Vec<Value> {
        let mut names: Vec<&&'static str> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let tool = &self.tools[name];
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "argSchema": tool.arg_schema(),
                    "scopeOfEffect": tool.scope_of_effect(),
                })
            })
            .collect()
    }
}

fn not_connected(integration: &str) -> Result<Value, ToolError> {
    Err(ToolError::NotConnected(integration.to_string()))
}

struct GetIntegrationStatus;
#[async_trait]
impl ToolAdapter for GetIntegrationStatus {
    fn name(&self) -> &'static str {
        "nexus_get_integration_status"
    }
    fn description(&self) -> &'static str {
        "Reports whether a named integration is connected for the acting user."
    }
    fn scope_of_effect(&self) -> &'static str {
        "read"
    }
    fn arg_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "integration": { "type": "string" } }, "required": ["integration"] })
    }
    async fn execute(&self, _user_id: &str, args: &Value) -> Result<Value, ToolError> {
        let integration = args
            .get("integration")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("integration is required".to_string()))?;
        Ok(json!({ "integration": integration, "status": "not_connected" }))
    }
}

struct SearchEmails;
#[async_trait]
impl ToolAdapter for SearchEmails {
    fn name(&self) -> &'static str {
        "nexus_search_emails"
    }
    fn description(&self) -> &'static str {
        "Searches the connected mailbox for messages matching a query."
    }
    fn scope_of_effect(&self) -> &'static str {
        "read"
    }
    fn arg_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "query": { "type": "string" } }, "required": ["query"] })
    }
    async fn execute(&self, _user_id: &str, _args: &Value) -> Result<Value, ToolError> {
        not_connected("email")
    }
}

struct ResolveEmailProvider;
#[async_trait]
impl ToolAdapter for ResolveEmailProvider {
    fn name(&self) -> &'static str {
        "nexus_resolve_email_provider"
    }
    fn description(&self) -> &'static str {
        "Maps an email address's domain to its likely mail provider."
    }
    fn scope_of_effect(&self) -> &'static str {
        "read"
    }
    fn arg_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "address": { "type": "string" } }, "required": ["address"] })
    }
    async fn execute(&self, _user_id: &str, args: &Value) -> Result<Value, ToolError> {
        let address = args
            .get("address")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("address is required".to_string()))?;
        let domain = address.rsplit('@').next().unwrap_or("");
        let provider = match domain {
            "gmail.com" | "googlemail.com" => "gmail",
            "outlook.com" | "hotmail.com" | "live.com" => "outlook",
            _ => "imap",
        };
        Ok(json!({ "address": address, "provider": provider }))
    }
}

struct StartEmailConnection;
#[async_trait]
impl ToolAdapter for StartEmailConnection {
    fn name(&self) -> &'static str {
        "nexus_start_email_connection"
    }
    fn description(&self) -> &'static str {
        "Begins an OAuth-style connection flow for an email provider."
    }
    fn scope_of_effect(&self) -> &'static str {
        "write"
    }
    fn arg_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "provider": { "type": "string" } }, "required": ["provider"] })
    }
    async fn execute(&self, _user_id: &str, _args: &Value) -> Result<Value, ToolError> {
        not_connected("email")
    }
}

struct ConnectImap;
#[async_trait]
impl ToolAdapter for ConnectImap {
    fn name(&self) -> &'static str {
        "nexus_connect_imap"
    }
    fn description(&self) -> &'static str {
        "Connects a mailbox over raw IMAP credentials."
    }
    fn scope_of_effect(&self) -> &'static str {
        "write"
    }
    fn arg_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "host": { "type": "string" },
                "port": { "type": "integer" },
                "username": { "type": "string" },
                "password": { "type": "string" }
            },
            "required": ["host", "port", "username", "password"]
        })
    }
    async fn execute(&self, _user_id: &str, args: &Value) -> Result<Value, ToolError> {
        for field in ["host", "port", "username", "password"] {
            if args.get(field).is_none() {
                return Err(ToolError::InvalidArgs(format!("{field} is required")));
            }
        }
        not_connected("imap")
    }
}

struct TestIntegrationConnection;
#[async_trait]
impl ToolAdapter for TestIntegrationConnection {
    fn name(&self) -> &'static str {
        "nexus_test_integration_connection"
    }
    fn description(&self) -> &'static str {
        "Checks whether a previously connected integration is still reachable."
    }
    fn scope_of_effect(&self) -> &'static str {
        "read"
    }
    fn arg_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "integration": { "type": "string" } }, "required": ["integration"] })
    }
    async fn execute(&self, _user_id: &str, args: &Value) -> Result<Value, ToolError> {
        let integration = args
            .get("integration")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("integration is required".to_string()))?;
        Ok(json!({ "integration": integration, "ok": false, "reason": "not_connected" }))
    }
}

struct DisconnectIntegration;
#[async_trait]
impl ToolAdapter for DisconnectIntegration {
    fn name(&self) -> &'static str {
        "nexus_disconnect_integration"
    }
    fn description(&self) -> &'static str {
        "Revokes a connected integration's stored credentials."
    }
    fn scope_of_effect(&self) -> &'static str {
        "destructive"
    }
    fn arg_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "integration": { "type": "string" } }, "required": ["integration"] })
    }
    async fn execute(&self, _user_id: &str, args: &Value) -> Result<Value, ToolError> {
        let integration = args
            .get("integration")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("integration is required".to_string()))?;
        Ok(json!({ "integration": integration, "disconnected": true }))
    }
}

struct SendEmail;
#[async_trait]
impl ToolAdapter for SendEmail {
    fn name(&self) -> &'static str {
        "nexus_send_email"
    }
    fn description(&self) -> &'static str {
        "Sends an email through the connected mailbox."
    }
    fn scope_of_effect(&self) -> &'static str {
        "write"
    }
    fn arg_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": { "type": "string" },
                "subject": { "type": "string" },
                "body": { "type": "string" }
            },
            "required": ["to", "subject", "body"]
        })
    }
    async fn execute(&self, _user_id: &str, args: &Value) -> Result<Value, ToolError> {
        for field in ["to", "subject", "body"] {
            if args.get(field).is_none() {
                return Err(ToolError::InvalidArgs(format!("{field} is required")));
            }
        }
        not_connected("email")
    }
}

struct GetCalendarEvents;
#[async_trait]
impl ToolAdapter for GetCalendarEvents {
    fn name(&self) -> &'static str {
        "nexus_get_calendar_events"
    }
    fn description(&self) -> &'static str {
        "Lists calendar events in an optional date range."
    }
    fn scope_of_effect(&self) -> &'static str {
        "read"
    }
    fn arg_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from": { "type": "string" },
                "to": { "type": "string" }
            }
        })
    }
    async fn execute(&self, _user_id: &str, _args: &Value) -> Result<Value, ToolError> {
        not_connected("calendar")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_email_provider_maps_known_domains() {
        let registry = ToolRegistry::with_defaults();
        let tool = registry.get("nexus_resolve_email_provider").unwrap();
        let result = tool.execute("u1", &json!({ "address": "jane@gmail.com" })).await.unwrap();
        assert_eq!(result["provider"], "gmail");
    }

    #[tokio::test]
    async fn send_email_validates_before_reporting_not_connected() {
        let registry = ToolRegistry::with_defaults();
        let tool = registry.get("nexus_send_email").unwrap();
        let err = tool.execute("u1", &json!({ "to": "a@b.com" })).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[test]
    fn catalog_lists_all_nine_tools() {
        let registry = ToolRegistry::with_defaults();
        assert_eq!(registry.catalog().len(), 9);
    }
}
