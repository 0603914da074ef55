use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{NexusError, Result};

/// Default per-turn history window (messages), matching `orchestrator.messageWindow`.
pub const DEFAULT_MESSAGE_WINDOW: usize = 40;
pub const DEFAULT_MAX_CONTEXT_BLOCKS: usize = 10;
pub const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 10;

/// Top-level config (nexus.toml + NEXUS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub hygiene: HygieneConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            providers: ProvidersConfig::default(),
            bridge: BridgeConfig::default(),
            persistence: PersistenceConfig::default(),
            hygiene: HygieneConfig::default(),
            timeouts: TimeoutsConfig::default(),
            context: ContextConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderEntryConfig,
    #[serde(default)]
    pub openrouter: ProviderEntryConfig,
    #[serde(default)]
    pub local: LocalProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderEntryConfig {
    pub api_key: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Per-token cost estimate, used by `sensitivity=internal` cheapest-capable routing.
    pub cost_per_token: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocalProviderConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Shared key tool-bridge clients must present as `X-Nexus-Api-Key`.
    pub api_key: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { api_key: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HygieneConfig {
    #[serde(default = "default_prune_empty_after")]
    pub prune_empty_after_secs: u64,
    #[serde(default = "default_prune_short_after")]
    pub prune_short_after_secs: u64,
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window_secs: u64,
    #[serde(default = "default_retitle_batch_size")]
    pub retitle_batch_size: usize,
    /// Additional case-insensitive "generic title" tokens, appended to the
    /// fixed set baked into `nexus-hygiene`.
    #[serde(default)]
    pub extra_generic_titles: Vec<String>,
}

impl Default for HygieneConfig {
    fn default() -> Self {
        Self {
            prune_empty_after_secs: default_prune_empty_after(),
            prune_short_after_secs: default_prune_short_after(),
            dedupe_window_secs: default_dedupe_window(),
            retitle_batch_size: default_retitle_batch_size(),
            extra_generic_titles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_chat_timeout")]
    pub chat_secs: u64,
    #[serde(default = "default_tool_timeout")]
    pub tool_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub health_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            chat_secs: default_chat_timeout(),
            tool_secs: default_tool_timeout(),
            health_secs: default_health_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_blocks")]
    pub max_blocks: usize,
    #[serde(default = "bool_true")]
    pub include_short: bool,
    #[serde(default = "bool_true")]
    pub include_medium: bool,
    #[serde(default = "bool_true")]
    pub include_long: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_blocks: default_max_blocks(),
            include_short: true,
            include_medium: true,
            include_long: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_message_window")]
    pub message_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            message_window: default_message_window(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    8780
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_db_url() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.nexus/nexus.db")
}
fn default_prune_empty_after() -> u64 {
    3600
}
fn default_prune_short_after() -> u64 {
    86_400
}
fn default_dedupe_window() -> u64 {
    7 * 86_400
}
fn default_retitle_batch_size() -> usize {
    5
}
fn default_chat_timeout() -> u64 {
    DEFAULT_CHAT_TIMEOUT_SECS
}
fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}
fn default_health_timeout() -> u64 {
    DEFAULT_HEALTH_TIMEOUT_SECS
}
fn default_max_blocks() -> usize {
    DEFAULT_MAX_CONTEXT_BLOCKS
}
fn default_message_window() -> usize {
    DEFAULT_MESSAGE_WINDOW
}

impl NexusConfig {
    /// Load config from a TOML file with NEXUS_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then `~/.nexus/nexus.toml`.
    /// Missing file is not an error — defaults (plus any env overrides) apply.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: NexusConfig = Figment::from(Self::default_figment_provider())
            .merge(Toml::file(&path))
            .merge(Env::prefixed("NEXUS_").split("_"))
            .extract()
            .map_err(|e| NexusError::invalid_request(format!("config error: {e}")))?;

        Ok(config)
    }

    fn default_figment_provider() -> figment::providers::Serialized<NexusConfig> {
        figment::providers::Serialized::defaults(NexusConfig::default())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.nexus/nexus.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = NexusConfig::default();
        assert_eq!(cfg.orchestrator.message_window, 40);
        assert_eq!(cfg.context.max_blocks, 10);
        assert_eq!(cfg.timeouts.chat_secs, 60);
        assert_eq!(cfg.timeouts.tool_secs, 20);
        assert_eq!(cfg.timeouts.health_secs, 10);
        assert_eq!(cfg.hygiene.dedupe_window_secs, 7 * 86_400);
    }
}
