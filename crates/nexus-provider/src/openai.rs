use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::LlmProvider;
use crate::types::{ChatChunk, ChatParams, ChatResponse, ProviderStatus, Role};

/// Shared adapter for every OpenAI-compatible upstream: OpenAI itself,
/// OpenRouter, and the self-hosted "OpenClaw" local runtime. All three speak
/// the same `/v1/chat/completions` shape; what differs is base URL, auth
/// header, and (for the local runtime) whether an API key is required at all.
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    chat_path: String,
    provider_name: String,
    default_model: String,
    cost_per_token: f64,
    is_local: bool,
}

impl OpenAiCompatProvider {
    pub fn openai(api_key: String, base_url: String, default_model: String, cost_per_token: f64) -> Self {
        Self {
            client: Client::new(),
            api_key: Some(api_key),
            base_url,
            chat_path: "/v1/chat/completions".to_string(),
            provider_name: "openai".to_string(),
            default_model,
            cost_per_token,
            is_local: false,
        }
    }

    pub fn openrouter(api_key: String, base_url: String, default_model: String, cost_per_token: f64) -> Self {
        Self {
            client: Client::new(),
            api_key: Some(api_key),
            base_url,
            chat_path: "/api/v1/chat/completions".to_string(),
            provider_name: "openrouter".to_string(),
            default_model,
            cost_per_token,
            is_local: false,
        }
    }

    pub fn local(base_url: String, api_key: Option<String>, default_model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            chat_path: "/v1/chat/completions".to_string(),
            provider_name: "local".to_string(),
            default_model,
            cost_per_token: 0.0,
            is_local: true,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.chat_path)
    }

    fn build_request_body(&self, req: &ChatParams, stream: bool) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": messages,
            "stream": stream,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(mt) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(mt);
        }
        body
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn cost_per_token(&self) -> f64 {
        self.cost_per_token
    }

    fn is_local(&self) -> bool {
        self.is_local
    }

    async fn send(&self, req: &ChatParams) -> Result<ChatResponse, ProviderError> {
        let body = self.build_request_body(req, false);
        let resp = self
            .authed(self.client.post(self.endpoint()).json(&body))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(1000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }

        let parsed: ApiResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("no choices in response".to_string()))?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            provider: self.provider_name.clone(),
            model: parsed.model,
            tokens_in: parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            tokens_out: parsed.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
            finish_reason: choice.finish_reason,
        })
    }

    async fn send_stream(&self, req: &ChatParams) -> Result<mpsc::Receiver<ChatChunk>, ProviderError> {
        let body = self.build_request_body(req, true);
        let resp = self
            .authed(self.client.post(self.endpoint()).json(&body))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }

        let (tx, rx) = mpsc::channel(32);
        let provider_name = self.provider_name.clone();
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(ChatChunk::Error { message: e.to_string() }).await;
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() || !line.starts_with("data:") {
                        continue;
                    }
                    let payload = line.trim_start_matches("data:").trim();
                    if payload == "[DONE]" {
                        let _ = tx.send(ChatChunk::Done { finish_reason: None }).await;
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(parsed) => {
                            if let Some(choice) = parsed.choices.into_iter().next() {
                                if let Some(content) = choice.delta.content {
                                    if tx.send(ChatChunk::Delta { delta: content }).await.is_err() {
                                        return;
                                    }
                                }
                                if choice.finish_reason.is_some() {
                                    let _ = tx
                                        .send(ChatChunk::Done {
                                            finish_reason: choice.finish_reason,
                                        })
                                        .await;
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(provider = %provider_name, error = %e, "failed to parse stream chunk");
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn test_connection(&self) -> ProviderStatus {
        let result = self
            .authed(self.client.get(format!("{}/v1/models", self.base_url.trim_end_matches('/'))))
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => ProviderStatus::Connected,
            Ok(resp) if resp.status().is_server_error() => ProviderStatus::Degraded,
            Ok(_) => ProviderStatus::Degraded,
            Err(e) => {
                debug!(provider = %self.provider_name, error = %e, "connection probe failed");
                ProviderStatus::Down
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize, Serialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct StreamDelta {
    content: Option<String>,
}
