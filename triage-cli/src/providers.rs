//! HTTP model providers
//!
//! Each provider turns a [`ModelRequest`] into one non-streaming chat call
//! and reports the unit counts the API returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use triage_core::{ExternalError, ModelProvider, ModelRequest, ModelResponse, ProviderRegistry, Usage};

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client-side ceiling; the retry executor applies the per-call timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Single user message sent to either API
fn render_message(request: &ModelRequest) -> String {
    let mut message = request.prompt.trim_end().to_string();
    if let Some(context) = request.context.as_deref().filter(|c| !c.trim().is_empty()) {
        message.push_str("\n\nADDITIONAL INSTRUCTIONS\n");
        message.push_str(context.trim());
    }
    if !request.diff.is_empty() {
        message.push_str("\n\nDIFF\n```diff\n");
        message.push_str(&request.diff);
        if !request.diff.ends_with('\n') {
            message.push('\n');
        }
        message.push_str("```");
    }
    message
}

fn http_client() -> Result<Client, ExternalError> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("triage/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ExternalError::permanent("http", e.to_string()))
}

fn transport_error(service: &str, err: reqwest::Error) -> ExternalError {
    if err.is_decode() || err.is_builder() {
        ExternalError::permanent(service, err.to_string())
    } else {
        ExternalError::transient(service, err.to_string())
    }
}

async fn send_json<B: Serialize, R: for<'de> Deserialize<'de>>(
    service: &str,
    request: reqwest::RequestBuilder,
    body: &B,
) -> Result<R, ExternalError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(service, e))?;

    let status = response.status();
    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());
        return Err(ExternalError::from_status(service, status.as_u16(), text));
    }

    response.json().await.map_err(|e| transport_error(service, e))
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicResponse {
    fn into_response(self) -> ModelResponse {
        let text = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        let usage = self
            .usage
            .map(|u| Usage {
                input_units: u.input_tokens,
                output_units: u.output_tokens,
            })
            .unwrap_or_default();
        ModelResponse { text, usage }
    }
}

/// Anthropic Messages API
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, ExternalError> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ExternalError> {
        let message = render_message(request);
        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_output_units,
            messages: vec![ChatMessage {
                role: "user",
                content: &message,
            }],
        };
        debug!(model = %request.model, chars = message.len(), "Calling Anthropic");

        let http = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let response: AnthropicResponse = send_json(self.name(), http, &body).await?;
        Ok(response.into_response())
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_completion_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAiResponse {
    fn into_response(self) -> ModelResponse {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let usage = self
            .usage
            .map(|u| Usage {
                input_units: u.prompt_tokens,
                output_units: u.completion_tokens,
            })
            .unwrap_or_default();
        ModelResponse { text, usage }
    }
}

/// OpenAI Chat Completions API
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, ExternalError> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ExternalError> {
        let message = render_message(request);
        let body = OpenAiRequest {
            model: &request.model,
            max_completion_tokens: request.max_output_units,
            messages: vec![ChatMessage {
                role: "user",
                content: &message,
            }],
        };
        debug!(model = %request.model, chars = message.len(), "Calling OpenAI");

        let http = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key);
        let response: OpenAiResponse = send_json(self.name(), http, &body).await?;
        Ok(response.into_response())
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Register every provider whose API key is present in the environment
///
/// Reads `ANTHROPIC_API_KEY` and `OPENAI_API_KEY`; `ANTHROPIC_API_URL` and
/// `OPENAI_API_URL` override the endpoints.
pub fn registry_from_env() -> Result<ProviderRegistry, ExternalError> {
    let mut registry = ProviderRegistry::new();

    match env_key("ANTHROPIC_API_KEY") {
        Some(key) => {
            let endpoint = env_key("ANTHROPIC_API_URL").unwrap_or_else(|| ANTHROPIC_API_URL.to_string());
            registry.register(Arc::new(AnthropicProvider::new(key, endpoint)?));
        }
        None => warn!("ANTHROPIC_API_KEY not set, anthropic models unavailable"),
    }
    match env_key("OPENAI_API_KEY") {
        Some(key) => {
            let endpoint = env_key("OPENAI_API_URL").unwrap_or_else(|| OPENAI_API_URL.to_string());
            registry.register(Arc::new(OpenAiProvider::new(key, endpoint)?));
        }
        None => warn!("OPENAI_API_KEY not set, openai models unavailable"),
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(context: Option<&str>, diff: &str) -> ModelRequest {
        ModelRequest {
            model: "m".into(),
            prompt: "Review this.\n".into(),
            diff: diff.into(),
            context: context.map(str::to_string),
            max_output_units: 100,
        }
    }

    #[test]
    fn test_render_message_sections() {
        let message = render_message(&request(Some("Focus on locking"), "+a\n"));
        assert_eq!(
            message,
            "Review this.\n\nADDITIONAL INSTRUCTIONS\nFocus on locking\n\nDIFF\n```diff\n+a\n```"
        );

        let message = render_message(&request(Some("  "), ""));
        assert_eq!(message, "Review this.");
    }

    #[test]
    fn test_parse_anthropic_response() {
        let json = r#"{
            "id": "msg_1",
            "type": "message",
            "content": [
                {"type": "text", "text": "Looks fine."},
                {"type": "tool_use", "id": "t", "name": "x", "input": {}}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1200, "output_tokens": 80}
        }"#;
        let response: AnthropicResponse = serde_json::from_str(json).unwrap();
        let response = response.into_response();
        assert_eq!(response.text, "Looks fine.");
        assert_eq!(response.usage.input_units, 1200);
        assert_eq!(response.usage.output_units, 80);
    }

    #[test]
    fn test_parse_openai_response() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "One nit."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 20, "total_tokens": 920}
        }"#;
        let response: OpenAiResponse = serde_json::from_str(json).unwrap();
        let response = response.into_response();
        assert_eq!(response.text, "One nit.");
        assert_eq!(response.usage.input_units, 900);
        assert_eq!(response.usage.output_units, 20);
    }

    #[test]
    fn test_empty_openai_response() {
        let response: OpenAiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let response = response.into_response();
        assert!(response.text.is_empty());
        assert_eq!(response.usage, Usage::default());
    }

    #[test]
    fn test_provider_names() {
        let anthropic = AnthropicProvider::new("k", "https://example.test/v1/").unwrap();
        assert_eq!(anthropic.name(), "anthropic");
        assert_eq!(anthropic.endpoint, "https://example.test/v1");
        let openai = OpenAiProvider::new("k", OPENAI_API_URL).unwrap();
        assert_eq!(openai.name(), "openai");
    }
}
