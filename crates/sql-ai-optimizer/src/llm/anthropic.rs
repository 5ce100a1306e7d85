//! Anthropic Messages API adapter with tool use and extended thinking.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::client::{ChatClient, LlmError, LlmReply, LlmRequest, Reasoning, TokenUsage};
use super::conversation::{Message, MessageContent, Role};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        let key = HeaderValue::from_str(api_key).map_err(|_| LlmError::Config("Invalid Anthropic API key format".into()))?;
        headers.insert("x-api-key", key);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[derive(Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: Value,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Value>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn content_to_api(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text { text } => json!({"type": "text", "text": text}),
        MessageContent::Reasoning { text, signature } => {
            json!({"type": "thinking", "thinking": text, "signature": signature})
        }
        MessageContent::RedactedReasoning { data } => json!({"type": "redacted_thinking", "data": data}),
        MessageContent::ToolUse { id, name, input } => {
            json!({"type": "tool_use", "id": id, "name": name, "input": input})
        }
        MessageContent::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn message_to_api(message: &Message) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    json!({
        "role": role,
        "content": message.content.iter().map(content_to_api).collect::<Vec<_>>(),
    })
}

fn build_request(request: &LlmRequest) -> ApiRequest<'_> {
    let thinking = match request.reasoning {
        Some(Reasoning::Budget(budget)) => Some(json!({"type": "enabled", "budget_tokens": budget})),
        _ => None,
    };

    ApiRequest {
        model: &request.model,
        max_tokens: request.max_tokens,
        messages: request.conversation.messages.iter().map(message_to_api).collect(),
        tools: request
            .tools
            .iter()
            .map(|tool| ApiTool {
                name: tool.name(),
                description: tool.description(),
                input_schema: tool.input_schema(),
            })
            .collect(),
        temperature: request.temperature,
        thinking,
    }
}

fn parse_response(body: &str) -> Result<LlmReply, LlmError> {
    let parsed: ApiResponse =
        serde_json::from_str(body).map_err(|e| LlmError::invalid_response(PROVIDER, format!("Invalid JSON: {e}")))?;

    let content = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            ApiBlock::Text { text } => Some(MessageContent::Text { text }),
            ApiBlock::Thinking { thinking, signature } => Some(MessageContent::Reasoning {
                text: thinking,
                signature,
            }),
            ApiBlock::RedactedThinking { data } => Some(MessageContent::RedactedReasoning { data }),
            ApiBlock::ToolUse { id, name, input } => Some(MessageContent::ToolUse { id, name, input }),
            ApiBlock::Unknown => None,
        })
        .collect();

    Ok(LlmReply {
        message: Message::assistant(content),
        stop_reason: parsed.stop_reason,
        usage: TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        },
    })
}

#[async_trait]
impl ChatClient for AnthropicClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn send(&self, request: &LlmRequest) -> Result<LlmReply, LlmError> {
        debug!(
            "Sending {} messages to {} ({} tools)",
            request.conversation.len(),
            request.model,
            request.tools.len()
        );

        let response = self
            .client
            .post(self.messages_url())
            .json(&build_request(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
            return Err(LlmError::provider(PROVIDER, message, Some(status.as_u16())));
        }

        parse_response(&body)
    }
}
