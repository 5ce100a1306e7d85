//! OpenAI chat-completions adapter, text only. Used for the planning model.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::{ChatClient, LlmError, LlmReply, LlmRequest, Reasoning, TokenUsage};
use super::conversation::{Message, MessageContent, Role};

const PROVIDER: &str = "openai";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| LlmError::Config("Invalid OpenAI API key format".into()))?;
        headers.insert(AUTHORIZATION, auth);

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

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn build_request(request: &LlmRequest) -> ChatCompletionRequest<'_> {
    let messages = request
        .conversation
        .messages
        .iter()
        .filter_map(|message| {
            let content = message.text();
            if content.is_empty() {
                return None;
            }
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            Some(ChatMessage { role, content })
        })
        .collect();

    // Reasoning models reject an explicit temperature.
    let (temperature, reasoning_effort) = match request.reasoning {
        Some(Reasoning::Effort(effort)) => (None, Some(effort.as_str())),
        _ => (Some(request.temperature), None),
    };

    ChatCompletionRequest {
        model: &request.model,
        messages,
        max_completion_tokens: request.max_tokens,
        temperature,
        reasoning_effort,
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn send(&self, request: &LlmRequest) -> Result<LlmReply, LlmError> {
        if !request.tools.is_empty() {
            return Err(LlmError::Config("the OpenAI adapter does not support tools".into()));
        }
        debug!("Sending {} messages to {}", request.conversation.len(), request.model);

        let response = self
            .client
            .post(self.completions_url())
            .json(&build_request(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
            return Err(LlmError::provider(PROVIDER, message, Some(status.as_u16())));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::invalid_response(PROVIDER, format!("Invalid JSON: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::invalid_response(PROVIDER, "No choices in response"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(LlmReply {
            message: Message::assistant(vec![MessageContent::Text {
                text: choice.message.content.unwrap_or_default(),
            }]),
            stop_reason: choice.finish_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::ReasoningEffort;
    use crate::llm::conversation::Conversation;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn reasoning_effort_replaces_temperature() {
        let request = LlmRequest::new("o3", Conversation::from_user("plan"))
            .with_max_tokens(30_000)
            .with_reasoning(Reasoning::Effort(ReasoningEffort::High));
        let body = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(body["reasoning_effort"], "high");
        assert_eq!(body["max_completion_tokens"], 30_000);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["messages"], json!([{"role": "user", "content": "plan"}]));
    }

    #[tokio::test]
    async fn returns_assistant_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({"model": "o3"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{"message": {"role": "assistant", "content": "1. Look at digests"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 20}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = OpenAiClient::new("sk-test", server.url(), Duration::from_secs(5)).unwrap();
        let reply = client
            .send(&LlmRequest::new("o3", Conversation::from_user("plan")))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.message.text(), "1. Look at digests");
        assert_eq!(reply.usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn missing_choices_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new("sk-test", server.url(), Duration::from_secs(5)).unwrap();
        let err = client
            .send(&LlmRequest::new("o3", Conversation::from_user("plan")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_response");
    }
}
