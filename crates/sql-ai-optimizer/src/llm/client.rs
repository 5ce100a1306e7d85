//! Provider-neutral request/response types and the `ChatClient` seam.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::conversation::{Conversation, Message};
use super::tool::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// How much thinking a reasoning model may do before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reasoning {
    /// Token budget for extended thinking.
    Budget(u32),
    Effort(ReasoningEffort),
}

#[derive(Clone)]
pub struct LlmRequest {
    pub model: String,
    pub conversation: Conversation,
    pub tools: Vec<Arc<dyn Tool>>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub reasoning: Option<Reasoning>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, conversation: Conversation) -> Self {
        Self {
            model: model.into(),
            conversation,
            tools: Vec::new(),
            temperature: 1.0,
            max_tokens: 4096,
            reasoning: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_reasoning(mut self, reasoning: Reasoning) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }
}

impl fmt::Debug for LlmRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmRequest")
            .field("model", &self.model)
            .field("messages", &self.conversation.len())
            .field("tools", &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("reasoning", &self.reasoning)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One assistant turn.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub message: Message,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

/// Final state of a tool loop.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub conversation: Conversation,
    pub usage: TokenUsage,
    pub rounds: usize,
}

impl LlmResponse {
    pub fn last_text(&self) -> String {
        self.conversation.last_text()
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid response from {provider}: {message}")]
    InvalidResponse { provider: &'static str, message: String },

    #[error("tool loop exceeded {0} rounds")]
    TooManyRounds(usize),
}

impl LlmError {
    pub fn provider(provider: &'static str, message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            status,
            retryable: status.map(|s| s == 429 || s >= 500).unwrap_or(false),
        }
    }

    pub fn invalid_response(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: message.into(),
        }
    }

    /// Transient failures that a caller may choose to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Short label used for metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Provider { .. } => "provider",
            Self::Config(_) => "config",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::TooManyRounds(_) => "too_many_rounds",
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Provider name for logs and metrics.
    fn name(&self) -> &'static str;

    async fn send(&self, request: &LlmRequest) -> Result<LlmReply, LlmError>;
}
