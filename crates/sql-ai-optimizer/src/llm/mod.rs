//! Minimal multi-provider LLM client: conversation model, tools and the
//! tool-use loop.
pub mod anthropic;
pub mod chain;
pub mod client;
pub mod conversation;
pub mod logger;
pub mod openai;
pub mod tool;

pub use anthropic::AnthropicClient;
pub use chain::LlmChain;
pub use client::{ChatClient, LlmError, LlmReply, LlmRequest, LlmResponse, Reasoning, ReasoningEffort, TokenUsage};
pub use conversation::{Conversation, Message, MessageContent, Role};
pub use logger::LlmFileLogger;
pub use openai::OpenAiClient;
pub use tool::{Tool, ToolOutput};
