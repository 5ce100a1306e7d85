//! Provider-neutral conversation model.
//!
//! Conversations are persisted as JSON in the state database and replayed to
//! the provider when a dialogue is continued, so every content kind the
//! providers return (including reasoning signatures) must survive a round trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedReasoning {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::Reasoning { .. } | Self::RedactedReasoning { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![MessageContent::text(text)],
        }
    }

    pub fn assistant(content: Vec<MessageContent>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Concatenated text blocks, reasoning excluded.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Tool calls requested in this message as `(id, name, input)`.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }

    /// True when the message carries nothing but reasoning.
    pub fn is_reasoning_only(&self) -> bool {
        !self.content.is_empty() && self.content.iter().all(MessageContent::is_reasoning)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn from_user(text: impl Into<String>) -> Self {
        Self::new(vec![Message::user(text)])
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text of the last assistant message that has any.
    pub fn last_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(Message::text)
            .find(|text| !text.is_empty())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Human readable transcript used for logs and audit columns.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            let heading = match message.role {
                Role::User => "## User",
                Role::Assistant => "## Assistant",
            };
            out.push_str(heading);
            out.push_str("\n\n");

            for content in &message.content {
                match content {
                    MessageContent::Text { text } => {
                        out.push_str(text);
                        out.push_str("\n\n");
                    }
                    MessageContent::Reasoning { text, .. } => {
                        for line in text.lines() {
                            out.push_str("> ");
                            out.push_str(line);
                            out.push('\n');
                        }
                        out.push('\n');
                    }
                    MessageContent::RedactedReasoning { .. } => {
                        out.push_str("> _redacted reasoning_\n\n");
                    }
                    MessageContent::ToolUse { name, input, .. } => {
                        let input = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
                        out.push_str(&format!("**Tool call:** `{}`\n\n```json\n{}\n```\n\n", name, input));
                    }
                    MessageContent::ToolResult { content, is_error, .. } => {
                        let label = if *is_error { "Tool error" } else { "Tool result" };
                        out.push_str(&format!("**{}:**\n\n{}\n\n", label, content));
                    }
                }
            }
        }
        out
    }
}
