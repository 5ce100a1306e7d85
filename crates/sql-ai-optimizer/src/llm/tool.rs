use async_trait::async_trait;
use serde_json::Value;

/// Textual outcome of a tool call, fed back to the model as a tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// A host-executed function the model may call mid-conversation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `input` object.
    fn input_schema(&self) -> Value;

    async fn handle(&self, input: Value) -> ToolOutput;
}

/// Read a required string field from a tool input object.
pub fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolOutput> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolOutput::error(format!("Missing required string field \"{}\"", field)))
}
