//! Tool-use loop: send, run requested tools, feed results back, repeat.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::{ChatClient, LlmError, LlmRequest, LlmResponse, TokenUsage};
use super::conversation::{Message, MessageContent, Role};
use super::logger::LlmFileLogger;
use super::tool::ToolOutput;
use crate::metrics;

pub const DEFAULT_MAX_ROUNDS: usize = 50;

#[derive(Debug, Clone)]
pub struct LlmChain {
    logger: Option<LlmFileLogger>,
    max_rounds: usize,
}

impl Default for LlmChain {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LlmChain {
    pub fn new(logger: Option<LlmFileLogger>) -> Self {
        Self {
            logger,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Drive `request` until the model answers without asking for a tool.
    ///
    /// Every requested tool is executed in order and all results are sent
    /// back as one user message. Unknown tools get an error result.
    pub async fn run(&self, client: &dyn ChatClient, mut request: LlmRequest) -> Result<LlmResponse, LlmError> {
        if let Some(logger) = &self.logger {
            logger.request_started(&request.conversation);
        }

        let mut usage = TokenUsage::default();
        for round in 1..=self.max_rounds {
            let started = Instant::now();
            let result = client.send(&request).await;
            metrics::observe_llm_latency(started.elapsed().as_secs_f64());

            let reply = match result {
                Ok(reply) => {
                    metrics::inc_llm_request(&request.model, "ok");
                    reply
                }
                Err(e) => {
                    metrics::inc_llm_request(&request.model, e.code());
                    warn!("{} call to {} failed in round {}: {}", client.name(), request.model, round, e);
                    return Err(e);
                }
            };
            usage.add(reply.usage);

            let calls: Vec<(String, String, Value)> = reply
                .message
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            request.conversation.push(reply.message);

            if calls.is_empty() {
                info!(
                    "{} finished after {} round(s), {} input / {} output tokens",
                    request.model, round, usage.input_tokens, usage.output_tokens
                );
                if let Some(logger) = &self.logger {
                    logger.request_finished(&request.conversation);
                }
                return Ok(LlmResponse {
                    conversation: request.conversation,
                    usage,
                    rounds: round,
                });
            }

            let mut results = Vec::with_capacity(calls.len());
            for (id, name, input) in calls {
                debug!("Model requested tool {} ({})", name, id);
                metrics::inc_tool_call(&name);
                let output = match request.find_tool(&name) {
                    Some(tool) => tool.handle(input).await,
                    None => ToolOutput::error(format!("Unknown tool \"{}\"", name)),
                };
                results.push(MessageContent::ToolResult {
                    tool_use_id: id,
                    content: output.content,
                    is_error: output.is_error,
                });
            }
            request.conversation.push(Message {
                role: Role::User,
                content: results,
            });

            if let Some(logger) = &self.logger {
                logger.request_started(&request.conversation);
            }
        }

        Err(LlmError::TooManyRounds(self.max_rounds))
    }
}
