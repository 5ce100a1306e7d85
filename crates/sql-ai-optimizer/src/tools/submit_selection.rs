use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::llm::tool::{Tool, ToolOutput};

pub const MAX_QUERIES_PER_GROUP: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedQuery {
    pub digest: String,
    pub query_sample: String,
    pub schema: String,
    pub reason: String,
}

/// One `submit_selection` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPayload {
    pub group_name: String,
    pub group_description: String,
    pub queries: Vec<SelectedQuery>,
}

/// Collects the groups submitted during one selector run.
#[derive(Debug, Clone, Default)]
pub struct SelectionAccumulator {
    groups: Arc<Mutex<Vec<SelectionPayload>>>,
}

impl SelectionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SelectionPayload>> {
        self.groups.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, payload: SelectionPayload) {
        self.lock().push(payload);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain everything submitted so far, in submission order.
    pub fn take(&self) -> Vec<SelectionPayload> {
        std::mem::take(&mut *self.lock())
    }
}

pub struct SubmitSelectionTool {
    accumulator: SelectionAccumulator,
}

impl SubmitSelectionTool {
    pub const NAME: &'static str = "submit_selection";

    pub fn new(accumulator: SelectionAccumulator) -> Self {
        Self { accumulator }
    }
}

#[async_trait]
impl Tool for SubmitSelectionTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Submit your selection of 20 most expensive queries"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["queries", "group_name", "group_description"],
            "properties": {
                "group_name": {
                    "type": "string",
                    "description": "Group name"
                },
                "group_description": {
                    "type": "string",
                    "description": "Description of performance impact type of the group"
                },
                "queries": {
                    "type": "array",
                    "description": "Array of query digests to optimize (min 1, max 20)",
                    "minItems": 1,
                    "maxItems": MAX_QUERIES_PER_GROUP,
                    "items": {
                        "type": "object",
                        "required": ["digest", "query_sample", "schema", "reason"],
                        "properties": {
                            "digest": {
                                "type": "string",
                                "description": "The query digest hash from performance_schema"
                            },
                            "query_sample": {
                                "type": "string",
                                "description": "The query text from performance_schema"
                            },
                            "schema": {
                                "type": "string",
                                "description": "The database schema the query operates on"
                            },
                            "reason": {
                                "type": "string",
                                "description": "Explanation of why this query is worth optimizing - formulate it in a way that it will be obvious if mentioned numbers are about a single query or total for all queries in the group"
                            }
                        }
                    }
                }
            }
        })
    }

    async fn handle(&self, input: Value) -> ToolOutput {
        let payload: SelectionPayload = match serde_json::from_value(input) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Rejected malformed selection: {}", e);
                return ToolOutput::error(format!("Invalid selection: {}", e));
            }
        };

        let count = payload.queries.len();
        if count == 0 || count > MAX_QUERIES_PER_GROUP {
            return ToolOutput::error(format!(
                "Invalid selection: expected 1 to {} queries, got {}",
                MAX_QUERIES_PER_GROUP, count
            ));
        }

        info!("Selection submitted: \"{}\" with {} queries", payload.group_name, count);
        self.accumulator.push(payload);
        ToolOutput::ok("Selection submitted")
    }
}
