//! Picks candidate queries for optimization by letting a model explore
//! `performance_schema` and submit groups of digests.

use std::sync::Arc;

use tracing::{info, warn};

use crate::candidates::{CandidateQueryGroup, CandidateResult};
use crate::executor::QueryExecutor;
use crate::llm::{
    ChatClient, Conversation, LlmChain, LlmError, LlmRequest, Message, Reasoning, ReasoningEffort, Tool,
};
use crate::tools::{PerformanceSchemaQueryTool, SelectionAccumulator, SubmitSelectionTool};

const PLANNING_PROMPT: &str = "I have MySQL 8 database server and I need to find queries that are consuming a lot of resources (memory, CPU, IOPS, ...) and are best candidates for optimization.

I will provide you with tool to run read-only queries against performance_schema later but you will first have to formulate plan how to best find queries for optimization from different perspectives.

I am looking just for candidates for optimization, not for exact queries - I will need just query digests for now.";

const SINGLE_MODEL_PROMPT: &str = "I need help to optimize my SQL queries on MySQL 8 server. I will provide tool to query performance schema and get specific queries to optimize.

Query optimization can be achieved from different perspectives like execution time, memory usage, IOPS usage, etc. You must examine multiple optimization types and request query candidates with different queries to performance schema.";

fn selection_prompt(tool_name: &str, planned: bool) -> String {
    let opening = if planned {
        format!(
            "This is great! I will now provide you with tool \"{}\" to run read-only queries against database.\n\nYour task is to identify query groups from different perspectives like execution time, memory usage, IOPS usage, etc (as you planned previously).",
            tool_name
        )
    } else {
        format!(
            "{}\n\nUse tool \"{}\" to run read-only queries against database and identify query groups from different perspectives like execution time, memory usage, IOPS usage, etc.",
            SINGLE_MODEL_PROMPT, tool_name
        )
    };

    format!(
        "{}\n\nExamine each group and find best query candidates for optimization (which will be done later).\n\nAfter examining each group, submit your selection of queries for this group using tool \"{}\". I am expecting to get at least four groups with around 20 queries each.",
        opening,
        SubmitSelectionTool::NAME
    )
}

fn with_special_instructions(prompt: String, special_instructions: Option<&str>) -> String {
    match special_instructions.map(str::trim).filter(|s| !s.is_empty()) {
        Some(instructions) => format!("{}\n\n**Special instructions:**\n\n{}", prompt, instructions),
        None => prompt,
    }
}

/// Model used for one step of the selection.
#[derive(Clone)]
pub struct ModelStep {
    pub client: Arc<dyn ChatClient>,
    pub model: String,
}

impl ModelStep {
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

pub struct QuerySelector {
    chain: LlmChain,
    planner: Option<ModelStep>,
    explorer: ModelStep,
    executor: Arc<QueryExecutor>,
}

impl QuerySelector {
    pub fn new(chain: LlmChain, planner: Option<ModelStep>, explorer: ModelStep, executor: Arc<QueryExecutor>) -> Self {
        Self {
            chain,
            planner,
            explorer,
            executor,
        }
    }

    /// Run the selection dialogue and collect the submitted groups.
    ///
    /// A model that never calls `submit_selection` yields zero groups; that
    /// is logged but not treated as an error.
    pub async fn select_candidates(&self, special_instructions: Option<&str>) -> Result<CandidateResult, LlmError> {
        let conversation = match &self.planner {
            Some(planner) => {
                info!("Planning candidate selection with {}", planner.model);
                let request = LlmRequest::new(
                    planner.model.as_str(),
                    Conversation::from_user(with_special_instructions(PLANNING_PROMPT.to_string(), special_instructions)),
                )
                .with_temperature(1.0)
                .with_max_tokens(30_000)
                .with_reasoning(Reasoning::Effort(ReasoningEffort::High));
                let planned = self.chain.run(planner.client.as_ref(), request).await?;

                planned.conversation.with_message(Message::user(with_special_instructions(
                    selection_prompt(PerformanceSchemaQueryTool::NAME, true),
                    special_instructions,
                )))
            }
            None => Conversation::from_user(with_special_instructions(
                selection_prompt(PerformanceSchemaQueryTool::NAME, false),
                special_instructions,
            )),
        };

        let accumulator = SelectionAccumulator::new();
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(PerformanceSchemaQueryTool::new(self.executor.clone())),
            Arc::new(SubmitSelectionTool::new(accumulator.clone())),
        ];

        info!("Selecting candidate queries with {}", self.explorer.model);
        let request = LlmRequest::new(self.explorer.model.as_str(), conversation)
            .with_tools(tools)
            .with_temperature(1.0)
            .with_max_tokens(50_000)
            .with_reasoning(Reasoning::Budget(20_000));
        let response = self.chain.run(self.explorer.client.as_ref(), request).await?;

        let groups: Vec<CandidateQueryGroup> = accumulator.take().into_iter().map(CandidateQueryGroup::from).collect();
        if groups.is_empty() {
            warn!("Selection finished without any submitted group");
        } else {
            info!(
                "Selection finished with {} groups and {} queries",
                groups.len(),
                groups.iter().map(|g| g.queries.len()).sum::<usize>()
            );
        }

        Ok(CandidateResult {
            description: response.last_text(),
            groups,
            conversation_markdown: response.conversation.to_markdown(),
            conversation: response.conversation,
        })
    }
}
