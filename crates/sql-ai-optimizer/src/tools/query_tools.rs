use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::executor::QueryExecutor;
use crate::llm::tool::{required_str, Tool, ToolOutput};

/// Row cap applied to every tool-issued query.
pub const TOOL_MAX_ROWS: usize = 250;

async fn execute_blocking(
    executor: Arc<QueryExecutor>,
    schema: String,
    sql: String,
    use_cache: bool,
) -> ToolOutput {
    let result = tokio::task::spawn_blocking(move || {
        executor.execute_query(&schema, &sql, use_cache, Some(TOOL_MAX_ROWS))
    })
    .await;

    match result {
        Ok(text) => ToolOutput::ok(text),
        Err(e) => {
            warn!("Query task failed: {}", e);
            ToolOutput::error(format!("Error: {}", e))
        }
    }
}

/// Read-only exploration of `performance_schema`.
pub struct PerformanceSchemaQueryTool {
    executor: Arc<QueryExecutor>,
}

impl PerformanceSchemaQueryTool {
    pub const NAME: &'static str = "performance_schema_query";

    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for PerformanceSchemaQueryTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run SQL query against performance_schema and return results as markdown table"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "SQL query to run against performance_schema"
                }
            }
        })
    }

    async fn handle(&self, input: Value) -> ToolOutput {
        let query = match required_str(&input, "query") {
            Ok(query) => query.to_string(),
            Err(error) => return error,
        };
        execute_blocking(self.executor.clone(), "performance_schema".to_string(), query, true).await
    }
}

/// Metadata queries against any schema of the analyzed server.
pub struct DatabaseQueryTool {
    executor: Arc<QueryExecutor>,
    cache_results: bool,
}

impl DatabaseQueryTool {
    pub const NAME: &'static str = "database_query";

    pub fn new(executor: Arc<QueryExecutor>, cache_results: bool) -> Self {
        Self { executor, cache_results }
    }
}

#[async_trait]
impl Tool for DatabaseQueryTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run SQL query against database and return results as markdown table. Use this tool to get better understanding about tables or its data structure. This tool cannot be use to get real data, just metadata about tables, data from system tables or row counts and other statistics."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["database", "query"],
            "properties": {
                "database": {
                    "type": "string",
                    "description": "Database name"
                },
                "query": {
                    "type": "string",
                    "description": "SQL query to run against database"
                }
            }
        })
    }

    async fn handle(&self, input: Value) -> ToolOutput {
        let (database, query) = match (required_str(&input, "database"), required_str(&input, "query")) {
            (Ok(database), Ok(query)) => (database.to_string(), query.to_string()),
            (Err(error), _) | (_, Err(error)) => return error,
        };
        execute_blocking(self.executor.clone(), database, query, self.cache_results).await
    }
}
