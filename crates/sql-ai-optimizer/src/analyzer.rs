//! Per-query analysis: builds a prompt with the query, its plan and the
//! schema of every referenced table, then asks a reasoning model for advice.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::analyzed_db::{quote_identifier, AnalyzedDatabase, IndexColumn};
use crate::candidates::CandidateQuery;
use crate::executor::QueryExecutor;
use crate::llm::{ChatClient, Conversation, LlmChain, LlmError, LlmRequest, LlmResponse, Message, Reasoning, Tool};
use crate::metrics;
use crate::state_db::{QueryRecord, RunRecord, StateDatabase};
use crate::tools::DatabaseQueryTool;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid whitespace regex");
    static ref TABLE_REFERENCE: Regex =
        Regex::new(r"(?i)(?:FROM|JOIN)\s+([a-zA-Z0-9_.`]+)").expect("valid table regex");
}

/// Table names following `FROM` or `JOIN`, backticks removed, first
/// occurrence order, no duplicates. Subqueries, CTEs and aliases are not
/// understood.
pub fn extract_tables(sql: &str) -> Vec<String> {
    let normalized = WHITESPACE.replace_all(sql.trim(), " ");
    let mut tables: Vec<String> = Vec::new();
    for capture in TABLE_REFERENCE.captures_iter(&normalized) {
        let table = capture[1].replace('`', "");
        if !table.is_empty() && !tables.contains(&table) {
            tables.push(table);
        }
    }
    tables
}

/// `ALTER TABLE ... ADD INDEX` statements rebuilding the secondary indexes
/// described by `SHOW INDEX` rows. The primary key is skipped.
pub fn index_statements(table: &str, rows: &[IndexColumn]) -> String {
    let mut order: Vec<&str> = Vec::new();
    let mut columns: HashMap<&str, BTreeMap<u32, &str>> = HashMap::new();
    for row in rows {
        if !columns.contains_key(row.key_name.as_str()) {
            order.push(row.key_name.as_str());
        }
        columns
            .entry(row.key_name.as_str())
            .or_default()
            .insert(row.seq_in_index, row.column_name.as_str());
    }

    let mut out = String::new();
    for name in order.into_iter().filter(|name| *name != "PRIMARY") {
        let Some(first) = rows.iter().find(|row| row.key_name == name) else {
            continue;
        };
        let column_list = columns
            .get(name)
            .map(|cols| cols.values().copied().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        let unique = if first.non_unique { "" } else { "UNIQUE " };
        out.push_str(&format!(
            "ALTER TABLE `{}` ADD {}INDEX `{}` ({}) USING {};\n",
            table, unique, name, column_list, first.index_type
        ));
    }
    out
}

/// Everything needed to analyze one stored candidate.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub query_id: i64,
    pub captured_sql: Option<String>,
    pub candidate: CandidateQuery,
    pub use_real_query: bool,
    pub use_database_access: bool,
}

impl AnalysisJob {
    pub fn new(query: &QueryRecord, run: &RunRecord) -> Self {
        Self {
            query_id: query.id,
            captured_sql: query.real_query.clone(),
            candidate: query.candidate(),
            use_real_query: run.use_real_query,
            use_database_access: run.use_database_access,
        }
    }
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    pub query_id: i64,
    pub result: anyhow::Result<()>,
}

#[derive(Clone)]
pub struct QueryAnalyzer {
    chain: LlmChain,
    client: Arc<dyn ChatClient>,
    model: String,
    analyzed_db: AnalyzedDatabase,
    state: Arc<StateDatabase>,
    executor: Arc<QueryExecutor>,
    cache_database_results: bool,
}

impl QueryAnalyzer {
    pub fn new(
        chain: LlmChain,
        client: Arc<dyn ChatClient>,
        model: impl Into<String>,
        analyzed_db: AnalyzedDatabase,
        state: Arc<StateDatabase>,
        executor: Arc<QueryExecutor>,
        cache_database_results: bool,
    ) -> Self {
        Self {
            chain,
            client,
            model: model.into(),
            analyzed_db,
            state,
            executor,
            cache_database_results,
        }
    }

    /// Analyze one candidate and store the resulting conversation on the
    /// query row. A captured SQL sample found on the way is stored too.
    pub async fn analyze_query(
        &self,
        query_id: i64,
        captured_sql: Option<String>,
        candidate: &CandidateQuery,
        use_real_query: bool,
        use_database_access: bool,
    ) -> anyhow::Result<LlmResponse> {
        let this = self.clone();
        let owned_candidate = candidate.clone();
        let prompt = tokio::task::spawn_blocking(move || {
            this.build_prompt(query_id, captured_sql, &owned_candidate, use_real_query, use_database_access)
        })
        .await??;

        info!("Analyzing query {} ({})", query_id, candidate.digest);
        let response = self
            .send_conversation(Conversation::from_user(prompt), use_database_access)
            .await?;

        self.state
            .queries
            .update_conversation(query_id, &response.conversation, &response.conversation.to_markdown())?;
        Ok(response)
    }

    /// Append `text` to a stored dialogue and send it again.
    pub async fn continue_conversation(
        &self,
        conversation: Conversation,
        text: &str,
        use_database_access: bool,
    ) -> Result<LlmResponse, LlmError> {
        self.send_conversation(conversation.with_message(Message::user(text)), use_database_access)
            .await
    }

    /// Run many analyses with at most `limit` in flight.
    pub async fn analyze_many(&self, jobs: Vec<AnalysisJob>, limit: usize) -> Vec<AnalysisOutcome> {
        stream::iter(jobs.into_iter().map(|job| {
            let this = self.clone();
            async move {
                metrics::inc_analyses();
                let result = this
                    .analyze_query(
                        job.query_id,
                        job.captured_sql,
                        &job.candidate,
                        job.use_real_query,
                        job.use_database_access,
                    )
                    .await
                    .map(|_| ());
                metrics::dec_analyses();
                if let Err(e) = &result {
                    warn!("Analysis of query {} failed: {:#}", job.query_id, e);
                }
                AnalysisOutcome {
                    query_id: job.query_id,
                    result,
                }
            }
        }))
        .buffer_unordered(limit.max(1))
        .collect()
        .await
    }

    async fn send_conversation(
        &self,
        conversation: Conversation,
        use_database_access: bool,
    ) -> Result<LlmResponse, LlmError> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        if use_database_access {
            tools.push(Arc::new(DatabaseQueryTool::new(
                self.executor.clone(),
                self.cache_database_results,
            )));
        }

        let request = LlmRequest::new(self.model.as_str(), conversation)
            .with_tools(tools)
            .with_temperature(1.0)
            .with_max_tokens(50_000)
            .with_reasoning(Reasoning::Budget(30_000));
        self.chain.run(self.client.as_ref(), request).await
    }

    fn build_prompt(
        &self,
        query_id: i64,
        captured_sql: Option<String>,
        candidate: &CandidateQuery,
        use_real_query: bool,
        use_database_access: bool,
    ) -> anyhow::Result<String> {
        let schema = candidate.schema.as_str();

        let captured_sql = match captured_sql {
            Some(sql) => Some(sql),
            None => match self.analyzed_db.query_text(&candidate.digest, schema) {
                Ok(Some(sql)) => {
                    self.state.queries.set_real_query(query_id, &sql)?;
                    Some(sql)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("Captured SQL lookup failed for {}: {}", candidate.digest, e);
                    None
                }
            },
        };

        let explain = captured_sql
            .as_deref()
            .and_then(|sql| self.analyzed_db.explain_json(schema, sql));
        if let Some(plan) = &explain {
            self.state.queries.set_explain_json(query_id, plan)?;
        }

        let prompt_sql = match (&captured_sql, use_real_query) {
            (Some(sql), true) => sql.as_str(),
            _ => candidate.normalized_query.as_str(),
        };

        let mut prompt = format!(
            "I need help with optimizing a MySQL 8 query. I have identified this query using performance schema as consuming too many resources. I will provide you with an example query and the schema of tables used in the query.\n\n\
             Analyze all information and provide me with instructions to change the query, update schema or how to split to more manageable queries in PHP.\n\n\
             ### Query\n```\n{}\n```\n",
            prompt_sql
        );

        if use_database_access {
            prompt.push_str(
                "\n### Additional information\nUse provided tool to get more information about tables or its data structure if needed - you can also use it to check statistics in performance_schema by provided digest.\n",
            );
        }

        if let Some(plan) = &explain {
            prompt.push_str(&format!("\n### Explain result\n```\n{}\n```\n", plan));
        }

        prompt.push_str("### Schema");
        prompt.push_str(&self.schema_section(schema, prompt_sql));

        prompt.push_str(&format!(
            "\n## General information\n\nDatabase: {}\n\nQuery digest: {}\n",
            schema, candidate.digest
        ));
        Ok(prompt)
    }

    fn schema_section(&self, schema: &str, sql: &str) -> String {
        let live_tables: HashMap<String, String> = match self.analyzed_db.show_tables(schema) {
            Ok(tables) => tables.into_iter().map(|t| (t.to_lowercase(), t)).collect(),
            Err(e) => {
                warn!("SHOW TABLES failed in schema {}: {}", schema, e);
                HashMap::new()
            }
        };

        let mut section = String::new();
        for extracted in extract_tables(sql) {
            let name = extracted.rsplit('.').next().unwrap_or(&extracted).to_lowercase();
            let Some(table) = live_tables.get(&name) else {
                continue;
            };

            match self.analyzed_db.show_create_table(schema, table) {
                Ok(Some(create)) => section.push_str(&format!("\n\n#### {}\n```\n{}\n```\n", table, create)),
                Ok(None) => {}
                Err(e) => {
                    warn!("SHOW CREATE TABLE {} failed: {}", table, e);
                    continue;
                }
            }

            let indexes = match self.analyzed_db.show_index(schema, table) {
                Ok(indexes) => indexes,
                Err(e) => {
                    warn!("SHOW INDEX FROM {} failed: {}", table, e);
                    continue;
                }
            };
            if indexes.is_empty() {
                continue;
            }

            section.push_str(&format!(
                "\n#### Indexes for {}\n```\n{}```\n",
                table,
                index_statements(table, &indexes)
            ));
            let stats = self.executor.execute_query(
                schema,
                &format!("SHOW INDEX FROM {}", quote_identifier(table)),
                true,
                None,
            );
            section.push_str(&format!("\n\n#### SHOW INDEX FROM {}\n\n{}\n\n", table, stats));
        }
        section
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzed_db::Row;
    use crate::cache::ResultCache;
    use crate::state_db::{NewQuery, NewRun};
    use crate::test_support::{ScriptedClient, StubConnection};
    use std::time::Duration;
    use tempfile::TempDir;

    fn index_row(key: &str, non_unique: bool, seq: u32, column: &str) -> IndexColumn {
        IndexColumn {
            key_name: key.to_string(),
            non_unique,
            seq_in_index: seq,
            column_name: column.to_string(),
            index_type: "BTREE".to_string(),
        }
    }

    #[test]
    fn extracts_tables_in_order_without_duplicates() {
        assert_eq!(
            extract_tables("SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id"),
            vec!["orders", "customers"]
        );
        assert_eq!(
            extract_tables("select a\nfrom `shop`.`orders`\n  left join items on 1 join orders x"),
            vec!["shop.orders", "items", "orders"]
        );
        assert!(extract_tables("SELECT 1").is_empty());
    }

    #[test]
    fn rebuilds_secondary_indexes() {
        let rows = vec![
            index_row("PRIMARY", false, 1, "id"),
            index_row("idx_customer_date", true, 2, "created_at"),
            index_row("idx_customer_date", true, 1, "customer_id"),
            index_row("uniq_number", false, 1, "number"),
        ];

        assert_eq!(
            index_statements("orders", &rows),
            "ALTER TABLE `orders` ADD INDEX `idx_customer_date` (customer_id, created_at) USING BTREE;\n\
             ALTER TABLE `orders` ADD UNIQUE INDEX `uniq_number` (number) USING BTREE;\n"
        );
    }

    struct Fixture {
        _dir: TempDir,
        state: Arc<StateDatabase>,
        stub: Arc<StubConnection>,
        client: Arc<ScriptedClient>,
        analyzer: QueryAnalyzer,
    }

    fn fixture(stub: StubConnection, client: ScriptedClient) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(StateDatabase::new(&dir.path().join("state.sqlite")).unwrap());
        let stub = Arc::new(stub);
        let client = Arc::new(client);
        let executor = Arc::new(QueryExecutor::new(
            stub.clone(),
            ResultCache::in_memory(Duration::from_secs(60)),
        ));
        let analyzer = QueryAnalyzer::new(
            LlmChain::default(),
            client.clone(),
            "analysis-model",
            AnalyzedDatabase::new(stub.clone()),
            state.clone(),
            executor,
            true,
        );
        Fixture {
            _dir: dir,
            state,
            stub,
            client,
            analyzer,
        }
    }

    fn candidate() -> CandidateQuery {
        CandidateQuery {
            schema: "shop".into(),
            digest: "abc123".into(),
            normalized_query: "SELECT * FROM orders WHERE customer_id = ?".into(),
            impact_description: "full scan".into(),
        }
    }

    fn insert_queries(state: &StateDatabase, count: usize) -> Vec<i64> {
        let conversation = Conversation::from_user("select");
        let run_id = state
            .runs
            .create_run(NewRun {
                input: None,
                hostname: "stub:3306",
                output: "",
                use_real_query: true,
                use_database_access: false,
                conversation: &conversation,
                conversation_markdown: "",
            })
            .unwrap();
        let group_id = state.runs.create_group(run_id, "g", "d").unwrap();
        let candidate = candidate();
        (0..count)
            .map(|_| {
                state
                    .queries
                    .create_query(NewQuery {
                        run_id,
                        group_id,
                        candidate: &candidate,
                        real_query: None,
                    })
                    .unwrap()
            })
            .collect()
    }

    fn live_schema() -> StubConnection {
        let index_rows: Vec<Row> = vec![
            StubConnection::row(&[
                ("Non_unique", Some("0")),
                ("Key_name", Some("PRIMARY")),
                ("Seq_in_index", Some("1")),
                ("Column_name", Some("id")),
                ("Index_type", Some("BTREE")),
            ]),
            StubConnection::row(&[
                ("Non_unique", Some("1")),
                ("Key_name", Some("idx_customer")),
                ("Seq_in_index", Some("1")),
                ("Column_name", Some("customer_id")),
                ("Index_type", Some("BTREE")),
            ]),
        ];
        StubConnection::new()
            .on("EXPLAIN", vec![StubConnection::row(&[("EXPLAIN", Some("{\"query_block\":{}}"))])])
            .on(
                "events_statements_history",
                vec![StubConnection::row(&[("sql_text", Some("SELECT * FROM orders WHERE customer_id = 42"))])],
            )
            .on(
                "SHOW TABLES",
                vec![
                    StubConnection::row(&[("Tables_in_shop", Some("Orders"))]),
                    StubConnection::row(&[("Tables_in_shop", Some("customers"))]),
                ],
            )
            .on(
                "SHOW CREATE TABLE",
                vec![StubConnection::row(&[
                    ("Table", Some("Orders")),
                    ("Create Table", Some("CREATE TABLE `Orders` (`id` int)")),
                ])],
            )
            .on("SHOW INDEX", index_rows)
    }

    #[tokio::test]
    async fn analysis_builds_prompt_and_persists_state() {
        let f = fixture(live_schema(), ScriptedClient::new().reply_text("Add a composite index."));
        let query_id = insert_queries(&f.state, 1)[0];

        let response = f
            .analyzer
            .analyze_query(query_id, None, &candidate(), true, false)
            .await
            .unwrap();

        let prompt = f.client.requests()[0].conversation.messages[0].text();
        assert!(prompt.contains("```\nSELECT * FROM orders WHERE customer_id = 42\n```"));
        assert!(prompt.contains("### Explain result\n```\n{\"query_block\":{}}\n```"));
        assert!(prompt.contains("#### Orders\n```\nCREATE TABLE `Orders` (`id` int)\n```"));
        assert!(prompt.contains("ALTER TABLE `Orders` ADD INDEX `idx_customer` (customer_id) USING BTREE;"));
        assert!(!prompt.contains("`PRIMARY`"));
        assert!(prompt.contains("#### SHOW INDEX FROM Orders\n\n| Non_unique |"));
        assert!(prompt.ends_with("## General information\n\nDatabase: shop\n\nQuery digest: abc123\n"));
        assert!(!prompt.contains("### Additional information"));
        assert!(f.client.requests()[0].tools.is_empty());

        let stored = f.state.queries.get_query(query_id).unwrap().unwrap();
        assert_eq!(stored.real_query.as_deref(), Some("SELECT * FROM orders WHERE customer_id = 42"));
        assert_eq!(stored.explain_json.as_deref(), Some("{\"query_block\":{}}"));
        assert_eq!(stored.conversation().unwrap(), Some(response.conversation));
    }

    #[tokio::test]
    async fn normalized_query_is_used_without_real_query_flag_and_db_tool_is_offered() {
        let f = fixture(live_schema(), ScriptedClient::new());
        let query_id = insert_queries(&f.state, 1)[0];

        f.analyzer
            .analyze_query(query_id, Some("SELECT * FROM orders WHERE customer_id = 7".into()), &candidate(), false, true)
            .await
            .unwrap();

        let request = &f.client.requests()[0];
        let prompt = request.conversation.messages[0].text();
        assert!(prompt.contains("```\nSELECT * FROM orders WHERE customer_id = ?\n```"));
        assert!(prompt.contains("### Additional information"));
        assert!(request.find_tool(DatabaseQueryTool::NAME).is_some());
        assert!(!f
            .stub
            .statements()
            .iter()
            .any(|sql| sql.contains("events_statements_history")));
    }

    #[tokio::test]
    async fn explain_failure_and_unknown_tables_are_not_fatal() {
        let stub = StubConnection::new()
            .fail_on("EXPLAIN", "You have an error in your SQL syntax")
            .on("SHOW TABLES", vec![StubConnection::row(&[("Tables_in_shop", Some("orders"))])]);
        let f = fixture(stub, ScriptedClient::new());
        let query_id = insert_queries(&f.state, 1)[0];
        let sql = "SELECT * FROM audit_log JOIN orders ON 1".to_string();

        f.analyzer
            .analyze_query(query_id, Some(sql), &candidate(), true, false)
            .await
            .unwrap();

        let prompt = f.client.requests()[0].conversation.messages[0].text();
        assert!(!prompt.contains("### Explain result"));
        assert!(!prompt.contains("audit_log\n```"));
        assert!(f.state.queries.get_query(query_id).unwrap().unwrap().explain_json.is_none());
    }

    #[tokio::test]
    async fn continuing_adds_user_and_assistant_messages() {
        let f = fixture(StubConnection::new(), ScriptedClient::new().reply_text("Sure, here is more detail."));
        let stored = Conversation::from_user("prompt")
            .with_message(Message::assistant(vec![crate::llm::MessageContent::text("first answer")]));

        let response = f
            .analyzer
            .continue_conversation(stored.clone(), "What about partitioning?", false)
            .await
            .unwrap();

        assert_eq!(response.conversation.len(), stored.len() + 2);
        assert_eq!(response.conversation.messages[2].text(), "What about partitioning?");
        assert_eq!(response.last_text(), "Sure, here is more detail.");
    }

    #[tokio::test]
    async fn analyze_many_respects_concurrency_limit() {
        let f = fixture(StubConnection::new(), ScriptedClient::new().with_delay(Duration::from_millis(20)));
        let ids = insert_queries(&f.state, 12);
        let jobs: Vec<AnalysisJob> = ids
            .iter()
            .map(|id| AnalysisJob {
                query_id: *id,
                captured_sql: Some("SELECT 1".into()),
                candidate: candidate(),
                use_real_query: true,
                use_database_access: false,
            })
            .collect();

        let outcomes = f.analyzer.analyze_many(jobs, 5).await;

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(f.client.call_count(), 12);
        assert!(f.client.max_in_flight() <= 5);
        assert!(ids
            .iter()
            .all(|id| f.state.queries.get_query(*id).unwrap().unwrap().is_analyzed()));
    }
}
