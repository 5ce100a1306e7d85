//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::analyzed_db::{AnalyzedDatabase, Row, SqlConnection, SqlError};
use crate::analyzer::QueryAnalyzer;
use crate::api::AppState;
use crate::cache::ResultCache;
use crate::executor::QueryExecutor;
use crate::llm::{ChatClient, LlmChain, LlmError, LlmReply, LlmRequest, Message, MessageContent, TokenUsage};
use crate::selector::{ModelStep, QuerySelector};
use crate::state_db::StateDatabase;

type Outcome = Result<Vec<Row>, String>;

/// `SqlConnection` answering from substring rules. The first rule whose
/// pattern occurs in the statement wins; anything else returns no rows.
#[derive(Default)]
pub struct StubConnection {
    rules: Vec<(String, Outcome)>,
    calls: Mutex<Vec<(Option<String>, String, Vec<String>)>>,
}

impl StubConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.rules.push((pattern.to_string(), Ok(rows)));
        self
    }

    pub fn fail_on(mut self, pattern: &str, message: &str) -> Self {
        self.rules.push((pattern.to_string(), Err(message.to_string())));
        self
    }

    pub fn row(fields: &[(&str, Option<&str>)]) -> Row {
        Row::from_pairs(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.map(str::to_string))),
        )
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Executed statements in order.
    pub fn statements(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, sql, _)| sql.clone()).collect()
    }

    /// Schema and parameters of every executed statement.
    pub fn calls(&self) -> Vec<(Option<String>, String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SqlConnection for StubConnection {
    fn query(&self, schema: Option<&str>, sql: &str, params: &[&str]) -> Result<Vec<Row>, SqlError> {
        self.calls.lock().unwrap().push((
            schema.map(str::to_string),
            sql.to_string(),
            params.iter().map(|p| p.to_string()).collect(),
        ));

        match self.rules.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, Ok(rows))) => Ok(rows.clone()),
            Some((_, Err(message))) => Err(SqlError::Driver(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn hostname_with_port(&self) -> String {
        "stub:3306".to_string()
    }
}

/// `ChatClient` replaying queued assistant messages. Once the queue is empty
/// every call answers `"Done."`. Tracks the peak number of concurrent calls.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Message>>,
    requests: Mutex<Vec<LlmRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, content: Vec<MessageContent>) -> Self {
        self.replies.lock().unwrap().push_back(Message::assistant(content));
        self
    }

    pub fn reply_text(self, text: &str) -> Self {
        self.reply(vec![MessageContent::text(text)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, request: &LlmRequest) -> Result<LlmReply, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Message::assistant(vec![MessageContent::text("Done.")]));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(LlmReply {
            message,
            stop_reason: Some("end_turn".to_string()),
            usage: TokenUsage::default(),
        })
    }
}

/// Application wired to a scripted model and a stub analyzed database. The
/// same client answers selection and analysis requests.
pub struct TestApp {
    pub dir: TempDir,
    pub app: AppState,
    pub client: Arc<ScriptedClient>,
    pub connection: Arc<StubConnection>,
}

pub fn test_app(client: ScriptedClient, connection: StubConnection) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(StateDatabase::new(&dir.path().join("state.sqlite")).unwrap());
    let client = Arc::new(client);
    let connection = Arc::new(connection);
    let executor = Arc::new(QueryExecutor::new(
        connection.clone(),
        ResultCache::in_memory(Duration::from_secs(60)),
    ));
    let analyzed_db = AnalyzedDatabase::new(connection.clone());

    let selector = QuerySelector::new(
        LlmChain::default(),
        None,
        ModelStep::new(client.clone(), "selection-model"),
        executor.clone(),
    );
    let analyzer = QueryAnalyzer::new(
        LlmChain::default(),
        client.clone(),
        "analysis-model",
        analyzed_db.clone(),
        state.clone(),
        executor,
        false,
    );

    TestApp {
        dir,
        app: AppState {
            state,
            analyzed_db,
            selector: Arc::new(selector),
            analyzer,
            analysis_concurrency: 5,
        },
        client,
        connection,
    }
}
