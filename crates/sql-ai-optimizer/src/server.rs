//! Server startup and routing.
//!
//! Everything is wired once at startup and shared with the handlers through
//! the cloneable [`AppState`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    analyzed_db::{AnalyzedDatabase, MySqlConnection},
    analyzer::QueryAnalyzer,
    api::{self, AppState},
    cache::ResultCache,
    config::Config,
    executor::QueryExecutor,
    llm::{AnthropicClient, ChatClient, LlmChain, LlmFileLogger, OpenAiClient},
    selector::{ModelStep, QuerySelector},
    state_db::StateDatabase,
};

/// Build the application state from configuration.
pub fn build_app_state(cfg: &Config) -> anyhow::Result<AppState> {
    let state = Arc::new(StateDatabase::new(&cfg.state_db_path)?);

    let connection = Arc::new(MySqlConnection::from_url(&cfg.database_url)?);
    let analyzed_db = AnalyzedDatabase::new(connection.clone());
    let cache = ResultCache::new(Some(cfg.cache_dir.clone()), cfg.query_cache_ttl());
    let executor = Arc::new(QueryExecutor::new(connection, cache));

    let chain = LlmChain::new(Some(LlmFileLogger::new(cfg.llm_log_path.clone())));
    let anthropic: Arc<dyn ChatClient> = Arc::new(AnthropicClient::new(
        &cfg.anthropic_api_key,
        cfg.anthropic_base_url.clone(),
        cfg.llm_timeout(),
    )?);

    let planner = match &cfg.openai_api_key {
        Some(key) => {
            let openai: Arc<dyn ChatClient> =
                Arc::new(OpenAiClient::new(key, cfg.openai_base_url.clone(), cfg.llm_timeout())?);
            Some(ModelStep::new(openai, cfg.selector_planning_model.as_str()))
        }
        None => {
            warn!("OPENAI_API_KEY not set, candidate selection runs without a planning step");
            None
        }
    };

    let selector = QuerySelector::new(
        chain.clone(),
        planner,
        ModelStep::new(anthropic.clone(), cfg.selector_model.as_str()),
        executor.clone(),
    );
    let analyzer = QueryAnalyzer::new(
        chain,
        anthropic,
        cfg.analyzer_model.as_str(),
        analyzed_db.clone(),
        state.clone(),
        executor,
        cfg.cache_database_results,
    );

    Ok(AppState {
        state,
        analyzed_db,
        selector: Arc::new(selector),
        analyzer,
        analysis_concurrency: cfg.analysis_concurrency.max(1),
    })
}

pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/new-run", post(api::new_run))
        .route("/run/:id", get(api::run_detail))
        .route("/run/:id/fetch-queries", post(api::fetch_queries))
        .route("/run/:id/analyze", post(api::analyze_queries))
        .route("/run/:id/delete", post(api::delete_run))
        .route("/query/:id", get(api::query_detail))
        .route("/query/:id/continue", post(api::continue_query))
        .route("/metrics", get(crate::metrics::get_metrics))
        .route("/healthz", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing(cfg.default_log_level());
    crate::metrics::init_metrics()?;
    cfg.print_config();

    let addr = cfg.api_addr()?;
    let app = build_router(build_app_state(&cfg)?, cfg.request_timeout());

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageContent;
    use crate::test_support::{test_app, ScriptedClient, StubConnection};
    use serde_json::{json, Value};

    async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state, Duration::from_secs(30));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn http() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn full_run_over_http() {
        crate::metrics::init_metrics().unwrap();
        let client = ScriptedClient::new()
            .reply(vec![MessageContent::ToolUse {
                id: "t1".into(),
                name: "submit_selection".into(),
                input: json!({
                    "group_name": "Latency",
                    "group_description": "Slowest statements",
                    "queries": [{"digest": "d1", "query_sample": "SELECT * FROM orders WHERE id = ?", "schema": "shop", "reason": "slow"}]
                }),
            }])
            .reply_text("Found one slow lookup.")
            .reply_text("Add an index on orders.customer_id");
        let t = test_app(client, StubConnection::new());
        let base = serve(t.app.clone()).await;
        let http = http();

        let created: Value = http
            .post(format!("{}/new-run", base))
            .json(&json!({"input": "orders only", "use_query_sample": true}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let run_id = t.app.state.runs.get_runs().unwrap()[0].id;
        assert_eq!(created["url"], format!("/run/{}#first", run_id));
        assert!(t.app.state.runs.get_run(run_id).unwrap().unwrap().use_real_query);

        let query_id = t.app.state.queries.get_queries_by_run_id(run_id).unwrap()[0].id;
        let analyzed: Value = http
            .post(format!("{}/run/{}/analyze", base, run_id))
            .json(&json!({"query_ids": [query_id]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(analyzed["url"], format!("/query/{}", query_id));

        let page = http
            .get(format!("{}/query/{}", base, query_id))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(page.contains("Add an index on orders.customer_id"));

        let counts: Value = http
            .post(format!("{}/run/{}/fetch-queries", base, run_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(counts, json!({"totalQueriesCount": 1, "missingQueriesCount": 1}));

        let deleted = http
            .post(format!("{}/run/{}/delete", base, run_id))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), reqwest::StatusCode::SEE_OTHER);
        assert_eq!(deleted.headers()["location"], "/");
        assert!(t.app.state.runs.get_runs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn errors_are_json_and_health_is_plain() {
        let t = test_app(ScriptedClient::new(), StubConnection::new());
        let base = serve(t.app.clone()).await;
        let http = http();

        let missing = http
            .post(format!("{}/run/42/fetch-queries", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(missing.json::<Value>().await.unwrap(), json!({"error": "Run not found"}));

        let health = http.get(format!("{}/healthz", base)).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");

        let metrics = http.get(format!("{}/metrics", base)).send().await.unwrap();
        assert_eq!(metrics.status(), reqwest::StatusCode::OK);
    }
}
