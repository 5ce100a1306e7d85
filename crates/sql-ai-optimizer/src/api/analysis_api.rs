//! Query analysis endpoints.

use axum::{
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{blocking, download, ApiError, AppState, ExportParams, UrlResponse};
use crate::analyzer::AnalysisJob;
use crate::export;
use crate::views::{self, RenderMode};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub query_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ContinueRequest {
    #[serde(default)]
    pub input: String,
}

/// Analyze the selected queries of a run with bounded concurrency and point
/// the client at the first one. Fails only when every analysis failed.
pub async fn analyze_queries(
    State(app): State<AppState>,
    Path(run_id): Path<i64>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<UrlResponse>, ApiError> {
    let Some(&first_id) = request.query_ids.first() else {
        return Err(ApiError::BadRequest("No queries selected".to_string()));
    };

    let state = app.state.clone();
    let query_ids = request.query_ids.clone();
    let jobs = blocking(move || {
        let Some(run) = state.runs.get_run(run_id)? else {
            return Ok(Err(ApiError::NotFound("Run not found".to_string())));
        };
        let mut jobs = Vec::with_capacity(query_ids.len());
        for query_id in query_ids {
            match state.queries.get_query(query_id)? {
                Some(query) if query.run_id == run_id => jobs.push(AnalysisJob::new(&query, &run)),
                _ => return Ok(Err(ApiError::NotFound(format!("Query {} not found", query_id)))),
            }
        }
        Ok(Ok(jobs))
    })
    .await??;

    info!("Analyzing {} queries of run {}", jobs.len(), run_id);
    let outcomes = app.analyzer.analyze_many(jobs, app.analysis_concurrency).await;

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed == outcomes.len() {
        if let Some(outcome) = outcomes.into_iter().next() {
            if let Err(e) = outcome.result {
                return Err(e.into());
            }
        }
    } else if failed > 0 {
        warn!("{} of {} analyses failed for run {}", failed, outcomes.len(), run_id);
    }

    Ok(Json(UrlResponse {
        url: format!("/query/{}", first_id),
    }))
}

/// Append a user message to a stored analysis dialogue.
pub async fn continue_query(
    State(app): State<AppState>,
    Path(query_id): Path<i64>,
    Json(request): Json<ContinueRequest>,
) -> Result<Json<UrlResponse>, ApiError> {
    let text = request.input.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::BadRequest("Input must not be empty".to_string()));
    }

    let state = app.state.clone();
    let (conversation, use_database_access) = blocking(move || {
        let Some(query) = state.queries.get_query(query_id)? else {
            return Ok(Err(ApiError::NotFound("Query not found".to_string())));
        };
        let Some(conversation) = query.conversation()? else {
            return Ok(Err(ApiError::BadRequest("Query has not been analyzed yet".to_string())));
        };
        let use_database_access = state
            .runs
            .get_run(query.run_id)?
            .map(|run| run.use_database_access)
            .unwrap_or(false);
        Ok(Ok((conversation, use_database_access)))
    })
    .await??;

    info!("Continuing analysis of query {}", query_id);
    let response = app
        .analyzer
        .continue_conversation(conversation, &text, use_database_access)
        .await?;

    let state = app.state.clone();
    blocking(move || {
        let markdown = response.conversation.to_markdown();
        state.queries.update_conversation(query_id, &response.conversation, &markdown)
    })
    .await?;

    Ok(Json(UrlResponse {
        url: format!("/query/{}", query_id),
    }))
}

pub async fn query_detail(
    State(app): State<AppState>,
    Path(query_id): Path<i64>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let state = app.state.clone();

    if params.wants_export() {
        let zip = params.wants_zip();
        let file = blocking(move || {
            if zip {
                export::query_zip(&state, query_id)
            } else {
                export::query_html(&state, query_id)
            }
        })
        .await?;
        return Ok(match file {
            Some(file) => download(file),
            None => Redirect::to("/").into_response(),
        });
    }

    let page = blocking(move || {
        let Some(query) = state.queries.get_query(query_id)? else {
            return Ok(None);
        };
        let conversation = query.conversation()?;
        Ok(Some(views::query_page(&query, conversation.as_ref(), RenderMode::Live)))
    })
    .await?;

    Ok(match page {
        Some(page) => Html(page).into_response(),
        None => Redirect::to("/").into_response(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::CandidateQuery;
    use crate::llm::{Conversation, LlmError};
    use crate::state_db::{NewQuery, NewRun};
    use crate::test_support::{test_app, ScriptedClient, StubConnection, TestApp};
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::StatusCode;

    fn seed(t: &TestApp, digests: &[&str], use_database_access: bool) -> (i64, Vec<i64>) {
        let state = &t.app.state;
        let conversation = Conversation::from_user("select");
        let run_id = state
            .runs
            .create_run(NewRun {
                input: None,
                hostname: "stub:3306",
                output: "summary",
                use_real_query: false,
                use_database_access,
                conversation: &conversation,
                conversation_markdown: "",
            })
            .unwrap();
        let group_id = state.runs.create_group(run_id, "g", "d").unwrap();
        let ids = digests
            .iter()
            .map(|digest| {
                let candidate = CandidateQuery {
                    schema: "shop".into(),
                    digest: digest.to_string(),
                    normalized_query: "SELECT * FROM orders WHERE id = ?".into(),
                    impact_description: "hot".into(),
                };
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
            .collect();
        (run_id, ids)
    }

    #[tokio::test]
    async fn analyze_stores_conversations_and_points_at_first_query() {
        let t = test_app(
            ScriptedClient::new().reply_text("Add an index on orders.id"),
            StubConnection::new(),
        );
        let (run_id, ids) = seed(&t, &["d1", "d2", "d3"], false);

        let Json(response) = analyze_queries(
            State(t.app.clone()),
            Path(run_id),
            Json(AnalyzeRequest {
                query_ids: vec![ids[2], ids[0]],
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.url, format!("/query/{}", ids[2]));
        assert_eq!(t.client.call_count(), 2);
        assert!(t.app.state.queries.get_query(ids[0]).unwrap().unwrap().is_analyzed());
        assert!(!t.app.state.queries.get_query(ids[1]).unwrap().unwrap().is_analyzed());
    }

    #[tokio::test]
    async fn analyze_rejects_empty_selection_and_foreign_queries() {
        let t = test_app(ScriptedClient::new(), StubConnection::new());
        let (run_id, _) = seed(&t, &["d1"], false);
        let (_, other_ids) = seed(&t, &["d2"], false);

        let err = analyze_queries(State(t.app.clone()), Path(run_id), Json(AnalyzeRequest { query_ids: vec![] }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = analyze_queries(
            State(t.app.clone()),
            Path(run_id),
            Json(AnalyzeRequest {
                query_ids: vec![other_ids[0]],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = analyze_queries(
            State(t.app.clone()),
            Path(run_id + 100),
            Json(AnalyzeRequest {
                query_ids: vec![other_ids[0]],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Run not found");
        assert_eq!(t.client.call_count(), 0);
    }

    struct FailingClient;

    #[async_trait]
    impl crate::llm::ChatClient for FailingClient {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn send(&self, _request: &crate::llm::LlmRequest) -> Result<crate::llm::LlmReply, LlmError> {
            Err(LlmError::provider("failing", "overloaded", Some(529)))
        }
    }

    #[tokio::test]
    async fn analyze_reports_provider_failure_as_bad_gateway() {
        let mut t = test_app(ScriptedClient::new(), StubConnection::new());
        t.app.analyzer = crate::analyzer::QueryAnalyzer::new(
            crate::llm::LlmChain::default(),
            std::sync::Arc::new(FailingClient),
            "analysis-model",
            t.app.analyzed_db.clone(),
            t.app.state.clone(),
            std::sync::Arc::new(crate::executor::QueryExecutor::new(
                t.connection.clone(),
                crate::cache::ResultCache::in_memory(std::time::Duration::from_secs(60)),
            )),
            false,
        );
        let (run_id, ids) = seed(&t, &["d1"], false);

        let err = analyze_queries(State(t.app.clone()), Path(run_id), Json(AnalyzeRequest { query_ids: ids }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn continue_appends_to_stored_dialogue() {
        let t = test_app(
            ScriptedClient::new()
                .reply_text("Add an index")
                .reply_text("A covering index would avoid the lookup"),
            StubConnection::new(),
        );
        let (run_id, ids) = seed(&t, &["d1"], true);
        analyze_queries(State(t.app.clone()), Path(run_id), Json(AnalyzeRequest { query_ids: ids.clone() }))
            .await
            .unwrap();

        let Json(response) = continue_query(
            State(t.app.clone()),
            Path(ids[0]),
            Json(ContinueRequest {
                input: "What about covering indexes?".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.url, format!("/query/{}", ids[0]));

        let stored = t.app.state.queries.get_query(ids[0]).unwrap().unwrap();
        let conversation = stored.conversation().unwrap().unwrap();
        assert_eq!(conversation.len(), 4);
        assert_eq!(conversation.last_text(), "A covering index would avoid the lookup");
        assert!(!t.client.requests()[1].tools.is_empty());
    }

    #[tokio::test]
    async fn continue_requires_an_analyzed_query() {
        let t = test_app(ScriptedClient::new(), StubConnection::new());
        let (_, ids) = seed(&t, &["d1"], false);

        let err = continue_query(
            State(t.app.clone()),
            Path(ids[0]),
            Json(ContinueRequest { input: "more".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = continue_query(State(t.app.clone()), Path(ids[0]), Json(ContinueRequest { input: " ".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = continue_query(State(t.app.clone()), Path(999), Json(ContinueRequest { input: "x".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn query_detail_renders_or_redirects() {
        let t = test_app(ScriptedClient::new(), StubConnection::new());
        let (_, ids) = seed(&t, &["d1"], false);

        let page = query_detail(State(t.app.clone()), Path(ids[0]), Query(ExportParams::default()))
            .await
            .unwrap();
        let bytes = to_bytes(page.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8(bytes.to_vec()).unwrap().contains("has not been analyzed"));

        let missing = query_detail(State(t.app.clone()), Path(999), Query(ExportParams::default()))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::SEE_OTHER);
    }
}
