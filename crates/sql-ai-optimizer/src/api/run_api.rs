//! Run endpoints: list, detail, creation, captured SQL backfill and deletion.

use axum::{
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::{blocking, download, ApiError, AppState, ExportParams, UrlResponse};
use crate::export;
use crate::views::{self, RenderMode};
use crate::workflow::{self, FetchSummary, NewRunInput};

#[derive(Debug, Deserialize)]
pub struct NewRunRequest {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default, alias = "use_query_sample")]
    pub use_real_query: bool,
    #[serde(default)]
    pub use_database_access: bool,
}

impl From<NewRunRequest> for NewRunInput {
    fn from(request: NewRunRequest) -> Self {
        Self {
            input: request
                .input
                .map(|input| input.trim().to_string())
                .filter(|input| !input.is_empty()),
            use_real_query: request.use_real_query,
            use_database_access: request.use_database_access,
        }
    }
}

pub async fn index(State(app): State<AppState>) -> Result<Html<String>, ApiError> {
    let state = app.state.clone();
    let runs = blocking(move || state.runs.get_runs()).await?;
    Ok(Html(views::runs_page(&runs)))
}

pub async fn run_detail(
    State(app): State<AppState>,
    Path(run_id): Path<i64>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let state = app.state.clone();

    if params.wants_export() {
        let zip = params.wants_zip();
        let file = blocking(move || {
            if zip {
                export::run_zip(&state, run_id)
            } else {
                export::run_html(&state, run_id)
            }
        })
        .await?;
        return Ok(match file {
            Some(file) => download(file),
            None => Redirect::to("/").into_response(),
        });
    }

    let page = blocking(move || {
        let Some(run) = state.runs.get_run(run_id)? else {
            return Ok(None);
        };
        let groups = state.runs.get_groups_by_run_id(run_id)?;
        let queries = state.queries.get_queries_by_run_id(run_id)?;
        Ok(Some(views::run_page(&run, &groups, &queries, RenderMode::Live)))
    })
    .await?;

    Ok(match page {
        Some(page) => Html(page).into_response(),
        None => Redirect::to("/").into_response(),
    })
}

/// Select candidates with the model and store them as a new run.
pub async fn new_run(
    State(app): State<AppState>,
    Json(request): Json<NewRunRequest>,
) -> Result<Json<UrlResponse>, ApiError> {
    let input = NewRunInput::from(request);
    info!(
        "Starting new run (captured SQL: {}, database access: {})",
        input.use_real_query, input.use_database_access
    );

    let result = app.selector.select_candidates(input.input.as_deref()).await?;

    let state = app.state.clone();
    let analyzed_db = app.analyzed_db.clone();
    let run_id = blocking(move || workflow::create_run(&state, &analyzed_db, &input, &result)).await?;

    Ok(Json(UrlResponse {
        url: format!("/run/{}#first", run_id),
    }))
}

pub async fn fetch_queries(
    State(app): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<FetchSummary>, ApiError> {
    let state = app.state.clone();
    let analyzed_db = app.analyzed_db.clone();
    let summary = blocking(move || workflow::fetch_missing_queries(&state, &analyzed_db, run_id)).await?;
    summary
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Run not found".to_string()))
}

pub async fn delete_run(State(app): State<AppState>, Path(run_id): Path<i64>) -> Result<Redirect, ApiError> {
    let state = app.state.clone();
    blocking(move || state.runs.delete_run(run_id)).await?;
    Ok(Redirect::to("/"))
}
