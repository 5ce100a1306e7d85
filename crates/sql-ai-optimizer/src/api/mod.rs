//! HTTP handlers and their shared state.

pub mod analysis_api;
pub mod run_api;

pub use analysis_api::{analyze_queries, continue_query, query_detail};
pub use run_api::{delete_run, fetch_queries, index, new_run, run_detail};

use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::analyzed_db::AnalyzedDatabase;
use crate::analyzer::QueryAnalyzer;
use crate::export::ExportFile;
use crate::llm::LlmError;
use crate::selector::QuerySelector;
use crate::state_db::StateDatabase;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub state: Arc<StateDatabase>,
    pub analyzed_db: AnalyzedDatabase,
    pub selector: Arc<QuerySelector>,
    pub analyzer: QueryAnalyzer,
    pub analysis_concurrency: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("LLM provider failure: {0}")]
    Upstream(#[from] LlmError),
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<LlmError>() {
            Ok(llm) => Self::Upstream(llm),
            Err(other) => Self::Internal(other),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::anyhow!("Background task failed: {}", err))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `{url}` answer of the action endpoints.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlResponse {
    pub url: String,
}

/// `?export` and `?export&format=zip` on detail pages.
#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    pub export: Option<String>,
    pub format: Option<String>,
}

impl ExportParams {
    pub fn wants_export(&self) -> bool {
        self.export.is_some()
    }

    pub fn wants_zip(&self) -> bool {
        self.format.as_deref() == Some("zip")
    }
}

/// Run state database work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

pub(crate) fn download(file: ExportFile) -> Response {
    (
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.file_name),
            ),
        ],
        file.bytes,
    )
        .into_response()
}
