//! Value objects produced by the selector and consumed by run creation.

use serde::{Deserialize, Serialize};

use crate::llm::Conversation;
use crate::tools::{SelectedQuery, SelectionPayload};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub schema: String,
    pub digest: String,
    pub normalized_query: String,
    pub impact_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQueryGroup {
    pub name: String,
    pub description: String,
    pub queries: Vec<CandidateQuery>,
}

#[derive(Debug, Clone)]
pub struct CandidateResult {
    /// Final free-text answer of the selection model.
    pub description: String,
    pub groups: Vec<CandidateQueryGroup>,
    pub conversation: Conversation,
    pub conversation_markdown: String,
}

impl From<SelectedQuery> for CandidateQuery {
    fn from(query: SelectedQuery) -> Self {
        Self {
            schema: query.schema,
            digest: query.digest,
            normalized_query: query.query_sample,
            impact_description: query.reason,
        }
    }
}

impl From<SelectionPayload> for CandidateQueryGroup {
    fn from(payload: SelectionPayload) -> Self {
        Self {
            name: payload.group_name,
            description: payload.group_description,
            queries: payload.queries.into_iter().map(CandidateQuery::from).collect(),
        }
    }
}

/// Schemas reported by performance_schema that cannot be analyzed.
pub fn is_usable_schema(schema: &str) -> bool {
    !(schema.is_empty() || schema == "NULL" || schema == "unknown")
}
