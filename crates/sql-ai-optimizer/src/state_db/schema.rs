//! Row types of the state database.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::candidates::CandidateQuery;
use crate::llm::Conversation;

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub input: Option<String>,
    pub hostname: String,
    pub output: String,
    pub use_real_query: bool,
    pub use_database_access: bool,
    pub conversation_json: Option<String>,
    pub conversation_markdown: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRecord {
    pub id: i64,
    pub run_id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryRecord {
    pub id: i64,
    pub run_id: i64,
    pub group_id: i64,
    pub digest: String,
    pub schema: String,
    pub normalized_query: String,
    pub real_query: Option<String>,
    pub impact_description: String,
    pub explain_json: Option<String>,
    pub conversation_json: Option<String>,
    pub conversation_markdown: Option<String>,
}

impl QueryRecord {
    pub fn candidate(&self) -> CandidateQuery {
        CandidateQuery {
            schema: self.schema.clone(),
            digest: self.digest.clone(),
            normalized_query: self.normalized_query.clone(),
            impact_description: self.impact_description.clone(),
        }
    }

    /// Stored analysis dialogue, if the query has been analyzed.
    pub fn conversation(&self) -> anyhow::Result<Option<Conversation>> {
        match self.conversation_json.as_deref() {
            Some(json) => Ok(Some(Conversation::from_json(json)?)),
            None => Ok(None),
        }
    }

    pub fn is_analyzed(&self) -> bool {
        self.conversation_json.is_some()
    }
}

/// Values for a new run row.
pub struct NewRun<'a> {
    pub input: Option<&'a str>,
    pub hostname: &'a str,
    pub output: &'a str,
    pub use_real_query: bool,
    pub use_database_access: bool,
    pub conversation: &'a Conversation,
    pub conversation_markdown: &'a str,
}

/// Values for a new candidate query row.
pub struct NewQuery<'a> {
    pub run_id: i64,
    pub group_id: i64,
    pub candidate: &'a CandidateQuery,
    pub real_query: Option<&'a str>,
}
