//! Persistence steps shared by the HTTP handlers: storing a selector result
//! as a run and backfilling captured SQL for stored candidates.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::analyzed_db::AnalyzedDatabase;
use crate::candidates::{is_usable_schema, CandidateResult};
use crate::state_db::{NewQuery, NewRun, StateDatabase};

/// Options chosen by the user when starting a run.
#[derive(Debug, Clone, Default)]
pub struct NewRunInput {
    pub input: Option<String>,
    pub use_real_query: bool,
    pub use_database_access: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSummary {
    pub total_queries_count: usize,
    pub missing_queries_count: usize,
}

/// Store a selector result as a new run with its groups and queries.
///
/// Candidates with an unusable schema are skipped. Captured SQL is looked up
/// for every stored candidate before the write transaction starts; a failed
/// lookup leaves the sample empty for a later backfill.
pub fn create_run(
    state: &StateDatabase,
    analyzed_db: &AnalyzedDatabase,
    options: &NewRunInput,
    result: &CandidateResult,
) -> anyhow::Result<i64> {
    let captured: Vec<Vec<Option<String>>> = result
        .groups
        .iter()
        .map(|group| {
            group
                .queries
                .iter()
                .map(|query| {
                    if !is_usable_schema(&query.schema) {
                        return None;
                    }
                    match analyzed_db.query_text(&query.digest, &query.schema) {
                        Ok(sql) => sql,
                        Err(e) => {
                            warn!("Captured SQL lookup failed for {}: {}", query.digest, e);
                            None
                        }
                    }
                })
                .collect()
        })
        .collect();

    let hostname = analyzed_db.hostname_with_port();
    let run_id = state.with_transaction(|tx| {
        let run_id = state.runs.create_run_with_conn(
            tx.connection(),
            NewRun {
                input: options.input.as_deref(),
                hostname: &hostname,
                output: &result.description,
                use_real_query: options.use_real_query,
                use_database_access: options.use_database_access,
                conversation: &result.conversation,
                conversation_markdown: &result.conversation_markdown,
            },
        )?;

        for (group, samples) in result.groups.iter().zip(&captured) {
            let group_id = state
                .runs
                .create_group_with_conn(tx.connection(), run_id, &group.name, &group.description)?;

            for (candidate, sample) in group.queries.iter().zip(samples) {
                if !is_usable_schema(&candidate.schema) {
                    continue;
                }
                state.queries.create_query_with_conn(
                    tx.connection(),
                    NewQuery {
                        run_id,
                        group_id,
                        candidate,
                        real_query: sample.as_deref(),
                    },
                )?;
            }
        }
        Ok(run_id)
    })?;

    info!("Created run {} with {} groups", run_id, result.groups.len());
    Ok(run_id)
}

/// Look up captured SQL for every query of a run that has none yet, in one
/// batch by digest, storing samples whose schema matches. Returns `None`
/// when the run does not exist.
pub fn fetch_missing_queries(
    state: &StateDatabase,
    analyzed_db: &AnalyzedDatabase,
    run_id: i64,
) -> anyhow::Result<Option<FetchSummary>> {
    if state.runs.get_run(run_id)?.is_none() {
        return Ok(None);
    }

    let total_queries_count = state.queries.get_queries_count(run_id)?;
    let missing = state.queries.get_queries_without_real_query(run_id)?;

    let mut by_digest: HashMap<&str, Vec<(i64, &str)>> = HashMap::new();
    for query in &missing {
        by_digest
            .entry(query.digest.as_str())
            .or_default()
            .push((query.id, query.schema.as_str()));
    }

    let mut filled = 0;
    if !by_digest.is_empty() {
        let digests: Vec<&str> = by_digest.keys().copied().collect();
        for captured in analyzed_db.query_texts(&digests)? {
            let Some(waiting) = by_digest.get_mut(captured.digest.as_str()) else {
                continue;
            };
            let schema = captured.current_schema.as_deref();
            let mut remaining = Vec::with_capacity(waiting.len());
            for (query_id, query_schema) in waiting.drain(..) {
                if Some(query_schema) == schema {
                    state.queries.set_real_query(query_id, &captured.sql_text)?;
                    filled += 1;
                } else {
                    remaining.push((query_id, query_schema));
                }
            }
            *waiting = remaining;
        }
    }

    info!("Backfilled {} of {} missing queries for run {}", filled, missing.len(), run_id);
    Ok(Some(FetchSummary {
        total_queries_count,
        missing_queries_count: missing.len() - filled,
    }))
}
