use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::schema::{NewQuery, QueryRecord};
use crate::llm::Conversation;

const QUERY_COLUMNS: &str = "id, run_id, group_id, digest, schema, normalized_query, real_query, \
     impact_description, explain_json, llm_conversation, llm_conversation_markdown";

/// Candidate queries and their analysis state.
pub struct QueryStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl QueryStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn create_query(&self, query: NewQuery<'_>) -> anyhow::Result<i64> {
        let conn = self.get_conn()?;
        self.create_query_with_conn(&conn, query)
    }

    pub fn create_query_with_conn(&self, conn: &Connection, query: NewQuery<'_>) -> anyhow::Result<i64> {
        conn.execute(
            "INSERT INTO \"query\"
             (run_id, group_id, digest, schema, normalized_query, real_query, impact_description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                query.run_id,
                query.group_id,
                query.candidate.digest,
                query.candidate.schema,
                query.candidate.normalized_query,
                query.real_query,
                query.candidate.impact_description,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_query(&self, query_id: i64) -> anyhow::Result<Option<QueryRecord>> {
        let conn = self.get_conn()?;
        let query = conn
            .query_row(
                &format!("SELECT {} FROM \"query\" WHERE id = ?1", QUERY_COLUMNS),
                [query_id],
                row_to_query,
            )
            .optional()?;
        Ok(query)
    }

    pub fn get_queries_by_run_id(&self, run_id: i64) -> anyhow::Result<Vec<QueryRecord>> {
        self.select_many(
            &format!("SELECT {} FROM \"query\" WHERE run_id = ?1 ORDER BY id", QUERY_COLUMNS),
            run_id,
        )
    }

    /// Queries of a run still waiting for a captured SQL sample.
    pub fn get_queries_without_real_query(&self, run_id: i64) -> anyhow::Result<Vec<QueryRecord>> {
        self.select_many(
            &format!(
                "SELECT {} FROM \"query\" WHERE run_id = ?1 AND real_query IS NULL ORDER BY id",
                QUERY_COLUMNS
            ),
            run_id,
        )
    }

    pub fn get_queries_count(&self, run_id: i64) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM \"query\" WHERE run_id = ?1", [run_id], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    pub fn set_real_query(&self, query_id: i64, sql: &str) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE \"query\" SET real_query = ?1 WHERE id = ?2",
            params![sql, query_id],
        )?;
        debug!("Stored captured SQL for query {}", query_id);
        Ok(())
    }

    pub fn set_explain_json(&self, query_id: i64, explain_json: &str) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE \"query\" SET explain_json = ?1 WHERE id = ?2",
            params![explain_json, query_id],
        )?;
        Ok(())
    }

    pub fn update_conversation(
        &self,
        query_id: i64,
        conversation: &Conversation,
        conversation_markdown: &str,
    ) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE \"query\" SET llm_conversation = ?1, llm_conversation_markdown = ?2 WHERE id = ?3",
            params![conversation.to_json()?, conversation_markdown, query_id],
        )?;
        debug!("Stored conversation of {} messages for query {}", conversation.len(), query_id);
        Ok(())
    }

    fn select_many(&self, sql: &str, run_id: i64) -> anyhow::Result<Vec<QueryRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([run_id], row_to_query)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_query(row: &Row) -> rusqlite::Result<QueryRecord> {
    Ok(QueryRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        group_id: row.get(2)?,
        digest: row.get(3)?,
        schema: row.get(4)?,
        normalized_query: row.get(5)?,
        real_query: row.get(6)?,
        impact_description: row.get(7)?,
        explain_json: row.get(8)?,
        conversation_json: row.get(9)?,
        conversation_markdown: row.get(10)?,
    })
}
