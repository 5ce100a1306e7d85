use std::sync::Arc;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use super::schema::{GroupRecord, NewRun, RunRecord};

const RUN_COLUMNS: &str = "id, input, hostname, output, use_real_query, use_database_access, \
     llm_conversation, llm_conversation_markdown, created_at";

/// Runs and their candidate groups.
pub struct RunStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl RunStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn create_run(&self, run: NewRun<'_>) -> anyhow::Result<i64> {
        let conn = self.get_conn()?;
        self.create_run_with_conn(&conn, run)
    }

    pub fn create_run_with_conn(&self, conn: &Connection, run: NewRun<'_>) -> anyhow::Result<i64> {
        conn.execute(
            "INSERT INTO run
             (input, hostname, output, use_real_query, use_database_access,
              llm_conversation, llm_conversation_markdown, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.input,
                run.hostname,
                run.output,
                run.use_real_query,
                run.use_database_access,
                run.conversation.to_json()?,
                run.conversation_markdown,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_group(&self, run_id: i64, name: &str, description: &str) -> anyhow::Result<i64> {
        let conn = self.get_conn()?;
        self.create_group_with_conn(&conn, run_id, name, description)
    }

    pub fn create_group_with_conn(
        &self,
        conn: &Connection,
        run_id: i64,
        name: &str,
        description: &str,
    ) -> anyhow::Result<i64> {
        conn.execute(
            "INSERT INTO \"group\" (run_id, name, description) VALUES (?1, ?2, ?3)",
            params![run_id, name, description],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All runs, newest first.
    pub fn get_runs(&self) -> anyhow::Result<Vec<RunRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM run ORDER BY id DESC", RUN_COLUMNS))?;
        let rows = stmt.query_map([], row_to_run)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_run(&self, run_id: i64) -> anyhow::Result<Option<RunRecord>> {
        let conn = self.get_conn()?;
        let run = conn
            .query_row(
                &format!("SELECT {} FROM run WHERE id = ?1", RUN_COLUMNS),
                [run_id],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    pub fn get_group(&self, group_id: i64) -> anyhow::Result<Option<GroupRecord>> {
        let conn = self.get_conn()?;
        let group = conn
            .query_row(
                "SELECT id, run_id, name, description FROM \"group\" WHERE id = ?1",
                [group_id],
                row_to_group,
            )
            .optional()?;
        Ok(group)
    }

    pub fn get_groups_by_run_id(&self, run_id: i64) -> anyhow::Result<Vec<GroupRecord>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT id, run_id, name, description FROM \"group\" WHERE run_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([run_id], row_to_group)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a run with its queries and groups in one transaction.
    /// Returns false when the run did not exist.
    pub fn delete_run(&self, run_id: i64) -> anyhow::Result<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let queries = tx.execute("DELETE FROM \"query\" WHERE run_id = ?1", [run_id])?;
        let groups = tx.execute("DELETE FROM \"group\" WHERE run_id = ?1", [run_id])?;
        let runs = tx.execute("DELETE FROM run WHERE id = ?1", [run_id])?;
        tx.commit()?;

        info!(
            "Deleted run {} ({} groups, {} queries)",
            run_id, groups, queries
        );
        Ok(runs > 0)
    }
}

fn row_to_run(row: &Row) -> rusqlite::Result<RunRecord> {
    let created_at: String = row.get(8)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(RunRecord {
        id: row.get(0)?,
        input: row.get(1)?,
        hostname: row.get(2)?,
        output: row.get(3)?,
        use_real_query: row.get(4)?,
        use_database_access: row.get(5)?,
        conversation_json: row.get(6)?,
        conversation_markdown: row.get(7)?,
        created_at,
    })
}

fn row_to_group(row: &Row) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}
