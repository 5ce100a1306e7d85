//! Access to the MySQL server whose workload is being optimized.
pub mod connection;
pub mod mysql_connection;

pub use connection::{quote_identifier, Row, SqlConnection, SqlError};
pub use mysql_connection::MySqlConnection;

use std::sync::Arc;
use tracing::{debug, warn};

/// Statement history tables searched for captured SQL text, most recent first.
const HISTORY_TABLES: [&str; 2] = ["events_statements_history", "events_statements_history_long"];

/// A captured statement matched to a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedSql {
    pub sql_text: String,
    pub digest: String,
    pub current_schema: Option<String>,
}

/// One row of `SHOW INDEX FROM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub key_name: String,
    pub non_unique: bool,
    pub seq_in_index: u32,
    pub column_name: String,
    pub index_type: String,
}

#[derive(Clone)]
pub struct AnalyzedDatabase {
    connection: Arc<dyn SqlConnection>,
}

impl AnalyzedDatabase {
    pub fn new(connection: Arc<dyn SqlConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<dyn SqlConnection> {
        &self.connection
    }

    pub fn hostname_with_port(&self) -> String {
        self.connection.hostname_with_port()
    }

    /// Look up a captured SQL sample for a digest in the statement history.
    pub fn query_text(&self, digest: &str, schema: &str) -> Result<Option<String>, SqlError> {
        for table in HISTORY_TABLES {
            let sql = format!(
                "SELECT sql_text FROM performance_schema.{} WHERE digest = ? AND current_schema = ? LIMIT 1",
                quote_identifier(table)
            );
            let rows = self.connection.query(None, &sql, &[digest, schema])?;
            if let Some(text) = rows.first().and_then(|row| row.get_index(0)) {
                if !text.is_empty() {
                    debug!("Found captured SQL for digest {} in {}", digest, table);
                    return Ok(Some(text.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Batch lookup of captured SQL for many digests across both history tables.
    pub fn query_texts(&self, digests: &[&str]) -> Result<Vec<CapturedSql>, SqlError> {
        if digests.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; digests.len()].join(",");
        let mut captured = Vec::new();
        for table in HISTORY_TABLES {
            let sql = format!(
                "SELECT sql_text, digest, current_schema FROM performance_schema.{} WHERE digest IN ({})",
                quote_identifier(table),
                placeholders
            );
            for row in self.connection.query(None, &sql, digests)? {
                let (Some(sql_text), Some(digest)) = (row.get("sql_text"), row.get("digest")) else {
                    continue;
                };
                captured.push(CapturedSql {
                    sql_text: sql_text.to_string(),
                    digest: digest.to_string(),
                    current_schema: row.get("current_schema").map(str::to_string),
                });
            }
        }
        Ok(captured)
    }

    /// `EXPLAIN FORMAT=JSON` for a statement. Driver errors (truncated samples,
    /// statements that cannot be explained) mean no plan is available.
    pub fn explain_json(&self, schema: &str, sql: &str) -> Option<String> {
        match self
            .connection
            .query(Some(schema), &format!("EXPLAIN FORMAT=JSON {}", sql), &[])
        {
            Ok(rows) => rows.first().and_then(|row| row.get_index(0)).map(str::to_string),
            Err(e) => {
                warn!("EXPLAIN failed in schema {}: {}", schema, e);
                None
            }
        }
    }

    pub fn show_tables(&self, schema: &str) -> Result<Vec<String>, SqlError> {
        let rows = self.connection.query(Some(schema), "SHOW TABLES", &[])?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_index(0).map(str::to_string))
            .collect())
    }

    pub fn show_create_table(&self, schema: &str, table: &str) -> Result<Option<String>, SqlError> {
        let rows = self.connection.query(
            Some(schema),
            &format!("SHOW CREATE TABLE {}", quote_identifier(table)),
            &[],
        )?;
        Ok(rows
            .first()
            .and_then(|row| row.get("Create Table").or_else(|| row.get_index(1)))
            .map(str::to_string))
    }

    pub fn show_index(&self, schema: &str, table: &str) -> Result<Vec<IndexColumn>, SqlError> {
        let rows = self.connection.query(
            Some(schema),
            &format!("SHOW INDEX FROM {}", quote_identifier(table)),
            &[],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(IndexColumn {
                    key_name: row.get("Key_name")?.to_string(),
                    non_unique: row.get("Non_unique").map(|v| v != "0").unwrap_or(true),
                    seq_in_index: row.get("Seq_in_index")?.parse().ok()?,
                    column_name: row.get("Column_name")?.to_string(),
                    index_type: row.get("Index_type").unwrap_or("BTREE").to_string(),
                })
            })
            .collect())
    }
}
