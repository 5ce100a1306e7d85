//! Runs ad-hoc SQL on the analyzed server and renders the outcome as text
//! for an LLM prompt.

use std::sync::Arc;

use tracing::{debug, info};

use crate::analyzed_db::SqlConnection;
use crate::cache::ResultCache;
use crate::formatter::format_markdown_table;

pub struct QueryExecutor {
    connection: Arc<dyn SqlConnection>,
    cache: ResultCache,
}

impl QueryExecutor {
    pub fn new(connection: Arc<dyn SqlConnection>, cache: ResultCache) -> Self {
        Self { connection, cache }
    }

    /// Execute `sql` in `schema` and return a markdown table, a
    /// `"No results found."` marker, or `"Error: ..."`.
    ///
    /// Errors never leave this function; they become part of the returned
    /// text and are not cached.
    pub fn execute_query(&self, schema: &str, sql: &str, use_cache: bool, max_rows: Option<usize>) -> String {
        if !use_cache {
            return self.run(schema, sql, max_rows).unwrap_or_else(|e| e);
        }

        let key = ResultCache::key("query", &[schema, sql]);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Query result served from cache ({})", key);
            return cached;
        }

        match self.run(schema, sql, max_rows) {
            Ok(result) => {
                self.cache.insert(&key, result.clone());
                result
            }
            Err(error) => error,
        }
    }

    fn run(&self, schema: &str, sql: &str, max_rows: Option<usize>) -> Result<String, String> {
        info!("Executing query in schema {}", schema);
        let rows = self
            .connection
            .query(Some(schema), sql, &[])
            .map_err(|e| format!("Error: {}", e))?;

        match max_rows {
            Some(cap) if rows.len() > cap => Ok(format!(
                "Note: query returned {} rows, showing only the first {}.\n\n{}",
                rows.len(),
                cap,
                format_markdown_table(&rows[..cap])
            )),
            _ => Ok(format_markdown_table(&rows)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubConnection;
    use std::time::Duration;

    fn numbered_rows(n: usize) -> Vec<crate::analyzed_db::Row> {
        (0..n)
            .map(|i| StubConnection::row(&[("id", Some(i.to_string().as_str()))]))
            .collect()
    }

    #[test]
    fn cached_execution_hits_the_server_once() {
        let stub = Arc::new(StubConnection::new().on("SELECT", numbered_rows(2)));
        let executor = QueryExecutor::new(stub.clone(), ResultCache::in_memory(Duration::from_secs(60)));

        let first = executor.execute_query("shop", "SELECT id FROM orders", true, None);
        let second = executor.execute_query("shop", "SELECT id FROM orders", true, None);

        assert_eq!(first, second);
        assert_eq!(stub.call_count(), 1);
    }

    #[test]
    fn uncached_execution_always_hits_the_server() {
        let stub = Arc::new(StubConnection::new().on("SELECT", numbered_rows(1)));
        let executor = QueryExecutor::new(stub.clone(), ResultCache::in_memory(Duration::from_secs(60)));

        executor.execute_query("shop", "SELECT 1", false, None);
        executor.execute_query("shop", "SELECT 1", false, None);

        assert_eq!(stub.call_count(), 2);
    }

    #[test]
    fn same_query_in_different_schema_is_not_shared() {
        let stub = Arc::new(StubConnection::new().on("SELECT", numbered_rows(1)));
        let executor = QueryExecutor::new(stub.clone(), ResultCache::in_memory(Duration::from_secs(60)));

        executor.execute_query("shop", "SELECT 1", true, None);
        executor.execute_query("crm", "SELECT 1", true, None);

        assert_eq!(stub.call_count(), 2);
    }

    #[test]
    fn row_cap_truncates_and_mentions_both_counts() {
        let stub = Arc::new(StubConnection::new().on("SELECT", numbered_rows(300)));
        let executor = QueryExecutor::new(stub, ResultCache::in_memory(Duration::from_secs(60)));

        let result = executor.execute_query("performance_schema", "SELECT id FROM t", true, Some(250));

        assert!(result.contains("300"));
        assert!(result.contains("250"));
        let data_rows = result
            .lines()
            .filter(|line| line.starts_with("| ") && !line.starts_with("| id") && !line.starts_with("| ---"))
            .count();
        assert_eq!(data_rows, 250);
    }

    #[test]
    fn errors_are_returned_inline_and_not_cached() {
        let stub = Arc::new(StubConnection::new().fail_on("SELECT", "Table 'shop.nope' doesn't exist"));
        let executor = QueryExecutor::new(stub.clone(), ResultCache::in_memory(Duration::from_secs(60)));

        let result = executor.execute_query("shop", "SELECT * FROM nope", true, None);
        assert_eq!(result, "Error: Table 'shop.nope' doesn't exist");

        executor.execute_query("shop", "SELECT * FROM nope", true, None);
        assert_eq!(stub.call_count(), 2);
    }
}
