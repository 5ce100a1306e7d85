// sql-ai-optimizer/crates/sql-ai-optimizer/src/lib.rs

pub mod analyzed_db;
pub mod analyzer;
pub mod api;
pub mod cache;
pub mod candidates;
pub mod config;
pub mod executor;
pub mod export;
pub mod formatter;
pub mod llm;
pub mod metrics;
pub mod selector;
pub mod server;
pub mod state_db;
pub mod telemetry;
pub mod tools;
pub mod views;
pub mod workflow;

#[cfg(test)]
mod test_support;

// Public API exports
pub use analyzed_db::{AnalyzedDatabase, MySqlConnection, SqlConnection};
pub use analyzer::QueryAnalyzer;
pub use candidates::{CandidateQuery, CandidateQueryGroup, CandidateResult};
pub use config::Config;
pub use executor::QueryExecutor;
pub use selector::QuerySelector;
pub use server::{build_router, run_server};
pub use state_db::StateDatabase;
