// sql-ai-optimizer/crates/sql-ai-optimizer/src/main.rs

use sql_ai_optimizer::{config::Config, run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    run_server(cfg).await
}
