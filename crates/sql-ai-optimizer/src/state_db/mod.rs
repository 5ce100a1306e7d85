//! State database: SQLite storage for runs, candidate groups and queries.
pub mod migration;
pub mod query_store;
pub mod run_store;
pub mod schema;

pub use migration::MigrationManager;
pub use query_store::QueryStore;
pub use run_store::RunStore;
pub use schema::*;

use std::path::Path;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{info, warn};

pub struct StateDatabase {
    pub runs: RunStore,
    pub queries: QueryStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

/// An open `BEGIN IMMEDIATE` transaction on a pooled connection. Rolled back
/// on drop unless committed.
pub struct Transaction {
    conn: PooledConnection<SqliteConnectionManager>,
    finished: bool,
}

impl Transaction {
    pub fn commit(mut self) -> anyhow::Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> anyhow::Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back abandoned transaction: {}", e);
            }
        }
    }
}

impl StateDatabase {
    /// Open (or create) the database file and bring the schema up to date.
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening state database at: {}", db_path.display());
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        let pool = Arc::new(pool);
        info!("State database initialized successfully");
        Ok(Self {
            runs: RunStore::new(Arc::clone(&pool)),
            queries: QueryStore::new(Arc::clone(&pool)),
            pool,
        })
    }

    pub fn begin_transaction(&self) -> anyhow::Result<Transaction> {
        let conn = self.pool.get()?;
        conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")?;
        Ok(Transaction { conn, finished: false })
    }

    /// Run `f` inside one transaction, committing on `Ok` and rolling back on `Err`.
    pub fn with_transaction<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut Transaction) -> anyhow::Result<T>,
    {
        let mut tx = self.begin_transaction()?;
        match f(&mut tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }
}
