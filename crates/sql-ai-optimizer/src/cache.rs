//! Expiring string cache for formatted query results.
//!
//! Entries live in a `moka` cache and, when a directory is configured, are
//! mirrored to one JSON file per key so they survive a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    /// Unix timestamp in seconds.
    expires_at: i64,
    value: String,
}

#[derive(Clone)]
pub struct ResultCache {
    memory: Cache<String, String>,
    dir: Option<PathBuf>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(dir: Option<PathBuf>, ttl: Duration) -> Self {
        if let Some(dir) = dir.as_deref() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Failed to create cache directory {}: {}", dir.display(), e);
            }
        }
        Self {
            memory: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
            dir,
            ttl,
        }
    }

    /// In-process only cache, used by tests and when no cache directory is set.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(None, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Content-addressed key for a value derived from `parts`.
    pub fn key(prefix: &str, parts: &[&str]) -> String {
        format!("{}_{}", prefix, blake3::hash(parts.join("_").as_bytes()).to_hex())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }

        let path = self.entry_path(key)?;
        let raw = std::fs::read_to_string(&path).ok()?;
        let entry: DiskEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", path.display(), e);
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };

        if entry.expires_at <= Utc::now().timestamp() {
            let _ = std::fs::remove_file(&path);
            return None;
        }

        debug!("Cache hit on disk for {}", key);
        self.memory.insert(key.to_string(), entry.value.clone());
        Some(entry.value)
    }

    pub fn insert(&self, key: &str, value: String) {
        if let Some(path) = self.entry_path(key) {
            let entry = DiskEntry {
                expires_at: Utc::now().timestamp() + self.ttl.as_secs() as i64,
                value: value.clone(),
            };
            if let Err(e) = write_entry(&path, &entry) {
                warn!("Failed to persist cache entry {}: {}", path.display(), e);
            }
        }
        self.memory.insert(key.to_string(), value);
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{key}.json")))
    }
}

fn write_entry(path: &Path, entry: &DiskEntry) -> anyhow::Result<()> {
    let json = serde_json::to_string(entry)?;
    std::fs::write(path, json)?;
    Ok(())
}
