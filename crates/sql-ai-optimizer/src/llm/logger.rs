use std::path::{Path, PathBuf};

use tracing::warn;

use super::conversation::Conversation;

/// Overwrites one markdown file with the exchange currently in progress, so
/// the latest prompt and answer can be inspected while a long call runs.
#[derive(Debug, Clone)]
pub struct LlmFileLogger {
    path: PathBuf,
}

impl LlmFileLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create LLM log directory {}: {}", parent.display(), e);
            }
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn request_started(&self, conversation: &Conversation) {
        self.write(conversation);
    }

    pub fn request_finished(&self, conversation: &Conversation) {
        self.write(conversation);
    }

    fn write(&self, conversation: &Conversation) {
        if let Err(e) = std::fs::write(&self.path, conversation.to_markdown()) {
            warn!("Failed to write LLM log {}: {}", self.path.display(), e);
        }
    }
}
