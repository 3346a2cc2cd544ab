//! Configuration for the synchronization core.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::sync::core::errors::{SyncError, SyncResult};

/// Top-level configuration for the synchronization core.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Storage adapter settings.
    pub storage: StorageConfig,
    /// Conversation repository settings.
    pub repository: RepositoryConfig,
    /// Live sync coordinator settings.
    pub coordinator: CoordinatorConfig,
    /// Redaction helper settings.
    pub redaction: RedactionConfig,
}

impl SyncConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> SyncResult<()> {
        // Table names are interpolated into SQL; restrict them to plain
        // identifiers.
        for table in [&self.storage.users_table, &self.storage.conversations_table] {
            if table.is_empty()
                || !table
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(SyncError::InvalidConfig(format!(
                    "table name {table:?} must match [A-Za-z0-9_]+"
                )));
            }
        }

        if self.repository.page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "repository.page_size must be > 0".to_string(),
            ));
        }

        if self.coordinator.channel_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "coordinator.channel_capacity must be > 0".to_string(),
            ));
        }

        if self.coordinator.dedupe_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "coordinator.dedupe_capacity must be > 0".to_string(),
            ));
        }

        if self.storage.change_buffer == 0 {
            return Err(SyncError::InvalidConfig(
                "storage.change_buffer must be > 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.redaction.temperature) {
            return Err(SyncError::InvalidConfig(
                "redaction.temperature must be in 0.0..=2.0".to_string(),
            ));
        }

        if let Some(base_url) = &self.redaction.base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

/// Storage adapter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Users table name.
    pub users_table: String,
    /// Conversations table name.
    pub conversations_table: String,
    /// Capacity of the change broadcast feed.
    pub change_buffer: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("convosync.sqlite"),
            users_table: "users".to_string(),
            conversations_table: "conversations".to_string(),
            change_buffer: 256,
        }
    }
}

/// Conversation repository settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Maximum number of conversations returned per user listing.
    pub page_size: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

/// Live sync coordinator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Snapshot channel buffer per subscription.
    pub channel_capacity: usize,
    /// LRU capacity for the per-subscription message dedupe cache.
    pub dedupe_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            dedupe_capacity: 1024,
        }
    }
}

/// Redaction mode selector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// Regex-only redaction, no network calls.
    Heuristic,
    /// LLM-backed redaction via Ollama.
    Llm,
}

/// Redaction helper settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Which redaction mode to use.
    pub mode: RedactionMode,
    /// Ollama completion model name.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Optional custom base URL.
    pub base_url: Option<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            mode: RedactionMode::Heuristic,
            model: "mistral:7b-instruct-q8_0".to_string(),
            temperature: 0.1,
            base_url: None,
        }
    }
}
