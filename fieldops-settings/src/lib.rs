#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Mutable project-wide settings: money thresholds that gate UI confirmations
//! and the chat IDs request/event/backup/finance notifications route to.
//! Unlike `RuntimeConfig` (constructed once from the environment at process
//! start), these settings are read and written at runtime and persisted.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// `project_settings.thresholds` JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub large_expense_minor: i64,
    pub transfer_pending_days: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            large_expense_minor: 10_000_00,
            transfer_pending_days: 3,
        }
    }
}

/// The chat-routing half of `project_settings`. Each field is an opaque
/// external chat identifier; `None` means that notification class has no
/// destination configured yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRouting {
    pub requests_chat_id: Option<String>,
    pub events_chat_id: Option<String>,
    pub backup_chat_id: Option<String>,
    pub finance_export_chat_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub thresholds: Thresholds,
    pub chat_routing: ChatRouting,
    pub updated_at: DateTime<Utc>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            chat_routing: ChatRouting::default(),
            updated_at: Utc::now(),
        }
    }
}

fn validate_thresholds(thresholds: &Thresholds) -> SettingsResult<()> {
    if thresholds.large_expense_minor < 0 {
        return Err(SettingsError::Validation(
            "large_expense_minor must not be negative".into(),
        ));
    }
    if thresholds.transfer_pending_days == 0 {
        return Err(SettingsError::Validation(
            "transfer_pending_days must be at least 1".into(),
        ));
    }
    Ok(())
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self) -> SettingsResult<ProjectSettings>;
    async fn set_thresholds(&self, thresholds: Thresholds) -> SettingsResult<ProjectSettings>;
    async fn set_chat_routing(&self, chat_routing: ChatRouting) -> SettingsResult<ProjectSettings>;
}

pub struct InMemorySettingsStore {
    state: RwLock<ProjectSettings>,
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(ProjectSettings::default()),
        }
    }
}

impl InMemorySettingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self) -> SettingsResult<ProjectSettings> {
        Ok(self.state.read().await.clone())
    }

    async fn set_thresholds(&self, thresholds: Thresholds) -> SettingsResult<ProjectSettings> {
        validate_thresholds(&thresholds)?;
        let mut guard = self.state.write().await;
        guard.thresholds = thresholds;
        guard.updated_at = Utc::now();
        Ok(guard.clone())
    }

    async fn set_chat_routing(&self, chat_routing: ChatRouting) -> SettingsResult<ProjectSettings> {
        let mut guard = self.state.write().await;
        guard.chat_routing = chat_routing;
        guard.updated_at = Utc::now();
        Ok(guard.clone())
    }
}

#[cfg(feature = "postgres-store")]
#[derive(Clone)]
pub struct PostgresSettingsStore {
    connection_string: String,
}

#[cfg(feature = "postgres-store")]
impl PostgresSettingsStore {
    /// Constructs a new Postgres-backed settings persistence stub.
    ///
    /// # Schema Draft
    /// ```sql
    /// CREATE TABLE project_settings (
    ///     id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
    ///     thresholds JSONB NOT NULL,
    ///     requests_chat_id TEXT,
    ///     events_chat_id TEXT,
    ///     backup_chat_id TEXT,
    ///     finance_export_chat_id TEXT,
    ///     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    /// );
    /// ```
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }
}

#[cfg(feature = "postgres-store")]
#[async_trait]
impl SettingsStore for PostgresSettingsStore {
    async fn get(&self) -> SettingsResult<ProjectSettings> {
        let _ = &self.connection_string;
        Err(SettingsError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn set_thresholds(&self, thresholds: Thresholds) -> SettingsResult<ProjectSettings> {
        let _ = (&self.connection_string, thresholds);
        Err(SettingsError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn set_chat_routing(&self, chat_routing: ChatRouting) -> SettingsResult<ProjectSettings> {
        let _ = (&self.connection_string, chat_routing);
        Err(SettingsError::Storage("postgres store persistence not yet implemented".into()))
    }
}
