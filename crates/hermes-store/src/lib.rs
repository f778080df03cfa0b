//! Report store and chat directory abstractions with in-memory backends.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use hermes_types::{
    Chat, ChatContext, ChatId, ChatPlatform, ContextId, Recipient, Report, ReportId,
};
pub use sqlite::SqliteStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store and directory implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report '{0}' not found")]
    ReportNotFound(ReportId),
    #[error("report '{0}' is already finished")]
    ReportAlreadyFinished(ReportId),
    #[error("chat '{0}' not found")]
    ChatNotFound(ChatId),
    #[error("chat context '{0}' not found")]
    ContextNotFound(ContextId),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Persistence contract for report rows.
///
/// Implementations must be safe for concurrent use by sessions of different
/// contexts. `finish_report` sets `finished_at` at most once; `update_activity`
/// never moves `last_updated_at` backwards.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create_report(
        &self,
        context_id: ContextId,
        started_at: DateTime<Utc>,
    ) -> StoreResult<ReportId>;
    async fn update_activity(&self, report_id: ReportId, at: DateTime<Utc>) -> StoreResult<()>;
    async fn finish_report(&self, report_id: ReportId, at: DateTime<Utc>) -> StoreResult<()>;
    async fn list_not_finished(&self, context_id: ContextId) -> StoreResult<Vec<Report>>;
    async fn get_report(&self, report_id: ReportId) -> StoreResult<Option<Report>>;
}

/// Read-side lookups for contexts and the chats subscribed to them.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    async fn list_chats(&self, context_id: ContextId) -> StoreResult<Vec<Chat>>;
    async fn resolve_recipient(&self, chat_id: ChatId) -> StoreResult<Recipient>;
    async fn find_chat(&self, platform: ChatPlatform, address: &str) -> StoreResult<Option<Chat>>;
    async fn context_name(&self, context_id: ContextId) -> StoreResult<String>;
}

/// In-memory report store for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    inner: RwLock<ReportStoreInner>,
}

#[derive(Debug, Default)]
struct ReportStoreInner {
    next_id: ReportId,
    reports: BTreeMap<ReportId, Report>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pre-existing row, e.g. one left open by a previous process.
    pub async fn insert_report(&self, mut report: Report) -> ReportId {
        let mut inner = self.inner.write().await;
        let id = match report.id {
            Some(id) => id,
            None => {
                inner.next_id += 1;
                inner.next_id
            }
        };
        inner.next_id = inner.next_id.max(id);
        report.id = Some(id);
        inner.reports.insert(id, report);
        id
    }

    /// Returns every stored report ordered by id.
    pub async fn all_reports(&self) -> Vec<Report> {
        self.inner.read().await.reports.values().cloned().collect()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn create_report(
        &self,
        context_id: ContextId,
        started_at: DateTime<Utc>,
    ) -> StoreResult<ReportId> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        let mut report = Report::fresh(context_id, started_at);
        report.id = Some(id);
        inner.reports.insert(id, report);
        Ok(id)
    }

    async fn update_activity(&self, report_id: ReportId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let report = inner
            .reports
            .get_mut(&report_id)
            .ok_or(StoreError::ReportNotFound(report_id))?;
        report.touch(at);
        Ok(())
    }

    async fn finish_report(&self, report_id: ReportId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let report = inner
            .reports
            .get_mut(&report_id)
            .ok_or(StoreError::ReportNotFound(report_id))?;
        if report.is_finished() {
            return Err(StoreError::ReportAlreadyFinished(report_id));
        }
        report.finished_at = Some(at);
        Ok(())
    }

    async fn list_not_finished(&self, context_id: ContextId) -> StoreResult<Vec<Report>> {
        let inner = self.inner.read().await;
        let mut reports: Vec<Report> = inner
            .reports
            .values()
            .filter(|report| report.context_id == context_id && !report.is_finished())
            .cloned()
            .collect();
        reports.sort_by_key(|report| (report.started_at, report.id));
        Ok(reports)
    }

    async fn get_report(&self, report_id: ReportId) -> StoreResult<Option<Report>> {
        Ok(self.inner.read().await.reports.get(&report_id).cloned())
    }
}

/// In-memory chat directory for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryChatDirectory {
    inner: RwLock<DirectoryInner>,
}

#[derive(Debug, Default)]
struct DirectoryInner {
    contexts: HashMap<ContextId, ChatContext>,
    chats: BTreeMap<ChatId, Chat>,
}

impl InMemoryChatDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, id: ContextId, name: impl Into<String>) -> Self {
        let name = name.into();
        self.inner
            .get_mut()
            .contexts
            .insert(id, ChatContext { id, name });
        self
    }

    pub fn with_chat(mut self, chat: Chat) -> Self {
        self.inner.get_mut().chats.insert(chat.id, chat);
        self
    }
}

#[async_trait]
impl ChatDirectory for InMemoryChatDirectory {
    async fn list_chats(&self, context_id: ContextId) -> StoreResult<Vec<Chat>> {
        let inner = self.inner.read().await;
        Ok(inner
            .chats
            .values()
            .filter(|chat| chat.context_id == context_id)
            .cloned()
            .collect())
    }

    async fn resolve_recipient(&self, chat_id: ChatId) -> StoreResult<Recipient> {
        let inner = self.inner.read().await;
        inner
            .chats
            .get(&chat_id)
            .map(Recipient::from)
            .ok_or(StoreError::ChatNotFound(chat_id))
    }

    async fn find_chat(&self, platform: ChatPlatform, address: &str) -> StoreResult<Option<Chat>> {
        let inner = self.inner.read().await;
        Ok(inner
            .chats
            .values()
            .find(|chat| chat.platform == platform && chat.address == address)
            .cloned())
    }

    async fn context_name(&self, context_id: ContextId) -> StoreResult<String> {
        let inner = self.inner.read().await;
        inner
            .contexts
            .get(&context_id)
            .map(|context| context.name.clone())
            .ok_or(StoreError::ContextNotFound(context_id))
    }
}
