//! SQLite-backed `ReportStore` and `ChatDirectory` with durable persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::{
    Chat, ChatContext, ChatDirectory, ChatId, ChatPlatform, ContextId, Recipient, Report,
    ReportId, ReportStore, StoreError, StoreResult,
};

/// Persistent SQLite backend holding contexts, chats, and report rows.
#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) a store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chat_contexts (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY,
                context_id INTEGER NOT NULL,
                platform TEXT NOT NULL,
                address TEXT NOT NULL,
                listener_id INTEGER NULL,
                UNIQUE (platform, address),
                FOREIGN KEY(context_id) REFERENCES chat_contexts(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_chats_context ON chats (context_id);

            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                context_id INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                last_updated_at TEXT NOT NULL,
                finished_at TEXT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reports_open ON reports (context_id, finished_at);
            "#,
        )?;
        Ok(())
    }

    /// Inserts or renames a reporting context.
    pub fn upsert_context(&self, context: &ChatContext) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO chat_contexts (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![context.id, context.name],
        )?;
        Ok(())
    }

    /// Inserts or updates a chat subscription.
    pub fn upsert_chat(&self, chat: &Chat) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO chats (id, context_id, platform, address, listener_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 context_id = excluded.context_id,
                 platform = excluded.platform,
                 address = excluded.address,
                 listener_id = excluded.listener_id",
            params![
                chat.id,
                chat.context_id,
                chat.platform.as_str(),
                chat.address,
                chat.listener_id,
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn create_report(
        &self,
        context_id: ContextId,
        started_at: DateTime<Utc>,
    ) -> StoreResult<ReportId> {
        let connection = self.open_connection()?;
        let started = format_timestamp(started_at);
        connection.execute(
            "INSERT INTO reports (context_id, started_at, last_updated_at) VALUES (?1, ?2, ?2)",
            params![context_id, started],
        )?;
        let id = connection.last_insert_rowid();
        debug!(context_id, report_id = id, "report row created");
        Ok(id)
    }

    async fn update_activity(&self, report_id: ReportId, at: DateTime<Utc>) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let changed = connection.execute(
            "UPDATE reports
             SET last_updated_at = CASE WHEN ?1 > last_updated_at THEN ?1 ELSE last_updated_at END
             WHERE id = ?2",
            params![format_timestamp(at), report_id],
        )?;
        if changed == 0 {
            return Err(StoreError::ReportNotFound(report_id));
        }
        Ok(())
    }

    async fn finish_report(&self, report_id: ReportId, at: DateTime<Utc>) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let changed = connection.execute(
            "UPDATE reports SET finished_at = ?1 WHERE id = ?2 AND finished_at IS NULL",
            params![format_timestamp(at), report_id],
        )?;
        if changed > 0 {
            return Ok(());
        }

        let exists = connection
            .query_row(
                "SELECT 1 FROM reports WHERE id = ?1",
                params![report_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            Err(StoreError::ReportAlreadyFinished(report_id))
        } else {
            Err(StoreError::ReportNotFound(report_id))
        }
    }

    async fn list_not_finished(&self, context_id: ContextId) -> StoreResult<Vec<Report>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT id, context_id, started_at, last_updated_at, finished_at
             FROM reports
             WHERE context_id = ?1 AND finished_at IS NULL
             ORDER BY started_at ASC, id ASC",
        )?;
        let rows = statement.query_map(params![context_id], read_report_row)?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(decode_report(row?)?);
        }
        Ok(reports)
    }

    async fn get_report(&self, report_id: ReportId) -> StoreResult<Option<Report>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT id, context_id, started_at, last_updated_at, finished_at
                 FROM reports WHERE id = ?1",
                params![report_id],
                read_report_row,
            )
            .optional()?;
        row.map(decode_report).transpose()
    }
}

#[async_trait]
impl ChatDirectory for SqliteStore {
    async fn list_chats(&self, context_id: ContextId) -> StoreResult<Vec<Chat>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT id, context_id, platform, address, listener_id
             FROM chats WHERE context_id = ?1 ORDER BY id ASC",
        )?;
        let rows = statement.query_map(params![context_id], read_chat_row)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(decode_chat(row?)?);
        }
        Ok(chats)
    }

    async fn resolve_recipient(&self, chat_id: ChatId) -> StoreResult<Recipient> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT id, context_id, platform, address, listener_id FROM chats WHERE id = ?1",
                params![chat_id],
                read_chat_row,
            )
            .optional()?
            .ok_or(StoreError::ChatNotFound(chat_id))?;
        let chat = decode_chat(row)?;
        Ok(Recipient::from(&chat))
    }

    async fn find_chat(&self, platform: ChatPlatform, address: &str) -> StoreResult<Option<Chat>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT id, context_id, platform, address, listener_id
                 FROM chats WHERE platform = ?1 AND address = ?2",
                params![platform.as_str(), address],
                read_chat_row,
            )
            .optional()?;
        row.map(decode_chat).transpose()
    }

    async fn context_name(&self, context_id: ContextId) -> StoreResult<String> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                "SELECT name FROM chat_contexts WHERE id = ?1",
                params![context_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or(StoreError::ContextNotFound(context_id))
    }
}

type ReportRow = (ReportId, ContextId, String, String, Option<String>);
type ChatRow = (ChatId, ContextId, String, String, Option<i64>);

fn read_report_row(row: &Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn read_chat_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_report(row: ReportRow) -> StoreResult<Report> {
    let (id, context_id, started_at, last_updated_at, finished_at) = row;
    Ok(Report {
        id: Some(id),
        context_id,
        started_at: parse_timestamp(&started_at)?,
        last_updated_at: parse_timestamp(&last_updated_at)?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn decode_chat(row: ChatRow) -> StoreResult<Chat> {
    let (id, context_id, platform, address, listener_id) = row;
    let platform = platform
        .parse::<ChatPlatform>()
        .map_err(|_| StoreError::InvalidPersistedValue {
            field: "chats.platform",
            value: platform.clone(),
        })?;
    Ok(Chat {
        id,
        context_id,
        platform,
        address,
        listener_id,
    })
}

// Fixed-width UTC encoding keeps lexical order equal to chronological order,
// which the monotonic `last_updated_at` update relies on.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
