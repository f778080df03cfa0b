//! Shared data types for Hermes reporting.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a reporting context (farm, division, ...).
pub type ContextId = i64;
/// Identifier of a chat row in the directory.
pub type ChatId = i64;
/// Identifier assigned to a report by the store.
pub type ReportId = i64;
/// Identifier of the worker account listening on a chat.
pub type ListenerId = i64;

/// Error returned when a platform tag cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported chat platform '{0}' (expected whatsapp|telegram)")]
pub struct PlatformParseError(pub String);

/// Messaging platform a chat lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPlatform {
    Whatsapp,
    Telegram,
}

impl ChatPlatform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
        }
    }
}

impl fmt::Display for ChatPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatPlatform {
    type Err = PlatformParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Self::Whatsapp),
            "telegram" => Ok(Self::Telegram),
            other => Err(PlatformParseError(other.to_string())),
        }
    }
}

/// Reporting group that aggregates one or more chats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    pub id: ContextId,
    pub name: String,
}

/// Conversation endpoint subscribed to a context's reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub context_id: ContextId,
    pub platform: ChatPlatform,
    /// Platform-specific address: a Telegram chat id or a WhatsApp JID/phone number.
    pub address: String,
    /// Worker account used for reply routing on platforms that need one.
    #[serde(default)]
    pub listener_id: Option<ListenerId>,
}

/// Resolved delivery target for one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub chat_id: ChatId,
    pub platform: ChatPlatform,
    pub address: String,
    #[serde(default)]
    pub listener_id: Option<ListenerId>,
}

impl From<&Chat> for Recipient {
    fn from(chat: &Chat) -> Self {
        Self {
            chat_id: chat.id,
            platform: chat.platform,
            address: chat.address.clone(),
            listener_id: chat.listener_id,
        }
    }
}

/// Persisted record of one reporting session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Assigned by the store; `None` until the report has been created.
    pub id: Option<ReportId>,
    pub context_id: ContextId,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Report {
    /// Creates a not-yet-persisted report opened at `started_at`.
    pub fn fresh(context_id: ContextId, started_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            context_id,
            started_at,
            last_updated_at: started_at,
            finished_at: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Records activity at `at`, never moving `last_updated_at` backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_updated_at {
            self.last_updated_at = at;
        }
    }
}
