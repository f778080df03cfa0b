//! JSON-lines activity ingestion.
//!
//! Each input line names the platform and chat address a qualifying message
//! arrived on, plus an optional event timestamp:
//! `{"platform":"telegram","chat":"-100200","timestamp":"2024-06-01T04:00:00Z"}`.
//! Each accepted line produces one acknowledgement line with the start time
//! of the report window that took it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hermes_core::Clock;
use hermes_reporter::WindowManager;
use hermes_store::ChatDirectory;
use hermes_types::{ChatId, ChatPlatform, ContextId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ActivityLine {
    platform: ChatPlatform,
    chat: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct ActivityAck {
    pub context_id: ContextId,
    pub chat_id: ChatId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IngestSummary {
    pub accepted: usize,
    pub skipped: usize,
}

/// Feeds activity lines from `reader` into `manager` until EOF or shutdown.
pub(crate) async fn ingest_activity<R, W>(
    manager: &WindowManager,
    directory: &dyn ChatDirectory,
    clock: &dyn Clock,
    reader: R,
    writer: &mut W,
    shutdown: &CancellationToken,
) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read activity input")?,
            _ = shutdown.cancelled() => break,
        };
        let Some(line) = line else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let activity = match serde_json::from_str::<ActivityLine>(trimmed) {
            Ok(activity) => activity,
            Err(error) => {
                warn!(%error, "skipping malformed activity line");
                summary.skipped += 1;
                continue;
            }
        };
        let address = activity.chat.trim();
        let chat = match directory.find_chat(activity.platform, address).await {
            Ok(Some(chat)) => chat,
            Ok(None) => {
                warn!(platform = %activity.platform, chat = address, "activity from unknown chat");
                summary.skipped += 1;
                continue;
            }
            Err(error) => {
                warn!(platform = %activity.platform, chat = address, %error, "chat lookup failed");
                summary.skipped += 1;
                continue;
            }
        };
        let context_name = match directory.context_name(chat.context_id).await {
            Ok(name) => name,
            Err(error) => {
                warn!(context_id = chat.context_id, %error, "context name unavailable");
                String::new()
            }
        };

        let occurred_at = activity.timestamp.unwrap_or_else(|| clock.now());
        let started_at = manager
            .register_activity(shutdown, chat.context_id, &context_name, occurred_at)
            .await;
        debug!(
            context_id = chat.context_id,
            chat_id = chat.id,
            started_at = %started_at,
            "activity registered"
        );

        let ack = ActivityAck {
            context_id: chat.context_id,
            chat_id: chat.id,
            started_at,
        };
        let mut encoded = serde_json::to_string(&ack).context("failed to encode activity ack")?;
        encoded.push('\n');
        writer
            .write_all(encoded.as_bytes())
            .await
            .context("failed to write activity ack")?;
        writer.flush().await.context("failed to flush activity ack")?;
        summary.accepted += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use hermes_core::ManualClock;
    use hermes_outbound::{HttpNotifier, NotifierConfig, TemplateArtifactResolver};
    use hermes_reporter::{Collaborators, ReporterConfig, WindowManager};
    use hermes_store::{InMemoryChatDirectory, InMemoryReportStore};
    use hermes_types::{Chat, ChatPlatform};
    use tokio_util::sync::CancellationToken;

    use super::{ingest_activity, ActivityAck, IngestSummary};

    fn directory() -> Arc<InMemoryChatDirectory> {
        Arc::new(
            InMemoryChatDirectory::new()
                .with_context(1, "North Farm")
                .with_chat(Chat {
                    id: 11,
                    context_id: 1,
                    platform: ChatPlatform::Telegram,
                    address: "-100200".to_string(),
                    listener_id: None,
                }),
        )
    }

    #[tokio::test]
    async fn functional_ingest_acknowledges_known_chats_and_skips_the_rest() {
        let directory = directory();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap());
        let manager = WindowManager::new(
            ReporterConfig::default(),
            Collaborators {
                store: Arc::new(InMemoryReportStore::new()),
                directory: directory.clone(),
                artifacts: Arc::new(
                    TemplateArtifactResolver::new(
                        "https://reports.example.com/{name}",
                        chrono_tz::Europe::Moscow,
                    )
                    .expect("template"),
                ),
                notifier: Arc::new(HttpNotifier::new(NotifierConfig::default()).expect("notifier")),
            },
            Arc::new(clock.clone()),
        );

        let input = concat!(
            "{\"platform\":\"telegram\",\"chat\":\"-100200\",\"timestamp\":\"2024-06-01T04:00:00Z\"}\n",
            "\n",
            "{\"platform\":\"telegram\",\"chat\":\"-100200\",\"timestamp\":\"2024-06-01T04:00:05Z\"}\n",
            "{\"platform\":\"whatsapp\",\"chat\":\"unknown@g.us\"}\n",
            "not json\n",
        );
        let mut output = Vec::new();
        let shutdown = CancellationToken::new();

        let summary = ingest_activity(
            &manager,
            directory.as_ref(),
            &clock,
            input.as_bytes(),
            &mut output,
            &shutdown,
        )
        .await
        .expect("ingest");
        assert_eq!(
            summary,
            IngestSummary {
                accepted: 2,
                skipped: 2
            }
        );

        let acks: Vec<ActivityAck> = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("ack json"))
            .collect();
        assert_eq!(acks.len(), 2);
        let started = Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap();
        assert!(acks.iter().all(|ack| ack.started_at == started && ack.chat_id == 11));
        manager.shutdown();
    }

    #[tokio::test]
    async fn regression_ingest_stops_on_shutdown() {
        let directory = directory();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap());
        let manager = WindowManager::new(
            ReporterConfig::default(),
            Collaborators {
                store: Arc::new(InMemoryReportStore::new()),
                directory: directory.clone(),
                artifacts: Arc::new(
                    TemplateArtifactResolver::new("https://r.example.com/{name}", chrono_tz::UTC)
                        .expect("template"),
                ),
                notifier: Arc::new(HttpNotifier::new(NotifierConfig::default()).expect("notifier")),
            },
            Arc::new(clock.clone()),
        );
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let (reader, _writer) = tokio::io::duplex(64);
        let mut output = Vec::new();
        let summary = ingest_activity(
            &manager,
            directory.as_ref(),
            &clock,
            tokio::io::BufReader::new(reader),
            &mut output,
            &shutdown,
        )
        .await
        .expect("ingest");
        assert_eq!(summary, IngestSummary::default());
        assert!(output.is_empty());
    }
}
