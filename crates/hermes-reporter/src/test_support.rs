//! Shared fixtures for reporter tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hermes_core::ManualClock;
use hermes_outbound::{DeliveryError, Notifier, TemplateArtifactResolver};
use hermes_store::{
    InMemoryChatDirectory, InMemoryReportStore, ReportStore, StoreError, StoreResult,
};
use hermes_types::{Chat, ChatPlatform, ContextId, Recipient, Report, ReportId};
use url::Url;

use crate::{Collaborators, ReporterConfig};

pub(crate) const CONTEXT: ContextId = 1;
pub(crate) const WHATSAPP_CHAT: i64 = 10;
pub(crate) const TELEGRAM_CHAT: i64 = 11;

/// 07:00 in Moscow, before the default cutoff.
pub(crate) fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap()
}

/// 09:30 in Moscow, past the default cutoff.
pub(crate) fn after_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 6, 30, 0).unwrap()
}

pub(crate) fn config(idle_timeout: Duration) -> ReporterConfig {
    ReporterConfig {
        idle_timeout,
        ..ReporterConfig::default()
    }
}

pub(crate) fn directory() -> InMemoryChatDirectory {
    InMemoryChatDirectory::new()
        .with_context(CONTEXT, "North Farm")
        .with_chat(Chat {
            id: WHATSAPP_CHAT,
            context_id: CONTEXT,
            platform: ChatPlatform::Whatsapp,
            address: "79990001122@s.whatsapp.net".to_string(),
            listener_id: Some(3),
        })
        .with_chat(Chat {
            id: TELEGRAM_CHAT,
            context_id: CONTEXT,
            platform: ChatPlatform::Telegram,
            address: "-100200".to_string(),
            listener_id: None,
        })
}

pub(crate) fn artifacts() -> TemplateArtifactResolver {
    TemplateArtifactResolver::new(
        "https://reports.example.com/open?name={name}",
        chrono_tz::Europe::Moscow,
    )
    .expect("template resolver")
}

pub(crate) struct Fixture {
    pub store: Arc<CountingStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: ManualClock,
    pub collaborators: Collaborators,
}

pub(crate) fn fixture(now: DateTime<Utc>) -> Fixture {
    fixture_with_store(now, CountingStore::default())
}

pub(crate) fn fixture_with_store(now: DateTime<Utc>, store: CountingStore) -> Fixture {
    let store = Arc::new(store);
    let notifier = Arc::new(RecordingNotifier::default());
    let collaborators = Collaborators {
        store: store.clone(),
        directory: Arc::new(directory()),
        artifacts: Arc::new(artifacts()),
        notifier: notifier.clone(),
    };
    Fixture {
        store,
        notifier,
        clock: ManualClock::new(now),
        collaborators,
    }
}

/// Notifier that records deliveries and fails for configured addresses.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(Recipient, Url)>>,
    failing_addresses: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn fail_for(&self, address: &str) {
        self.failing_addresses
            .lock()
            .expect("failing addresses lock")
            .push(address.to_string());
    }

    pub fn sent(&self) -> Vec<(Recipient, Url)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &Recipient, url: &Url) -> Result<(), DeliveryError> {
        let failing = self
            .failing_addresses
            .lock()
            .expect("failing addresses lock")
            .contains(&recipient.address);
        if failing {
            return Err(DeliveryError {
                reason_code: "delivery_request_rejected".to_string(),
                detail: "chat blocked the bot".to_string(),
                retryable: false,
                endpoint: "test://notifier".to_string(),
                http_status: Some(403),
            });
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((recipient.clone(), url.clone()));
        Ok(())
    }
}

/// In-memory store that counts activity updates per report and can be made
/// slow or unavailable.
#[derive(Default)]
pub(crate) struct CountingStore {
    inner: InMemoryReportStore,
    updates: Mutex<HashMap<ReportId, usize>>,
    finish_delay: Option<Duration>,
    unavailable: bool,
}

impl CountingStore {
    pub fn with_finish_delay(delay: Duration) -> Self {
        Self {
            finish_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryReportStore {
        &self.inner
    }

    pub fn updates_for(&self, report_id: ReportId) -> usize {
        self.updates
            .lock()
            .expect("updates lock")
            .get(&report_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_updates(&self) -> usize {
        self.updates.lock().expect("updates lock").values().sum()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable {
            return Err(StoreError::Io(std::io::Error::other("store offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl ReportStore for CountingStore {
    async fn create_report(
        &self,
        context_id: ContextId,
        started_at: DateTime<Utc>,
    ) -> StoreResult<ReportId> {
        self.check_available()?;
        self.inner.create_report(context_id, started_at).await
    }

    async fn update_activity(&self, report_id: ReportId, at: DateTime<Utc>) -> StoreResult<()> {
        self.check_available()?;
        self.inner.update_activity(report_id, at).await?;
        *self
            .updates
            .lock()
            .expect("updates lock")
            .entry(report_id)
            .or_default() += 1;
        Ok(())
    }

    async fn finish_report(&self, report_id: ReportId, at: DateTime<Utc>) -> StoreResult<()> {
        self.check_available()?;
        if let Some(delay) = self.finish_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.finish_report(report_id, at).await
    }

    async fn list_not_finished(&self, context_id: ContextId) -> StoreResult<Vec<Report>> {
        self.check_available()?;
        self.inner.list_not_finished(context_id).await
    }

    async fn get_report(&self, report_id: ReportId) -> StoreResult<Option<Report>> {
        self.check_available()?;
        self.inner.get_report(report_id).await
    }
}
