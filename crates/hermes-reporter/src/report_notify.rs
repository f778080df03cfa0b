//! Fan-out of a report link to every chat subscribed to its context.

use futures_util::future::join_all;
use hermes_outbound::{ArtifactError, DeliveryError};
use hermes_store::StoreError;
use hermes_types::{ChatId, ContextId, Report};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::Collaborators;

/// Successful fan-out of one report link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub url: Url,
    pub delivered: Vec<ChatId>,
}

/// Failure to reach one chat.
#[derive(Debug, Error)]
pub enum ChatDeliveryError {
    #[error("chat {chat_id}: recipient resolution failed: {source}")]
    Recipient {
        chat_id: ChatId,
        #[source]
        source: StoreError,
    },
    #[error("chat {chat_id}: {source}")]
    Send {
        chat_id: ChatId,
        #[source]
        source: DeliveryError,
    },
}

impl ChatDeliveryError {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Recipient { chat_id, .. } | Self::Send { chat_id, .. } => *chat_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("artifact url unavailable: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("listing chats for context {context_id} failed: {source}")]
    Directory {
        context_id: ContextId,
        #[source]
        source: StoreError,
    },
    /// Every chat was attempted; `failures` lists the ones that failed.
    #[error("{failed} of {attempted} chat deliveries failed", failed = .failures.len())]
    Delivery {
        url: Url,
        attempted: usize,
        delivered: Vec<ChatId>,
        failures: Vec<ChatDeliveryError>,
    },
}

/// Resolves the artifact link of `report` and sends it to every chat of its
/// context. Deliveries run concurrently; one failing chat never prevents
/// attempts to the others.
pub(crate) async fn notify_report(
    collaborators: &Collaborators,
    report: &Report,
    context_name: &str,
) -> Result<NotifyOutcome, NotifyError> {
    let url = collaborators
        .artifacts
        .url_for(report.started_at, context_name)
        .await?;
    let chats = collaborators
        .directory
        .list_chats(report.context_id)
        .await
        .map_err(|source| NotifyError::Directory {
            context_id: report.context_id,
            source,
        })?;

    let directory = collaborators.directory.as_ref();
    let notifier = collaborators.notifier.as_ref();
    let url_ref = &url;
    let attempts = chats.iter().map(|chat| async move {
        let recipient = directory
            .resolve_recipient(chat.id)
            .await
            .map_err(|source| ChatDeliveryError::Recipient {
                chat_id: chat.id,
                source,
            })?;
        notifier
            .send(&recipient, url_ref)
            .await
            .map_err(|source| ChatDeliveryError::Send {
                chat_id: chat.id,
                source,
            })?;
        Ok::<ChatId, ChatDeliveryError>(chat.id)
    });

    let mut delivered = Vec::new();
    let mut failures = Vec::new();
    for result in join_all(attempts).await {
        match result {
            Ok(chat_id) => delivered.push(chat_id),
            Err(error) => failures.push(error),
        }
    }

    if failures.is_empty() {
        Ok(NotifyOutcome { url, delivered })
    } else {
        Err(NotifyError::Delivery {
            url,
            attempted: chats.len(),
            delivered,
            failures,
        })
    }
}

/// Runs [`notify_report`] and logs the outcome; used by session tasks,
/// which never propagate notification errors.
pub(crate) async fn notify_logged(
    collaborators: &Collaborators,
    report: &Report,
    context_name: &str,
    kind: &'static str,
) {
    match notify_report(collaborators, report, context_name).await {
        Ok(outcome) => info!(
            context_id = report.context_id,
            report_id = report.id,
            kind,
            url = %outcome.url,
            delivered = outcome.delivered.len(),
            "report link sent"
        ),
        Err(NotifyError::Delivery {
            url,
            attempted,
            delivered,
            failures,
        }) => {
            for failure in &failures {
                warn!(
                    context_id = report.context_id,
                    chat_id = failure.chat_id(),
                    kind,
                    error = %failure,
                    "report link delivery failed"
                );
            }
            warn!(
                context_id = report.context_id,
                report_id = report.id,
                kind,
                url = %url,
                attempted,
                delivered = delivered.len(),
                "report link partially delivered"
            );
        }
        Err(error) => warn!(
            context_id = report.context_id,
            report_id = report.id,
            kind,
            %error,
            "report notify failed"
        ),
    }
}
