//! Chat notifiers delivering report links to Telegram and WhatsApp chats.
//!
//! Provider failures are classified into a stable `reason_code` plus a
//! `retryable` flag so callers can aggregate and log them uniformly.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use hermes_types::{ChatPlatform, ListenerId, Recipient};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

const MAX_DETAIL_CHARS: usize = 512;
const WHATSAPP_USER_SUFFIX: &str = "@s.whatsapp.net";

/// Delivers a report link to a single resolved chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &Recipient, url: &Url) -> Result<(), DeliveryError>;
}

/// Structured failure for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reason_code={reason_code} retryable={retryable} endpoint={endpoint} detail={detail}")]
pub struct DeliveryError {
    pub reason_code: String,
    pub detail: String,
    pub retryable: bool,
    pub endpoint: String,
    pub http_status: Option<u16>,
}

impl DeliveryError {
    fn terminal(reason_code: &str, detail: impl Into<String>) -> Self {
        Self {
            reason_code: reason_code.to_string(),
            detail: detail.into(),
            retryable: false,
            endpoint: String::new(),
            http_status: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierMode {
    /// Shape requests without touching the network.
    DryRun,
    Provider,
}

impl NotifierMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Provider => "provider",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub mode: NotifierMode,
    pub http_timeout_ms: u64,
    pub telegram_api_base: String,
    pub whatsapp_api_base: String,
    pub telegram_bot_token: Option<String>,
    pub whatsapp_access_token: Option<String>,
    /// Sender used when a chat's listener has no dedicated number.
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_listener_phone_number_ids: BTreeMap<ListenerId, String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            mode: NotifierMode::DryRun,
            http_timeout_ms: 5000,
            telegram_api_base: "https://api.telegram.org".to_string(),
            whatsapp_api_base: "https://graph.facebook.com/v20.0".to_string(),
            telegram_bot_token: None,
            whatsapp_access_token: None,
            whatsapp_phone_number_id: None,
            whatsapp_listener_phone_number_ids: BTreeMap::new(),
        }
    }
}

/// Outcome of a successful (or dry-run) delivery.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub platform: String,
    pub mode: String,
    pub status: String,
    pub endpoint: String,
    pub request_body: Value,
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone)]
struct DeliveryRequest {
    platform: ChatPlatform,
    endpoint: String,
    bearer_token: Option<String>,
    body: Value,
}

/// Notifier speaking the Telegram Bot API and the WhatsApp Cloud API.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    config: NotifierConfig,
    client: Option<reqwest::Client>,
}

impl HttpNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self, DeliveryError> {
        if config.mode == NotifierMode::Provider && config.http_timeout_ms == 0 {
            return Err(DeliveryError::terminal(
                "delivery_invalid_config",
                "provider mode requires http timeout > 0",
            ));
        }
        let client = if config.mode == NotifierMode::Provider {
            Some(
                reqwest::Client::builder()
                    .timeout(Duration::from_millis(config.http_timeout_ms))
                    .build()
                    .map_err(|error| {
                        DeliveryError::terminal(
                            "delivery_client_build_failed",
                            format!("failed to build notifier http client: {error}"),
                        )
                    })?,
            )
        } else {
            None
        };
        Ok(Self { config, client })
    }

    pub fn mode(&self) -> NotifierMode {
        self.config.mode
    }

    /// Sends `text` to `recipient`, returning the provider receipt.
    pub async fn deliver(
        &self,
        recipient: &Recipient,
        text: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let request = self.build_request(recipient, text)?;
        match self.config.mode {
            NotifierMode::DryRun => Ok(DeliveryReceipt {
                platform: request.platform.as_str().to_string(),
                mode: self.config.mode.as_str().to_string(),
                status: "dry_run".to_string(),
                endpoint: request.endpoint,
                request_body: request.body,
                http_status: None,
            }),
            NotifierMode::Provider => self.send_request(request).await,
        }
    }

    fn build_request(
        &self,
        recipient: &Recipient,
        text: &str,
    ) -> Result<DeliveryRequest, DeliveryError> {
        let dry_run = self.config.mode == NotifierMode::DryRun;
        match recipient.platform {
            ChatPlatform::Telegram => {
                let token = configured(self.config.telegram_bot_token.as_deref())
                    .or(dry_run.then_some("dry-run-telegram-token"))
                    .ok_or_else(|| {
                        DeliveryError::terminal(
                            "delivery_missing_telegram_bot_token",
                            "Telegram delivery requires HERMES_TELEGRAM_BOT_TOKEN",
                        )
                    })?;
                let endpoint = format!(
                    "{}/bot{}/sendMessage",
                    self.config.telegram_api_base.trim_end_matches('/'),
                    token
                );
                Ok(DeliveryRequest {
                    platform: recipient.platform,
                    endpoint,
                    bearer_token: None,
                    body: json!({
                        "chat_id": recipient.address.trim(),
                        "text": text,
                        "disable_web_page_preview": true
                    }),
                })
            }
            ChatPlatform::Whatsapp => {
                let access_token = configured(self.config.whatsapp_access_token.as_deref())
                    .or(dry_run.then_some("dry-run-whatsapp-token"))
                    .ok_or_else(|| {
                        DeliveryError::terminal(
                            "delivery_missing_whatsapp_access_token",
                            "WhatsApp delivery requires HERMES_WHATSAPP_ACCESS_TOKEN",
                        )
                    })?;
                let phone_number_id = recipient
                    .listener_id
                    .and_then(|listener| {
                        configured(
                            self.config
                                .whatsapp_listener_phone_number_ids
                                .get(&listener)
                                .map(String::as_str),
                        )
                    })
                    .or_else(|| configured(self.config.whatsapp_phone_number_id.as_deref()))
                    .or(dry_run.then_some("dry-run-phone-number-id"))
                    .ok_or_else(|| {
                        DeliveryError::terminal(
                            "delivery_missing_whatsapp_phone_number_id",
                            format!(
                                "no WhatsApp phone number id for listener {:?}; set HERMES_WHATSAPP_PHONE_NUMBER_ID",
                                recipient.listener_id
                            ),
                        )
                    })?;
                let to = whatsapp_recipient(&recipient.address);
                if to.is_empty() {
                    return Err(DeliveryError::terminal(
                        "delivery_missing_whatsapp_recipient",
                        format!("chat {} has an empty WhatsApp address", recipient.chat_id),
                    ));
                }
                let endpoint = format!(
                    "{}/{}/messages",
                    self.config.whatsapp_api_base.trim_end_matches('/'),
                    phone_number_id
                );
                Ok(DeliveryRequest {
                    platform: recipient.platform,
                    endpoint,
                    bearer_token: Some(access_token.to_string()),
                    body: json!({
                        "messaging_product": "whatsapp",
                        "to": to,
                        "type": "text",
                        "text": {
                            "body": text
                        }
                    }),
                })
            }
        }
    }

    async fn send_request(&self, request: DeliveryRequest) -> Result<DeliveryReceipt, DeliveryError> {
        let client = self.client.as_ref().ok_or_else(|| DeliveryError {
            endpoint: request.endpoint.clone(),
            ..DeliveryError::terminal(
                "delivery_provider_client_unavailable",
                "provider mode requested without initialized HTTP client",
            )
        })?;

        let mut http_request = client.post(request.endpoint.as_str());
        if let Some(token) = request.bearer_token.as_deref() {
            http_request = http_request.bearer_auth(token);
        }
        let response = http_request
            .json(&request.body)
            .send()
            .await
            .map_err(|error| DeliveryError {
                reason_code: "delivery_transport_error".to_string(),
                detail: error.to_string(),
                retryable: true,
                endpoint: request.endpoint.clone(),
                http_status: None,
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(
                platform = request.platform.as_str(),
                http_status = status.as_u16(),
                "report link delivered"
            );
            return Ok(DeliveryReceipt {
                platform: request.platform.as_str().to_string(),
                mode: self.config.mode.as_str().to_string(),
                status: "sent".to_string(),
                endpoint: request.endpoint,
                request_body: request.body,
                http_status: Some(status.as_u16()),
            });
        }

        let body_raw = response.text().await.unwrap_or_default();
        let (reason_code, retryable) = classify_provider_status(status);
        Err(DeliveryError {
            reason_code: reason_code.to_string(),
            detail: truncate_detail(&body_raw),
            retryable,
            endpoint: request.endpoint,
            http_status: Some(status.as_u16()),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, recipient: &Recipient, url: &Url) -> Result<(), DeliveryError> {
        self.deliver(recipient, url.as_str()).await.map(|_| ())
    }
}

fn configured(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn whatsapp_recipient(address: &str) -> &str {
    let address = address.trim();
    address.strip_suffix(WHATSAPP_USER_SUFFIX).unwrap_or(address)
}

fn classify_provider_status(status: StatusCode) -> (&'static str, bool) {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ("delivery_rate_limited", true);
    }
    if status.is_server_error() {
        return ("delivery_provider_unavailable", true);
    }
    if status.is_client_error() {
        return ("delivery_request_rejected", false);
    }
    ("delivery_unknown_http_failure", true)
}

fn truncate_detail(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= MAX_DETAIL_CHARS {
        return trimmed.to_string();
    }
    let mut truncated: String = trimmed.chars().take(MAX_DETAIL_CHARS).collect();
    truncated.push_str("...");
    truncated
}
