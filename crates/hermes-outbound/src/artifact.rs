//! Resolution of a report's shareable artifact link.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

const SPREADSHEET_URL_BASE: &str = "https://docs.google.com/spreadsheets/d";
const ARTIFACT_NAME_FORMAT: &str = "%Mм%Hч%d/%m/%Y";

/// Resolves the shareable URL of the artifact accumulated for a report.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn url_for(
        &self,
        started_at: DateTime<Utc>,
        context_name: &str,
    ) -> Result<Url, ArtifactError>;
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{name}' not found")]
    NotFound { name: String },
    #[error("artifact provider returned http {status}: {detail}")]
    Provider { status: u16, detail: String },
    #[error("invalid artifact configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

/// Renders the artifact name for a report opened at `started_at`.
///
/// The start instant is shown in `timezone` as minute, `м`, hour, `ч`, then
/// `DD/MM/YYYY`; a non-empty `context_name` is appended after `_`.
pub fn artifact_name(started_at: DateTime<Utc>, context_name: &str, timezone: Tz) -> String {
    let mut name = started_at
        .with_timezone(&timezone)
        .format(ARTIFACT_NAME_FORMAT)
        .to_string();
    let context_name = context_name.trim();
    if !context_name.is_empty() {
        name.push('_');
        name.push_str(context_name);
    }
    name
}

#[derive(Debug, Clone)]
pub struct DriveArtifactConfig {
    pub api_base: String,
    pub access_token: String,
    pub folder_id: String,
    pub timezone: Tz,
    pub http_timeout_ms: u64,
}

impl Default for DriveArtifactConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com".to_string(),
            access_token: String::new(),
            folder_id: String::new(),
            timezone: chrono_tz::Europe::Moscow,
            http_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

/// Looks up the report spreadsheet by name inside a Google Drive folder.
#[derive(Debug, Clone)]
pub struct DriveArtifactResolver {
    config: DriveArtifactConfig,
    client: reqwest::Client,
}

impl DriveArtifactResolver {
    pub fn new(config: DriveArtifactConfig) -> Result<Self, ArtifactError> {
        if config.access_token.trim().is_empty() {
            return Err(ArtifactError::InvalidConfig(
                "drive access token cannot be empty".to_string(),
            ));
        }
        if config.folder_id.trim().is_empty() {
            return Err(ArtifactError::InvalidConfig(
                "drive folder id cannot be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()?;
        Ok(Self { config, client })
    }

    fn search_url(&self, name: &str) -> Result<Url, ArtifactError> {
        let mut url = Url::parse(&format!(
            "{}/drive/v3/files",
            self.config.api_base.trim_end_matches('/')
        ))?;
        let query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query_literal(name),
            escape_query_literal(self.config.folder_id.trim())
        );
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("fields", "files(id,name)");
        Ok(url)
    }
}

#[async_trait]
impl ArtifactResolver for DriveArtifactResolver {
    async fn url_for(
        &self,
        started_at: DateTime<Utc>,
        context_name: &str,
    ) -> Result<Url, ArtifactError> {
        let name = artifact_name(started_at, context_name, self.config.timezone);
        let response = self
            .client
            .get(self.search_url(&name)?)
            .bearer_auth(self.config.access_token.trim())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ArtifactError::Provider {
                status: status.as_u16(),
                detail: detail.trim().to_string(),
            });
        }

        let listing: DriveFileList = response.json().await?;
        let file = listing
            .files
            .into_iter()
            .next()
            .ok_or_else(|| ArtifactError::NotFound { name: name.clone() })?;
        debug!(artifact = %name, file_id = %file.id, "artifact resolved");
        Ok(Url::parse(&format!(
            "{SPREADSHEET_URL_BASE}/{}/edit?usp=sharing",
            file.id
        ))?)
    }
}

/// Builds artifact links from a URL template without a remote lookup.
///
/// `{name}` is replaced by the percent-encoded artifact name.
#[derive(Debug, Clone)]
pub struct TemplateArtifactResolver {
    template: String,
    timezone: Tz,
}

impl TemplateArtifactResolver {
    pub fn new(template: impl Into<String>, timezone: Tz) -> Result<Self, ArtifactError> {
        let template = template.into();
        if !template.contains("{name}") {
            return Err(ArtifactError::InvalidConfig(format!(
                "artifact url template '{template}' must contain '{{name}}'"
            )));
        }
        Ok(Self { template, timezone })
    }
}

#[async_trait]
impl ArtifactResolver for TemplateArtifactResolver {
    async fn url_for(
        &self,
        started_at: DateTime<Utc>,
        context_name: &str,
    ) -> Result<Url, ArtifactError> {
        let name = artifact_name(started_at, context_name, self.timezone);
        let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
        Ok(Url::parse(&self.template.replace("{name}", &encoded))?)
    }
}

fn escape_query_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}
