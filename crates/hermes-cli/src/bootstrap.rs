use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hermes_outbound::{
    ArtifactResolver, DriveArtifactConfig, DriveArtifactResolver, HttpNotifier, NotifierConfig,
    NotifierMode, TemplateArtifactResolver,
};
use hermes_reporter::ReporterConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli_args::{CliNotifierMode, RunArgs};

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn build_reporter_config(args: &RunArgs) -> Result<ReporterConfig> {
    let config = ReporterConfig {
        idle_timeout: Duration::from_secs(args.response_timeout_secs),
        cutoff_hour: args.finish_hour,
        timezone: args.timezone,
        include_context_name: args.add_chat_context_name,
    };
    config.validate()?;
    Ok(config)
}

pub(crate) fn build_notifier_config(args: &RunArgs) -> NotifierConfig {
    NotifierConfig {
        mode: match args.notifier_mode {
            CliNotifierMode::DryRun => NotifierMode::DryRun,
            CliNotifierMode::Provider => NotifierMode::Provider,
        },
        http_timeout_ms: args.http_timeout_ms,
        telegram_api_base: args.telegram_api_base.clone(),
        whatsapp_api_base: args.whatsapp_api_base.clone(),
        telegram_bot_token: args.telegram_bot_token.clone(),
        whatsapp_access_token: args.whatsapp_access_token.clone(),
        whatsapp_phone_number_id: args.whatsapp_phone_number_id.clone(),
        whatsapp_listener_phone_number_ids: args
            .whatsapp_listener_phone_numbers
            .iter()
            .cloned()
            .collect::<BTreeMap<_, _>>(),
    }
}

pub(crate) fn build_notifier(args: &RunArgs) -> Result<HttpNotifier> {
    HttpNotifier::new(build_notifier_config(args)).context("failed to build chat notifier")
}

/// Prefers a Drive folder lookup; falls back to a URL template.
pub(crate) fn build_artifact_resolver(args: &RunArgs) -> Result<Arc<dyn ArtifactResolver>> {
    let drive_token = non_empty(args.drive_access_token.as_deref());
    let drive_folder = non_empty(args.drive_folder_id.as_deref());
    match (drive_token, drive_folder) {
        (Some(access_token), Some(folder_id)) => {
            let resolver = DriveArtifactResolver::new(DriveArtifactConfig {
                api_base: args.drive_api_base.clone(),
                access_token: access_token.to_string(),
                folder_id: folder_id.to_string(),
                timezone: args.timezone,
                http_timeout_ms: args.http_timeout_ms,
            })
            .context("failed to build drive artifact resolver")?;
            Ok(Arc::new(resolver))
        }
        (Some(_), None) | (None, Some(_)) => {
            bail!("--drive-access-token and --drive-folder-id must be set together")
        }
        (None, None) => {
            let Some(template) = non_empty(args.artifact_url_template.as_deref()) else {
                bail!(
                    "no artifact source configured; set --drive-access-token with --drive-folder-id, or --artifact-url-template"
                );
            };
            let resolver = TemplateArtifactResolver::new(template, args.timezone)
                .context("invalid --artifact-url-template")?;
            Ok(Arc::new(resolver))
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
