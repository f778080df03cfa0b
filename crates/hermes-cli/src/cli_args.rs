use std::path::PathBuf;

use chrono_tz::Tz;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use hermes_types::{ChatPlatform, ListenerId};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_hour(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse hour: {error}"))?;
    if parsed > 23 {
        return Err("hour must be in range 0..=23".to_string());
    }
    Ok(parsed)
}

fn parse_timezone(value: &str) -> Result<Tz, String> {
    hermes_core::parse_timezone(value)
}

fn parse_platform(value: &str) -> Result<ChatPlatform, String> {
    value.parse::<ChatPlatform>().map_err(|error| error.to_string())
}

/// Parses a `<listener-id>=<phone-number-id>` routing entry.
fn parse_listener_route(value: &str) -> Result<(ListenerId, String), String> {
    let (listener, phone_number_id) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <listener-id>=<phone-number-id>, got '{value}'"))?;
    let listener = listener
        .trim()
        .parse::<ListenerId>()
        .map_err(|error| format!("invalid listener id '{listener}': {error}"))?;
    let phone_number_id = phone_number_id.trim();
    if phone_number_id.is_empty() {
        return Err(format!("listener {listener} has an empty phone number id"));
    }
    Ok((listener, phone_number_id.to_string()))
}

#[derive(Debug, Parser)]
#[command(
    name = "hermes-reporter",
    about = "Per-context report windows for chat-driven field reporting",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "HERMES_DATABASE",
        default_value = ".hermes/hermes.sqlite",
        global = true,
        help = "SQLite database holding contexts, chats, and reports"
    )]
    pub database: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read JSON-lines chat activity from stdin and manage report windows.
    Run(RunArgs),
    /// Seed the chat directory.
    #[command(subcommand)]
    Seed(SeedCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliNotifierMode {
    DryRun,
    Provider,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(
        long = "response-timeout",
        env = "HERMES_RESPONSE_TIMEOUT",
        default_value_t = 15,
        value_parser = parse_positive_u64,
        help = "Seconds without activity before an open report window is re-evaluated"
    )]
    pub response_timeout_secs: u64,

    #[arg(
        long = "finish-hour",
        env = "HERMES_FINISH_HOUR",
        default_value_t = 9,
        value_parser = parse_hour,
        help = "Local hour from which an idle report window closes for the day"
    )]
    pub finish_hour: u32,

    #[arg(
        long,
        env = "HERMES_TIMEZONE",
        default_value = "Europe/Moscow",
        value_parser = parse_timezone,
        help = "IANA timezone used for the finish hour and artifact names"
    )]
    pub timezone: Tz,

    #[arg(
        long = "add-chat-context-name",
        env = "HERMES_ADD_CHAT_CONTEXT_NAME",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Append the context display name to artifact names"
    )]
    pub add_chat_context_name: bool,

    #[arg(
        long = "notifier-mode",
        env = "HERMES_NOTIFIER_MODE",
        value_enum,
        default_value_t = CliNotifierMode::DryRun,
        help = "dry-run logs shaped requests; provider calls the chat APIs"
    )]
    pub notifier_mode: CliNotifierMode,

    #[arg(
        long = "http-timeout-ms",
        env = "HERMES_HTTP_TIMEOUT_MS",
        default_value_t = 5000,
        value_parser = parse_positive_u64,
        help = "Timeout for outbound provider and artifact lookups"
    )]
    pub http_timeout_ms: u64,

    #[arg(
        long = "telegram-api-base",
        env = "HERMES_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "telegram-bot-token",
        env = "HERMES_TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram bot token used for report delivery"
    )]
    pub telegram_bot_token: Option<String>,

    #[arg(
        long = "whatsapp-api-base",
        env = "HERMES_WHATSAPP_API_BASE",
        default_value = "https://graph.facebook.com/v20.0"
    )]
    pub whatsapp_api_base: String,

    #[arg(
        long = "whatsapp-access-token",
        env = "HERMES_WHATSAPP_ACCESS_TOKEN",
        hide_env_values = true,
        help = "WhatsApp Cloud API access token"
    )]
    pub whatsapp_access_token: Option<String>,

    #[arg(
        long = "whatsapp-phone-number-id",
        env = "HERMES_WHATSAPP_PHONE_NUMBER_ID",
        help = "Default WhatsApp sender phone number id"
    )]
    pub whatsapp_phone_number_id: Option<String>,

    #[arg(
        long = "whatsapp-listener-phone-number",
        env = "HERMES_WHATSAPP_LISTENER_PHONE_NUMBERS",
        value_delimiter = ',',
        value_parser = parse_listener_route,
        help = "Per-listener sender routing as <listener-id>=<phone-number-id>"
    )]
    pub whatsapp_listener_phone_numbers: Vec<(ListenerId, String)>,

    #[arg(
        long = "drive-api-base",
        env = "HERMES_DRIVE_API_BASE",
        default_value = "https://www.googleapis.com"
    )]
    pub drive_api_base: String,

    #[arg(
        long = "drive-access-token",
        env = "HERMES_DRIVE_ACCESS_TOKEN",
        hide_env_values = true,
        help = "Google Drive bearer token for report spreadsheet lookup"
    )]
    pub drive_access_token: Option<String>,

    #[arg(
        long = "drive-folder-id",
        env = "HERMES_DRIVE_FOLDER_ID",
        help = "Drive folder that holds report spreadsheets"
    )]
    pub drive_folder_id: Option<String>,

    #[arg(
        long = "artifact-url-template",
        env = "HERMES_ARTIFACT_URL_TEMPLATE",
        help = "Report link template with a {name} placeholder, used when Drive is not configured"
    )]
    pub artifact_url_template: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum SeedCommand {
    /// Insert or rename a reporting context.
    Context {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
    },
    /// Insert or update a chat subscribed to a context.
    Chat {
        #[arg(long)]
        id: i64,
        #[arg(long = "context-id")]
        context_id: i64,
        #[arg(long, value_parser = parse_platform)]
        platform: ChatPlatform,
        #[arg(long, help = "Telegram chat id or WhatsApp JID/phone number")]
        address: String,
        #[arg(long = "listener-id")]
        listener_id: Option<ListenerId>,
    },
}
