mod bootstrap;
mod cli_args;
mod ingest;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hermes_core::{Clock, SystemClock};
use hermes_reporter::{Collaborators, WindowManager};
use hermes_store::SqliteStore;
use hermes_types::{Chat, ChatContext};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::{
    build_artifact_resolver, build_notifier, build_reporter_config, init_tracing,
};
use crate::cli_args::{Cli, Command, RunArgs, SeedCommand};
use crate::ingest::ingest_activity;

const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn open_store(database: &Path) -> Result<SqliteStore> {
    SqliteStore::new(database)
        .with_context(|| format!("failed to open database {}", database.display()))
}

async fn run(database: &Path, args: RunArgs) -> Result<()> {
    let config = build_reporter_config(&args)?;
    let store = Arc::new(open_store(database)?);
    let notifier = Arc::new(build_notifier(&args)?);
    let artifacts = build_artifact_resolver(&args)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let notifier_mode = notifier.mode();
    let manager = WindowManager::new(
        config,
        Collaborators {
            store: store.clone(),
            directory: store.clone(),
            artifacts,
            notifier,
        },
        clock.clone(),
    );
    let config = manager.config();
    info!(
        database = %database.display(),
        notifier_mode = notifier_mode.as_str(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        cutoff_hour = config.cutoff_hour,
        timezone = %config.timezone,
        include_context_name = config.include_context_name,
        "hermes reporter started"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received; shutting down");
        signal_token.cancel();
    });

    let mut stdout = tokio::io::stdout();
    let summary = ingest_activity(
        &manager,
        store.as_ref(),
        clock.as_ref(),
        BufReader::new(tokio::io::stdin()),
        &mut stdout,
        &shutdown,
    )
    .await?;
    info!(
        accepted = summary.accepted,
        skipped = summary.skipped,
        "activity input closed"
    );

    wait_for_open_sessions(&manager, &shutdown).await;
    manager.shutdown();
    Ok(())
}

/// Keeps the process alive after input ends until every report window has
/// closed or shutdown is requested.
async fn wait_for_open_sessions(manager: &WindowManager, shutdown: &CancellationToken) {
    let mut announced = false;
    while manager.active_sessions() > 0 {
        if !announced {
            info!(
                active_sessions = manager.active_sessions(),
                "waiting for open report windows; press Ctrl-C to stop"
            );
            announced = true;
        }
        tokio::select! {
            _ = tokio::time::sleep(SESSION_POLL_INTERVAL) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

fn run_seed(database: &Path, command: SeedCommand) -> Result<()> {
    let store = open_store(database)?;
    match command {
        SeedCommand::Context { id, name } => {
            let context = ChatContext { id, name };
            store.upsert_context(&context)?;
            println!("{}", serde_json::to_string(&context)?);
        }
        SeedCommand::Chat {
            id,
            context_id,
            platform,
            address,
            listener_id,
        } => {
            let chat = Chat {
                id,
                context_id,
                platform,
                address,
                listener_id,
            };
            store.upsert_chat(&chat)?;
            println!("{}", serde_json::to_string(&chat)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(&cli.database, args).await,
        Command::Seed(command) => run_seed(&cli.database, command),
    }
}
