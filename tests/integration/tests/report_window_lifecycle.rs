use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hermes_core::ManualClock;
use hermes_outbound::{
    DriveArtifactConfig, DriveArtifactResolver, HttpNotifier, NotifierConfig, NotifierMode,
    TemplateArtifactResolver,
};
use hermes_reporter::{Collaborators, ReporterConfig, WindowManager};
use hermes_store::{ReportStore, SqliteStore};
use hermes_types::{Chat, ChatContext, ChatPlatform};
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const CONTEXT_ID: i64 = 1;

fn seeded_store(path: &Path) -> Arc<SqliteStore> {
    let store = SqliteStore::new(path).expect("sqlite store");
    store
        .upsert_context(&ChatContext {
            id: CONTEXT_ID,
            name: "North Farm".to_string(),
        })
        .expect("seed context");
    store
        .upsert_chat(&Chat {
            id: 10,
            context_id: CONTEXT_ID,
            platform: ChatPlatform::Whatsapp,
            address: "79990001122@s.whatsapp.net".to_string(),
            listener_id: Some(3),
        })
        .expect("seed whatsapp chat");
    store
        .upsert_chat(&Chat {
            id: 11,
            context_id: CONTEXT_ID,
            platform: ChatPlatform::Telegram,
            address: "-100200".to_string(),
            listener_id: None,
        })
        .expect("seed telegram chat");
    Arc::new(store)
}

fn reporter_config() -> ReporterConfig {
    ReporterConfig {
        idle_timeout: Duration::from_millis(200),
        ..ReporterConfig::default()
    }
}

async fn wait_until(label: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {label}");
}

/// 09:30 in Moscow, past the default finish hour.
fn after_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 6, 30, 0).unwrap()
}

#[tokio::test]
async fn integration_closed_window_delivers_drive_link_to_every_chat() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = seeded_store(&temp.path().join("hermes.sqlite"));
    let server = MockServer::start();

    let drive = server.mock(|when, then| {
        when.method(GET)
            .path("/drive/v3/files")
            .query_param(
                "q",
                "name='30м09ч01/06/2024_North Farm' and 'reports-folder' in parents and trashed=false",
            )
            .header("authorization", "Bearer drive-token");
        then.status(200)
            .json_body(json!({"files": [{"id": "sheet-7", "name": "30м09ч01/06/2024_North Farm"}]}));
    });
    let expected_url = "https://docs.google.com/spreadsheets/d/sheet-7/edit?usp=sharing";
    let telegram = server.mock(|when, then| {
        when.method(POST)
            .path("/bottg-token/sendMessage")
            .json_body(json!({
                "chat_id": "-100200",
                "text": expected_url,
                "disable_web_page_preview": true
            }));
        then.status(200).json_body(json!({"ok": true}));
    });
    let whatsapp = server.mock(|when, then| {
        when.method(POST)
            .path("/listener-3-phone/messages")
            .header("authorization", "Bearer wa-token")
            .json_body(json!({
                "messaging_product": "whatsapp",
                "to": "79990001122",
                "type": "text",
                "text": {"body": expected_url}
            }));
        then.status(200).json_body(json!({"messages": [{"id": "wamid.1"}]}));
    });

    let notifier = HttpNotifier::new(NotifierConfig {
        mode: NotifierMode::Provider,
        telegram_api_base: server.base_url(),
        whatsapp_api_base: server.base_url(),
        telegram_bot_token: Some("tg-token".to_string()),
        whatsapp_access_token: Some("wa-token".to_string()),
        whatsapp_listener_phone_number_ids: BTreeMap::from([(3, "listener-3-phone".to_string())]),
        ..NotifierConfig::default()
    })
    .expect("notifier");
    let artifacts = DriveArtifactResolver::new(DriveArtifactConfig {
        api_base: server.base_url(),
        access_token: "drive-token".to_string(),
        folder_id: "reports-folder".to_string(),
        ..DriveArtifactConfig::default()
    })
    .expect("drive resolver");

    let clock = ManualClock::new(after_cutoff());
    let manager = WindowManager::new(
        reporter_config(),
        Collaborators {
            store: store.clone(),
            directory: store.clone(),
            artifacts: Arc::new(artifacts),
            notifier: Arc::new(notifier),
        },
        Arc::new(clock.clone()),
    );
    let cancel = CancellationToken::new();

    let t0 = after_cutoff();
    assert_eq!(
        manager
            .register_activity(&cancel, CONTEXT_ID, "North Farm", t0)
            .await,
        t0
    );

    wait_until("both chats notified", || {
        telegram.calls() == 1 && whatsapp.calls() == 1
    })
    .await;
    drive.assert_calls(1);
    wait_until("session released", || manager.active_sessions() == 0).await;

    assert!(store
        .list_not_finished(CONTEXT_ID)
        .await
        .expect("list open reports")
        .is_empty());
    let closed = store
        .get_report(1)
        .await
        .expect("get report")
        .expect("report row");
    assert_eq!(closed.started_at, t0);
    assert!(closed.is_finished());

    let t1 = t0 + chrono::Duration::seconds(40);
    clock.set(t1);
    assert_eq!(
        manager
            .register_activity(&cancel, CONTEXT_ID, "North Farm", t1)
            .await,
        t1
    );
    manager.shutdown();
}

#[tokio::test]
async fn integration_restart_resumes_open_report_from_sqlite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("hermes.sqlite");
    // 07:00 in Moscow: windows extend rather than close.
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap();
    let clock = ManualClock::new(t0);

    let build = |store: Arc<SqliteStore>| {
        WindowManager::new(
            ReporterConfig {
                idle_timeout: Duration::from_secs(60),
                ..ReporterConfig::default()
            },
            Collaborators {
                store: store.clone(),
                directory: store,
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
        )
    };
    let cancel = CancellationToken::new();

    let first = build(seeded_store(&db_path));
    assert_eq!(
        first
            .register_activity(&cancel, CONTEXT_ID, "North Farm", t0)
            .await,
        t0
    );
    first.shutdown();
    drop(first);

    clock.advance(chrono::Duration::minutes(30));
    let store = Arc::new(SqliteStore::new(&db_path).expect("reopen store"));
    let second = build(store.clone());
    let later = t0 + chrono::Duration::minutes(30);
    assert_eq!(
        second
            .register_activity(&cancel, CONTEXT_ID, "North Farm", later)
            .await,
        t0
    );

    let open = store.list_not_finished(CONTEXT_ID).await.expect("list");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].started_at, t0);
    second.shutdown();
}
