//! End-to-end messaging flow: loopback transport, SQLite storage and the
//! core runtime wired together the way the `courier` binary wires them.

use std::path::Path;
use std::time::Duration;

use courier_core::repository::message::MessageStore;
use courier_core::repository::notifier::NoopNotifier;
use courier_core::runtime::MessagingRuntime;
use courier_infra::sqlite::job::SqliteJobStore;
use courier_infra::sqlite::message::SqliteMessageStore;
use courier_infra::sqlite::pool::DatabasePool;
use courier_infra::sqlite::settings::SqliteSettingsRepository;
use courier_infra::transport::loopback::LoopbackConnector;
use courier_types::config::CourierConfig;
use courier_types::confirmation::ConfirmationToken;
use courier_types::error::AdmissionError;
use courier_types::event::MessagingEvent;
use courier_types::inbound::{InboundEvent, InboundKind};
use courier_types::job::{BulkItem, BulkItemResult, JobId, JobStatus, MessagePayload};
use courier_types::message::Direction;
use courier_types::organization::OrganizationId;
use courier_types::session::ConnectionState;
use serde_json::json;

type Runtime = MessagingRuntime<LoopbackConnector, SqliteJobStore, SqliteSettingsRepository, SqliteSettingsRepository>;

struct Harness {
    runtime: Runtime,
    connector: LoopbackConnector,
    store: SqliteMessageStore,
    settings: SqliteSettingsRepository,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let connector = LoopbackConnector::new();
    let (runtime, store, settings) = start_in(dir.path(), connector.clone()).await;
    Harness {
        runtime,
        connector,
        store,
        settings,
        _dir: dir,
    }
}

async fn start_in(data_dir: &Path, connector: LoopbackConnector) -> (Runtime, SqliteMessageStore, SqliteSettingsRepository) {
    let pool = DatabasePool::open(data_dir).await.unwrap();
    let store = SqliteMessageStore::new(pool.clone());
    let jobs = SqliteJobStore::new(pool.clone());
    let settings = SqliteSettingsRepository::new(pool);

    let mut config = CourierConfig::default();
    config.session.reconnect.max_attempts = 20;
    config.session.reconnect.base_delay_ms = 20;
    config.session.reconnect.max_delay_ms = 100;
    config.session.reconnect.jitter = 0.0;
    config.outgoing.send_retry.base_delay_ms = 10;
    config.outgoing.send_retry.max_delay_ms = 20;

    let runtime = MessagingRuntime::start(
        &config,
        connector,
        jobs,
        store.clone(),
        NoopNotifier,
        settings.clone(),
        settings.clone(),
    )
    .await
    .unwrap();
    (runtime, store, settings)
}

async fn wait_for_state(runtime: &Runtime, org: OrganizationId, state: ConnectionState) {
    let mut rx = runtime.sessions.subscribe(org);
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state))
        .await
        .expect("session state not reached")
        .unwrap();
}

async fn wait_terminal(runtime: &Runtime, id: JobId) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(job) = runtime.outgoing.job(id)
                && job.status.is_terminal()
            {
                return job.status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish")
}

async fn wait_persisted(events: &mut tokio::sync::broadcast::Receiver<MessagingEvent>, external_id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(MessagingEvent::InboundPersisted { external_id: id, .. }) = events.recv().await
                && id == external_id
            {
                return;
            }
        }
    })
    .await
    .expect("inbound message not persisted")
}

fn inbound(id: &str, from: &str, body: &str) -> InboundEvent {
    InboundEvent {
        id: id.to_string(),
        from: format!("{from}@c.us"),
        to: "5511900000000@c.us".into(),
        body: body.to_string(),
        timestamp: 1_700_000_000,
        has_media: false,
        kind: InboundKind::Chat,
    }
}

#[tokio::test]
async fn pairing_then_agent_send_is_delivered() {
    let h = harness().await;
    let org = OrganizationId::new();

    h.runtime.sessions.connect(org).unwrap();
    wait_for_state(&h.runtime, org, ConnectionState::PendingAuth).await;
    let code = h.runtime.sessions.pairing_challenge(org).unwrap().code;
    h.connector.confirm_pairing(org, &code).await.unwrap();
    wait_for_state(&h.runtime, org, ConnectionState::Ready).await;

    let id = h
        .runtime
        .agent
        .send_message_for_agent(org, "+55 11 99999-0000", MessagePayload::text("Olá!"))
        .await
        .unwrap();
    assert_eq!(wait_terminal(&h.runtime, id).await, JobStatus::Sent);

    let sent = h.connector.sent(org);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient.as_str(), "5511999990000");
    assert_eq!(
        h.runtime.outgoing.job(id).unwrap().external_message_id,
        Some(sent[0].external_id.clone())
    );

    // The delivered message joins the contact's conversation history.
    h.runtime.shutdown().await;
    let conversations = h.store.list_conversations(org, 10).await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].contact, "5511999990000");
    let history = h.store.list_messages(org, conversations[0].id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].direction, Direction::Outbound);
    assert_eq!(history[0].external_id, sent[0].external_id);
    assert_eq!(history[0].body, "Olá!");
}

#[tokio::test]
async fn job_waits_out_a_dropped_session() {
    let h = harness().await;
    let org = OrganizationId::new();
    h.connector.mark_paired(org);
    h.runtime.sessions.connect(org).unwrap();
    wait_for_state(&h.runtime, org, ConnectionState::Ready).await;

    h.connector.set_unreachable(org, true);
    h.connector.drop_connection(org, "network reset").await.unwrap();
    wait_for_state(&h.runtime, org, ConnectionState::Disconnected).await;

    let id = h
        .runtime
        .agent
        .send_message_for_agent(org, "5511999990000", MessagePayload::text("still there?"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.runtime.outgoing.job(id).unwrap().status, JobStatus::Pending);
    assert!(h.connector.sent(org).is_empty());

    h.connector.set_unreachable(org, false);
    assert_eq!(wait_terminal(&h.runtime, id).await, JobStatus::Sent);
    assert_eq!(h.connector.sent(org).len(), 1);
    assert_eq!(h.runtime.sessions.snapshot(org).reconnect_attempts, 0);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn redelivered_inbound_event_is_stored_once() {
    let h = harness().await;
    let org = OrganizationId::new();
    let client = h.store.insert_client(org, "Maria Souza", "5511988887777").await.unwrap();
    h.connector.mark_paired(org);
    h.runtime.sessions.connect(org).unwrap();
    wait_for_state(&h.runtime, org, ConnectionState::Ready).await;

    let mut events = h.runtime.events.subscribe();
    h.connector
        .inject_inbound(org, inbound("wamid.1", "5511988887777", "Oi, tudo bem?"))
        .await
        .unwrap();
    wait_persisted(&mut events, "wamid.1").await;

    // The duplicate is handled before the next event, in arrival order.
    h.connector
        .inject_inbound(org, inbound("wamid.1", "5511988887777", "Oi, tudo bem?"))
        .await
        .unwrap();
    h.connector
        .inject_inbound(org, inbound("wamid.2", "5511988887777", "Preciso de ajuda"))
        .await
        .unwrap();
    wait_persisted(&mut events, "wamid.2").await;

    let conversations = h.store.list_conversations(org, 10).await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].client_id, Some(client.id));

    let messages = h.store.list_messages(org, conversations[0].id, 10).await.unwrap();
    let ids: Vec<&str> = messages.iter().map(|m| m.external_id.as_str()).collect();
    assert_eq!(messages.len(), 2);
    assert!(ids.contains(&"wamid.1") && ids.contains(&"wamid.2"));

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn bulk_send_follows_stored_safety_settings() {
    let h = harness().await;
    let org = OrganizationId::new();
    h.connector.mark_paired(org);

    let items = |n: usize| -> Vec<BulkItem> {
        (0..n)
            .map(|i| BulkItem {
                recipient: format!("55119999000{i:02}"),
                payload: MessagePayload::text(format!("promo {i}")),
            })
            .collect()
    };

    // Defaults: mass sending disabled.
    let err = h
        .runtime
        .agent
        .send_bulk_messages_for_agent(org, items(2), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::MassSendingDisabled));

    h.settings
        .store_settings(
            org,
            &json!({
                "rateLimiting": { "concurrency": 2 },
                "safety": { "enableMassSending": true, "requireConfirmation": true, "maxBatchSize": 3 }
            }),
        )
        .await
        .unwrap();
    h.settings
        .set_confirmation_secret(org, &ConfirmationToken::new("go-ahead"))
        .await
        .unwrap();

    let err = h
        .runtime
        .agent
        .send_bulk_messages_for_agent(org, items(4), Some(ConfirmationToken::new("go-ahead")))
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::BatchTooLarge { size: 4, max: 3 }));

    let err = h
        .runtime
        .agent
        .send_bulk_messages_for_agent(org, items(2), Some(ConfirmationToken::new("nope")))
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::ConfirmationRejected));
    assert!(h.runtime.outgoing.jobs_for(org).is_empty());

    let results = h
        .runtime
        .agent
        .send_bulk_messages_for_agent(org, items(3), Some(ConfirmationToken::new("go-ahead")))
        .await
        .unwrap();
    assert_eq!(h.runtime.limiter.settings(org).concurrency, 2);

    for result in &results {
        let BulkItemResult::Queued { job_id, .. } = result else {
            panic!("expected every item to be queued: {result:?}");
        };
        assert_eq!(wait_terminal(&h.runtime, *job_id).await, JobStatus::Sent);
    }
    assert_eq!(h.connector.sent(org).len(), 3);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn queued_job_is_sent_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let org = OrganizationId::new();

    // No paired device: the job can only wait.
    let offline = LoopbackConnector::new();
    let (first, _, _) = start_in(dir.path(), offline.clone()).await;
    let id = first
        .agent
        .send_message_for_agent(org, "5511999990000", MessagePayload::text("antes do restart"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(first.outgoing.job(id).unwrap().status, JobStatus::Pending);
    first.shutdown().await;
    assert!(offline.sent(org).is_empty());

    let online = LoopbackConnector::new();
    online.mark_paired(org);
    let (second, _, _) = start_in(dir.path(), online.clone()).await;
    assert_eq!(second.outgoing.job(id).map(|j| j.status), Some(JobStatus::Pending));
    assert_eq!(wait_terminal(&second, id).await, JobStatus::Sent);

    let sent = online.sent(org);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient.as_str(), "5511999990000");
    second.shutdown().await;
}
