//! Inbound message handling.
//!
//! [`MessageHandler`] is the single consumer of the incoming queue. Each
//! envelope is normalized into a [`MessageRecord`], tied to its conversation
//! (and CRM client, when one matches the sender's number) and stored
//! idempotently by `(organization_id, external_id)`. New messages are passed
//! to the agent layer. Storage failures are retried; an event that still
//! cannot be stored is dead-lettered, never dropped.

use std::fmt;

use chrono::{DateTime, Utc};
use courier_types::config::RetryPolicy;
use courier_types::error::RepositoryError;
use courier_types::event::MessagingEvent;
use courier_types::inbound::{InboundEnvelope, InboundKind};
use courier_types::message::{Conversation, Direction, InsertOutcome, MessageRecord};
use courier_types::recipient::contact_from_address;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::incoming::{self, IncomingReceiver};
use crate::repository::message::MessageStore;
use crate::repository::notifier::AgentNotifier;
use crate::retry::RetryHandler;

const STATUS_BROADCAST: &str = "status@broadcast";
const GROUP_SUFFIX: &str = "@g.us";

/// Why an inbound event was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    StatusBroadcast,
    GroupChat,
    /// Protocol notifications, revoke markers and the like.
    NotUserContent(InboundKind),
    Empty,
}

impl IgnoreReason {
    /// Whether a person wrote what was dropped, as opposed to a protocol
    /// event or a status update.
    pub fn drops_user_content(&self) -> bool {
        matches!(self, IgnoreReason::GroupChat | IgnoreReason::Empty)
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::StatusBroadcast => f.write_str("status broadcast"),
            IgnoreReason::GroupChat => f.write_str("group chat"),
            IgnoreReason::NotUserContent(kind) => write!(f, "{} event", kind.as_str()),
            IgnoreReason::Empty => f.write_str("empty message"),
        }
    }
}

/// What happened to one inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Persisted {
        message_id: Uuid,
        conversation_id: Uuid,
    },
    /// Already stored; nothing else was done.
    Duplicate,
    Ignored(IgnoreReason),
}

/// An inbound event reduced to what the CRM stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedInbound {
    pub contact: String,
    pub body: String,
    pub kind: InboundKind,
    pub has_media: bool,
    pub sent_at: DateTime<Utc>,
}

/// Reduce a raw event to a storable message, or say why it is skipped.
pub fn normalize(envelope: &InboundEnvelope) -> Result<NormalizedInbound, IgnoreReason> {
    let event = &envelope.event;
    let from = event.from.trim();
    if from == STATUS_BROADCAST {
        return Err(IgnoreReason::StatusBroadcast);
    }
    if from.ends_with(GROUP_SUFFIX) {
        return Err(IgnoreReason::GroupChat);
    }
    if !event.kind.is_user_content() {
        return Err(IgnoreReason::NotUserContent(event.kind));
    }
    let body = event.body.trim();
    if body.is_empty() && !event.has_media {
        return Err(IgnoreReason::Empty);
    }

    Ok(NormalizedInbound {
        contact: contact_from_address(from),
        body: body.to_string(),
        kind: event.kind,
        has_media: event.has_media,
        sent_at: DateTime::from_timestamp(event.timestamp, 0).unwrap_or(envelope.received_at),
    })
}

// ---------------------------------------------------------------------------
// MessageHandler
// ---------------------------------------------------------------------------

pub struct MessageHandler<St: MessageStore, N: AgentNotifier> {
    store: St,
    notifier: N,
    events: EventBus,
    retry: RetryPolicy,
}

impl<St: MessageStore, N: AgentNotifier> MessageHandler<St, N> {
    pub fn new(store: St, notifier: N, events: EventBus, retry: RetryPolicy) -> Self {
        Self {
            store,
            notifier,
            events,
            retry,
        }
    }

    /// Drain the incoming queue until it closes or `cancel` fires.
    pub async fn run(&self, mut receiver: IncomingReceiver, cancel: CancellationToken) {
        tracing::info!("message handler started");
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = receiver.pop() => envelope,
            };
            let Some(envelope) = envelope else {
                break;
            };
            // Errors are already dead-lettered inside `handle`.
            let _ = self.handle(envelope).await;
        }

        // Whatever producers buffered before they stopped is still handled.
        let mut drained = 0usize;
        while let Some(envelope) = receiver.try_pop() {
            let _ = self.handle(envelope).await;
            drained += 1;
        }
        tracing::info!(drained, "message handler stopped");
    }

    /// Process one envelope. An `Err` means storage failed for good and the
    /// envelope has been dead-lettered.
    pub async fn handle(&self, envelope: InboundEnvelope) -> Result<HandleOutcome, RepositoryError> {
        let organization_id = envelope.organization_id;
        let external_id = envelope.event.id.as_str();

        let normalized = match normalize(&envelope) {
            Ok(normalized) => normalized,
            Err(reason) => {
                if reason.drops_user_content() {
                    tracing::info!(%organization_id, external_id, %reason, "inbound message not stored");
                } else {
                    tracing::debug!(%organization_id, external_id, %reason, "inbound event ignored");
                }
                return Ok(HandleOutcome::Ignored(reason));
            }
        };

        let stored = RetryHandler::run(&self.retry, "persist inbound message", RepositoryError::is_transient, |_| {
            self.persist(&envelope, &normalized)
        })
        .await;

        match stored {
            Ok((InsertOutcome::Inserted, message, conversation)) => {
                tracing::info!(
                    %organization_id,
                    external_id,
                    conversation_id = %conversation.id,
                    client_id = ?conversation.client_id,
                    "inbound message stored"
                );
                self.events.publish(MessagingEvent::InboundPersisted {
                    organization_id,
                    external_id: message.external_id.clone(),
                });
                if let Err(e) = self.notifier.notify(&message, &conversation).await {
                    tracing::warn!(%organization_id, external_id, error = %e, "agent notification failed");
                }
                Ok(HandleOutcome::Persisted {
                    message_id: message.id,
                    conversation_id: conversation.id,
                })
            }
            Ok((InsertOutcome::Duplicate, _, _)) => {
                tracing::debug!(%organization_id, external_id, "duplicate inbound message skipped");
                Ok(HandleOutcome::Duplicate)
            }
            Err(e) => {
                incoming::dead_letter(&envelope, &e.to_string(), &self.events);
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        envelope: &InboundEnvelope,
        normalized: &NormalizedInbound,
    ) -> Result<(InsertOutcome, MessageRecord, Conversation), RepositoryError> {
        let organization_id = envelope.organization_id;
        let client = self
            .store
            .find_client_by_contact(organization_id, &normalized.contact)
            .await?;
        let conversation = self
            .store
            .upsert_conversation(
                organization_id,
                &normalized.contact,
                client.map(|c| c.id),
                normalized.sent_at,
            )
            .await?;

        let message = MessageRecord {
            id: Uuid::now_v7(),
            organization_id,
            conversation_id: conversation.id,
            external_id: envelope.event.id.clone(),
            direction: Direction::Inbound,
            sender: normalized.contact.clone(),
            body: normalized.body.clone(),
            kind: normalized.kind,
            has_media: normalized.has_media,
            sent_at: normalized.sent_at,
            created_at: Utc::now(),
        };
        let outcome = self.store.insert_message(&message).await?;
        Ok((outcome, message, conversation))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::notifier::NoopNotifier;
    use courier_types::inbound::InboundEvent;
    use courier_types::message::ClientRef;
    use courier_types::organization::OrganizationId;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    // -- in-memory store ---------------------------------------------------

    #[derive(Default)]
    struct MemoryStore {
        clients: Mutex<HashMap<(OrganizationId, String), ClientRef>>,
        conversations: Mutex<HashMap<(OrganizationId, String), Conversation>>,
        messages: Mutex<HashMap<(OrganizationId, String), MessageRecord>>,
        /// Fail this many upcoming calls with a connection error.
        failures: AtomicU32,
        permanent_failure: Mutex<Option<RepositoryError>>,
    }

    impl MemoryStore {
        fn check(&self) -> Result<(), RepositoryError> {
            if let Some(e) = self.permanent_failure.lock().unwrap().take() {
                return Err(e);
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::Connection);
            }
            Ok(())
        }

        fn message_count(&self) -> usize {
            self.messages.lock().unwrap().len()
        }
    }

    impl MessageStore for Arc<MemoryStore> {
        async fn find_client_by_contact(
            &self,
            organization_id: OrganizationId,
            contact: &str,
        ) -> Result<Option<ClientRef>, RepositoryError> {
            self.check()?;
            Ok(self
                .clients
                .lock()
                .unwrap()
                .get(&(organization_id, contact.to_string()))
                .cloned())
        }

        async fn upsert_conversation(
            &self,
            organization_id: OrganizationId,
            contact: &str,
            client_id: Option<Uuid>,
            at: DateTime<Utc>,
        ) -> Result<Conversation, RepositoryError> {
            self.check()?;
            let mut conversations = self.conversations.lock().unwrap();
            let conversation = conversations
                .entry((organization_id, contact.to_string()))
                .or_insert_with(|| Conversation {
                    id: Uuid::now_v7(),
                    organization_id,
                    contact: contact.to_string(),
                    client_id,
                    created_at: Utc::now(),
                    last_message_at: at,
                });
            conversation.last_message_at = conversation.last_message_at.max(at);
            Ok(conversation.clone())
        }

        async fn insert_message(&self, message: &MessageRecord) -> Result<InsertOutcome, RepositoryError> {
            self.check()?;
            let mut messages = self.messages.lock().unwrap();
            let key = (message.organization_id, message.external_id.clone());
            if messages.contains_key(&key) {
                return Ok(InsertOutcome::Duplicate);
            }
            messages.insert(key, message.clone());
            Ok(InsertOutcome::Inserted)
        }

        async fn list_messages(
            &self,
            organization_id: OrganizationId,
            conversation_id: Uuid,
            _limit: i64,
        ) -> Result<Vec<MessageRecord>, RepositoryError> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .values()
                .filter(|m| m.organization_id == organization_id && m.conversation_id == conversation_id)
                .cloned()
                .collect())
        }

        async fn list_conversations(
            &self,
            organization_id: OrganizationId,
            _limit: i64,
        ) -> Result<Vec<Conversation>, RepositoryError> {
            Ok(self
                .conversations
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.organization_id == organization_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl AgentNotifier for RecordingNotifier {
        async fn notify(&self, message: &MessageRecord, _conversation: &Conversation) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(message.external_id.clone());
            if self.fail {
                anyhow::bail!("agent layer offline");
            }
            Ok(())
        }
    }

    // -- helpers -----------------------------------------------------------

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter: 0.0,
        }
    }

    fn envelope(org: OrganizationId, id: &str) -> InboundEnvelope {
        InboundEnvelope::new(
            org,
            InboundEvent {
                id: id.to_string(),
                from: "5511999990000@c.us".to_string(),
                to: "5511888880000@c.us".to_string(),
                body: "  quero um orçamento  ".to_string(),
                timestamp: 1_700_000_000,
                has_media: false,
                kind: InboundKind::Chat,
            },
        )
    }

    fn handler(store: &Arc<MemoryStore>) -> MessageHandler<Arc<MemoryStore>, NoopNotifier> {
        MessageHandler::new(Arc::clone(store), NoopNotifier, EventBus::new(64), policy())
    }

    // -- tests -------------------------------------------------------------

    #[test]
    fn normalize_extracts_contact_and_trims_body() {
        let env = envelope(OrganizationId::new(), "A1");
        let n = normalize(&env).unwrap();
        assert_eq!(n.contact, "5511999990000");
        assert_eq!(n.body, "quero um orçamento");
        assert_eq!(n.sent_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn normalize_skips_non_conversational_events() {
        let org = OrganizationId::new();

        let mut status = envelope(org, "S1");
        status.event.from = "status@broadcast".into();
        assert_eq!(normalize(&status), Err(IgnoreReason::StatusBroadcast));

        let mut group = envelope(org, "G1");
        group.event.from = "120363000000000000@g.us".into();
        assert_eq!(normalize(&group), Err(IgnoreReason::GroupChat));

        let mut revoked = envelope(org, "R1");
        revoked.event.kind = InboundKind::Revoked;
        assert_eq!(normalize(&revoked), Err(IgnoreReason::NotUserContent(InboundKind::Revoked)));

        let mut empty = envelope(org, "E1");
        empty.event.body = "   ".into();
        assert_eq!(normalize(&empty), Err(IgnoreReason::Empty));

        empty.event.has_media = true;
        empty.event.kind = InboundKind::Image;
        assert!(normalize(&empty).is_ok());
    }

    #[tokio::test]
    async fn group_chat_message_is_not_stored() {
        let store = Arc::new(MemoryStore::default());
        let handler = handler(&store);
        let org = OrganizationId::new();

        let mut group = envelope(org, "G2");
        group.event.from = "120363000000000000@g.us".into();
        let outcome = handler.handle(group).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Ignored(IgnoreReason::GroupChat));
        assert!(IgnoreReason::GroupChat.drops_user_content());
        assert!(!IgnoreReason::StatusBroadcast.drops_user_content());
        assert_eq!(store.message_count(), 0);
        assert!(store.conversations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_still_handles_buffered_events() {
        let store = Arc::new(MemoryStore::default());
        let handler = handler(&store);
        let org = OrganizationId::new();
        let (queue, receiver) = crate::incoming::IncomingQueue::new(8, std::time::Duration::from_millis(10));
        for id in ["B1", "B2", "B3"] {
            queue.push(org, envelope(org, id).event).await.unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        handler.run(receiver, cancel).await;
        assert_eq!(store.message_count(), 3);
    }

    #[tokio::test]
    async fn duplicate_event_is_stored_once() {
        let store = Arc::new(MemoryStore::default());
        let handler = handler(&store);
        let org = OrganizationId::new();

        let first = handler.handle(envelope(org, "DUP")).await.unwrap();
        assert!(matches!(first, HandleOutcome::Persisted { .. }));
        let second = handler.handle(envelope(org, "DUP")).await.unwrap();
        assert_eq!(second, HandleOutcome::Duplicate);
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn same_external_id_in_other_org_is_distinct() {
        let store = Arc::new(MemoryStore::default());
        let handler = handler(&store);

        handler.handle(envelope(OrganizationId::new(), "X")).await.unwrap();
        handler.handle(envelope(OrganizationId::new(), "X")).await.unwrap();
        assert_eq!(store.message_count(), 2);
    }

    #[tokio::test]
    async fn known_client_is_linked_to_conversation() {
        let store = Arc::new(MemoryStore::default());
        let org = OrganizationId::new();
        let client = ClientRef {
            id: Uuid::now_v7(),
            name: "Maria".into(),
        };
        store
            .clients
            .lock()
            .unwrap()
            .insert((org, "5511999990000".into()), client.clone());

        let handler = handler(&store);
        handler.handle(envelope(org, "C1")).await.unwrap();

        let conversations = store.list_conversations(org, 10).await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].client_id, Some(client.id));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let store = Arc::new(MemoryStore::default());
        store.failures.store(2, Ordering::SeqCst);
        let handler = handler(&store);

        let outcome = handler.handle(envelope(OrganizationId::new(), "T1")).await.unwrap();
        assert!(matches!(outcome, HandleOutcome::Persisted { .. }));
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_dead_letter_the_event() {
        let store = Arc::new(MemoryStore::default());
        store.failures.store(100, Ordering::SeqCst);
        let events = EventBus::new(16);
        let mut bus = events.subscribe();
        let handler = MessageHandler::new(Arc::clone(&store), NoopNotifier, events, policy());

        let err = handler.handle(envelope(OrganizationId::new(), "L1")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Connection));
        assert_eq!(store.message_count(), 0);
        match bus.recv().await.unwrap() {
            MessagingEvent::InboundDeadLettered { external_id, .. } => assert_eq!(external_id, "L1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let store = Arc::new(MemoryStore::default());
        *store.permanent_failure.lock().unwrap() = Some(RepositoryError::Conflict("bad row".into()));
        let handler = handler(&store);

        let err = handler.handle(envelope(OrganizationId::new(), "P1")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn notifier_sees_new_messages_only() {
        let store = Arc::new(MemoryStore::default());
        let notifier = RecordingNotifier::default();
        let handler = MessageHandler::new(Arc::clone(&store), notifier.clone(), EventBus::new(16), policy());
        let org = OrganizationId::new();

        handler.handle(envelope(org, "N1")).await.unwrap();
        handler.handle(envelope(org, "N1")).await.unwrap();
        assert_eq!(*notifier.seen.lock().unwrap(), vec!["N1".to_string()]);
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_handling() {
        let store = Arc::new(MemoryStore::default());
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let handler = MessageHandler::new(Arc::clone(&store), notifier, EventBus::new(16), policy());

        let outcome = handler.handle(envelope(OrganizationId::new(), "N2")).await.unwrap();
        assert!(matches!(outcome, HandleOutcome::Persisted { .. }));
    }

    #[tokio::test]
    async fn run_drains_queue_in_order_until_closed() {
        let store = Arc::new(MemoryStore::default());
        let handler = handler(&store);
        let (queue, rx) = crate::incoming::IncomingQueue::new(8, std::time::Duration::from_secs(1));
        let org = OrganizationId::new();
        for id in ["R1", "R2", "R3"] {
            queue.push(org, envelope(org, id).event).await.unwrap();
        }
        drop(queue);

        handler.run(rx, CancellationToken::new()).await;
        assert_eq!(store.message_count(), 3);
    }
}
