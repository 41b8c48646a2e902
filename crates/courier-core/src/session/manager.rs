//! Session ownership and the public session API.
//!
//! Each organization has one [`SessionSlot`]: a `watch` channel carrying the
//! current [`SessionSnapshot`], the live connection handle (never handed out),
//! and the handle of the driver task. A generation counter guards the
//! snapshot: starting or stopping a driver bumps it, and a driver whose
//! generation is stale can no longer write state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use courier_types::config::SessionConfig;
use courier_types::error::{SendError, SessionError};
use courier_types::event::MessagingEvent;
use courier_types::job::MessagePayload;
use courier_types::organization::OrganizationId;
use courier_types::recipient::Recipient;
use courier_types::session::{ConnectionState, PairingChallenge, SessionSnapshot};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::bus::EventBus;
use crate::incoming::IncomingQueue;
use crate::transport::{MessageSender, SendReceipt, TransportConnector, TransportLink};

use super::driver;

/// Result of a successful `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// A new driver started in CONNECTING.
    Started,
    /// The session was already READY; nothing changed.
    AlreadyReady,
}

// ---------------------------------------------------------------------------
// SessionSlot
// ---------------------------------------------------------------------------

struct DriverHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub(super) struct SessionSlot<L> {
    pub(super) snapshot: watch::Sender<SessionSnapshot>,
    link: RwLock<Option<Arc<L>>>,
    driver: Mutex<Option<DriverHandle>>,
    generation: AtomicU64,
}

impl<L> SessionSlot<L> {
    fn new(organization_id: OrganizationId) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::new(organization_id));
        Self {
            snapshot,
            link: RwLock::new(None),
            driver: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub(super) fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub(super) fn reconnect_attempts(&self) -> u32 {
        self.snapshot.borrow().reconnect_attempts
    }

    pub(super) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(super) fn set_link(&self, link: Arc<L>) {
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(link);
    }

    pub(super) fn take_link(&self) -> Option<Arc<L>> {
        self.link.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn current_link(&self) -> Option<Arc<L>> {
        self.link.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// State shared between the manager handle and every driver task.
pub(super) struct Shared<C: TransportConnector> {
    pub(super) connector: C,
    pub(super) config: SessionConfig,
    pub(super) events: EventBus,
    pub(super) inbound: IncomingQueue,
    sessions: DashMap<OrganizationId, Arc<SessionSlot<C::Link>>>,
}

impl<C: TransportConnector> Shared<C> {
    /// Apply `update` to the snapshot if `generation` still owns the slot.
    ///
    /// State changes are logged and published. Returns false when the
    /// caller has been superseded and must stop.
    pub(super) fn transition(
        &self,
        slot: &SessionSlot<C::Link>,
        generation: u64,
        update: impl FnOnce(&mut SessionSnapshot),
    ) -> bool {
        let mut change = None;
        let applied = slot.snapshot.send_if_modified(|snap| {
            if !slot.is_current(generation) {
                return false;
            }
            let from = snap.state;
            update(snap);
            snap.updated_at = Utc::now();
            change = Some((snap.organization_id, from, snap.state, snap.updated_at));
            true
        });

        if let Some((organization_id, from, to, at)) = change
            && from != to
        {
            tracing::info!(%organization_id, %from, %to, "session state changed");
            self.events.publish(MessagingEvent::SessionStateChanged {
                organization_id,
                from,
                to,
                at,
            });
        }
        applied
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Owns one transport connection per organization.
///
/// Cloning is cheap; clones share the same sessions.
pub struct SessionManager<C: TransportConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: TransportConnector> Clone for SessionManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: TransportConnector> SessionManager<C> {
    pub fn new(connector: C, config: SessionConfig, inbound: IncomingQueue, events: EventBus) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                events,
                inbound,
                sessions: DashMap::new(),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    fn slot(&self, organization_id: OrganizationId) -> Arc<SessionSlot<C::Link>> {
        self.shared
            .sessions
            .entry(organization_id)
            .or_insert_with(|| Arc::new(SessionSlot::new(organization_id)))
            .clone()
    }

    fn existing_slot(&self, organization_id: OrganizationId) -> Option<Arc<SessionSlot<C::Link>>> {
        self.shared
            .sessions
            .get(&organization_id)
            .map(|slot| Arc::clone(slot.value()))
    }

    /// Start (or restart) the organization's session.
    ///
    /// READY is left alone; a handshake in progress is an error. From
    /// DISCONNECTED or FATAL the attempt counter is reset, any pending
    /// reconnect timer is cancelled and a fresh driver starts.
    pub fn connect(&self, organization_id: OrganizationId) -> Result<ConnectOutcome, SessionError> {
        let slot = self.slot(organization_id);
        let mut driver = slot.driver.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.state() {
            ConnectionState::Ready => Ok(ConnectOutcome::AlreadyReady),
            state if state.is_handshaking() => Err(SessionError::AlreadyConnecting),
            _ => {
                self.spawn_driver(organization_id, &slot, &mut driver);
                Ok(ConnectOutcome::Started)
            }
        }
    }

    /// Caller must hold the slot's driver lock.
    fn spawn_driver(
        &self,
        organization_id: OrganizationId,
        slot: &Arc<SessionSlot<C::Link>>,
        driver: &mut Option<DriverHandle>,
    ) {
        if let Some(previous) = driver.take() {
            previous.cancel.cancel();
        }
        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.transition(slot, generation, |s| {
            s.state = ConnectionState::Connecting;
            s.reconnect_attempts = 0;
            s.pairing_challenge = None;
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(driver::run(
            Arc::clone(&self.shared),
            organization_id,
            Arc::clone(slot),
            generation,
            cancel.clone(),
        ));
        *driver = Some(DriverHandle { cancel, task });
    }

    /// Tear the session down: stop the driver and any reconnect timer, close
    /// the connection and move to DISCONNECTED.
    pub async fn disconnect(&self, organization_id: OrganizationId) {
        let Some(slot) = self.existing_slot(organization_id) else {
            return;
        };
        let (handle, generation) = {
            let mut driver = slot.driver.lock().unwrap_or_else(PoisonError::into_inner);
            let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
            (driver.take(), generation)
        };

        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await
                && e.is_panic()
            {
                tracing::error!(%organization_id, "session driver panicked");
            }
        }
        if let Some(link) = slot.take_link() {
            link.disconnect().await;
        }
        self.shared.transition(&slot, generation, |s| {
            s.state = ConnectionState::Disconnected;
            s.pairing_challenge = None;
            s.reconnect_attempts = 0;
        });
        tracing::info!(%organization_id, "session disconnected");
    }

    /// The pairing code waiting for the operator, if any.
    pub fn pairing_challenge(&self, organization_id: OrganizationId) -> Option<PairingChallenge> {
        let slot = self.existing_slot(organization_id)?;
        let snapshot = slot.snapshot.borrow();
        if snapshot.state == ConnectionState::PendingAuth {
            snapshot.pairing_challenge.clone()
        } else {
            None
        }
    }

    pub fn snapshot(&self, organization_id: OrganizationId) -> SessionSnapshot {
        match self.existing_slot(organization_id) {
            Some(slot) => slot.snapshot.borrow().clone(),
            None => SessionSnapshot::new(organization_id),
        }
    }

    /// Watch the organization's snapshot.
    pub fn subscribe(&self, organization_id: OrganizationId) -> watch::Receiver<SessionSnapshot> {
        self.slot(organization_id).snapshot.subscribe()
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self
            .shared
            .sessions
            .iter()
            .map(|slot| slot.snapshot.borrow().clone())
            .collect();
        sessions.sort_by_key(|s| s.organization_id.0);
        sessions
    }

    /// Disconnect every session.
    pub async fn shutdown(&self) {
        let organizations: Vec<OrganizationId> =
            self.shared.sessions.iter().map(|slot| *slot.key()).collect();
        for organization_id in organizations {
            self.disconnect(organization_id).await;
        }
    }
}

impl<C: TransportConnector> MessageSender for SessionManager<C> {
    fn is_ready(&self, organization_id: OrganizationId) -> bool {
        self.existing_slot(organization_id)
            .is_some_and(|slot| slot.state() == ConnectionState::Ready)
    }

    async fn wait_until_ready(&self, organization_id: OrganizationId) {
        let mut rx = self.subscribe(organization_id);
        let _ = rx.wait_for(SessionSnapshot::is_ready).await;
    }

    /// Start a session only if it is DISCONNECTED with no driver waiting on a
    /// reconnect timer. FATAL sessions stay down until an explicit `connect`.
    fn ensure_session(&self, organization_id: OrganizationId) {
        let slot = self.slot(organization_id);
        let mut driver = slot.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.state() != ConnectionState::Disconnected {
            return;
        }
        if driver.as_ref().is_some_and(|d| !d.task.is_finished()) {
            return;
        }
        tracing::info!(%organization_id, "starting session on demand");
        self.spawn_driver(organization_id, &slot, &mut driver);
    }

    async fn send(
        &self,
        organization_id: OrganizationId,
        recipient: &Recipient,
        payload: &MessagePayload,
    ) -> Result<SendReceipt, SendError> {
        let link = self
            .existing_slot(organization_id)
            .filter(|slot| slot.state() == ConnectionState::Ready)
            .and_then(|slot| slot.current_link());
        let Some(link) = link else {
            return Err(SendError::SessionNotReady);
        };
        Ok(link.send(recipient, payload).await?)
    }
}

impl<C: TransportConnector> std::fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.shared.sessions.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incoming::IncomingReceiver;
    use crate::transport::{TransportConnection, TransportEvent};
    use courier_types::config::RetryPolicy;
    use courier_types::error::TransportError;
    use courier_types::inbound::{InboundEvent, InboundKind};
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::time::Duration;
    use tokio::sync::mpsc;

    // -- mock transport ----------------------------------------------------

    #[derive(Default)]
    struct MockState {
        connects: AtomicU32,
        /// Fail this many upcoming connects.
        failing_connects: AtomicU32,
        /// Emit Authenticated + Ready as soon as a connection opens.
        auto_ready: AtomicBool,
        senders: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
        sent: Mutex<Vec<String>>,
        disconnects: AtomicU32,
    }

    #[derive(Clone, Default)]
    struct MockConnector {
        state: Arc<MockState>,
    }

    impl MockConnector {
        fn auto_ready() -> Self {
            let connector = Self::default();
            connector.state.auto_ready.store(true, Ordering::SeqCst);
            connector
        }

        fn connects(&self) -> u32 {
            self.state.connects.load(Ordering::SeqCst)
        }

        /// Send an event on the most recent connection, waiting for one to open.
        async fn emit(&self, event: TransportEvent) {
            let tx = loop {
                if let Some(tx) = self.state.senders.lock().unwrap().last().cloned() {
                    break tx;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            };
            tx.send(event).await.unwrap();
        }
    }

    struct MockLink {
        state: Arc<MockState>,
    }

    impl TransportLink for MockLink {
        async fn send(&self, recipient: &Recipient, _payload: &MessagePayload) -> Result<SendReceipt, TransportError> {
            self.state.sent.lock().unwrap().push(recipient.as_str().to_string());
            Ok(SendReceipt {
                external_id: format!("ext-{}", recipient.as_str()),
            })
        }

        async fn disconnect(&self) {
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl TransportConnector for MockConnector {
        type Link = MockLink;

        async fn connect(&self, _org: OrganizationId) -> Result<TransportConnection<MockLink>, TransportError> {
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            let failing = self.state.failing_connects.load(Ordering::SeqCst);
            if failing > 0 {
                self.state.failing_connects.store(failing - 1, Ordering::SeqCst);
                return Err(TransportError::Network("unreachable".into()));
            }
            let (tx, rx) = mpsc::channel(16);
            if self.state.auto_ready.load(Ordering::SeqCst) {
                tx.try_send(TransportEvent::Authenticated).unwrap();
                tx.try_send(TransportEvent::Ready).unwrap();
            }
            self.state.senders.lock().unwrap().push(tx);
            Ok(TransportConnection {
                link: MockLink {
                    state: Arc::clone(&self.state),
                },
                events: rx,
            })
        }
    }

    // -- helpers -----------------------------------------------------------

    fn config(max_attempts: u32) -> SessionConfig {
        SessionConfig {
            connect_timeout_ms: 5_000,
            pairing_timeout_ms: 10_000,
            reconnect: RetryPolicy {
                max_attempts,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                jitter: 0.0,
            },
        }
    }

    fn manager(connector: MockConnector, max_attempts: u32) -> (SessionManager<MockConnector>, IncomingReceiver, EventBus) {
        let (inbound, rx) = IncomingQueue::new(16, Duration::from_secs(1));
        let events = EventBus::new(256);
        let mgr = SessionManager::new(connector, config(max_attempts), inbound, events.clone());
        (mgr, rx, events)
    }

    async fn wait_for_state(mgr: &SessionManager<MockConnector>, org: OrganizationId, state: ConnectionState) {
        let mut rx = mgr.subscribe(org);
        tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| s.state == state))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
            .unwrap();
    }

    fn recipient() -> Recipient {
        Recipient::parse("5511999990000").unwrap()
    }

    // -- tests -------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_ready() {
        let connector = MockConnector::auto_ready();
        let (mgr, _rx, _events) = manager(connector.clone(), 3);
        let org = OrganizationId::new();

        assert_eq!(mgr.connect(org).unwrap(), ConnectOutcome::Started);
        wait_for_state(&mgr, org, ConnectionState::Ready).await;

        let snap = mgr.snapshot(org);
        assert!(snap.last_authenticated_at.is_some());
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(mgr.is_ready(org));
        assert_eq!(mgr.connect(org).unwrap(), ConnectOutcome::AlreadyReady);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_during_handshake_is_rejected() {
        let connector = MockConnector::default();
        let (mgr, _rx, _events) = manager(connector, 3);
        let org = OrganizationId::new();

        mgr.connect(org).unwrap();
        assert_eq!(mgr.connect(org), Err(SessionError::AlreadyConnecting));
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_challenge_flow() {
        let connector = MockConnector::default();
        let (mgr, _rx, events) = manager(connector.clone(), 3);
        let mut bus = events.subscribe();
        let org = OrganizationId::new();

        mgr.connect(org).unwrap();
        assert!(mgr.pairing_challenge(org).is_none());

        connector.emit(TransportEvent::PairingChallenge("QR-1".into())).await;
        wait_for_state(&mgr, org, ConnectionState::PendingAuth).await;
        let challenge = mgr.pairing_challenge(org).unwrap();
        assert_eq!(challenge.code, "QR-1");
        assert!(challenge.expires_at > challenge.issued_at);

        connector.emit(TransportEvent::Authenticated).await;
        wait_for_state(&mgr, org, ConnectionState::Authenticated).await;
        assert!(mgr.pairing_challenge(org).is_none());

        connector.emit(TransportEvent::Ready).await;
        wait_for_state(&mgr, org, ConnectionState::Ready).await;

        let mut saw_pairing = false;
        while let Ok(event) = bus.try_recv() {
            if matches!(event, MessagingEvent::PairingChallengeIssued { .. }) {
                saw_pairing = true;
            }
        }
        assert!(saw_pairing);
    }

    #[tokio::test(start_paused = true)]
    async fn unconsumed_pairing_challenge_expires_and_reconnects() {
        let connector = MockConnector::default();
        let (mgr, _rx, events) = manager(connector.clone(), 3);
        let mut bus = events.subscribe();
        let org = OrganizationId::new();

        mgr.connect(org).unwrap();
        connector.emit(TransportEvent::PairingChallenge("QR-1".into())).await;
        wait_for_state(&mgr, org, ConnectionState::PendingAuth).await;

        loop {
            if let MessagingEvent::ReconnectScheduled { attempt, .. } = bus.recv().await.unwrap() {
                assert_eq!(attempt, 1);
                break;
            }
        }
        assert!(mgr.pairing_challenge(org).is_none());
        wait_for_state(&mgr, org, ConnectionState::Connecting).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_from_ready_reconnects() {
        let connector = MockConnector::auto_ready();
        let (mgr, _rx, events) = manager(connector.clone(), 3);
        let org = OrganizationId::new();
        mgr.connect(org).unwrap();
        wait_for_state(&mgr, org, ConnectionState::Ready).await;

        let mut bus = events.subscribe();
        connector
            .emit(TransportEvent::Disconnected {
                reason: "stream errored".into(),
            })
            .await;

        let mut transitions = Vec::new();
        loop {
            if let MessagingEvent::SessionStateChanged { to, .. } = bus.recv().await.unwrap() {
                transitions.push(to);
                if to == ConnectionState::Ready {
                    break;
                }
            }
        }
        assert_eq!(
            transitions,
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Authenticated,
                ConnectionState::Ready,
            ]
        );
        assert_eq!(connector.connects(), 2);
        assert_eq!(mgr.snapshot(org).reconnect_attempts, 0);
        assert!(connector.state.disconnects.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnects_end_in_fatal() {
        let connector = MockConnector::auto_ready();
        connector.state.failing_connects.store(u32::MAX, Ordering::SeqCst);
        let (mgr, _rx, events) = manager(connector.clone(), 3);
        let mut bus = events.subscribe();
        let org = OrganizationId::new();

        mgr.connect(org).unwrap();
        wait_for_state(&mgr, org, ConnectionState::Fatal).await;

        // The initial attempt plus three reconnects.
        assert_eq!(connector.connects(), 4);
        assert_eq!(mgr.snapshot(org).reconnect_attempts, 3);

        let mut exhausted = false;
        while let Ok(event) = bus.try_recv() {
            if let MessagingEvent::ReconnectExhausted { attempts, .. } = event {
                assert_eq!(attempts, 3);
                exhausted = true;
            }
        }
        assert!(exhausted);

        tokio::time::sleep(Duration::from_secs(60)).await;
        mgr.ensure_session(org);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.connects(), 4, "FATAL must not reconnect on its own");
        assert_eq!(mgr.snapshot(org).state, ConnectionState::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_recovers_from_fatal() {
        let connector = MockConnector::auto_ready();
        connector.state.failing_connects.store(2, Ordering::SeqCst);
        let (mgr, _rx, _events) = manager(connector.clone(), 1);
        let org = OrganizationId::new();

        mgr.connect(org).unwrap();
        wait_for_state(&mgr, org, ConnectionState::Fatal).await;

        assert_eq!(mgr.connect(org).unwrap(), ConnectOutcome::Started);
        assert_eq!(mgr.snapshot(org).reconnect_attempts, 0);
        wait_for_state(&mgr, org, ConnectionState::Ready).await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_ready_session() {
        let connector = MockConnector::auto_ready();
        let (mgr, _rx, _events) = manager(connector.clone(), 3);
        let org = OrganizationId::new();
        let payload = MessagePayload::text("hi");

        let err = mgr.send(org, &recipient(), &payload).await.unwrap_err();
        assert_eq!(err, SendError::SessionNotReady);

        mgr.connect(org).unwrap();
        wait_for_state(&mgr, org, ConnectionState::Ready).await;
        let receipt = mgr.send(org, &recipient(), &payload).await.unwrap();
        assert_eq!(receipt.external_id, "ext-5511999990000");
        assert_eq!(connector.state.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_releases_connection_and_stops_reconnects() {
        let connector = MockConnector::auto_ready();
        let (mgr, _rx, _events) = manager(connector.clone(), 3);
        let org = OrganizationId::new();
        mgr.connect(org).unwrap();
        wait_for_state(&mgr, org, ConnectionState::Ready).await;

        mgr.disconnect(org).await;
        assert_eq!(mgr.snapshot(org).state, ConnectionState::Disconnected);
        assert_eq!(connector.state.disconnects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.connects(), 1);
        let err = mgr.send(org, &recipient(), &MessagePayload::text("hi")).await.unwrap_err();
        assert_eq!(err, SendError::SessionNotReady);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_cancels_pending_reconnect_timer() {
        let connector = MockConnector::auto_ready();
        connector.state.failing_connects.store(1, Ordering::SeqCst);
        let (mgr, _rx, events) = manager(connector.clone(), 3);
        let mut bus = events.subscribe();
        let org = OrganizationId::new();

        mgr.connect(org).unwrap();
        loop {
            if let MessagingEvent::ReconnectScheduled { .. } = bus.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(mgr.snapshot(org).state, ConnectionState::Disconnected);

        assert_eq!(mgr.connect(org).unwrap(), ConnectOutcome::Started);
        wait_for_state(&mgr, org, ConnectionState::Ready).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.connects(), 2, "the cancelled timer must not connect again");
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_session_starts_disconnected_session_once() {
        let connector = MockConnector::auto_ready();
        let (mgr, _rx, _events) = manager(connector.clone(), 3);
        let org = OrganizationId::new();

        mgr.ensure_session(org);
        mgr.ensure_session(org);
        mgr.wait_until_ready(org).await;
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_reach_incoming_queue() {
        let connector = MockConnector::auto_ready();
        let (mgr, mut rx, _events) = manager(connector.clone(), 3);
        let org = OrganizationId::new();
        mgr.connect(org).unwrap();
        wait_for_state(&mgr, org, ConnectionState::Ready).await;

        connector
            .emit(TransportEvent::Message(InboundEvent {
                id: "M1".into(),
                from: "5511999990000@c.us".into(),
                to: "5511888880000@c.us".into(),
                body: "hello".into(),
                timestamp: 1_700_000_000,
                has_media: false,
                kind: InboundKind::Chat,
            }))
            .await;

        let envelope = rx.pop().await.unwrap();
        assert_eq!(envelope.organization_id, org);
        assert_eq!(envelope.event.id, "M1");
    }

    #[tokio::test(start_paused = true)]
    async fn list_reports_every_known_session() {
        let connector = MockConnector::auto_ready();
        let (mgr, _rx, _events) = manager(connector, 3);
        let a = OrganizationId::new();
        let b = OrganizationId::new();
        mgr.connect(a).unwrap();
        let _ = mgr.subscribe(b);

        let sessions = mgr.list();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().any(|s| s.organization_id == b && s.state == ConnectionState::Disconnected));
    }
}
