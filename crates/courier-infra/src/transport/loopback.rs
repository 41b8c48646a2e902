//! In-process transport for development and integration tests.
//!
//! `LoopbackConnector` behaves like the remote network from the session's
//! point of view: an unpaired organization gets a pairing challenge, a
//! confirmed pairing authenticates and becomes ready, and paired
//! organizations go straight to ready on reconnect. Operators (or tests)
//! drive the other side through `confirm_pairing`, `inject_inbound` and
//! `drop_connection`; delivered sends are recorded in an outbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use courier_core::transport::{SendReceipt, TransportConnection, TransportConnector, TransportEvent, TransportLink};
use courier_types::error::TransportError;
use courier_types::inbound::InboundEvent;
use courier_types::job::MessagePayload;
use courier_types::organization::OrganizationId;
use courier_types::recipient::Recipient;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Buffered transport events per connection.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopbackError {
    #[error("organization has no open loopback connection")]
    NotConnected,

    #[error("no pairing challenge is pending")]
    NoPendingPairing,

    #[error("pairing code does not match")]
    WrongCode,

    #[error("session stopped reading transport events")]
    ChannelClosed,
}

/// A message the loopback network accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub organization_id: OrganizationId,
    pub recipient: Recipient,
    pub payload: MessagePayload,
    pub external_id: String,
    pub sent_at: DateTime<Utc>,
}

struct LiveConnection {
    id: u64,
    events: mpsc::Sender<TransportEvent>,
    pairing_code: Option<String>,
}

#[derive(Default)]
struct LoopbackInner {
    paired: DashSet<OrganizationId>,
    unreachable: DashSet<OrganizationId>,
    send_failures: DashMap<OrganizationId, TransportError>,
    connections: DashMap<OrganizationId, LiveConnection>,
    outbox: DashMap<OrganizationId, Vec<SentMessage>>,
    next_connection: AtomicU64,
}

impl LoopbackInner {
    fn sender(&self, organization_id: OrganizationId) -> Result<mpsc::Sender<TransportEvent>, LoopbackError> {
        self.connections
            .get(&organization_id)
            .map(|conn| conn.events.clone())
            .ok_or(LoopbackError::NotConnected)
    }
}

/// Cloning is cheap; clones share the same simulated network.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    inner: Arc<LoopbackInner>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat the organization as already linked, so connects skip pairing.
    pub fn mark_paired(&self, organization_id: OrganizationId) {
        self.inner.paired.insert(organization_id);
    }

    pub fn is_paired(&self, organization_id: OrganizationId) -> bool {
        self.inner.paired.contains(&organization_id)
    }

    pub fn is_connected(&self, organization_id: OrganizationId) -> bool {
        self.inner.connections.contains_key(&organization_id)
    }

    /// The code the open connection is waiting on, if any.
    pub fn pending_pairing_code(&self, organization_id: OrganizationId) -> Option<String> {
        self.inner
            .connections
            .get(&organization_id)
            .and_then(|conn| conn.pairing_code.clone())
    }

    /// Consume the pairing challenge: the connection authenticates and
    /// becomes ready, and later connects skip pairing.
    pub async fn confirm_pairing(&self, organization_id: OrganizationId, code: &str) -> Result<(), LoopbackError> {
        let events = {
            let mut conn = self
                .inner
                .connections
                .get_mut(&organization_id)
                .ok_or(LoopbackError::NotConnected)?;
            match conn.pairing_code.as_deref() {
                None => return Err(LoopbackError::NoPendingPairing),
                Some(expected) if expected != code.trim() => return Err(LoopbackError::WrongCode),
                Some(_) => {}
            }
            conn.pairing_code = None;
            conn.events.clone()
        };
        self.inner.paired.insert(organization_id);
        tracing::info!(%organization_id, "loopback pairing confirmed");

        for event in [TransportEvent::Authenticated, TransportEvent::Ready] {
            events.send(event).await.map_err(|_| LoopbackError::ChannelClosed)?;
        }
        Ok(())
    }

    /// Deliver an inbound message on the organization's connection.
    pub async fn inject_inbound(&self, organization_id: OrganizationId, event: InboundEvent) -> Result<(), LoopbackError> {
        let events = self.inner.sender(organization_id)?;
        events
            .send(TransportEvent::Message(event))
            .await
            .map_err(|_| LoopbackError::ChannelClosed)
    }

    /// Close the connection from the network side.
    pub async fn drop_connection(&self, organization_id: OrganizationId, reason: &str) -> Result<(), LoopbackError> {
        let (_, conn) = self
            .inner
            .connections
            .remove(&organization_id)
            .ok_or(LoopbackError::NotConnected)?;
        tracing::info!(%organization_id, reason, "loopback connection dropped");
        // The session may already have stopped listening.
        let _ = conn
            .events
            .send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            })
            .await;
        Ok(())
    }

    /// Make every send for the organization fail with `error` until cleared.
    pub fn fail_sends(&self, organization_id: OrganizationId, error: TransportError) {
        self.inner.send_failures.insert(organization_id, error);
    }

    pub fn clear_send_failures(&self, organization_id: OrganizationId) {
        self.inner.send_failures.remove(&organization_id);
    }

    /// Refuse (or allow again) new connections for the organization.
    pub fn set_unreachable(&self, organization_id: OrganizationId, unreachable: bool) {
        if unreachable {
            self.inner.unreachable.insert(organization_id);
        } else {
            self.inner.unreachable.remove(&organization_id);
        }
    }

    /// Messages delivered for the organization, in delivery order.
    pub fn sent(&self, organization_id: OrganizationId) -> Vec<SentMessage> {
        self.inner
            .outbox
            .get(&organization_id)
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl TransportConnector for LoopbackConnector {
    type Link = LoopbackLink;

    async fn connect(&self, organization_id: OrganizationId) -> Result<TransportConnection<LoopbackLink>, TransportError> {
        if self.inner.unreachable.contains(&organization_id) {
            return Err(TransportError::Network("loopback network unreachable".into()));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pairing_code = if self.is_paired(organization_id) {
            tx.send(TransportEvent::Authenticated).await.map_err(|_| TransportError::Closed)?;
            tx.send(TransportEvent::Ready).await.map_err(|_| TransportError::Closed)?;
            None
        } else {
            let code = pairing_code();
            tx.send(TransportEvent::PairingChallenge(code.clone()))
                .await
                .map_err(|_| TransportError::Closed)?;
            Some(code)
        };

        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        self.inner.connections.insert(
            organization_id,
            LiveConnection {
                id,
                events: tx,
                pairing_code,
            },
        );
        tracing::debug!(%organization_id, connection = id, "loopback connection opened");

        Ok(TransportConnection {
            link: LoopbackLink {
                organization_id,
                connection: id,
                inner: Arc::clone(&self.inner),
            },
            events: rx,
        })
    }
}

/// Send half of one loopback connection.
pub struct LoopbackLink {
    organization_id: OrganizationId,
    connection: u64,
    inner: Arc<LoopbackInner>,
}

impl LoopbackLink {
    fn is_open(&self) -> bool {
        self.inner
            .connections
            .get(&self.organization_id)
            .is_some_and(|conn| conn.id == self.connection)
    }
}

impl TransportLink for LoopbackLink {
    async fn send(&self, recipient: &Recipient, payload: &MessagePayload) -> Result<SendReceipt, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if let Some(error) = self.inner.send_failures.get(&self.organization_id) {
            return Err(error.clone());
        }

        let external_id = format!("loopback-{}", Uuid::now_v7().simple());
        self.inner
            .outbox
            .entry(self.organization_id)
            .or_default()
            .push(SentMessage {
                organization_id: self.organization_id,
                recipient: recipient.clone(),
                payload: payload.clone(),
                external_id: external_id.clone(),
                sent_at: Utc::now(),
            });
        Ok(SendReceipt { external_id })
    }

    async fn disconnect(&self) {
        self.inner
            .connections
            .remove_if(&self.organization_id, |_, conn| conn.id == self.connection);
    }
}

/// Eight characters taken from the random tail of a v7 UUID.
fn pairing_code() -> String {
    let id = Uuid::now_v7().simple().to_string();
    id[id.len() - 8..].to_uppercase()
}
