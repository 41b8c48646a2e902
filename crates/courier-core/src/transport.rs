//! Transport port: the opaque connection to the remote messaging network.
//!
//! The wire protocol is out of scope. A [`TransportConnector`] opens one
//! connection per organization and hands back a [`TransportLink`] for sends
//! plus a channel of [`TransportEvent`]s describing the handshake and inbound
//! traffic. Implementations live in courier-infra (e.g., `LoopbackConnector`).

use courier_types::error::{SendError, TransportError};
use courier_types::inbound::InboundEvent;
use courier_types::job::MessagePayload;
use courier_types::organization::OrganizationId;
use courier_types::recipient::Recipient;
use tokio::sync::mpsc;

/// Something the remote side reported on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The account is not linked; the operator must consume this code.
    /// A later challenge replaces the previous one.
    PairingChallenge(String),
    /// Credentials accepted.
    Authenticated,
    /// The connection can carry messages.
    Ready,
    Message(InboundEvent),
    /// The remote side or the network closed the connection.
    Disconnected { reason: String },
}

/// Acknowledgement of a delivered send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Network-assigned id of the outbound message.
    pub external_id: String,
}

/// A freshly opened connection.
pub struct TransportConnection<L> {
    pub link: L,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The send half of an open connection.
pub trait TransportLink: Send + Sync + 'static {
    fn send(
        &self,
        recipient: &Recipient,
        payload: &MessagePayload,
    ) -> impl std::future::Future<Output = Result<SendReceipt, TransportError>> + Send;

    /// Close the connection. Idempotent.
    fn disconnect(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Opens connections for organizations.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TransportConnector: Send + Sync + 'static {
    type Link: TransportLink;

    fn connect(
        &self,
        organization_id: OrganizationId,
    ) -> impl std::future::Future<Output = Result<TransportConnection<Self::Link>, TransportError>> + Send;
}

/// The send path the outbound queue drives. Implemented by `SessionManager`,
/// which keeps the connection handle to itself.
pub trait MessageSender: Send + Sync + 'static {
    fn is_ready(&self, organization_id: OrganizationId) -> bool;

    /// Resolve once the organization's session is READY.
    fn wait_until_ready(&self, organization_id: OrganizationId) -> impl std::future::Future<Output = ()> + Send;

    /// Start a session on demand if none is running.
    fn ensure_session(&self, organization_id: OrganizationId);

    fn send(
        &self,
        organization_id: OrganizationId,
        recipient: &Recipient,
        payload: &MessagePayload,
    ) -> impl std::future::Future<Output = Result<SendReceipt, SendError>> + Send;
}
