//! The per-organization connection task.
//!
//! One driver runs per organization while a session is wanted. It opens the
//! transport, walks the handshake, pushes inbound traffic into the incoming
//! queue, and on any failure schedules a reconnect with backoff until the
//! reconnect policy runs out, at which point the session becomes FATAL.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use courier_types::event::MessagingEvent;
use courier_types::organization::OrganizationId;
use courier_types::session::{ConnectionState, PairingChallenge};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::incoming;
use crate::retry::RetryHandler;
use crate::transport::{TransportConnection, TransportConnector, TransportEvent, TransportLink};

use super::manager::{SessionSlot, Shared};

pub(super) async fn run<C: TransportConnector>(
    shared: Arc<Shared<C>>,
    organization_id: OrganizationId,
    slot: Arc<SessionSlot<C::Link>>,
    generation: u64,
    cancel: CancellationToken,
) {
    if let Some(stale) = slot.take_link() {
        stale.disconnect().await;
    }
    let policy = shared.config.reconnect;

    loop {
        let reason = tokio::select! {
            _ = cancel.cancelled() => return,
            reason = connection(&shared, organization_id, &slot, generation) => reason,
        };
        if let Some(link) = slot.take_link() {
            link.disconnect().await;
        }
        if cancel.is_cancelled() || !slot.is_current(generation) {
            return;
        }

        let proceed = shared.transition(&slot, generation, |s| {
            s.state = ConnectionState::Disconnected;
            s.pairing_challenge = None;
        });
        if !proceed {
            return;
        }

        let attempts = slot.reconnect_attempts();
        if attempts >= policy.max_attempts {
            tracing::error!(
                %organization_id,
                attempts,
                last_error = %reason,
                "reconnect attempts exhausted, session is fatal"
            );
            shared.events.publish(MessagingEvent::ReconnectExhausted {
                organization_id,
                attempts,
                last_error: reason,
            });
            shared.transition(&slot, generation, |s| s.state = ConnectionState::Fatal);
            return;
        }

        let attempt = attempts + 1;
        let delay = RetryHandler::delay_for(&policy, attempt);
        shared.transition(&slot, generation, |s| s.reconnect_attempts = attempt);
        tracing::warn!(
            %organization_id,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "session lost, reconnect scheduled"
        );
        shared.events.publish(MessagingEvent::ReconnectScheduled {
            organization_id,
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if !shared.transition(&slot, generation, |s| s.state = ConnectionState::Connecting) {
            return;
        }
    }
}

/// Drive one connection from open to close. Returns why it ended.
async fn connection<C: TransportConnector>(
    shared: &Shared<C>,
    organization_id: OrganizationId,
    slot: &SessionSlot<C::Link>,
    generation: u64,
) -> String {
    let connect_timeout = shared.config.connect_timeout();
    let pairing_timeout = shared.config.pairing_timeout();

    let opened = tokio::time::timeout(connect_timeout, shared.connector.connect(organization_id)).await;
    let TransportConnection { link, mut events } = match opened {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => return format!("connect failed: {e}"),
        Err(_) => return format!("connect timed out after {connect_timeout:?}"),
    };
    slot.set_link(Arc::new(link));
    tracing::debug!(%organization_id, "transport open, awaiting handshake");

    let mut deadline = Some(Instant::now() + connect_timeout);
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = sleep_until(deadline) => {
                return if slot.state() == ConnectionState::PendingAuth {
                    "pairing challenge expired".to_string()
                } else {
                    "handshake timed out".to_string()
                };
            }
        };

        match event {
            None => return "transport event stream closed".to_string(),
            Some(TransportEvent::PairingChallenge(code)) => {
                let issued_at = Utc::now();
                let expires_at = issued_at + TimeDelta::from_std(pairing_timeout).unwrap_or(TimeDelta::zero());
                shared.transition(slot, generation, |s| {
                    s.state = ConnectionState::PendingAuth;
                    s.pairing_challenge = Some(PairingChallenge {
                        code,
                        issued_at,
                        expires_at,
                    });
                });
                tracing::info!(%organization_id, %expires_at, "pairing challenge issued");
                shared.events.publish(MessagingEvent::PairingChallengeIssued {
                    organization_id,
                    expires_at,
                });
                deadline = Some(Instant::now() + pairing_timeout);
            }
            Some(TransportEvent::Authenticated) => {
                shared.transition(slot, generation, |s| {
                    s.state = ConnectionState::Authenticated;
                    s.pairing_challenge = None;
                    s.reconnect_attempts = 0;
                    s.last_authenticated_at = Some(Utc::now());
                });
                deadline = Some(Instant::now() + connect_timeout);
            }
            Some(TransportEvent::Ready) => {
                shared.transition(slot, generation, |s| {
                    if s.state != ConnectionState::Authenticated {
                        s.reconnect_attempts = 0;
                        s.last_authenticated_at = Some(Utc::now());
                    }
                    s.state = ConnectionState::Ready;
                    s.pairing_challenge = None;
                });
                deadline = None;
            }
            Some(TransportEvent::Message(event)) => {
                if let Err(e) = shared.inbound.push(organization_id, event).await {
                    incoming::dead_letter(e.envelope(), &e.to_string(), &shared.events);
                }
            }
            Some(TransportEvent::Disconnected { reason }) => return reason,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
