//! Wiring of the messaging components into one running unit.
//!
//! `MessagingRuntime::start` builds the event bus, the incoming queue, the
//! session manager, the rate limiter, the outgoing queue and the agent API,
//! restores queued work from the job store and spawns the inbound consumer. Callers hold the runtime for its whole
//! life and call [`MessagingRuntime::shutdown`] once on exit.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use courier_types::config::CourierConfig;
use courier_types::error::QueueError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentApi;
use crate::event::bus::EventBus;
use crate::handler::MessageHandler;
use crate::incoming::IncomingQueue;
use crate::outgoing::OutgoingQueue;
use crate::rate_limit::RateLimiter;
use crate::repository::job::JobStore;
use crate::repository::message::MessageStore;
use crate::repository::notifier::AgentNotifier;
use crate::repository::settings::{ConfirmationValidator, SettingsProvider};
use crate::session::SessionManager;
use crate::transport::TransportConnector;

/// How often finished jobs are swept from the outgoing queue.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// How long a finished job stays visible through `job` / `jobs_for`.
const FINISHED_JOB_RETENTION_MINUTES: i64 = 60;

pub struct MessagingRuntime<C: TransportConnector, J: JobStore, P: SettingsProvider, V: ConfirmationValidator> {
    pub events: EventBus,
    pub sessions: SessionManager<C>,
    pub limiter: Arc<RateLimiter>,
    pub outgoing: OutgoingQueue<SessionManager<C>, J>,
    pub incoming: IncomingQueue,
    pub agent: AgentApi<SessionManager<C>, J, P, V>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C, J, P, V> MessagingRuntime<C, J, P, V>
where
    C: TransportConnector,
    J: JobStore,
    P: SettingsProvider,
    V: ConfirmationValidator,
{
    /// Build every component, restore unfinished jobs and spawn the
    /// background tasks. Must be called inside a tokio runtime.
    ///
    /// Fails only if the job store cannot be read.
    pub async fn start<St, N>(
        config: &CourierConfig,
        connector: C,
        jobs: J,
        store: St,
        notifier: N,
        settings: P,
        validator: V,
    ) -> Result<Self, QueueError>
    where
        St: MessageStore,
        N: AgentNotifier,
    {
        let events = EventBus::default();
        let (incoming, receiver) = IncomingQueue::new(config.incoming.capacity, config.incoming.push_timeout());
        let sessions = SessionManager::new(connector, config.session.clone(), incoming.clone(), events.clone());
        let limiter = Arc::new(RateLimiter::default());
        let outgoing = OutgoingQueue::new(
            Arc::new(sessions.clone()),
            Arc::clone(&limiter),
            jobs,
            config.outgoing.clone(),
            events.clone(),
        );
        let agent = AgentApi::new(outgoing.clone(), Arc::clone(&limiter), settings, validator);

        // Restored work resumes under the organization's stored limits, not the defaults.
        for organization_id in outgoing.restore().await? {
            if let Err(e) = agent.reload_settings(organization_id).await {
                tracing::warn!(%organization_id, error = %e, "using default rate limits for restored jobs");
            }
        }

        let cancel = CancellationToken::new();
        let handler = MessageHandler::new(store, notifier, events.clone(), config.incoming.persistence_retry);
        let handler_cancel = cancel.child_token();
        let handler_task = tokio::spawn(async move { handler.run(receiver, handler_cancel).await });

        let purge_queue = outgoing.clone();
        let purge_cancel = cancel.child_token();
        let purge_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                tokio::select! {
                    _ = purge_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = purge_queue
                            .purge_finished(chrono::Duration::minutes(FINISHED_JOB_RETENTION_MINUTES))
                            .await;
                        if removed > 0 {
                            tracing::debug!(removed, "purged finished jobs");
                        }
                    }
                }
            }
        });

        tracing::info!(
            incoming_capacity = config.incoming.capacity,
            max_reconnect_attempts = config.session.reconnect.max_attempts,
            "messaging runtime started"
        );

        Ok(Self {
            events,
            sessions,
            limiter,
            outgoing,
            incoming,
            agent,
            cancel,
            tasks: Mutex::new(vec![handler_task, purge_task]),
        })
    }

    /// Stop in dependency order: dispatchers and their in-flight sends,
    /// then every session so nothing new arrives, then the inbound consumer
    /// once it has handled what the sessions buffered.
    pub async fn shutdown(&self) {
        self.outgoing.shutdown();
        self.outgoing.drain().await;
        self.sessions.shutdown().await;
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!("messaging background task panicked");
            }
        }
        tracing::info!("messaging runtime stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
