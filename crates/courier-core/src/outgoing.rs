//! The outbound send queue.
//!
//! Jobs are written to the [`JobStore`] and then admitted in O(1) into their
//! organization's lane. Each lane has one dispatcher task, spawned the first
//! time the organization has work. The dispatcher only ever looks at the head
//! of its lane: it waits for the session, honours retry backoff, asks the
//! [`RateLimiter`] for a slot and then hands the job to a spawned send so up
//! to `concurrency` sends run at once.
//!
//! Lanes are kept in enqueue-sequence order. A job that has to be retried
//! goes back to its own position, so nothing newer overtakes it no matter in
//! which order concurrent sends finish.
//!
//! The store is written on admission, on hand-off and on every outcome.
//! [`OutgoingQueue::restore`] reloads unfinished jobs and the recent send
//! history after a restart.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use courier_types::config::OutgoingConfig;
use courier_types::error::{QueueError, RepositoryError, SendError};
use courier_types::event::MessagingEvent;
use courier_types::job::{CancelOutcome, JobId, JobStatus, SendJob};
use courier_types::organization::OrganizationId;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::event::bus::EventBus;
use crate::rate_limit::{Admission, RateLimiter};
use crate::repository::job::{JobStore, StoredJob};
use crate::retry::RetryHandler;
use crate::transport::{MessageSender, SendReceipt};

/// Job counts for one organization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
}

fn storage_error(error: RepositoryError) -> QueueError {
    QueueError::Storage(error.to_string())
}

// ---------------------------------------------------------------------------
// Lane
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct QueuedJob {
    id: JobId,
    sequence: u64,
    /// Earliest dispatch time after a failed attempt.
    not_before: Option<Instant>,
}

/// One organization's pending jobs, ordered by sequence.
#[derive(Default)]
struct Lane {
    pending: Mutex<VecDeque<QueuedJob>>,
    wake: Notify,
}

impl Lane {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedJob>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn head(&self) -> Option<QueuedJob> {
        self.lock().front().copied()
    }

    /// Place a job at its sequence position.
    fn insert(&self, job: QueuedJob) {
        {
            let mut pending = self.lock();
            let index = pending.partition_point(|q| q.sequence < job.sequence);
            pending.insert(index, job);
        }
        self.wake.notify_one();
    }

    fn remove(&self, id: JobId) -> Option<QueuedJob> {
        let removed = {
            let mut pending = self.lock();
            pending
                .iter()
                .position(|q| q.id == id)
                .and_then(|index| pending.remove(index))
        };
        self.wake.notify_one();
        removed
    }
}

// ---------------------------------------------------------------------------
// OutgoingQueue
// ---------------------------------------------------------------------------

struct Tracked {
    job: SendJob,
    sequence: u64,
}

struct QueueInner<S: MessageSender, J: JobStore> {
    sender: Arc<S>,
    limiter: Arc<RateLimiter>,
    store: J,
    events: EventBus,
    config: OutgoingConfig,
    jobs: DashMap<JobId, Tracked>,
    lanes: DashMap<OrganizationId, Arc<Lane>>,
    next_sequence: AtomicU64,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Rate-limited, durable, per-organization FIFO of send jobs.
///
/// Cloning is cheap; clones share the same queue.
pub struct OutgoingQueue<S: MessageSender, J: JobStore> {
    inner: Arc<QueueInner<S, J>>,
}

impl<S: MessageSender, J: JobStore> Clone for OutgoingQueue<S, J> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MessageSender, J: JobStore> OutgoingQueue<S, J> {
    pub fn new(sender: Arc<S>, limiter: Arc<RateLimiter>, store: J, config: OutgoingConfig, events: EventBus) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                sender,
                limiter,
                store,
                events,
                config,
                jobs: DashMap::new(),
                lanes: DashMap::new(),
                next_sequence: AtomicU64::new(0),
                dispatchers: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Fails with `ShutDown` once the queue no longer admits work.
    pub fn ensure_open(&self) -> Result<(), QueueError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(QueueError::ShutDown);
        }
        Ok(())
    }

    /// Record the job as PENDING at the tail of its organization's lane.
    pub async fn enqueue(&self, job: SendJob) -> Result<JobId, QueueError> {
        let id = job.id;
        self.enqueue_batch(vec![job]).await?;
        Ok(id)
    }

    /// Record several jobs in one store write. Either all of them are
    /// admitted, in the given order, or none is.
    pub async fn enqueue_batch(&self, jobs: Vec<SendJob>) -> Result<Vec<JobId>, QueueError> {
        self.ensure_open()?;
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let stored: Vec<StoredJob> = jobs
            .into_iter()
            .map(|mut job| {
                job.status = JobStatus::Pending;
                StoredJob {
                    job,
                    sequence: self.inner.next_sequence.fetch_add(1, Ordering::SeqCst),
                }
            })
            .collect();

        if let Err(e) = self.inner.store.insert_jobs(&stored).await {
            tracing::error!(jobs = stored.len(), error = %e, "failed to record send jobs");
            return Err(storage_error(e));
        }

        let ids = stored.iter().map(|s| s.job.id).collect();
        for StoredJob { job, sequence } in stored {
            tracing::debug!(organization_id = %job.organization_id, job_id = %job.id, sequence, "job enqueued");
            self.track(job, sequence);
        }
        Ok(ids)
    }

    fn track(&self, job: SendJob, sequence: u64) {
        let id = job.id;
        let organization_id = job.organization_id;
        self.inner.jobs.insert(id, Tracked { job, sequence });
        self.lane(organization_id).insert(QueuedJob {
            id,
            sequence,
            not_before: None,
        });
    }

    fn lane(&self, organization_id: OrganizationId) -> Arc<Lane> {
        self.inner
            .lanes
            .entry(organization_id)
            .or_insert_with(|| {
                let lane = Arc::new(Lane::default());
                let task = tokio::spawn(dispatch(Arc::clone(&self.inner), organization_id, Arc::clone(&lane)));
                self.inner
                    .dispatchers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(task);
                lane
            })
            .clone()
    }

    /// Reload unfinished jobs and the last day of send attempts from the
    /// store. Call once, before new work is enqueued. Returns the
    /// organizations that got jobs back.
    pub async fn restore(&self) -> Result<Vec<OrganizationId>, QueueError> {
        let now = Utc::now();
        let attempted = self
            .inner
            .store
            .load_attempted_since(now - chrono::Duration::days(1))
            .await
            .map_err(storage_error)?;
        for job in &attempted {
            let Some(at) = job.last_attempt_at else {
                continue;
            };
            let age = (now - at).to_std().unwrap_or_default();
            // Earlier attempts are counted at the latest attempt's time.
            for _ in 0..job.attempts.max(1) {
                self.inner.limiter.restore_admission(job.organization_id, age);
            }
        }

        let unfinished = self.inner.store.load_unfinished().await.map_err(storage_error)?;
        let next = unfinished.iter().map(|s| s.sequence + 1).max().unwrap_or(0);
        self.inner.next_sequence.fetch_max(next, Ordering::SeqCst);

        let mut organizations = Vec::new();
        let restored = unfinished.len();
        for StoredJob { mut job, sequence } in unfinished {
            if job.status == JobStatus::InFlight {
                tracing::warn!(
                    organization_id = %job.organization_id,
                    job_id = %job.id,
                    "job was in flight when the queue stopped, sending again"
                );
                job.status = JobStatus::Pending;
            }
            if !organizations.contains(&job.organization_id) {
                organizations.push(job.organization_id);
            }
            self.track(job, sequence);
        }
        tracing::info!(
            restored,
            organizations = organizations.len(),
            recent_attempts = attempted.len(),
            "outgoing queue restored"
        );
        Ok(organizations)
    }

    /// Cancel a job that has not been handed to the transport yet. The
    /// cancellation only takes effect once it is stored.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, QueueError> {
        let (previous, cancelled) = {
            let mut tracked = self
                .inner
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
            match tracked.job.status {
                JobStatus::Pending => {
                    let previous = tracked.job.clone();
                    tracked.job.status = JobStatus::Cancelled;
                    tracked.job.completed_at = Some(Utc::now());
                    (previous, tracked.job.clone())
                }
                JobStatus::InFlight => return Ok(CancelOutcome::InFlight),
                status => return Ok(CancelOutcome::AlreadyFinished { status }),
            }
        };
        let organization_id = cancelled.organization_id;
        let lane = self.inner.lanes.get(&organization_id).map(|lane| Arc::clone(&lane));
        let queued = lane.as_ref().and_then(|lane| lane.remove(job_id));

        if let Err(e) = self.inner.store.update_job(&cancelled).await {
            tracing::error!(%organization_id, %job_id, error = %e, "failed to store cancellation, job stays pending");
            if let Some(mut tracked) = self.inner.jobs.get_mut(&job_id)
                && tracked.job.status == JobStatus::Cancelled
            {
                tracked.job = previous;
            }
            if let (Some(lane), Some(queued)) = (lane, queued) {
                lane.insert(queued);
            }
            return Err(storage_error(e));
        }

        tracing::info!(%organization_id, %job_id, "job cancelled");
        self.inner.events.publish(MessagingEvent::JobCancelled {
            organization_id,
            job_id,
        });
        Ok(CancelOutcome::Cancelled)
    }

    pub fn job(&self, job_id: JobId) -> Option<SendJob> {
        self.inner.jobs.get(&job_id).map(|tracked| tracked.job.clone())
    }

    /// Every known job for the organization, oldest first.
    pub fn jobs_for(&self, organization_id: OrganizationId) -> Vec<SendJob> {
        let mut jobs: Vec<(u64, SendJob)> = self
            .inner
            .jobs
            .iter()
            .filter(|tracked| tracked.job.organization_id == organization_id)
            .map(|tracked| (tracked.sequence, tracked.job.clone()))
            .collect();
        jobs.sort_by_key(|(sequence, _)| *sequence);
        jobs.into_iter().map(|(_, job)| job).collect()
    }

    pub fn stats(&self, organization_id: OrganizationId) -> QueueStats {
        let mut stats = QueueStats::default();
        for tracked in self
            .inner
            .jobs
            .iter()
            .filter(|tracked| tracked.job.organization_id == organization_id)
        {
            match tracked.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::InFlight => stats.in_flight += 1,
                JobStatus::Sent => stats.sent += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Forget terminal jobs that finished more than `older_than` ago.
    ///
    /// Stored rows are kept for at least a day so a restart can rebuild the
    /// day window. Returns how many jobs left memory.
    pub async fn purge_finished(&self, older_than: chrono::Duration) -> usize {
        let now = Utc::now();
        let cutoff = now - older_than;
        let before = self.inner.jobs.len();
        self.inner.jobs.retain(|_, tracked| {
            !(tracked.job.status.is_terminal() && tracked.job.completed_at.is_some_and(|at| at < cutoff))
        });
        let removed = before - self.inner.jobs.len();

        let stored_cutoff = now - older_than.max(chrono::Duration::days(1));
        match self.inner.store.purge_finished(stored_cutoff).await {
            Ok(0) => {}
            Ok(rows) => tracing::debug!(rows, "purged stored jobs"),
            Err(e) => tracing::warn!(error = %e, "failed to purge stored jobs"),
        }
        removed
    }

    /// Stop every dispatcher. Sends already handed to the transport finish;
    /// pending jobs stay PENDING in the store.
    pub fn shutdown(&self) {
        tracing::info!(lanes = self.inner.lanes.len(), "outgoing queue shutting down");
        self.inner.shutdown.cancel();
    }

    /// Wait until every dispatcher has stopped and its in-flight sends have
    /// recorded their outcome. Only returns after [`OutgoingQueue::shutdown`].
    pub async fn drain(&self) {
        let tasks = std::mem::take(&mut *self.inner.dispatchers.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!("outgoing dispatcher panicked");
            }
        }
    }
}

impl<S: MessageSender, J: JobStore> std::fmt::Debug for OutgoingQueue<S, J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingQueue")
            .field("jobs", &self.inner.jobs.len())
            .field("lanes", &self.inner.lanes.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

async fn dispatch<S: MessageSender, J: JobStore>(
    inner: Arc<QueueInner<S, J>>,
    organization_id: OrganizationId,
    lane: Arc<Lane>,
) {
    let mut sends = JoinSet::new();
    tracing::debug!(%organization_id, "dispatcher started");

    loop {
        while let Some(finished) = sends.try_join_next() {
            log_send_panic(organization_id, finished);
        }
        if inner.shutdown.is_cancelled() {
            break;
        }

        let Some(head) = lane.head() else {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = lane.wake.notified() => {}
                Some(finished) = sends.join_next(), if !sends.is_empty() => log_send_panic(organization_id, finished),
            }
            continue;
        };

        if let Some(not_before) = head.not_before
            && not_before > Instant::now()
        {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(not_before) => {}
                _ = lane.wake.notified() => {}
            }
            continue;
        }

        if !inner.sender.is_ready(organization_id) {
            inner.sender.ensure_session(organization_id);
            tracing::debug!(%organization_id, job_id = %head.id, "waiting for session to become ready");
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = inner.sender.wait_until_ready(organization_id) => {}
                _ = lane.wake.notified() => {}
            }
            continue;
        }

        let Some(admission) = inner.limiter.admit(organization_id) else {
            let wait = inner
                .limiter
                .retry_after(organization_id)
                .unwrap_or_else(|| inner.config.throttle_backoff());
            tracing::trace!(%organization_id, wait_ms = wait.as_millis() as u64, "throttled");
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
                Some(finished) = sends.join_next(), if !sends.is_empty() => log_send_panic(organization_id, finished),
            }
            continue;
        };

        match inner.claim(&lane, head.id) {
            Some(job) => {
                let inner = Arc::clone(&inner);
                let lane = Arc::clone(&lane);
                sends.spawn(async move { inner.execute(&lane, job, head.sequence, admission).await });
            }
            // Cancelled between peek and claim: nothing was sent.
            None => inner.limiter.refund(admission),
        }
    }

    while let Some(finished) = sends.join_next().await {
        log_send_panic(organization_id, finished);
    }
    tracing::debug!(%organization_id, "dispatcher stopped");
}

fn log_send_panic(organization_id: OrganizationId, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(%organization_id, error = %e, "send task failed");
    }
}

impl<S: MessageSender, J: JobStore> QueueInner<S, J> {
    /// Pop `id` off the head of the lane and mark it IN_FLIGHT.
    ///
    /// Returns `None` if the head changed or the job is no longer pending.
    fn claim(&self, lane: &Lane, id: JobId) -> Option<SendJob> {
        let mut pending = lane.lock();
        if pending.front().map(|q| q.id) != Some(id) {
            return None;
        }
        pending.pop_front();
        let mut tracked = self.jobs.get_mut(&id)?;
        if tracked.job.status != JobStatus::Pending {
            return None;
        }
        tracked.job.status = JobStatus::InFlight;
        tracked.job.attempts += 1;
        tracked.job.last_attempt_at = Some(Utc::now());
        Some(tracked.job.clone())
    }

    async fn execute(&self, lane: &Lane, job: SendJob, sequence: u64, admission: Admission) {
        self.persist(&job).await;
        let result = self.sender.send(job.organization_id, &job.recipient, &job.payload).await;
        let reached_transport = !matches!(result, Err(SendError::SessionNotReady));

        let (updated, requeue) = self.record_outcome(&job, sequence, result);
        // Stored, then requeued, then the slot freed: a newer job never
        // gets the slot while a retried one is off the lane.
        if let Some(updated) = updated {
            self.persist(&updated).await;
        }
        if let Some(requeue) = requeue {
            lane.insert(requeue);
        }
        if reached_transport {
            self.limiter.release(job.organization_id);
        } else {
            self.limiter.refund(admission);
        }
    }

    /// Write a job's current state to the store, retrying transient errors.
    async fn persist(&self, job: &SendJob) {
        let stored = RetryHandler::run(
            &self.config.persistence_retry,
            "persist send job",
            RepositoryError::is_transient,
            |_| self.store.update_job(job),
        )
        .await;
        if let Err(e) = stored {
            tracing::error!(
                organization_id = %job.organization_id,
                job_id = %job.id,
                status = %job.status,
                error = %e,
                "failed to persist send job"
            );
        }
    }

    /// Apply a send result to the job table. Returns the updated job and,
    /// when it goes back to PENDING, its lane entry.
    fn record_outcome(
        &self,
        job: &SendJob,
        sequence: u64,
        result: Result<SendReceipt, SendError>,
    ) -> (Option<SendJob>, Option<QueuedJob>) {
        let organization_id = job.organization_id;
        let Some(mut tracked) = self.jobs.get_mut(&job.id) else {
            return (None, None);
        };
        let entry = &mut tracked.job;
        match result {
            Ok(receipt) => {
                entry.status = JobStatus::Sent;
                entry.completed_at = Some(Utc::now());
                entry.last_error = None;
                entry.external_message_id = Some(receipt.external_id);
                let attempts = entry.attempts;
                let updated = entry.clone();
                drop(tracked);
                tracing::info!(%organization_id, job_id = %job.id, attempts, "message sent");
                self.events.publish(MessagingEvent::JobSent {
                    organization_id,
                    job_id: job.id,
                    attempts,
                });
                (Some(updated), None)
            }
            Err(SendError::SessionNotReady) => {
                // Never reached the transport, so the attempt does not count.
                entry.status = JobStatus::Pending;
                entry.attempts = entry.attempts.saturating_sub(1);
                let updated = entry.clone();
                drop(tracked);
                tracing::debug!(%organization_id, job_id = %job.id, "session dropped before hand-off, requeued");
                let requeue = QueuedJob {
                    id: job.id,
                    sequence,
                    not_before: None,
                };
                (Some(updated), Some(requeue))
            }
            Err(SendError::Transport(e))
                if e.is_transient() && RetryHandler::should_retry(&self.config.send_retry, entry.attempts) =>
            {
                let attempts = entry.attempts;
                let delay = RetryHandler::delay_for(&self.config.send_retry, attempts);
                entry.status = JobStatus::Pending;
                entry.last_error = Some(e.to_string());
                let updated = entry.clone();
                drop(tracked);
                tracing::warn!(
                    %organization_id,
                    job_id = %job.id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "send failed, will retry"
                );
                let requeue = QueuedJob {
                    id: job.id,
                    sequence,
                    not_before: Some(Instant::now() + delay),
                };
                (Some(updated), Some(requeue))
            }
            Err(SendError::Transport(e)) => {
                entry.status = JobStatus::Failed;
                entry.completed_at = Some(Utc::now());
                entry.last_error = Some(e.to_string());
                let attempts = entry.attempts;
                let updated = entry.clone();
                drop(tracked);
                tracing::error!(%organization_id, job_id = %job.id, attempts, error = %e, "send failed permanently");
                self.events.publish(MessagingEvent::JobFailed {
                    organization_id,
                    job_id: job.id,
                    attempts,
                    error: e.to_string(),
                });
                (Some(updated), None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
