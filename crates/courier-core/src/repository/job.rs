//! Outbound job store trait definition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use courier_types::error::RepositoryError;
use courier_types::job::{JobId, SendJob};

/// A job as written to the store. `sequence` is the global enqueue order;
/// dispatch within an organization follows it.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub job: SendJob,
    pub sequence: u64,
}

/// Durable record of every admitted send job.
///
/// Implementations live in courier-infra (e.g., SqliteJobStore).
pub trait JobStore: Send + Sync + 'static {
    /// Record newly admitted jobs. Either every job is stored or none is.
    fn insert_jobs(
        &self,
        jobs: &[StoredJob],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist a job's status, attempts, last error and receipt.
    ///
    /// When the job is SENT, implementations that keep conversation history
    /// also record it there as an outbound message keyed by the receipt id.
    fn update_job(&self, job: &SendJob) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Every PENDING or IN_FLIGHT job, in sequence order.
    fn load_unfinished(&self) -> impl std::future::Future<Output = Result<Vec<StoredJob>, RepositoryError>> + Send;

    /// Jobs whose latest attempt was handed to the transport at or after
    /// `since`, whatever their status.
    fn load_attempted_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<SendJob>, RepositoryError>> + Send;

    /// Delete terminal jobs completed before `before`. Returns how many went.
    fn purge_finished(
        &self,
        before: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Process-local job store for deployments that accept losing queued work
/// on restart. Clones share the same jobs. Keeps no conversation history.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, StoredJob>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, StoredJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored copy of a job.
    pub fn get(&self, id: JobId) -> Option<SendJob> {
        self.lock().get(&id).map(|stored| stored.job.clone())
    }
}

impl JobStore for MemoryJobStore {
    async fn insert_jobs(&self, jobs: &[StoredJob]) -> Result<(), RepositoryError> {
        let mut stored = self.lock();
        if let Some(existing) = jobs.iter().find(|j| stored.contains_key(&j.job.id)) {
            return Err(RepositoryError::Conflict(format!("job {} already stored", existing.job.id)));
        }
        for job in jobs {
            stored.insert(job.job.id, job.clone());
        }
        Ok(())
    }

    async fn update_job(&self, job: &SendJob) -> Result<(), RepositoryError> {
        let mut stored = self.lock();
        let entry = stored.get_mut(&job.id).ok_or(RepositoryError::NotFound)?;
        entry.job = job.clone();
        Ok(())
    }

    async fn load_unfinished(&self) -> Result<Vec<StoredJob>, RepositoryError> {
        let mut jobs: Vec<StoredJob> = self
            .lock()
            .values()
            .filter(|stored| !stored.job.status.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by_key(|stored| stored.sequence);
        Ok(jobs)
    }

    async fn load_attempted_since(&self, since: DateTime<Utc>) -> Result<Vec<SendJob>, RepositoryError> {
        Ok(self
            .lock()
            .values()
            .filter(|stored| stored.job.last_attempt_at.is_some_and(|at| at >= since))
            .map(|stored| stored.job.clone())
            .collect())
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut stored = self.lock();
        let count = stored.len();
        stored.retain(|_, s| !(s.job.status.is_terminal() && s.job.completed_at.is_some_and(|at| at < before)));
        Ok((count - stored.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::job::{JobStatus, MessagePayload};
    use courier_types::organization::OrganizationId;
    use courier_types::recipient::Recipient;

    fn stored(sequence: u64) -> StoredJob {
        StoredJob {
            job: SendJob::new(
                OrganizationId::new(),
                Recipient::parse("5511999990000").unwrap(),
                MessagePayload::text("hi"),
            ),
            sequence,
        }
    }

    #[tokio::test]
    async fn unfinished_jobs_load_in_sequence_order() {
        let store = MemoryJobStore::new();
        let (late, early, done) = (stored(7), stored(2), stored(1));
        store.insert_jobs(&[late.clone(), early.clone(), done.clone()]).await.unwrap();

        let mut finished = done.job.clone();
        finished.status = JobStatus::Sent;
        finished.completed_at = Some(Utc::now());
        store.update_job(&finished).await.unwrap();

        let ids: Vec<JobId> = store.load_unfinished().await.unwrap().iter().map(|s| s.job.id).collect();
        assert_eq!(ids, vec![early.job.id, late.job.id]);
    }

    #[tokio::test]
    async fn batch_with_a_duplicate_stores_nothing() {
        let store = MemoryJobStore::new();
        let first = stored(0);
        store.insert_jobs(&[first.clone()]).await.unwrap();

        let fresh = stored(1);
        let err = store.insert_jobs(&[fresh.clone(), first]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert!(store.get(fresh.job.id).is_none());
    }

    #[tokio::test]
    async fn updating_unknown_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store.update_job(&stored(0).job).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
