//! SQLite send job store.
//!
//! Implements `JobStore` from `courier-core`. A job that reaches SENT is
//! also written to the conversation history as an outbound message, keyed
//! by the network's receipt id, in the same transaction as the status change.

use chrono::{DateTime, Utc};
use courier_core::repository::job::{JobStore, StoredJob};
use courier_types::error::RepositoryError;
use courier_types::inbound::InboundKind;
use courier_types::job::{JobId, JobStatus, MessagePayload, SendJob};
use courier_types::message::Direction;
use courier_types::organization::OrganizationId;
use courier_types::recipient::Recipient;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, map_sqlx, parse_datetime, parse_uuid};

/// Sender recorded on outbound history rows.
pub const OUTBOUND_SENDER: &str = "agent";

/// SQLite-backed implementation of `JobStore`.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: DatabasePool,
}

impl SqliteJobStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct JobRow {
    id: String,
    organization_id: String,
    sequence: i64,
    recipient: String,
    body: String,
    media_url: Option<String>,
    enqueued_at: String,
    attempts: i64,
    last_attempt_at: Option<String>,
    status: String,
    last_error: Option<String>,
    completed_at: Option<String>,
    external_message_id: Option<String>,
}

impl JobRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            sequence: row.try_get("sequence")?,
            recipient: row.try_get("recipient")?,
            body: row.try_get("body")?,
            media_url: row.try_get("media_url")?,
            enqueued_at: row.try_get("enqueued_at")?,
            attempts: row.try_get("attempts")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            status: row.try_get("status")?,
            last_error: row.try_get("last_error")?,
            completed_at: row.try_get("completed_at")?,
            external_message_id: row.try_get("external_message_id")?,
        })
    }

    fn into_stored(self) -> Result<StoredJob, RepositoryError> {
        let recipient = Recipient::parse(&self.recipient)
            .map_err(|e| RepositoryError::Query(format!("invalid stored recipient: {e}")))?;
        let job = SendJob {
            id: JobId(parse_uuid(&self.id)?),
            organization_id: OrganizationId(parse_uuid(&self.organization_id)?),
            recipient,
            payload: MessagePayload {
                body: self.body,
                media_url: self.media_url,
            },
            enqueued_at: parse_datetime(&self.enqueued_at)?,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_attempt_at: self.last_attempt_at.as_deref().map(parse_datetime).transpose()?,
            status: self.status.parse().map_err(RepositoryError::Query)?,
            last_error: self.last_error,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            external_message_id: self.external_message_id,
        };
        Ok(StoredJob {
            job,
            sequence: u64::try_from(self.sequence).unwrap_or(0),
        })
    }
}

fn format_optional(dt: Option<&DateTime<Utc>>) -> Option<String> {
    dt.map(format_datetime)
}

fn map_insert_error(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.message().contains("UNIQUE")
    {
        return RepositoryError::Conflict(db_err.message().to_string());
    }
    map_sqlx(err)
}

// ---------------------------------------------------------------------------
// JobStore impl
// ---------------------------------------------------------------------------

impl JobStore for SqliteJobStore {
    async fn insert_jobs(&self, jobs: &[StoredJob]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;
        for StoredJob { job, sequence } in jobs {
            sqlx::query(
                r#"INSERT INTO send_jobs
                   (id, organization_id, sequence, recipient, body, media_url, enqueued_at,
                    attempts, last_attempt_at, status, last_error, completed_at, external_message_id)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(job.id.to_string())
            .bind(job.organization_id.to_string())
            .bind(*sequence as i64)
            .bind(job.recipient.as_str())
            .bind(&job.payload.body)
            .bind(job.payload.media_url.as_deref())
            .bind(format_datetime(&job.enqueued_at))
            .bind(i64::from(job.attempts))
            .bind(format_optional(job.last_attempt_at.as_ref()))
            .bind(job.status.to_string())
            .bind(job.last_error.as_deref())
            .bind(format_optional(job.completed_at.as_ref()))
            .bind(job.external_message_id.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(map_insert_error)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_job(&self, job: &SendJob) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;
        let result = sqlx::query(
            r#"UPDATE send_jobs SET
                   attempts = ?, last_attempt_at = ?, status = ?, last_error = ?,
                   completed_at = ?, external_message_id = ?
               WHERE id = ?"#,
        )
        .bind(i64::from(job.attempts))
        .bind(format_optional(job.last_attempt_at.as_ref()))
        .bind(job.status.to_string())
        .bind(job.last_error.as_deref())
        .bind(format_optional(job.completed_at.as_ref()))
        .bind(job.external_message_id.as_deref())
        .bind(job.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        if job.status == JobStatus::Sent
            && let Some(external_id) = job.external_message_id.as_deref()
        {
            let sent_at = job.completed_at.unwrap_or_else(Utc::now);
            let at = format_datetime(&sent_at);
            let contact = job.recipient.as_str();
            let organization_id = job.organization_id.to_string();

            let row = sqlx::query(
                r#"INSERT INTO conversations
                   (id, organization_id, contact, client_id, created_at, last_message_at)
                   VALUES (?, ?, ?, (SELECT id FROM clients
                                     WHERE organization_id = ? AND phone = ?
                                     ORDER BY created_at LIMIT 1), ?, ?)
                   ON CONFLICT (organization_id, contact) DO UPDATE SET
                       client_id = COALESCE(excluded.client_id, conversations.client_id),
                       last_message_at = MAX(conversations.last_message_at, excluded.last_message_at)
                   RETURNING id"#,
            )
            .bind(Uuid::now_v7().to_string())
            .bind(&organization_id)
            .bind(contact)
            .bind(&organization_id)
            .bind(contact)
            .bind(&at)
            .bind(&at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            let conversation_id: String = row.try_get("id").map_err(map_sqlx)?;

            sqlx::query(
                r#"INSERT INTO messages
                   (id, organization_id, conversation_id, external_id, direction, sender,
                    body, kind, has_media, sent_at, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (organization_id, external_id) DO NOTHING"#,
            )
            .bind(Uuid::now_v7().to_string())
            .bind(&organization_id)
            .bind(&conversation_id)
            .bind(external_id)
            .bind(Direction::Outbound.to_string())
            .bind(OUTBOUND_SENDER)
            .bind(&job.payload.body)
            .bind(InboundKind::Chat.as_str())
            .bind(job.payload.media_url.is_some())
            .bind(&at)
            .bind(format_datetime(&Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn load_unfinished(&self) -> Result<Vec<StoredJob>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM send_jobs
               WHERE status IN ('PENDING', 'IN_FLIGHT')
               ORDER BY sequence"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(JobRow::from_row(row).map_err(map_sqlx)?.into_stored()?);
        }
        Ok(jobs)
    }

    async fn load_attempted_since(&self, since: DateTime<Utc>) -> Result<Vec<SendJob>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM send_jobs
               WHERE last_attempt_at IS NOT NULL AND last_attempt_at >= ?
               ORDER BY last_attempt_at"#,
        )
        .bind(format_datetime(&since))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(JobRow::from_row(row).map_err(map_sqlx)?.into_stored()?.job);
        }
        Ok(jobs)
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"DELETE FROM send_jobs
               WHERE status IN ('SENT', 'FAILED', 'CANCELLED')
                 AND completed_at IS NOT NULL AND completed_at < ?"#,
        )
        .bind(format_datetime(&before))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}
