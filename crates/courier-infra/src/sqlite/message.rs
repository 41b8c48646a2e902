//! SQLite conversation and message store.
//!
//! Implements `MessageStore` from `courier-core`. Message inserts are
//! idempotent on `(organization_id, external_id)`, which is what makes a
//! redelivered inbound event a no-op.

use chrono::{DateTime, Utc};
use courier_core::repository::message::MessageStore;
use courier_types::error::RepositoryError;
use courier_types::inbound::InboundKind;
use courier_types::message::{ClientRef, Conversation, Direction, InsertOutcome, MessageRecord};
use courier_types::organization::OrganizationId;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, map_sqlx, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `MessageStore`.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: DatabasePool,
}

impl SqliteMessageStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Register a CRM client so inbound messages from `phone` link to it.
    ///
    /// Client records are owned by the CRM; this exists for seeding and tests.
    pub async fn insert_client(
        &self,
        organization_id: OrganizationId,
        name: &str,
        phone: &str,
    ) -> Result<ClientRef, RepositoryError> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"INSERT INTO clients (id, organization_id, name, phone, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .bind(name)
        .bind(phone)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(ClientRef {
            id,
            name: name.to_string(),
        })
    }

    /// Row counts across every organization, for status surfaces.
    pub async fn totals(&self) -> Result<StoreTotals, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT
                   (SELECT COUNT(DISTINCT organization_id) FROM conversations) AS organizations,
                   (SELECT COUNT(*) FROM conversations) AS conversations,
                   (SELECT COUNT(*) FROM messages) AS messages"#,
        )
        .fetch_one(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        Ok(StoreTotals {
            organizations: row.try_get("organizations").map_err(map_sqlx)?,
            conversations: row.try_get("conversations").map_err(map_sqlx)?,
            messages: row.try_get("messages").map_err(map_sqlx)?,
        })
    }
}

/// Aggregate counts returned by [`SqliteMessageStore::totals`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreTotals {
    pub organizations: i64,
    pub conversations: i64,
    pub messages: i64,
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    organization_id: String,
    contact: String,
    client_id: Option<String>,
    created_at: String,
    last_message_at: String,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            contact: row.try_get("contact")?,
            client_id: row.try_get("client_id")?,
            created_at: row.try_get("created_at")?,
            last_message_at: row.try_get("last_message_at")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        Ok(Conversation {
            id: parse_uuid(&self.id)?,
            organization_id: OrganizationId(parse_uuid(&self.organization_id)?),
            contact: self.contact,
            client_id: self.client_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            last_message_at: parse_datetime(&self.last_message_at)?,
        })
    }
}

struct MessageRow {
    id: String,
    organization_id: String,
    conversation_id: String,
    external_id: String,
    direction: String,
    sender: String,
    body: String,
    kind: String,
    has_media: bool,
    sent_at: String,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            conversation_id: row.try_get("conversation_id")?,
            external_id: row.try_get("external_id")?,
            direction: row.try_get("direction")?,
            sender: row.try_get("sender")?,
            body: row.try_get("body")?,
            kind: row.try_get("kind")?,
            has_media: row.try_get("has_media")?,
            sent_at: row.try_get("sent_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_record(self) -> Result<MessageRecord, RepositoryError> {
        let direction: Direction = self.direction.parse().map_err(RepositoryError::Query)?;
        Ok(MessageRecord {
            id: parse_uuid(&self.id)?,
            organization_id: OrganizationId(parse_uuid(&self.organization_id)?),
            conversation_id: parse_uuid(&self.conversation_id)?,
            external_id: self.external_id,
            direction,
            sender: self.sender,
            body: self.body,
            kind: InboundKind::parse(&self.kind),
            has_media: self.has_media,
            sent_at: parse_datetime(&self.sent_at)?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// MessageStore impl
// ---------------------------------------------------------------------------

impl MessageStore for SqliteMessageStore {
    async fn find_client_by_contact(
        &self,
        organization_id: OrganizationId,
        contact: &str,
    ) -> Result<Option<ClientRef>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT id, name FROM clients
               WHERE organization_id = ? AND phone = ?
               ORDER BY created_at
               LIMIT 1"#,
        )
        .bind(organization_id.to_string())
        .bind(contact)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        row.map(|row| {
            let id: String = row.try_get("id").map_err(map_sqlx)?;
            Ok(ClientRef {
                id: parse_uuid(&id)?,
                name: row.try_get("name").map_err(map_sqlx)?,
            })
        })
        .transpose()
    }

    async fn upsert_conversation(
        &self,
        organization_id: OrganizationId,
        contact: &str,
        client_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        let at = format_datetime(&at);
        let row = sqlx::query(
            r#"INSERT INTO conversations
               (id, organization_id, contact, client_id, created_at, last_message_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (organization_id, contact) DO UPDATE SET
                   client_id = COALESCE(excluded.client_id, conversations.client_id),
                   last_message_at = MAX(conversations.last_message_at, excluded.last_message_at)
               RETURNING id, organization_id, contact, client_id, created_at, last_message_at"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(organization_id.to_string())
        .bind(contact)
        .bind(client_id.map(|id| id.to_string()))
        .bind(&at)
        .bind(&at)
        .fetch_one(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        ConversationRow::from_row(&row)
            .map_err(map_sqlx)?
            .into_conversation()
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<InsertOutcome, RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO messages
               (id, organization_id, conversation_id, external_id, direction, sender,
                body, kind, has_media, sent_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (organization_id, external_id) DO NOTHING"#,
        )
        .bind(message.id.to_string())
        .bind(message.organization_id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(&message.external_id)
        .bind(message.direction.to_string())
        .bind(&message.sender)
        .bind(&message.body)
        .bind(message.kind.as_str())
        .bind(message.has_media)
        .bind(format_datetime(&message.sent_at))
        .bind(format_datetime(&message.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn list_messages(
        &self,
        organization_id: OrganizationId,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM messages
               WHERE organization_id = ? AND conversation_id = ?
               ORDER BY sent_at DESC, created_at DESC
               LIMIT ?"#,
        )
        .bind(organization_id.to_string())
        .bind(conversation_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(MessageRow::from_row(row).map_err(map_sqlx)?.into_record()?);
        }
        Ok(messages)
    }

    async fn list_conversations(
        &self,
        organization_id: OrganizationId,
        limit: i64,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM conversations
               WHERE organization_id = ?
               ORDER BY last_message_at DESC
               LIMIT ?"#,
        )
        .bind(organization_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in &rows {
            conversations.push(ConversationRow::from_row(row).map_err(map_sqlx)?.into_conversation()?);
        }
        Ok(conversations)
    }
}
