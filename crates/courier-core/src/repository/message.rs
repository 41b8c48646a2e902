//! Message store trait definition.

use chrono::{DateTime, Utc};
use courier_types::error::RepositoryError;
use courier_types::message::{ClientRef, Conversation, InsertOutcome, MessageRecord};
use courier_types::organization::OrganizationId;
use uuid::Uuid;

/// Persistence for conversations and messages.
///
/// Implementations live in courier-infra (e.g., SqliteMessageStore).
pub trait MessageStore: Send + Sync + 'static {
    /// Find the CRM client whose phone number matches `contact` (digits only).
    fn find_client_by_contact(
        &self,
        organization_id: OrganizationId,
        contact: &str,
    ) -> impl std::future::Future<Output = Result<Option<ClientRef>, RepositoryError>> + Send;

    /// Get or create the conversation for `(organization_id, contact)`,
    /// advancing `last_message_at` to `at` if it is newer.
    fn upsert_conversation(
        &self,
        organization_id: OrganizationId,
        contact: &str,
        client_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    /// Insert a message unless `(organization_id, external_id)` already exists.
    fn insert_message(
        &self,
        message: &MessageRecord,
    ) -> impl std::future::Future<Output = Result<InsertOutcome, RepositoryError>> + Send;

    /// Most recent messages of a conversation, newest first.
    fn list_messages(
        &self,
        organization_id: OrganizationId,
        conversation_id: Uuid,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<MessageRecord>, RepositoryError>> + Send;

    /// Conversations ordered by most recent activity.
    fn list_conversations(
        &self,
        organization_id: OrganizationId,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;
}
