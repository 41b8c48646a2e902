//! SQLite organization settings repository.
//!
//! Settings are stored exactly as the CRM wrote them (a JSON blob) and are
//! normalized on every load through `validate_settings`. The same row holds
//! the SHA-256 digest of the organization's bulk-send confirmation secret.

use chrono::Utc;
use courier_core::repository::settings::{ConfirmationValidator, SettingsProvider};
use courier_types::confirmation::ConfirmationToken;
use courier_types::error::RepositoryError;
use courier_types::organization::OrganizationId;
use courier_types::settings::{MessagingSettings, StoredSettings, validate_settings};
use serde_json::Value;

use super::pool::DatabasePool;
use super::{format_datetime, map_sqlx};
use crate::crypto;

#[derive(Clone)]
pub struct SqliteSettingsRepository {
    pool: DatabasePool,
}

impl SqliteSettingsRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// The stored blob, if the organization has saved settings.
    ///
    /// A blob that is not valid JSON is logged and treated as absent.
    pub async fn raw_settings(&self, organization_id: OrganizationId) -> Result<Option<Value>, RepositoryError> {
        let stored: Option<(String,)> =
            sqlx::query_as("SELECT settings FROM organization_settings WHERE organization_id = ?")
                .bind(organization_id.to_string())
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;

        let Some((text,)) = stored else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(%organization_id, error = %e, "stored settings are not valid JSON, using defaults");
                Ok(None)
            }
        }
    }

    /// Replace the stored blob and return the effective settings it yields.
    /// The blob is stored as given; clamping happens on load.
    pub async fn store_settings(
        &self,
        organization_id: OrganizationId,
        raw: &Value,
    ) -> Result<MessagingSettings, RepositoryError> {
        let text = serde_json::to_string(raw).map_err(|e| RepositoryError::Query(format!("serialize settings: {e}")))?;
        sqlx::query(
            r#"INSERT INTO organization_settings (organization_id, settings, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT (organization_id) DO UPDATE SET
                   settings = excluded.settings,
                   updated_at = excluded.updated_at"#,
        )
        .bind(organization_id.to_string())
        .bind(&text)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        tracing::info!(%organization_id, "messaging settings updated");
        Ok(validate_settings(&StoredSettings::from_json(raw)))
    }

    /// Set the secret bulk sends must present. Only its digest is stored.
    pub async fn set_confirmation_secret(
        &self,
        organization_id: OrganizationId,
        secret: &ConfirmationToken,
    ) -> Result<(), RepositoryError> {
        if secret.is_blank() {
            return Err(RepositoryError::Conflict("confirmation secret must not be blank".into()));
        }
        sqlx::query(
            r#"INSERT INTO organization_settings (organization_id, confirmation_hash, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT (organization_id) DO UPDATE SET
                   confirmation_hash = excluded.confirmation_hash,
                   updated_at = excluded.updated_at"#,
        )
        .bind(organization_id.to_string())
        .bind(crypto::digest_hex(secret.expose()))
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        tracing::info!(%organization_id, "confirmation secret updated");
        Ok(())
    }

    pub async fn has_confirmation_secret(&self, organization_id: OrganizationId) -> Result<bool, RepositoryError> {
        Ok(self.confirmation_hash(organization_id).await?.is_some())
    }

    async fn confirmation_hash(&self, organization_id: OrganizationId) -> Result<Option<String>, RepositoryError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT confirmation_hash FROM organization_settings WHERE organization_id = ?")
                .bind(organization_id.to_string())
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
        Ok(row.and_then(|(hash,)| hash))
    }
}

impl SettingsProvider for SqliteSettingsRepository {
    async fn load_settings(&self, organization_id: OrganizationId) -> Result<MessagingSettings, RepositoryError> {
        let stored = self
            .raw_settings(organization_id)
            .await?
            .map(|raw| StoredSettings::from_json(&raw))
            .unwrap_or_default();
        Ok(validate_settings(&stored))
    }
}

impl ConfirmationValidator for SqliteSettingsRepository {
    async fn validate(
        &self,
        organization_id: OrganizationId,
        token: &ConfirmationToken,
        item_count: usize,
    ) -> Result<bool, RepositoryError> {
        let Some(stored) = self.confirmation_hash(organization_id).await? else {
            tracing::warn!(%organization_id, item_count, "bulk confirmation presented but no secret is configured");
            return Ok(false);
        };
        let accepted = crypto::verify_digest(&stored, token.expose());
        tracing::debug!(%organization_id, item_count, accepted, "bulk confirmation checked");
        Ok(accepted)
    }
}
