//! Organization settings and bulk-send confirmation ports.

use courier_types::confirmation::ConfirmationToken;
use courier_types::error::RepositoryError;
use courier_types::organization::OrganizationId;
use courier_types::settings::MessagingSettings;

/// Source of each organization's effective messaging settings.
pub trait SettingsProvider: Send + Sync + 'static {
    /// Load and normalize the organization's settings. Organizations with no
    /// stored settings get the defaults.
    fn load_settings(
        &self,
        organization_id: OrganizationId,
    ) -> impl std::future::Future<Output = Result<MessagingSettings, RepositoryError>> + Send;
}

/// Decides whether a bulk send's confirmation token is acceptable.
pub trait ConfirmationValidator: Send + Sync + 'static {
    fn validate(
        &self,
        organization_id: OrganizationId,
        token: &ConfirmationToken,
        item_count: usize,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
