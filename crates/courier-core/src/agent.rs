//! The send API offered to AI agents.
//!
//! Agents never touch the queue directly. Every request passes admission
//! here first: recipient and payload validation for single sends, and the
//! organization's safety policy for bulk sends. A refused request creates
//! no jobs at all. Admission also refreshes the organization's rate limits,
//! so a settings change takes effect on the next request.

use std::sync::Arc;

use courier_types::confirmation::ConfirmationToken;
use courier_types::error::AdmissionError;
use courier_types::job::{BulkItem, BulkItemResult, JobId, MessagePayload, SendJob};
use courier_types::organization::OrganizationId;
use courier_types::recipient::Recipient;
use courier_types::settings::MessagingSettings;

use crate::outgoing::OutgoingQueue;
use crate::rate_limit::RateLimiter;
use crate::repository::job::JobStore;
use crate::repository::settings::{ConfirmationValidator, SettingsProvider};
use crate::transport::MessageSender;

pub struct AgentApi<S: MessageSender, J: JobStore, P: SettingsProvider, V: ConfirmationValidator> {
    queue: OutgoingQueue<S, J>,
    limiter: Arc<RateLimiter>,
    settings: P,
    validator: V,
}

impl<S, J, P, V> AgentApi<S, J, P, V>
where
    S: MessageSender,
    J: JobStore,
    P: SettingsProvider,
    V: ConfirmationValidator,
{
    pub fn new(queue: OutgoingQueue<S, J>, limiter: Arc<RateLimiter>, settings: P, validator: V) -> Self {
        Self {
            queue,
            limiter,
            settings,
            validator,
        }
    }

    /// Load the organization's effective settings and install its rate limits.
    pub async fn reload_settings(&self, organization_id: OrganizationId) -> Result<MessagingSettings, AdmissionError> {
        let settings = self
            .settings
            .load_settings(organization_id)
            .await
            .map_err(AdmissionError::Settings)?;
        self.limiter.configure(organization_id, settings.rate_limiting);
        Ok(settings)
    }

    /// Queue one message. Returns as soon as the job is recorded.
    pub async fn send_message_for_agent(
        &self,
        organization_id: OrganizationId,
        recipient: &str,
        payload: MessagePayload,
    ) -> Result<JobId, AdmissionError> {
        let recipient = Recipient::parse(recipient)?;
        if payload.is_empty() {
            return Err(AdmissionError::EmptyPayload);
        }
        self.reload_settings(organization_id).await?;

        let job_id = self.queue.enqueue(SendJob::new(organization_id, recipient, payload)).await?;
        tracing::info!(%organization_id, %job_id, "agent message queued");
        Ok(job_id)
    }

    /// Queue a batch. The batch as a whole is either admitted or refused;
    /// once admitted, each item is validated on its own and every valid item
    /// is queued in one store write, so a failure queues none of them.
    pub async fn send_bulk_messages_for_agent(
        &self,
        organization_id: OrganizationId,
        items: Vec<BulkItem>,
        confirmation: Option<ConfirmationToken>,
    ) -> Result<Vec<BulkItemResult>, AdmissionError> {
        let settings = self.reload_settings(organization_id).await?;
        let safety = settings.safety;

        if !safety.enable_mass_sending {
            tracing::warn!(%organization_id, items = items.len(), "bulk send refused: mass sending disabled");
            return Err(AdmissionError::MassSendingDisabled);
        }
        if items.len() > safety.max_batch_size as usize {
            tracing::warn!(
                %organization_id,
                items = items.len(),
                max = safety.max_batch_size,
                "bulk send refused: batch too large"
            );
            return Err(AdmissionError::BatchTooLarge {
                size: items.len(),
                max: safety.max_batch_size,
            });
        }
        if safety.require_confirmation {
            let Some(token) = confirmation.filter(|t| !t.is_blank()) else {
                return Err(AdmissionError::ConfirmationRequired);
            };
            let accepted = self
                .validator
                .validate(organization_id, &token, items.len())
                .await
                .map_err(AdmissionError::Settings)?;
            if !accepted {
                tracing::warn!(%organization_id, "bulk send refused: confirmation rejected");
                return Err(AdmissionError::ConfirmationRejected);
            }
        }

        self.queue.ensure_open()?;

        let mut results = Vec::with_capacity(items.len());
        let mut jobs = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            match Self::validate_item(item) {
                Ok((recipient, payload)) => {
                    let job = SendJob::new(organization_id, recipient, payload);
                    results.push(BulkItemResult::Queued { index, job_id: job.id });
                    jobs.push(job);
                }
                Err(reason) => results.push(BulkItemResult::Rejected { index, reason }),
            }
        }
        let queued = jobs.len();
        self.queue.enqueue_batch(jobs).await?;
        tracing::info!(%organization_id, queued, rejected = results.len() - queued, "bulk send admitted");
        Ok(results)
    }

    /// Per-item checks for a bulk send. The error is the rejection reason.
    fn validate_item(item: BulkItem) -> Result<(Recipient, MessagePayload), String> {
        let recipient = Recipient::parse(&item.recipient).map_err(|e| AdmissionError::from(e).to_string())?;
        if item.payload.is_empty() {
            return Err(AdmissionError::EmptyPayload.to_string());
        }
        Ok((recipient, item.payload))
    }

    pub fn queue(&self) -> &OutgoingQueue<S, J> {
        &self.queue
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
