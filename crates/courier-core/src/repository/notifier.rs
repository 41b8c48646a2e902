//! Agent notification port.

use courier_types::message::{Conversation, MessageRecord};

/// Tells the agent layer about a newly stored inbound message.
pub trait AgentNotifier: Send + Sync + 'static {
    fn notify(
        &self,
        message: &MessageRecord,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// Notifier for deployments without an agent layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl AgentNotifier for NoopNotifier {
    async fn notify(&self, _message: &MessageRecord, _conversation: &Conversation) -> anyhow::Result<()> {
        Ok(())
    }
}
