//! Outbound hooks into the chat layer
//!
//! Every call is fire-and-forget from the ledger's side. Failures are
//! logged by the caller and never undo a state transition.
use crate::deal::Receipt;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post the completion proof, unpin and remove the deal message.
    async fn deal_completed(&self, receipt: &Receipt) -> anyhow::Result<()>;

    async fn deal_cancelled(&self, receipt: &Receipt) -> anyhow::Result<()>;

    /// Remove a member from the group and let them back in, clearing any
    /// residual deal state on the chat side. Implementations skip group
    /// admins.
    async fn refresh_membership(&self, group_ref: &str, member_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn deal_completed(&self, _: &Receipt) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deal_cancelled(&self, _: &Receipt) -> anyhow::Result<()> {
        Ok(())
    }

    async fn refresh_membership(&self, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes every request to the log instead of a chat.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deal_completed(&self, receipt: &Receipt) -> anyhow::Result<()> {
        info!(
            deal_id = %receipt.deal.deal_id,
            deal_ref = %receipt.deal.deal_ref,
            digest = %receipt.digest,
            "deal completed"
        );
        Ok(())
    }

    async fn deal_cancelled(&self, receipt: &Receipt) -> anyhow::Result<()> {
        info!(
            deal_id = %receipt.deal.deal_id,
            deal_ref = %receipt.deal.deal_ref,
            "deal cancelled"
        );
        Ok(())
    }

    async fn refresh_membership(&self, group_ref: &str, member_id: &str) -> anyhow::Result<()> {
        info!(group = group_ref, member = member_id, "membership refresh requested");
        Ok(())
    }
}
