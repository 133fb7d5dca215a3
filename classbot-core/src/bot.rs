//! Delivery abstraction for outbound intents.
//!
//! [`Bot`] is transport-agnostic; the Telegram implementation lives in `classbot-telegram`,
//! the console implementation in the `classbot` binary.

use crate::error::Result;
use crate::types::{OutboundIntent, UserId};
use async_trait::async_trait;
use tracing::warn;

/// Sends outbound intents. Implementations map to a transport (e.g. Telegram private chats).
#[async_trait]
pub trait Bot: Send + Sync {
    /// Sends one intent to a single recipient.
    async fn send_intent(&self, target: UserId, intent: &OutboundIntent) -> Result<()>;

    /// Sends the intent to every target in order. Stops at the first failed send.
    async fn deliver(&self, intent: &OutboundIntent) -> Result<()> {
        for target in &intent.targets {
            self.send_intent(*target, intent).await?;
        }
        Ok(())
    }

    /// Sends the intent to every target, continuing past failed sends. Returns how many failed.
    async fn deliver_each(&self, intent: &OutboundIntent) -> usize {
        let mut failed = 0;
        for target in &intent.targets {
            if let Err(e) = self.send_intent(*target, intent).await {
                warn!(user_id = *target, error = %e, "Delivery failed");
                failed += 1;
            }
        }
        failed
    }
}
